//! Hazard side of the calculation: simulated events and their ground motions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ParentParams;
use crate::events::{Event, Realization};
use crate::types::{EventId, RlzId, SiteId};

/// Ground-motion value of one event at one site under one realization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundMotion {
    pub site: SiteId,
    pub rlz: RlzId,
    pub eid: EventId,
    pub gmv: f64,
}

/// Supplies events, ground motions and realizations to the risk calculation.
pub trait HazardSource: Sync {
    fn events(&self) -> Vec<Event>;

    /// All ground motions at `site`, any realization, any order.
    fn ground_motions(&self, site: SiteId) -> Vec<GroundMotion>;

    fn realizations(&self) -> Vec<Realization>;

    /// Realizations sharing the same ground motions. One group by default.
    fn rlz_groups(&self) -> Vec<Vec<RlzId>> {
        vec![self.realizations().iter().map(|r| r.ordinal).collect()]
    }

    /// Parameters of the hazard calculation, when it was a separate run.
    fn parent_params(&self) -> Option<ParentParams> {
        None
    }
}

/// In-memory hazard table.
#[derive(Debug, Clone, Default)]
pub struct StaticHazard {
    events: Vec<Event>,
    by_site: BTreeMap<SiteId, Vec<GroundMotion>>,
    realizations: Vec<Realization>,
    parent: Option<ParentParams>,
}

impl StaticHazard {
    pub fn new(events: Vec<Event>, gmfs: Vec<GroundMotion>, realizations: Vec<Realization>) -> Self {
        let mut by_site: BTreeMap<SiteId, Vec<GroundMotion>> = BTreeMap::new();
        for gm in gmfs {
            by_site.entry(gm.site).or_default().push(gm);
        }
        StaticHazard { events, by_site, realizations, parent: None }
    }

    pub fn with_parent(mut self, parent: ParentParams) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn num_ground_motions(&self) -> usize {
        self.by_site.values().map(Vec::len).sum()
    }
}

impl HazardSource for StaticHazard {
    fn events(&self) -> Vec<Event> {
        self.events.clone()
    }

    fn ground_motions(&self, site: SiteId) -> Vec<GroundMotion> {
        self.by_site.get(&site).cloned().unwrap_or_default()
    }

    fn realizations(&self) -> Vec<Realization> {
        self.realizations.clone()
    }

    fn parent_params(&self) -> Option<ParentParams> {
        self.parent
    }
}
