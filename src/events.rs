use serde::{Deserialize, Serialize};

use crate::error::{Result, RiskError};
use crate::types::{EventId, RlzId, RuptureId};

/// A simulated event: one occurrence of a rupture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub eid: EventId,
    pub rup_id: RuptureId,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Realization {
    pub ordinal: RlzId,
    pub weight: f64,
}

/// The fixed, ordered set of realizations of a calculation.
#[derive(Debug, Clone)]
pub struct Realizations {
    weights: Vec<f64>,
}

impl Realizations {
    /// Ordinals must be exactly `0..R` (in any input order); weights must be
    /// positive and finite.
    pub fn new(mut rlzs: Vec<Realization>) -> Result<Self> {
        if rlzs.is_empty() {
            return Err(RiskError::Data("no realizations".to_string()));
        }
        rlzs.sort_by_key(|r| r.ordinal);
        for (r, rlz) in rlzs.iter().enumerate() {
            if rlz.ordinal.index() != r {
                return Err(RiskError::Data(format!(
                    "realization ordinals must be 0..{}, found {}",
                    rlzs.len(),
                    rlz.ordinal.0
                )));
            }
            if !(rlz.weight > 0.0) || !rlz.weight.is_finite() {
                return Err(RiskError::Data(format!(
                    "realization {} has invalid weight {}",
                    r, rlz.weight
                )));
            }
        }
        let total: f64 = rlzs.iter().map(|r| r.weight).sum();
        Ok(Realizations { weights: rlzs.iter().map(|r| r.weight / total).collect() })
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Normalised weights, indexed by ordinal.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

/// Bidirectional event index built once per run.
///
/// Position `e` in `[0, E)` is the rank of the event id in ascending order.
/// Epsilon columns, the aggregate array's event axis and the event loss
/// table all use this position, so it is the only event ordering in a run.
#[derive(Debug, Clone)]
pub struct EventIndex {
    eids: Vec<EventId>,
    /// Rupture ordinal of each event position.
    rup_idx: Vec<usize>,
    ruptures: Vec<RuptureId>,
}

impl EventIndex {
    pub fn new(events: &[Event]) -> Result<Self> {
        let mut sorted: Vec<Event> = events.to_vec();
        sorted.sort_by_key(|e| e.eid);
        if let Some(w) = sorted.windows(2).find(|w| w[0].eid == w[1].eid) {
            return Err(RiskError::Data(format!("duplicate event id {}", w[0].eid.0)));
        }

        let mut ruptures: Vec<RuptureId> = sorted.iter().map(|e| e.rup_id).collect();
        ruptures.sort_unstable();
        ruptures.dedup();
        let rup_idx = sorted
            .iter()
            .map(|e| ruptures.binary_search(&e.rup_id).unwrap_or_default())
            .collect();

        Ok(EventIndex { eids: sorted.iter().map(|e| e.eid).collect(), rup_idx, ruptures })
    }

    pub fn len(&self) -> usize {
        self.eids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eids.is_empty()
    }

    pub fn eids(&self) -> &[EventId] {
        &self.eids
    }

    pub fn eid(&self, idx: usize) -> Result<EventId> {
        self.eids
            .get(idx)
            .copied()
            .ok_or(RiskError::IndexOutOfRange { kind: "event", index: idx, len: self.eids.len() })
    }

    pub fn index_of(&self, eid: EventId) -> Result<usize> {
        self.eids
            .binary_search(&eid)
            .map_err(|_| RiskError::Data(format!("unknown event id {}", eid.0)))
    }

    pub fn rupture_index(&self, idx: usize) -> Result<usize> {
        self.rup_idx
            .get(idx)
            .copied()
            .ok_or(RiskError::IndexOutOfRange { kind: "event", index: idx, len: self.eids.len() })
    }

    pub fn ruptures(&self) -> &[RuptureId] {
        &self.ruptures
    }
}
