//! Seeded synthetic event catalogs and exposures.
//!
//! Rupture counts per stochastic event set are Poisson; each rupture shakes
//! the sites around its epicentre with log-normal ground motions that decay
//! with distance. Not a hazard model, only realistic-looking input.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, LogNormal, Normal, Poisson};
use serde::{Deserialize, Serialize};

use crate::config::ParentParams;
use crate::error::{Result, RiskError};
use crate::events::{Event, Realization};
use crate::exposure::{Asset, AssetCollection};
use crate::hazard::{GroundMotion, StaticHazard};
use crate::types::{AssetId, EventId, RlzId, RuptureId, SiteId};

/// Ground motions below this are not stored.
const GMV_FLOOR: f64 = 1e-3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub seed: u64,
    pub num_sites: u32,
    /// Relative weights of the realizations; one realization per entry.
    pub rlz_weights: Vec<f64>,
    pub investigation_time: f64,
    pub ses_per_logic_tree_path: u32,
    /// Poisson λ: expected ruptures per year.
    pub annual_rupture_rate: f64,
    /// Poisson λ of additional occurrences of a rupture within one event set.
    pub extra_occurrences: f64,
    /// ln-space median ground motion at the epicentre.
    pub epicentre_mu: f64,
    /// Decay of ln ground motion per unit of site distance.
    pub attenuation: f64,
    pub sigma: f64,
    /// Ground motions below this are discarded, as in the risk run.
    pub minimum_intensity: f64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self::canonical()
    }
}

impl CatalogConfig {
    pub fn canonical() -> Self {
        CatalogConfig {
            seed: 42,
            num_sites: 20,
            rlz_weights: vec![0.5, 0.3, 0.2],
            investigation_time: 50.0,
            ses_per_logic_tree_path: 20,
            annual_rupture_rate: 0.4,
            extra_occurrences: 0.3,
            epicentre_mu: -1.2,
            attenuation: 0.35,
            sigma: 0.6,
            minimum_intensity: 0.0,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.num_sites == 0 || self.rlz_weights.is_empty() {
            return Err(RiskError::Configuration("catalog needs sites and realizations".to_string()));
        }
        if !(self.annual_rupture_rate > 0.0 && self.investigation_time > 0.0) {
            return Err(RiskError::Configuration(format!(
                "invalid rupture rate {} or investigation time {}",
                self.annual_rupture_rate, self.investigation_time
            )));
        }
        if !(self.sigma > 0.0) || self.extra_occurrences < 0.0 || self.minimum_intensity < 0.0 {
            return Err(RiskError::Configuration(
                "sigma must be positive, extra occurrences and minimum intensity non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// One rupture with its occurrences, as dumped by `event_catalog`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuptureEntry {
    pub rup_id: RuptureId,
    pub ses: u32,
    pub epicentre: SiteId,
    pub eids: Vec<EventId>,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    pub ruptures: Vec<RuptureEntry>,
    pub events: Vec<Event>,
    pub gmfs: Vec<GroundMotion>,
    pub realizations: Vec<Realization>,
    pub parent: ParentParams,
}

impl Catalog {
    pub fn into_hazard(self) -> StaticHazard {
        StaticHazard::new(self.events, self.gmfs, self.realizations).with_parent(self.parent)
    }
}

pub fn generate_catalog(config: &CatalogConfig) -> Result<Catalog> {
    config.validate()?;
    let mut rng = ChaCha20Rng::seed_from_u64(config.seed);
    let bad = |e: &dyn std::fmt::Display| RiskError::Configuration(e.to_string());
    let count = Poisson::new(config.annual_rupture_rate * config.investigation_time).map_err(|e| bad(&e))?;
    let extra = if config.extra_occurrences > 0.0 {
        Some(Poisson::new(config.extra_occurrences).map_err(|e| bad(&e))?)
    } else {
        None
    };
    let magnitude = Normal::new(config.epicentre_mu, 0.5).map_err(|e| bad(&e))?;
    let floor = GMV_FLOOR.max(config.minimum_intensity);

    let mut ruptures = Vec::new();
    let mut events = Vec::new();
    let mut gmfs = Vec::new();
    let mut next_eid = 0u64;
    for ses in 0..config.ses_per_logic_tree_path {
        let n = count.sample(&mut rng) as u64;
        for _ in 0..n {
            let rup_id = RuptureId(ruptures.len() as u64);
            let epicentre = rng.random_range(0..config.num_sites);
            let mu = magnitude.sample(&mut rng);
            let occurrences = 1 + extra.as_ref().map_or(0, |d| d.sample(&mut rng) as u64);
            let mut eids = Vec::new();
            for _ in 0..occurrences {
                let eid = EventId(next_eid);
                next_eid += 1;
                events.push(Event { eid, rup_id });
                eids.push(eid);
                for site in 0..config.num_sites {
                    let distance = (site as f64 - epicentre as f64).abs();
                    let dist = LogNormal::new(mu - config.attenuation * distance, config.sigma)
                        .map_err(|e| bad(&e))?;
                    for rlz in 0..config.rlz_weights.len() {
                        let gmv = dist.sample(&mut rng);
                        if gmv >= floor {
                            gmfs.push(GroundMotion { site: SiteId(site), rlz: RlzId(rlz as u16), eid, gmv });
                        }
                    }
                }
            }
            ruptures.push(RuptureEntry { rup_id, ses, epicentre: SiteId(epicentre), eids });
        }
    }

    let realizations = config
        .rlz_weights
        .iter()
        .enumerate()
        .map(|(r, &weight)| Realization { ordinal: RlzId(r as u16), weight })
        .collect();
    let parent = ParentParams {
        investigation_time: config.investigation_time,
        minimum_intensity: config.minimum_intensity,
    };
    Ok(Catalog { ruptures, events, gmfs, realizations, parent })
}

/// `num_assets` assets spread round-robin over the sites, log-normal values.
pub fn generate_exposure(num_assets: u32, num_sites: u32, loss_types: usize, seed: u64) -> Result<AssetCollection> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let value = LogNormal::<f64>::new(12.0, 0.8).map_err(|e| RiskError::Configuration(e.to_string()))?;
    let assets = (0..num_assets)
        .map(|a| {
            let mut asset = Asset::new(
                AssetId(a),
                SiteId(a % num_sites.max(1)),
                (0..loss_types).map(|_| value.sample(&mut rng).round()).collect(),
            );
            asset.deductibles = vec![0.05; loss_types];
            asset.insured_limits = vec![0.6; loss_types];
            asset
        })
        .collect();
    AssetCollection::new(assets, loss_types, vec!["EUR".to_string(); loss_types])
}
