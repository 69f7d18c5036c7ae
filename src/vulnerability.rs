//! Reference loss-ratio producer: one vulnerability function per loss type.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::epsilon::EpsilonSlice;
use crate::error::{Result, RiskError};
use crate::events::EventIndex;
use crate::exposure::{AssetCollection, insured_loss_ratio};
use crate::partition::RiskInput;
use crate::producer::{LossRatioOutput, LossRatioProducer, RatioBlock};
use crate::types::{EventId, RlzId, SiteId};

/// Mean loss ratio and coefficient of variation as functions of intensity.
#[derive(Debug, Clone, PartialEq)]
pub struct VulnerabilityFunction {
    imls: Vec<f64>,
    mean_lrs: Vec<f64>,
    covs: Vec<f64>,
}

impl VulnerabilityFunction {
    pub fn new(imls: Vec<f64>, mean_lrs: Vec<f64>, covs: Vec<f64>) -> Result<Self> {
        if imls.is_empty() || imls.len() != mean_lrs.len() || imls.len() != covs.len() {
            return Err(RiskError::Configuration(
                "vulnerability function needs equally long, non-empty imls, mean_lrs and covs"
                    .to_string(),
            ));
        }
        if imls.windows(2).any(|w| w[0] >= w[1]) {
            return Err(RiskError::Configuration(format!("imls must be increasing: {imls:?}")));
        }
        if mean_lrs.iter().any(|&m| !(0.0..=1.0).contains(&m)) || covs.iter().any(|&c| c < 0.0) {
            return Err(RiskError::Configuration(
                "mean loss ratios must be in [0, 1] and covs non-negative".to_string(),
            ));
        }
        Ok(VulnerabilityFunction { imls, mean_lrs, covs })
    }

    pub fn has_covs(&self) -> bool {
        self.covs.iter().any(|&c| c > 0.0)
    }

    /// Linear interpolation; zero below the first iml, flat above the last.
    fn interp(&self, iml: f64, ys: &[f64]) -> f64 {
        let n = self.imls.len();
        if iml < self.imls[0] {
            return 0.0;
        }
        if iml >= self.imls[n - 1] {
            return ys[n - 1];
        }
        let k = self.imls.partition_point(|&x| x <= iml) - 1;
        let t = (iml - self.imls[k]) / (self.imls[k + 1] - self.imls[k]);
        ys[k] + t * (ys[k + 1] - ys[k])
    }

    pub fn mean_loss_ratio(&self, iml: f64) -> f64 {
        self.interp(iml, &self.mean_lrs)
    }

    /// Log-normal sample around the mean ratio; the mean itself without epsilon.
    pub fn loss_ratio(&self, iml: f64, epsilon: Option<f64>) -> f64 {
        let mean = self.mean_loss_ratio(iml);
        let cov = self.interp(iml, &self.covs);
        match epsilon {
            Some(eps) if mean > 0.0 && cov > 0.0 => {
                let sigma = (1.0 + cov * cov).ln().sqrt();
                let mu = mean.ln() - sigma * sigma / 2.0;
                (mu + eps * sigma).exp()
            }
            _ => mean,
        }
    }
}

pub struct VulnerabilityModel<'a> {
    functions: Vec<VulnerabilityFunction>,
    exposure: &'a AssetCollection,
    minimum_intensity: f64,
    insured: bool,
}

impl<'a> VulnerabilityModel<'a> {
    pub fn new(
        functions: Vec<VulnerabilityFunction>,
        exposure: &'a AssetCollection,
        minimum_intensity: f64,
        insured: bool,
    ) -> Result<Self> {
        if functions.len() != exposure.num_loss_types() {
            return Err(RiskError::Configuration(format!(
                "{} vulnerability functions for {} loss types",
                functions.len(),
                exposure.num_loss_types()
            )));
        }
        Ok(VulnerabilityModel { functions, exposure, minimum_intensity, insured })
    }
}

impl LossRatioProducer for VulnerabilityModel<'_> {
    fn num_loss_types(&self) -> Option<usize> {
        Some(self.functions.len())
    }

    fn has_uncertainty(&self) -> bool {
        self.functions.iter().any(VulnerabilityFunction::has_covs)
    }

    /// One output per (realization, site): the site's assets against the
    /// events shaking the site at or above the minimum intensity.
    fn produce(
        &self,
        shard: &RiskInput,
        index: &EventIndex,
        epsilons: Option<&EpsilonSlice>,
    ) -> Result<Vec<LossRatioOutput>> {
        let num_insured = if self.insured { 2 } else { 1 };
        let mut gmvs: BTreeMap<(RlzId, SiteId), HashMap<EventId, f64>> = BTreeMap::new();
        for gm in &shard.hazard {
            gmvs.entry((gm.rlz, gm.site)).or_default().insert(gm.eid, gm.gmv);
        }

        let mut outputs = Vec::new();
        for ((rlz, site), by_eid) in gmvs {
            let aids: Vec<_> = shard
                .aids
                .iter()
                .copied()
                .filter(|&aid| self.exposure.get(aid).is_ok_and(|a| a.site == site))
                .collect();
            if aids.is_empty() {
                continue;
            }
            let eids: BTreeSet<EventId> = by_eid
                .iter()
                .filter(|&(_, &gmv)| gmv >= self.minimum_intensity)
                .map(|(&eid, _)| eid)
                .collect();
            if eids.is_empty() {
                outputs.push(LossRatioOutput {
                    rlz,
                    eids: Vec::new(),
                    aids,
                    by_loss_type: vec![None; self.functions.len()],
                });
                continue;
            }
            let eids: Vec<EventId> = eids.into_iter().collect();
            let event_positions = eids.iter().map(|&eid| index.index_of(eid)).collect::<Result<Vec<_>>>()?;

            let mut by_loss_type = Vec::with_capacity(self.functions.len());
            for (l, func) in self.functions.iter().enumerate() {
                let mut block = RatioBlock::zeros(aids.len(), eids.len(), num_insured);
                for (a, &aid) in aids.iter().enumerate() {
                    let asset = self.exposure.get(aid)?;
                    for (e, eid) in eids.iter().enumerate() {
                        let eps = match epsilons {
                            Some(slice) => Some(slice.get(aid, event_positions[e])?),
                            None => None,
                        };
                        let ratio = func.loss_ratio(by_eid[eid], eps);
                        block.set(a, e, 0, ratio);
                        if self.insured {
                            let (Some(&deductible), Some(&limit)) =
                                (asset.deductibles.get(l), asset.insured_limits.get(l))
                            else {
                                return Err(RiskError::IndexOutOfRange {
                                    kind: "loss type",
                                    index: l,
                                    len: asset.deductibles.len().min(asset.insured_limits.len()),
                                });
                            };
                            block.set(a, e, 1, insured_loss_ratio(ratio, deductible, limit));
                        }
                    }
                }
                by_loss_type.push(Some(block));
            }
            outputs.push(LossRatioOutput { rlz, eids, aids, by_loss_type });
        }
        Ok(outputs)
    }
}
