//! Interface to the vulnerability side: shards in, loss ratios out.

use crate::epsilon::EpsilonSlice;
use crate::error::{Result, RiskError};
use crate::events::EventIndex;
use crate::partition::RiskInput;
use crate::types::{AssetId, EventId, RlzId};

/// Loss ratios of one loss type, laid out `[asset][event][insured]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RatioBlock {
    num_assets: usize,
    num_events: usize,
    num_insured: usize,
    data: Vec<f64>,
}

impl RatioBlock {
    pub fn zeros(num_assets: usize, num_events: usize, num_insured: usize) -> Self {
        RatioBlock {
            num_assets,
            num_events,
            num_insured,
            data: vec![0.0; num_assets * num_events * num_insured],
        }
    }

    pub fn from_vec(num_assets: usize, num_events: usize, num_insured: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != num_assets * num_events * num_insured {
            return Err(RiskError::Data(format!(
                "ratio block of {} values cannot have shape ({num_assets}, {num_events}, {num_insured})",
                data.len()
            )));
        }
        Ok(RatioBlock { num_assets, num_events, num_insured, data })
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.num_assets, self.num_events, self.num_insured)
    }

    pub fn get(&self, a: usize, e: usize, i: usize) -> f64 {
        self.data[(a * self.num_events + e) * self.num_insured + i]
    }

    pub fn set(&mut self, a: usize, e: usize, i: usize, value: f64) {
        self.data[(a * self.num_events + e) * self.num_insured + i] = value;
    }
}

/// Loss ratios of a group of assets for one realization.
#[derive(Debug, Clone, PartialEq)]
pub struct LossRatioOutput {
    pub rlz: RlzId,
    pub eids: Vec<EventId>,
    pub aids: Vec<AssetId>,
    /// One entry per loss type. `None` means every ground motion was below
    /// the minimum intensity: the ratios are absent, which is not the same
    /// as a ratio of zero.
    pub by_loss_type: Vec<Option<RatioBlock>>,
}

pub trait LossRatioProducer: Sync {
    /// Called once per shard before `produce`; must not have side effects
    /// visible to other shards.
    fn init(&self, _shard: &RiskInput) -> Result<()> {
        Ok(())
    }

    /// Loss types the producer emits ratios for, when fixed up front.
    fn num_loss_types(&self) -> Option<usize> {
        None
    }

    /// Whether the model uses epsilons at all.
    fn has_uncertainty(&self) -> bool {
        true
    }

    fn produce(
        &self,
        shard: &RiskInput,
        index: &EventIndex,
        epsilons: Option<&EpsilonSlice>,
    ) -> Result<Vec<LossRatioOutput>>;
}
