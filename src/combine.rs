//! Process-wide accumulators and the rule for folding shard results into them.

use std::collections::BTreeMap;

use tracing::debug;

use crate::array::DenseArray;
use crate::config::Dims;
use crate::engine::ShardResult;
use crate::error::{Result, RiskError};
use crate::sparse::AvgLosses;
use crate::types::ShardId;

/// Everything accumulated over all shards.
#[derive(Debug, Clone, PartialEq)]
pub struct Totals {
    /// `[E, R, L·I]` monetary losses.
    pub agg: DenseArray,
    pub avg: AvgLosses,
    /// `[A, R, P, LI]` asset loss curves; `P` is 0 when curves are off.
    pub curves: DenseArray,
}

/// Single-writer owner of the totals.
///
/// Results may arrive in any order. They are buffered and applied in shard
/// id order, so floating-point sums come out bit-identical whatever the
/// completion order of the workers.
pub struct Accumulator {
    totals: Totals,
    num_shards: usize,
    next: u32,
    pending: BTreeMap<u32, ShardResult>,
    /// Shard that supplied the curves of each `(asset, rlz)`.
    curve_owner: Vec<Option<ShardId>>,
}

impl Accumulator {
    pub fn new(dims: &Dims, num_shards: usize, periods: usize) -> Self {
        Accumulator {
            totals: Totals {
                agg: DenseArray::zeros(&[dims.events, dims.rlzs, dims.columns()]),
                avg: AvgLosses::default(),
                curves: DenseArray::zeros(&[dims.assets, dims.rlzs, periods, dims.columns()]),
            },
            num_shards,
            next: 0,
            pending: BTreeMap::new(),
            curve_owner: vec![None; if periods > 0 { dims.assets * dims.rlzs } else { 0 }],
        }
    }

    pub fn combine(&mut self, result: ShardResult) -> Result<()> {
        let id = result.shard.0;
        if id as usize >= self.num_shards {
            return Err(RiskError::IndexOutOfRange {
                kind: "shard",
                index: id as usize,
                len: self.num_shards,
            });
        }
        if id < self.next || self.pending.contains_key(&id) {
            return Err(RiskError::Data(format!("shard {id} combined twice")));
        }
        self.pending.insert(id, result);
        while let Some(result) = self.pending.remove(&self.next) {
            self.apply(result)?;
            self.next += 1;
        }
        Ok(())
    }

    fn apply(&mut self, result: ShardResult) -> Result<()> {
        if let Some(&(i, _)) = result.agg.entries().last()
            && i >= self.totals.agg.len()
        {
            return Err(RiskError::IndexOutOfRange {
                kind: "aggregate cell",
                index: i,
                len: self.totals.agg.len(),
            });
        }
        debug!(shard = result.shard.0, cells = result.agg.len(), "combining");
        result.agg.add_into(&mut self.totals.agg);
        self.totals.avg.merge(&result.avg);
        self.apply_curves(&result)
    }

    fn apply_curves(&mut self, result: &ShardResult) -> Result<()> {
        let shape = self.totals.curves.shape().to_vec();
        let (assets, rlzs, periods, columns) = (shape[0], shape[1], shape[2], shape[3]);
        for (aid, rlz, li, curve) in result.curves.iter() {
            let (a, r) = (aid.index(), rlz.index());
            if a >= assets || r >= rlzs || li >= columns || curve.len() != periods {
                return Err(RiskError::Data(format!(
                    "curve of asset {a}, realization {r}, column {li} with {} periods does not fit {shape:?}",
                    curve.len()
                )));
            }
            let owner = &mut self.curve_owner[a * rlzs + r];
            match *owner {
                Some(other) if other != result.shard => {
                    return Err(RiskError::Data(format!(
                        "asset {a} realization {r} has curves from shards {} and {}",
                        other.0, result.shard.0
                    )));
                }
                _ => *owner = Some(result.shard),
            }
            for (p, &loss) in curve.iter().enumerate() {
                self.totals.curves.set(&[a, r, p, li], loss);
            }
        }
        Ok(())
    }

    pub fn combined(&self) -> usize {
        self.next as usize
    }

    pub fn is_complete(&self) -> bool {
        self.combined() == self.num_shards
    }

    pub fn finish(self) -> Result<Totals> {
        if !self.is_complete() {
            return Err(RiskError::MissingShards { missing: self.num_shards - self.combined() });
        }
        Ok(self.totals)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::sparse::{AssetCurves, SparseLosses};
    use crate::types::{AssetId, RlzId};

    fn dims() -> Dims {
        Dims { assets: 4, events: 5, rlzs: 2, loss_types: 1, insured: 1 }
    }

    fn result(id: u32, cells: Vec<(usize, f64)>, aid: u32, avg: f64) -> ShardResult {
        let mut avg_losses = AvgLosses::default();
        avg_losses.add(0, RlzId(0), AssetId(aid), avg);
        let mut curves = AssetCurves::default();
        curves.insert(AssetId(aid), RlzId(0), 0, vec![avg, 2.0 * avg]);
        ShardResult { shard: ShardId(id), agg: SparseLosses::from_pairs(cells), avg: avg_losses, curves }
    }

    fn sample_results() -> Vec<ShardResult> {
        vec![
            result(0, vec![(0, 0.1), (3, 1e-9)], 0, 0.3),
            result(1, vec![(0, 0.2), (3, 1e16)], 1, 0.7),
            result(2, vec![(0, 0.3), (9, 2.5)], 2, 1e-12),
            result(3, vec![(3, -1e16), (9, 0.25)], 3, 0.1),
        ]
    }

    fn combine_all(order: &[usize]) -> Totals {
        let results = sample_results();
        let mut acc = Accumulator::new(&dims(), results.len(), 2);
        for &i in order {
            acc.combine(results[i].clone()).unwrap();
        }
        acc.finish().unwrap()
    }

    #[test]
    fn contributions_are_added() {
        let totals = combine_all(&[0, 1, 2, 3]);
        assert!((totals.agg.data()[0] - 0.6).abs() < 1e-12);
        assert_eq!(totals.agg.data()[9], 2.75);
        assert_eq!(totals.avg.get(0, RlzId(0), AssetId(1)), Some(0.7));
        assert_eq!(totals.curves.row(&[1, 0]), &[0.7, 1.4]);
        assert_eq!(totals.curves.row(&[1, 1]), &[0.0, 0.0]);
    }

    #[test]
    fn curves_of_one_asset_from_two_shards_rejected() {
        let mut acc = Accumulator::new(&dims(), 2, 2);
        acc.combine(result(0, vec![], 1, 0.5)).unwrap();
        let err = acc.combine(result(1, vec![], 1, 0.5));
        assert!(matches!(err, Err(RiskError::Data(msg)) if msg.contains("from shards 0 and 1")));
    }

    #[test]
    fn curve_with_wrong_period_count_rejected() {
        let mut acc = Accumulator::new(&dims(), 1, 3);
        assert!(matches!(acc.combine(result(0, vec![], 0, 1.0)), Err(RiskError::Data(_))));
    }

    #[test]
    fn missing_shard_detected_on_finish() {
        let results = sample_results();
        let mut acc = Accumulator::new(&dims(), results.len(), 2);
        for r in results.into_iter().skip(1) {
            acc.combine(r).unwrap();
        }
        assert_eq!(acc.combined(), 0);
        assert!(matches!(acc.finish(), Err(RiskError::MissingShards { missing: 4 })));
    }

    #[test]
    fn duplicate_shard_rejected() {
        let results = sample_results();
        let mut acc = Accumulator::new(&dims(), results.len(), 2);
        acc.combine(results[0].clone()).unwrap();
        assert!(acc.combine(results[0].clone()).is_err());
    }

    #[test]
    fn out_of_range_cell_rejected() {
        let mut acc = Accumulator::new(&dims(), 1, 2);
        let err = acc.combine(result(0, vec![(10, 1.0)], 0, 0.0));
        assert!(matches!(err, Err(RiskError::IndexOutOfRange { kind: "aggregate cell", .. })));
    }

    proptest! {
        /// The cells mix magnitudes so that a naive order-dependent sum
        /// would differ in the last bits.
        #[test]
        fn any_completion_order_gives_identical_totals(order in Just((0..4usize).collect::<Vec<_>>()).prop_shuffle()) {
            prop_assert_eq!(combine_all(&order), combine_all(&[0, 1, 2, 3]));
        }

        #[test]
        fn two_groups_in_either_order_give_identical_totals(mask in prop::collection::vec(any::<bool>(), 4)) {
            let (first, second): (Vec<usize>, Vec<usize>) = (0..4).partition(|&i| mask[i]);
            let forward: Vec<usize> = first.iter().chain(&second).copied().collect();
            let backward: Vec<usize> = second.iter().chain(&first).copied().collect();
            prop_assert_eq!(combine_all(&forward), combine_all(&backward));
        }
    }
}
