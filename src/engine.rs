//! Parallel execution of shards.
//!
//! Workers compute immutable `ShardResult`s and send them over a channel;
//! the calling thread is the only writer of the accumulators.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::array::DenseArray;
use crate::combine::{Accumulator, Totals};
use crate::config::Dims;
use crate::curves::LossCurveBuilder;
use crate::epsilon::EpsilonMatrix;
use crate::error::{Result, RiskError};
use crate::events::EventIndex;
use crate::exposure::AssetCollection;
use crate::partition::RiskInput;
use crate::producer::LossRatioProducer;
use crate::sparse::{AssetCurves, AvgLosses, SparseLosses};
use crate::types::{AssetId, RlzId, ShardId};

/// Partial result of one shard.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardResult {
    pub shard: ShardId,
    /// Nonzero cells of the `[E, R, L·I]` aggregate array, global indices.
    pub agg: SparseLosses,
    pub avg: AvgLosses,
    /// Curves of the assets of this shard; each `(asset, rlz)` lives in one shard.
    pub curves: AssetCurves,
}

/// Read-only inputs shared by every shard.
pub struct ShardContext<'a> {
    pub dims: Dims,
    pub index: &'a EventIndex,
    pub exposure: &'a AssetCollection,
    pub epsilons: Option<&'a EpsilonMatrix>,
    pub ses_ratio: f64,
    pub avg_losses: bool,
    /// Build asset loss curves, sized for the whole event set.
    pub curves: Option<&'a LossCurveBuilder>,
}

pub fn compute_shard<P>(shard: &RiskInput, producer: &P, ctx: &ShardContext<'_>) -> Result<ShardResult>
where
    P: LossRatioProducer + ?Sized,
{
    producer.init(shard)?;
    let epsilons = match ctx.epsilons {
        Some(matrix) => Some(matrix.slice(&shard.aids, &shard.event_indices)?),
        None => None,
    };

    let dims = ctx.dims;
    let mut agg = DenseArray::zeros(&[shard.num_events(), dims.rlzs, dims.columns()]);
    let mut avg = AvgLosses::default();
    // (asset, rlz, column) -> local event -> loss, dropped once curves are built
    let mut series: BTreeMap<(AssetId, RlzId, usize), BTreeMap<usize, f64>> = BTreeMap::new();

    for out in producer.produce(shard, ctx.index, epsilons.as_ref())? {
        // sites with no events
        if out.eids.is_empty() {
            continue;
        }
        if !shard.rlzs.contains(&out.rlz) {
            return Err(RiskError::Data(format!(
                "shard {} received ratios for foreign realization {}",
                shard.id.0, out.rlz.0
            )));
        }
        if let Some(aid) = out.aids.iter().find(|aid| shard.aids.binary_search(aid).is_err()) {
            return Err(RiskError::Data(format!(
                "shard {} received ratios for foreign asset {}",
                shard.id.0, aid.0
            )));
        }
        if out.by_loss_type.len() != dims.loss_types {
            return Err(RiskError::Data(format!(
                "expected ratios for {} loss types, got {}",
                dims.loss_types,
                out.by_loss_type.len()
            )));
        }
        let local_events = out
            .eids
            .iter()
            .map(|&eid| {
                let e = ctx.index.index_of(eid)?;
                shard.local_event(e).ok_or_else(|| {
                    RiskError::Data(format!("event {} is not part of shard {}", eid.0, shard.id.0))
                })
            })
            .collect::<Result<Vec<usize>>>()?;

        let r = out.rlz.index();
        for (l, block) in out.by_loss_type.iter().enumerate() {
            // below the minimum intensity
            let Some(block) = block else { continue };
            if block.shape() != (out.aids.len(), out.eids.len(), dims.insured) {
                return Err(RiskError::Data(format!(
                    "ratio block of shape {:?} for {} assets and {} events",
                    block.shape(),
                    out.aids.len(),
                    out.eids.len()
                )));
            }
            for (a, &aid) in out.aids.iter().enumerate() {
                let value = ctx.exposure.value(aid, l)?;
                for i in 0..dims.insured {
                    let li = dims.column(l, i);
                    let mut ratio_sum = 0.0;
                    for (e, &le) in local_events.iter().enumerate() {
                        let ratio = block.get(a, e, i);
                        if !ratio.is_finite() || ratio < 0.0 {
                            return Err(RiskError::InvalidLossRatio {
                                aid: aid.0,
                                eid: out.eids[e].0,
                                value: ratio,
                            });
                        }
                        ratio_sum += ratio;
                        let loss = value * ratio;
                        agg.add(&[le, r, li], loss);
                        if ctx.curves.is_some() && loss != 0.0 {
                            *series.entry((aid, out.rlz, li)).or_default().entry(le).or_insert(0.0) += loss;
                        }
                    }
                    if ctx.avg_losses {
                        avg.add(li, out.rlz, aid, ratio_sum * ctx.ses_ratio);
                    }
                }
            }
        }
    }

    let mut curves = AssetCurves::default();
    if let Some(builder) = ctx.curves {
        for ((aid, rlz, li), by_event) in series {
            let losses: Vec<f64> = by_event.into_values().collect();
            curves.insert(aid, rlz, li, builder.build_curve(&losses));
        }
    }

    // local event axis -> global event axis
    let stride = dims.rlzs * dims.columns();
    let cells = SparseLosses::from_dense(&agg)
        .entries()
        .iter()
        .map(|&(i, v)| (shard.event_indices[i / stride] * stride + i % stride, v))
        .collect();
    Ok(ShardResult { shard: shard.id, agg: SparseLosses::from_pairs(cells), avg, curves })
}

/// Run every shard on the rayon pool and fold the results.
///
/// The first failing shard aborts the run: shards not yet started are
/// skipped and everything combined so far is dropped.
pub fn run<P>(shards: &[RiskInput], producer: &P, ctx: &ShardContext<'_>) -> Result<Totals>
where
    P: LossRatioProducer,
{
    info!(shards = shards.len(), "executing shards");
    let periods = ctx.curves.map_or(0, |b| b.return_periods().len());
    let mut acc = Accumulator::new(&ctx.dims, shards.len(), periods);
    let cancelled = AtomicBool::new(false);

    std::thread::scope(|scope| {
        let (tx, rx) = mpsc::channel::<Result<ShardResult>>();
        let cancelled = &cancelled;
        scope.spawn(move || {
            shards.par_iter().for_each_with(tx, |tx, shard| {
                if cancelled.load(Ordering::Relaxed) {
                    return;
                }
                let result = compute_shard(shard, producer, ctx);
                if tx.send(result).is_err() {
                    cancelled.store(true, Ordering::Relaxed);
                }
            });
        });

        for result in rx {
            if let Err(e) = result.and_then(|r| acc.combine(r)) {
                cancelled.store(true, Ordering::Relaxed);
                return Err(e);
            }
        }
        Ok(())
    })?;

    debug!(combined = acc.combined(), "all shards combined");
    acc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epsilon::EpsilonSlice;
    use crate::events::Event;
    use crate::exposure::Asset;
    use crate::hazard::GroundMotion;
    use crate::producer::{LossRatioOutput, RatioBlock};
    use crate::types::{AssetId, EventId, RlzId, RuptureId, SiteId};

    /// Returns a fixed ratio for every asset and event of the shard.
    struct FixedRatio(f64);

    impl LossRatioProducer for FixedRatio {
        fn produce(
            &self,
            shard: &RiskInput,
            index: &EventIndex,
            _epsilons: Option<&EpsilonSlice>,
        ) -> Result<Vec<LossRatioOutput>> {
            let eids = shard
                .event_indices
                .iter()
                .map(|&e| index.eid(e))
                .collect::<Result<Vec<_>>>()?;
            let n = shard.aids.len() * eids.len();
            Ok(shard
                .rlzs
                .iter()
                .map(|&rlz| LossRatioOutput {
                    rlz,
                    eids: eids.clone(),
                    aids: shard.aids.clone(),
                    by_loss_type: vec![Some(
                        RatioBlock::from_vec(shard.aids.len(), eids.len(), 1, vec![self.0; n]).unwrap(),
                    )],
                })
                .collect())
        }
    }

    struct Fixture {
        index: EventIndex,
        exposure: AssetCollection,
        shards: Vec<RiskInput>,
        builder: LossCurveBuilder,
    }

    fn fixture() -> Fixture {
        let index = EventIndex::new(
            &(0..4).map(|e| Event { eid: EventId(100 + e), rup_id: RuptureId(e) }).collect::<Vec<_>>(),
        )
        .unwrap();
        let exposure = AssetCollection::new(
            (0..3).map(|a| Asset::new(AssetId(a), SiteId(a), vec![1000.0])).collect(),
            1,
            vec!["EUR".to_string()],
        )
        .unwrap();
        let shard = |id: u32, aids: Vec<AssetId>, event_indices: Vec<usize>| RiskInput {
            id: ShardId(id),
            rlzs: vec![RlzId(0)],
            sites: aids.iter().map(|a| SiteId(a.0)).collect(),
            hazard: Vec::<GroundMotion>::new(),
            weight: (aids.len() * event_indices.len()) as f64,
            aids,
            event_indices,
        };
        let shards = vec![
            shard(0, vec![AssetId(0), AssetId(1)], vec![1, 3]),
            shard(1, vec![AssetId(2)], vec![0, 1, 2]),
        ];
        // four events over four years: ranks 1 and 2 sit at 4 and 2 years
        let builder = LossCurveBuilder::new(vec![2.0, 4.0], 4.0, 4, vec![], 1.0);
        Fixture { index, exposure, shards, builder }
    }

    fn context(f: &Fixture) -> ShardContext<'_> {
        ShardContext {
            dims: Dims { assets: 3, events: 4, rlzs: 1, loss_types: 1, insured: 1 },
            index: &f.index,
            exposure: &f.exposure,
            epsilons: None,
            ses_ratio: 0.5,
            avg_losses: true,
            curves: Some(&f.builder),
        }
    }

    #[test]
    fn shard_cells_use_global_event_positions() {
        let f = fixture();
        let result = compute_shard(&f.shards[0], &FixedRatio(0.1), &context(&f)).unwrap();
        // two assets × 100 at event positions 1 and 3
        assert_eq!(result.agg.entries(), &[(1, 200.0), (3, 200.0)]);
        assert_eq!(result.avg.get(0, RlzId(0), AssetId(1)), Some(0.1));
        assert_eq!(result.curves.get(AssetId(0), RlzId(0), 0), Some(&[100.0, 100.0][..]));
        assert_eq!(result.curves.len(), 2);
    }

    #[test]
    fn run_adds_all_shards() {
        let f = fixture();
        let totals = run(&f.shards, &FixedRatio(0.1), &context(&f)).unwrap();
        assert_eq!(totals.agg.data(), &[100.0, 300.0, 100.0, 200.0]);
        assert_eq!(totals.avg.get(0, RlzId(0), AssetId(2)), Some(0.15000000000000002));
        // [A, R, P, LI]: asset 2 loses 100 in three of four events
        assert_eq!(totals.curves.shape(), &[3, 1, 2, 1]);
        assert_eq!(totals.curves.row(&[2, 0]), &[100.0, 100.0]);
    }

    #[test]
    fn zero_ratios_are_present_not_absent() {
        let f = fixture();
        let result = compute_shard(&f.shards[1], &FixedRatio(0.0), &context(&f)).unwrap();
        assert!(result.agg.is_empty());
        assert_eq!(result.avg.get(0, RlzId(0), AssetId(2)), Some(0.0));
    }

    #[test]
    fn nan_ratio_aborts_the_run() {
        let f = fixture();
        let err = run(&f.shards, &FixedRatio(f64::NAN), &context(&f));
        assert!(matches!(err, Err(RiskError::InvalidLossRatio { .. })));
    }

    #[test]
    fn negative_ratio_is_a_data_error() {
        let f = fixture();
        let err = compute_shard(&f.shards[0], &FixedRatio(-0.1), &context(&f));
        assert!(matches!(err, Err(RiskError::InvalidLossRatio { aid: 0, eid: 101, .. })));
    }

    #[test]
    fn curves_skipped_when_disabled() {
        let f = fixture();
        let ctx = ShardContext { curves: None, ..context(&f) };
        let result = compute_shard(&f.shards[0], &FixedRatio(0.1), &ctx).unwrap();
        assert!(result.curves.is_empty());
        let totals = run(&f.shards, &FixedRatio(0.1), &ctx).unwrap();
        assert!(totals.curves.is_empty());
    }

    /// Only one of four events hits: the 4-year loss, nothing at 2 years.
    #[test]
    fn shard_curve_pads_to_the_full_event_set() {
        let f = fixture();
        let single = RiskInput { event_indices: vec![2], ..f.shards[1].clone() };
        let result = compute_shard(&single, &FixedRatio(0.5), &context(&f)).unwrap();
        assert_eq!(result.curves.get(AssetId(2), RlzId(0), 0), Some(&[0.0, 500.0][..]));
    }
}
