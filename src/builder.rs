//! Post-processing of the combined totals into loss tables, curves, maps
//! and their cross-realization statistics.

use serde::{Deserialize, Serialize};

use crate::array::DenseArray;
use crate::config::Dims;
use crate::curves::LossCurveBuilder;
use crate::error::Result;
use crate::events::EventIndex;
use crate::exposure::AssetCollection;
use crate::sparse::AvgLosses;
use crate::stats::{Statistic, compute_stats};
use crate::types::{EventId, RlzId};

/// One row of the event-loss table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLossRecord {
    pub eid: EventId,
    pub rlzi: RlzId,
    /// One loss per loss column.
    pub loss: Vec<f64>,
}

/// Rows of the `[E, R, LI]` array with a nonzero total, in `(eid, rlzi)` order.
pub fn build_event_loss_table(agg: &DenseArray, index: &EventIndex) -> Result<Vec<EventLossRecord>> {
    let shape = agg.shape();
    let mut records = Vec::new();
    for e in 0..shape[0] {
        let eid = index.eid(e)?;
        for r in 0..shape[1] {
            let loss = agg.row(&[e, r]);
            if loss.iter().sum::<f64>() != 0.0 {
                records.push(EventLossRecord { eid, rlzi: RlzId(r as u16), loss: loss.to_vec() });
            }
        }
    }
    Ok(records)
}

#[derive(Debug, Clone, PartialEq)]
pub struct LossTables {
    /// `[U, L]` ground-up losses per rupture, summed over realizations.
    pub rup_loss_table: DenseArray,
    /// Per loss type, the rupture index with the largest loss.
    pub ridx: Vec<usize>,
    /// `[R, LI]` total losses per realization.
    pub losses_by_rlzi: DenseArray,
}

pub fn build_loss_tables(agg: &DenseArray, index: &EventIndex, dims: &Dims) -> Result<LossTables> {
    let num_ruptures = index.ruptures().len();
    let mut rup_loss_table = DenseArray::zeros(&[num_ruptures, dims.loss_types]);
    let mut losses_by_rlzi = DenseArray::zeros(&[dims.rlzs, dims.columns()]);
    for e in 0..dims.events {
        let u = index.rupture_index(e)?;
        for r in 0..dims.rlzs {
            for (li, &loss) in agg.row(&[e, r]).iter().enumerate() {
                losses_by_rlzi.add(&[r, li], loss);
                if li < dims.loss_types {
                    rup_loss_table.add(&[u, li], loss);
                }
            }
        }
    }
    let ridx = (0..dims.loss_types)
        .map(|l| {
            let mut best = 0;
            for u in 1..num_ruptures {
                if rup_loss_table.get(&[u, l]) > rup_loss_table.get(&[best, l]) {
                    best = u;
                }
            }
            best
        })
        .collect();
    Ok(LossTables { rup_loss_table, ridx, losses_by_rlzi })
}

/// `[A, R, LI]` monetary average losses: annualized ratio × asset value.
pub fn build_avg_losses(avg: &AvgLosses, exposure: &AssetCollection, dims: &Dims) -> Result<DenseArray> {
    let mut out = DenseArray::zeros(&[dims.assets, dims.rlzs, dims.columns()]);
    for (li, rlz, aid, ratio) in avg.iter() {
        let value = exposure.value(aid, dims.loss_type_of(li))?;
        out.add(&[aid.index(), rlz.index(), li], ratio * value);
    }
    Ok(out)
}

/// Loss maps from curves: `[N, K, P, LI]` → `[N, K, C, LI]`.
pub fn build_maps(curves: &DenseArray, builder: &LossCurveBuilder) -> DenseArray {
    let shape = curves.shape();
    let (n, k, periods, columns) = (shape[0], shape[1], shape[2], shape[3]);
    let poes = builder.poes().len();
    let mut out = DenseArray::zeros(&[n, k, poes, columns]);
    let mut curve = vec![0.0; periods];
    for a in 0..n {
        for r in 0..k {
            for li in 0..columns {
                for (p, slot) in curve.iter_mut().enumerate() {
                    *slot = curves.get(&[a, r, p, li]);
                }
                for (c, loss) in builder.build_map(&curve).into_iter().enumerate() {
                    out.set(&[a, r, c, li], loss);
                }
            }
        }
    }
    out
}

/// `[R, P, LI]` portfolio curves built on the per-event totals.
pub fn build_agg_curves(agg: &DenseArray, dims: &Dims, builder: &LossCurveBuilder) -> DenseArray {
    let periods = builder.return_periods().len();
    let mut out = DenseArray::zeros(&[dims.rlzs, periods, dims.columns()]);
    let mut totals = vec![0.0; dims.events];
    for r in 0..dims.rlzs {
        for li in 0..dims.columns() {
            for (e, slot) in totals.iter_mut().enumerate() {
                *slot = agg.get(&[e, r, li]);
            }
            for (p, loss) in builder.build_curve(&totals).into_iter().enumerate() {
                out.set(&[r, p, li], loss);
            }
        }
    }
    out
}

/// Statistics over the realization axis `axis` of `array`, which is
/// replaced by the statistic axis.
pub fn rlz_stats(array: &DenseArray, axis: usize, weights: &[f64], stats: &[Statistic]) -> DenseArray {
    let shape = array.shape();
    let outer: usize = shape[..axis].iter().product();
    let block: usize = shape[axis..].iter().product();
    let mut out_shape = shape.to_vec();
    out_shape[axis] = stats.len();
    let mut data = Vec::with_capacity(outer * block / shape[axis].max(1) * stats.len());
    for o in 0..outer {
        let slice = &array.data()[o * block..(o + 1) * block];
        data.extend(compute_stats(slice, shape[axis], weights, stats));
    }
    DenseArray::from_vec(&out_shape, data)
}
