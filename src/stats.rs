//! Weighted statistics across logic-tree realizations.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Statistic {
    Mean,
    Quantile(f64),
}

impl Statistic {
    pub fn name(&self) -> String {
        match self {
            Statistic::Mean => "mean".to_string(),
            Statistic::Quantile(q) => format!("quantile-{q}"),
        }
    }

    /// `values[r]` is the value of realization `r`; `weights` sum to 1.
    pub fn compute(&self, values: &[f64], weights: &[f64]) -> f64 {
        match self {
            Statistic::Mean => weighted_mean(values, weights),
            Statistic::Quantile(q) => weighted_quantile(*q, values, weights),
        }
    }
}

/// `Σ w·v / Σ w`. Zero for an empty or weightless input.
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> f64 {
    let total: f64 = weights.iter().sum();
    if total == 0.0 {
        return 0.0;
    }
    values.iter().zip(weights).map(|(v, w)| v * w).sum::<f64>() / total
}

/// Weighted order statistic: sort the values, accumulate their normalised
/// weights into a CDF and read `q` off it by linear interpolation (clamped
/// to the smallest/largest value outside the CDF range).
pub fn weighted_quantile(q: f64, values: &[f64], weights: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let total: f64 = weights.iter().sum();
    let mut pairs: Vec<(f64, f64)> = values
        .iter()
        .zip(weights)
        .map(|(&v, &w)| (v, w / total))
        .collect();
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let mut cum = 0.0;
    let mut prev: Option<(f64, f64)> = None;
    for (v, w) in pairs.iter().copied() {
        cum += w;
        if q <= cum {
            return match prev {
                None => v,
                Some((c0, v0)) if cum > c0 => v0 + (q - c0) / (cum - c0) * (v - v0),
                Some(_) => v,
            };
        }
        prev = Some((cum, v));
    }
    pairs[pairs.len() - 1].0
}

/// Statistics of a `[R × K]` row-major array, giving `[S × K]`.
pub fn compute_stats(array: &[f64], rlzs: usize, weights: &[f64], stats: &[Statistic]) -> Vec<f64> {
    if rlzs == 0 {
        return Vec::new();
    }
    let k = array.len() / rlzs;
    let mut out = vec![0.0; stats.len() * k];
    let mut column = vec![0.0; rlzs];
    for j in 0..k {
        for (r, slot) in column.iter_mut().enumerate() {
            *slot = array[r * k + j];
        }
        for (s, stat) in stats.iter().enumerate() {
            out[s * k + j] = stat.compute(&column, weights);
        }
    }
    out
}
