//! Correlated random error terms for vulnerability sampling.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

use crate::error::{Result, RiskError};
use crate::types::AssetId;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Correlation {
    Independent,
    /// Equicorrelated assets with coefficient `rho`.
    Equal { rho: f64 },
}

/// Produces the `[A × S]` epsilon matrix.
///
/// Column `s` is drawn from its own ChaCha20 stream seeded with `seed + s`,
/// so a column never depends on how many other columns are generated.
/// With more events than `sample_cap`, event `e` reuses column `e % S`.
pub struct EpsilonSampler {
    num_assets: usize,
    num_events: usize,
    seed: u64,
    sample_cap: usize,
    correlation: Correlation,
}

impl EpsilonSampler {
    pub fn new(num_assets: usize, num_events: usize, seed: u64) -> Self {
        EpsilonSampler {
            num_assets,
            num_events,
            seed,
            sample_cap: usize::MAX,
            correlation: Correlation::Independent,
        }
    }

    pub fn with_sample_cap(mut self, cap: usize) -> Self {
        self.sample_cap = cap.max(1);
        self
    }

    /// Switch to correlated sampling. `model` is the asset correlation
    /// coefficient; requesting correlation without one is a configuration error.
    pub fn correlated(mut self, model: Option<f64>) -> Result<Self> {
        let rho = model.ok_or(RiskError::MissingCorrelationModel)?;
        if !(0.0..=1.0).contains(&rho) {
            return Err(RiskError::Configuration(format!(
                "asset correlation {rho} outside [0, 1]"
            )));
        }
        self.correlation = Correlation::Equal { rho };
        Ok(self)
    }

    pub fn num_samples(&self) -> usize {
        self.num_events.min(self.sample_cap)
    }

    pub fn sample(&self) -> EpsilonMatrix {
        let a = self.num_assets;
        let s = self.num_samples();
        let mut data = vec![0.0; a * s];
        if a > 0 {
            data.par_chunks_mut(a).enumerate().for_each(|(col, out)| {
                let mut rng = ChaCha20Rng::seed_from_u64(self.seed.wrapping_add(col as u64));
                match self.correlation {
                    Correlation::Independent => {
                        for x in out.iter_mut() {
                            *x = rng.sample(StandardNormal);
                        }
                    }
                    Correlation::Equal { rho } => {
                        let common: f64 = rng.sample(StandardNormal);
                        let (wc, wi) = (rho.sqrt(), (1.0 - rho).sqrt());
                        for x in out.iter_mut() {
                            let own: f64 = rng.sample(StandardNormal);
                            *x = wc * common + wi * own;
                        }
                    }
                }
            });
        }
        EpsilonMatrix { num_assets: a, num_events: self.num_events, num_samples: s, data }
    }
}

/// Sampled epsilons, stored column by column (`data[s * A + a]`).
#[derive(Debug, Clone, PartialEq)]
pub struct EpsilonMatrix {
    num_assets: usize,
    num_events: usize,
    num_samples: usize,
    data: Vec<f64>,
}

impl EpsilonMatrix {
    pub fn num_assets(&self) -> usize {
        self.num_assets
    }

    pub fn num_events(&self) -> usize {
        self.num_events
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Column used by global event position `event_idx`.
    pub fn sample_index(&self, event_idx: usize) -> Result<usize> {
        if event_idx >= self.num_events {
            return Err(RiskError::IndexOutOfRange {
                kind: "event",
                index: event_idx,
                len: self.num_events,
            });
        }
        Ok(event_idx % self.num_samples)
    }

    pub fn get(&self, aid: AssetId, event_idx: usize) -> Result<f64> {
        if aid.index() >= self.num_assets {
            return Err(RiskError::IndexOutOfRange {
                kind: "asset",
                index: aid.index(),
                len: self.num_assets,
            });
        }
        let s = self.sample_index(event_idx)?;
        Ok(self.data[s * self.num_assets + aid.index()])
    }

    /// The `[aids × event_indices]` block handed to one shard.
    pub fn slice(&self, aids: &[AssetId], event_indices: &[usize]) -> Result<EpsilonSlice> {
        let mut data = Vec::with_capacity(aids.len() * event_indices.len());
        for &aid in aids {
            for &e in event_indices {
                data.push(self.get(aid, e)?);
            }
        }
        Ok(EpsilonSlice { aids: aids.to_vec(), event_indices: event_indices.to_vec(), data })
    }
}

/// Epsilons of one shard, addressed by global asset id and event position.
#[derive(Debug, Clone, PartialEq)]
pub struct EpsilonSlice {
    aids: Vec<AssetId>,
    event_indices: Vec<usize>,
    data: Vec<f64>,
}

impl EpsilonSlice {
    pub fn get(&self, aid: AssetId, event_idx: usize) -> Result<f64> {
        let a = self.aids.binary_search(&aid).map_err(|_| {
            RiskError::Data(format!("asset {} not in this epsilon slice", aid.0))
        })?;
        let e = self.event_indices.binary_search(&event_idx).map_err(|_| {
            RiskError::Data(format!("event position {event_idx} not in this epsilon slice"))
        })?;
        Ok(self.data[a * self.event_indices.len() + e])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_gives_identical_matrix() {
        let a = EpsilonSampler::new(20, 50, 7).sample();
        let b = EpsilonSampler::new(20, 50, 7).sample();
        assert_eq!(a, b);
        let c = EpsilonSampler::new(20, 50, 8).sample();
        assert_ne!(a, c);
    }

    #[test]
    fn columns_do_not_depend_on_event_count() {
        // The first 10 columns of a 30-event matrix equal a 10-event matrix.
        let small = EpsilonSampler::new(5, 10, 3).sample();
        let large = EpsilonSampler::new(5, 30, 3).sample();
        for aid in 0..5 {
            for e in 0..10 {
                assert_eq!(small.get(AssetId(aid), e).unwrap(), large.get(AssetId(aid), e).unwrap());
            }
        }
    }

    #[test]
    fn sampling_cap_reuses_columns() {
        let m = EpsilonSampler::new(4, 25, 1).with_sample_cap(10).sample();
        assert_eq!(m.num_samples(), 10);
        assert_eq!(m.sample_index(23).unwrap(), 3);
        assert_eq!(m.get(AssetId(2), 23).unwrap(), m.get(AssetId(2), 3).unwrap());
        assert!(m.sample_index(25).is_err());
    }

    #[test]
    fn full_correlation_gives_one_value_per_event() {
        let m = EpsilonSampler::new(6, 8, 11).correlated(Some(1.0)).unwrap().sample();
        for e in 0..8 {
            let first = m.get(AssetId(0), e).unwrap();
            for aid in 1..6 {
                assert_eq!(m.get(AssetId(aid), e).unwrap(), first);
            }
        }
    }

    #[test]
    fn correlation_without_model_is_a_configuration_error() {
        let err = EpsilonSampler::new(2, 2, 0).correlated(None);
        assert!(matches!(err, Err(RiskError::MissingCorrelationModel)));
        assert!(EpsilonSampler::new(2, 2, 0).correlated(Some(1.5)).is_err());
    }

    #[test]
    fn independent_epsilons_look_standard_normal() {
        let m = EpsilonSampler::new(100, 100, 42).sample();
        let n = 10_000.0;
        let mean = m.data.iter().sum::<f64>() / n;
        let var = m.data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
        assert!(mean.abs() < 0.05, "mean {mean:.4} too far from 0");
        assert!((var - 1.0).abs() < 0.1, "variance {var:.4} too far from 1");
    }

    #[test]
    fn slice_matches_matrix() {
        let m = EpsilonSampler::new(10, 10, 5).sample();
        let slice = m.slice(&[AssetId(2), AssetId(7)], &[1, 4, 9]).unwrap();
        assert_eq!(slice.get(AssetId(7), 4).unwrap(), m.get(AssetId(7), 4).unwrap());
        assert!(slice.get(AssetId(3), 4).is_err());
        assert!(slice.get(AssetId(2), 5).is_err());
    }
}
