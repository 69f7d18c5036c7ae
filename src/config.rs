use serde::{Deserialize, Serialize};

use crate::error::{Result, RiskError};
use crate::stats::Statistic;

/// Below this many simulated years loss curves are not built.
pub const MIN_EFF_TIME: f64 = 2.0;

/// Parameters of the hazard calculation that must agree with the risk run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParentParams {
    pub investigation_time: f64,
    pub minimum_intensity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub master_seed: u64,
    /// Years covered by one stochastic event set.
    pub investigation_time: f64,
    /// Time span average losses are annualized to; defaults to `investigation_time`.
    pub risk_investigation_time: Option<f64>,
    pub ses_per_logic_tree_path: u32,
    /// Ground motions below this value produce no loss ratios at all.
    pub minimum_intensity: f64,
    pub loss_types: Vec<String>,
    pub insured_losses: bool,
    pub avg_losses: bool,
    /// Empty: generated from eff_time. `[0]`: curves and maps disabled.
    pub return_periods: Vec<f64>,
    pub conditional_loss_poes: Vec<f64>,
    pub mean: bool,
    pub quantiles: Vec<f64>,
    pub correlated_epsilons: bool,
    /// Equicorrelation coefficient of the asset correlation model.
    pub asset_correlation: Option<f64>,
    /// Maximum number of epsilon columns; events reuse columns modulo this.
    pub epsilon_sampling: usize,
    pub ignore_covs: bool,
    pub concurrent_tasks: usize,
    /// Shard weight target; derived from `concurrent_tasks` when unset.
    pub max_weight: Option<f64>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self::canonical()
    }
}

impl RiskConfig {
    pub fn canonical() -> Self {
        RiskConfig {
            master_seed: 42,
            investigation_time: 50.0,
            risk_investigation_time: None,
            ses_per_logic_tree_path: 20,
            minimum_intensity: 0.0,
            loss_types: vec!["structural".to_string()],
            insured_losses: false,
            avg_losses: true,
            return_periods: Vec::new(),
            conditional_loss_poes: vec![0.02, 0.1],
            mean: true,
            quantiles: vec![0.15, 0.85],
            correlated_epsilons: false,
            asset_correlation: None,
            epsilon_sampling: 1000,
            ignore_covs: false,
            concurrent_tasks: 16,
            max_weight: None,
        }
    }

    /// Total simulated time: investigation time × event sets per path.
    pub fn eff_time(&self) -> f64 {
        self.investigation_time * self.ses_per_logic_tree_path as f64
    }

    pub fn risk_time(&self) -> f64 {
        self.risk_investigation_time.unwrap_or(self.investigation_time)
    }

    /// Factor turning a sum of event losses into an annualized loss.
    pub fn ses_ratio(&self) -> f64 {
        self.risk_time() / self.eff_time()
    }

    pub fn insured_count(&self) -> usize {
        if self.insured_losses { 2 } else { 1 }
    }

    pub fn curves_enabled(&self) -> bool {
        self.return_periods != [0.0]
    }

    pub fn risk_stats(&self) -> Vec<Statistic> {
        let mut stats = Vec::new();
        if self.mean {
            stats.push(Statistic::Mean);
        }
        stats.extend(self.quantiles.iter().map(|&q| Statistic::Quantile(q)));
        stats
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(RiskError::Configuration(msg));
        if !(self.investigation_time > 0.0) {
            return bad(format!("investigation_time must be positive, got {}", self.investigation_time));
        }
        if let Some(t) = self.risk_investigation_time
            && !(t > 0.0)
        {
            return bad(format!("risk_investigation_time must be positive, got {t}"));
        }
        if self.ses_per_logic_tree_path == 0 {
            return bad("ses_per_logic_tree_path must be at least 1".to_string());
        }
        if !self.minimum_intensity.is_finite() || self.minimum_intensity < 0.0 {
            return bad(format!("invalid minimum_intensity {}", self.minimum_intensity));
        }
        if self.loss_types.is_empty() {
            return bad("no loss types configured".to_string());
        }
        if self.curves_enabled() {
            if self.return_periods.iter().any(|&p| !(p > 0.0) || !p.is_finite()) {
                return bad(format!("return periods must be positive: {:?}", self.return_periods));
            }
            if self.return_periods.windows(2).any(|w| w[0] >= w[1]) {
                return bad(format!(
                    "return periods must be strictly increasing: {:?}",
                    self.return_periods
                ));
            }
        }
        if let Some(&p) = self.conditional_loss_poes.iter().find(|&&p| !(p > 0.0 && p < 1.0)) {
            return bad(format!("conditional loss poe {p} outside (0, 1)"));
        }
        if let Some(&q) = self.quantiles.iter().find(|&&q| !(0.0..=1.0).contains(&q)) {
            return bad(format!("quantile {q} outside [0, 1]"));
        }
        if self.epsilon_sampling == 0 {
            return bad("epsilon_sampling must be at least 1".to_string());
        }
        if let Some(w) = self.max_weight
            && !(w > 0.0)
        {
            return bad(format!("max_weight must be positive, got {w}"));
        }
        Ok(())
    }

    /// Compare against the hazard calculation this run reuses.
    pub fn check_parent(&self, parent: &ParentParams) -> Result<()> {
        if parent.investigation_time != self.investigation_time {
            return Err(RiskError::ParentMismatch {
                param: "investigation_time",
                parent: parent.investigation_time,
                current: self.investigation_time,
            });
        }
        if parent.minimum_intensity != self.minimum_intensity {
            return Err(RiskError::ParentMismatch {
                param: "minimum_intensity",
                parent: parent.minimum_intensity,
                current: self.minimum_intensity,
            });
        }
        Ok(())
    }

    /// Fix the array shapes of one calculation.
    pub fn resolve(&self, assets: usize, events: usize, rlzs: usize) -> Dims {
        Dims {
            assets,
            events,
            rlzs,
            loss_types: self.loss_types.len(),
            insured: self.insured_count(),
        }
    }
}

/// Accumulator shapes, fixed for the lifetime of a calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dims {
    pub assets: usize,
    pub events: usize,
    pub rlzs: usize,
    pub loss_types: usize,
    pub insured: usize,
}

impl Dims {
    /// Width of a loss vector: L·I.
    pub fn columns(&self) -> usize {
        self.loss_types * self.insured
    }

    /// Column of loss type `l` with insured flag `i`.
    pub fn column(&self, l: usize, i: usize) -> usize {
        l + self.loss_types * i
    }

    /// Loss type of a column.
    pub fn loss_type_of(&self, li: usize) -> usize {
        li % self.loss_types
    }

    pub fn column_names(&self, loss_types: &[String]) -> Vec<String> {
        (0..self.insured)
            .flat_map(|i| {
                loss_types
                    .iter()
                    .map(move |lt| if i == 0 { lt.clone() } else { format!("{lt}_ins") })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_config_is_valid() {
        RiskConfig::canonical().validate().expect("canonical config must validate");
    }

    #[test]
    fn ses_ratio_annualizes_over_all_event_sets() {
        let mut config = RiskConfig::canonical();
        config.investigation_time = 50.0;
        config.ses_per_logic_tree_path = 20;
        assert_eq!(config.eff_time(), 1000.0);
        assert_eq!(config.ses_ratio(), 0.05);
        config.risk_investigation_time = Some(1.0);
        assert_eq!(config.ses_ratio(), 0.001);
    }

    #[test]
    fn unsorted_return_periods_rejected() {
        let mut config = RiskConfig::canonical();
        config.return_periods = vec![100.0, 50.0];
        assert!(matches!(config.validate(), Err(RiskError::Configuration(_))));
    }

    #[test]
    fn zero_return_period_disables_curves() {
        let mut config = RiskConfig::canonical();
        config.return_periods = vec![0.0];
        assert!(!config.curves_enabled());
        config.validate().expect("[0] is the disabling sentinel");
    }

    #[test]
    fn poe_of_one_rejected() {
        let mut config = RiskConfig::canonical();
        config.conditional_loss_poes = vec![1.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn parent_with_other_minimum_intensity_rejected() {
        let config = RiskConfig::canonical();
        let parent = ParentParams { investigation_time: 50.0, minimum_intensity: 0.05 };
        let err = config.check_parent(&parent).unwrap_err();
        assert!(matches!(err, RiskError::ParentMismatch { param: "minimum_intensity", .. }));
    }

    #[test]
    fn insured_columns_follow_ground_up_columns() {
        let mut config = RiskConfig::canonical();
        config.loss_types = vec!["structural".to_string(), "contents".to_string()];
        config.insured_losses = true;
        let dims = config.resolve(3, 5, 2);
        assert_eq!(dims.columns(), 4);
        assert_eq!(dims.column(1, 1), 3);
        assert_eq!(dims.loss_type_of(3), 1);
        assert_eq!(
            dims.column_names(&config.loss_types),
            vec!["structural", "contents", "structural_ins", "contents_ins"]
        );
    }

    #[test]
    fn risk_stats_lists_mean_then_quantiles() {
        let config = RiskConfig::canonical();
        let names: Vec<String> = config.risk_stats().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["mean", "quantile-0.15", "quantile-0.85"]);
    }
}
