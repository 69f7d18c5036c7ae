//! Return-period loss curves and conditional loss maps.

use crate::config::RiskConfig;

/// Return periods of the form `{1, 2, 5} × 10^k` spanning the periods an
/// `eff_time`-long catalog of `num_losses` events can resolve.
pub fn return_periods(eff_time: f64, num_losses: usize) -> Vec<f64> {
    let min_time = eff_time / num_losses.max(1) as f64;
    let mut periods = Vec::new();
    let mut scale = 1.0;
    'outer: loop {
        for mult in [1.0, 2.0, 5.0] {
            let period = mult * scale;
            if period > eff_time {
                break 'outer;
            }
            if period >= min_time {
                periods.push(period);
            }
        }
        scale *= 10.0;
    }
    periods
}

/// Linear interpolation in `ln(x)`, clamped at both ends. `xs` ascending.
fn log_interp(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len();
    if n == 0 {
        return 0.0;
    }
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[n - 1] {
        return ys[n - 1];
    }
    let j = xs.partition_point(|&p| p < x);
    let (x0, x1) = (xs[j - 1], xs[j]);
    let t = (x.ln() - x0.ln()) / (x1.ln() - x0.ln());
    ys[j - 1] + t * (ys[j] - ys[j - 1])
}

/// Loss at each return period from a series of event losses.
///
/// The `k`-th largest loss (1-based) is exceeded once every `eff_time / k`
/// years. The series is padded with zeros up to `num_events`. Periods longer
/// than `eff_time` cannot be observed and get 0; periods shorter than the
/// shortest empirical one get the smallest loss.
pub fn losses_by_period(losses: &[f64], return_periods: &[f64], num_events: usize, eff_time: f64) -> Vec<f64> {
    let n = num_events.max(losses.len());
    if n == 0 {
        return vec![0.0; return_periods.len()];
    }
    // ascending losses paired with ascending periods
    let mut sorted = vec![0.0; n - losses.len()];
    sorted.extend_from_slice(losses);
    sorted.sort_by(f64::total_cmp);
    let periods: Vec<f64> = (0..n).map(|i| eff_time / (n - i) as f64).collect();
    return_periods
        .iter()
        .map(|&rp| if rp > eff_time { 0.0 } else { log_interp(rp, &periods, &sorted) })
        .collect()
}

/// Builds curves and maps for one calculation.
#[derive(Debug, Clone, PartialEq)]
pub struct LossCurveBuilder {
    return_periods: Vec<f64>,
    eff_time: f64,
    num_events: usize,
    poes: Vec<f64>,
    risk_time: f64,
}

impl LossCurveBuilder {
    pub fn new(return_periods: Vec<f64>, eff_time: f64, num_events: usize, poes: Vec<f64>, risk_time: f64) -> Self {
        LossCurveBuilder { return_periods, eff_time, num_events, poes, risk_time }
    }

    /// Configured return periods, or generated ones when none are given.
    pub fn from_config(config: &RiskConfig, num_events: usize) -> Self {
        let eff_time = config.eff_time();
        let periods = if config.return_periods.is_empty() {
            return_periods(eff_time, num_events)
        } else {
            config.return_periods.clone()
        };
        Self::new(periods, eff_time, num_events, config.conditional_loss_poes.clone(), config.risk_time())
    }

    pub fn return_periods(&self) -> &[f64] {
        &self.return_periods
    }

    pub fn poes(&self) -> &[f64] {
        &self.poes
    }

    pub fn eff_time(&self) -> f64 {
        self.eff_time
    }

    pub fn build_curve(&self, losses: &[f64]) -> Vec<f64> {
        losses_by_period(losses, &self.return_periods, self.num_events, self.eff_time)
    }

    /// Return period equivalent to each probability of exceedance over the
    /// risk investigation time.
    pub fn map_periods(&self) -> Vec<f64> {
        self.poes.iter().map(|&poe| -self.risk_time / (1.0 - poe).ln()).collect()
    }

    /// Loss at each poe, read off a curve built by this builder.
    pub fn build_map(&self, curve: &[f64]) -> Vec<f64> {
        self.map_periods()
            .into_iter()
            .map(|rp| log_interp(rp, &self.return_periods, curve))
            .collect()
    }
}
