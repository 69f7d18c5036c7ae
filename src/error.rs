//! Error and diagnostic types.
//!
//! Fatal conditions are `RiskError` values propagated with `?`; recoverable
//! conditions found while post-processing are `Diagnostic`s returned in the
//! calculation report.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RiskError {
    /// Invalid or inconsistent calculation parameters.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The hazard calculation was run with different parameters.
    #[error("the parent calculation was using {param}={parent} != {current}")]
    ParentMismatch { param: &'static str, parent: f64, current: f64 },

    /// Correlated epsilons requested but no asset correlation model given.
    #[error("configuration error: correlated epsilons requested without an asset correlation model")]
    MissingCorrelationModel,

    /// Malformed input data.
    #[error("data error: {0}")]
    Data(String),

    #[error("data error: {kind} index {index} out of range [0, {len})")]
    IndexOutOfRange { kind: &'static str, index: usize, len: usize },

    /// Loss ratio that is negative or not finite.
    #[error("data error: invalid loss ratio {value} for asset {aid} and event {eid}")]
    InvalidLossRatio { aid: u32, eid: u64, value: f64 },

    /// The combiner finished before every shard was applied.
    #[error("data error: {missing} shard result(s) never combined")]
    MissingShards { missing: usize },

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RiskError>;

/// Non-fatal condition: the affected outputs are skipped, the rest is saved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Diagnostic {
    /// Too few simulated years to interpolate loss curves meaningfully.
    InsufficientData { eff_time: f64, minimum: f64, skipped: Vec<String> },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientData { eff_time, minimum, skipped } => write!(
                f,
                "eff_time={eff_time} is below {minimum}: skipped {}",
                skipped.join(", ")
            ),
        }
    }
}
