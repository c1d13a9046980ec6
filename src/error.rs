//! Error and warning types for training and ingest.
//!
//! Fatal conditions abort the training call; partially trained forests are
//! never returned. Recoverable conditions are accumulated as [`Warning`]
//! values and handed back alongside results.

use std::fmt;

use thiserror::Error;

/// Invalid hyperparameter or shape mismatch detected at entry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{name} must be at least {min}, got {got}")]
    BelowMinimum {
        name: &'static str,
        min: usize,
        got: usize,
    },

    #[error("{name} must lie in [{lo}, {hi}], got {got}")]
    OutOfRange {
        name: &'static str,
        lo: f64,
        hi: f64,
        got: f64,
    },

    #[error("predictor probability vector length {got} does not match predictor count {expected}")]
    ProbLenMismatch { expected: usize, got: usize },

    #[error("monotonicity vector length {got} does not match numeric predictor count {expected}")]
    MonoLenMismatch { expected: usize, got: usize },

    #[error("split quantile vector length {got} does not match predictor count {expected}")]
    QuantLenMismatch { expected: usize, got: usize },

    #[error("no splitting candidates possible: predFixed is zero and predProb is all-zero")]
    NoCandidates,

    #[error("nSamp ({n_samp}) exceeds observation count ({n_obs}) without replacement")]
    SampleExceedsObservations { n_samp: usize, n_obs: usize },
}

/// Malformed training or prediction data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("predictor {pred_idx} has {got} rows, expected {expected}")]
    ShapeMismatch {
        pred_idx: usize,
        expected: usize,
        got: usize,
    },

    #[error("factor predictor {pred_idx} carries level {level} outside cardinality {cardinality}")]
    LevelOutOfRange {
        pred_idx: usize,
        level: u32,
        cardinality: u32,
    },

    #[error("predictor {pred_idx} contains a non-finite value at row {row}")]
    NonFinite { pred_idx: usize, row: usize },

    #[error("sparse column {pred_idx} is inconsistent: {detail}")]
    SparseColumn {
        pred_idx: usize,
        detail: &'static str,
    },

    #[error("response length {got} does not match row count {expected}")]
    ResponseLenMismatch { expected: usize, got: usize },

    #[error("response category {ctg} outside declared count {n_ctg}")]
    CategoryOutOfRange { ctg: u32, n_ctg: u32 },

    #[error("weight vector length {got} does not match expected count {expected}")]
    WeightLenMismatch { expected: usize, got: usize },

    #[error("weights must be non-negative with a positive sum")]
    DegenerateWeights,
}

/// Top-level training error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Data(#[from] DataError),
}

/// Recoverable conditions surfaced alongside results.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub enum Warning {
    /// Prediction-time factor level never observed in training; remapped to
    /// a proxy level that fails every split.
    UnseenFactorLevel { pred_idx: usize, level: u32 },
    /// All response values identical; every tree is a single leaf.
    DegenerateResponse,
    /// A declared response category never appears in the training response.
    AbsentCategory { ctg: u32 },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::UnseenFactorLevel { pred_idx, level } => write!(
                f,
                "predictor {pred_idx}: level {level} unseen in training; remapped to proxy"
            ),
            Warning::DegenerateResponse => write!(f, "response is constant"),
            Warning::AbsentCategory { ctg } => {
                write!(f, "category {ctg} absent from training response")
            }
        }
    }
}
