//! Training configuration.
//!
//! All tuning state lives in an immutable [`TrainConfig`] value threaded
//! through the frontier and split machinery. Use struct construction with
//! `..Default::default()` for convenient configuration.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::frame::PredictorFrame;
use crate::logger::Verbosity;

/// Parameters for forest training.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Number of trees to train.
    pub n_tree: usize,
    /// Samples drawn per tree. `0` resolves to the observation count.
    pub n_samp: usize,
    /// Sample with replacement.
    pub replace: bool,
    /// Fixed number of split candidates per node. `0` selects Bernoulli
    /// candidacy by `pred_prob` instead.
    pub pred_fixed: usize,
    /// Per-predictor candidacy probability (Bernoulli mode) or draw weight
    /// (fixed mode). Empty resolves to uniform.
    pub pred_prob: Vec<f64>,
    /// Minimum sample count for a splitable node.
    pub min_node: usize,
    /// Maximum number of levels to split.
    pub tot_levels: usize,
    /// Maximum leaf count per tree after merging. `0` = unlimited.
    pub leaf_max: usize,
    /// A split must carry at least this fraction of its parent's information.
    pub min_ratio: f64,
    /// Monotonicity constraints for numeric predictors, in `[-1, 1]`.
    /// The magnitude is the per-node probability of enforcing the
    /// constraint. Empty = unconstrained. Regression only.
    pub reg_mono: Vec<f64>,
    /// Where within the gap between adjacent cut ranks to place the cut
    /// value, per predictor, in `[0, 1]`. Empty resolves to `0.5`.
    pub split_quant: Vec<f64>,
    /// Worker thread count. `0` = use the global pool, `1` = sequential.
    pub n_thread: usize,
    /// Trees dispatched per parallel block.
    pub tree_block: usize,
    /// Omit per-leaf sample lists from the trained leaf block.
    pub thin_leaves: bool,
    /// Back-layer flush threshold: a rear layer whose live-definition share
    /// falls below this fraction of all back definitions is flushed forward.
    pub flush_efficiency: f64,
    /// Training log level.
    pub verbosity: Verbosity,
    /// Random seed. Trees derive their generators from `(seed, tree index)`,
    /// so results are reproducible at any thread count.
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            n_tree: 500,
            n_samp: 0,
            replace: true,
            pred_fixed: 0,
            pred_prob: Vec::new(),
            min_node: 2,
            tot_levels: usize::MAX,
            leaf_max: 0,
            min_ratio: 0.0,
            reg_mono: Vec::new(),
            split_quant: Vec::new(),
            n_thread: 0,
            tree_block: 20,
            thin_leaves: false,
            flush_efficiency: 0.15,
            verbosity: Verbosity::default(),
            seed: 42,
        }
    }
}

impl TrainConfig {
    /// Validate against the frame this configuration will train over.
    pub fn validate(&self, frame: &PredictorFrame) -> Result<(), ConfigError> {
        let n_pred = frame.n_pred();

        if self.n_tree == 0 {
            return Err(ConfigError::BelowMinimum {
                name: "nTree",
                min: 1,
                got: 0,
            });
        }
        if self.min_node == 0 {
            return Err(ConfigError::BelowMinimum {
                name: "minNode",
                min: 1,
                got: 0,
            });
        }
        if self.tot_levels == 0 {
            return Err(ConfigError::BelowMinimum {
                name: "totLevels",
                min: 1,
                got: 0,
            });
        }
        if self.tree_block == 0 {
            return Err(ConfigError::BelowMinimum {
                name: "treeBlock",
                min: 1,
                got: 0,
            });
        }
        if !(0.0..=1.0).contains(&self.min_ratio) {
            return Err(ConfigError::OutOfRange {
                name: "minRatio",
                lo: 0.0,
                hi: 1.0,
                got: self.min_ratio,
            });
        }
        if !(0.0..=1.0).contains(&self.flush_efficiency) {
            return Err(ConfigError::OutOfRange {
                name: "flushEfficiency",
                lo: 0.0,
                hi: 1.0,
                got: self.flush_efficiency,
            });
        }

        if !self.pred_prob.is_empty() {
            if self.pred_prob.len() != n_pred {
                return Err(ConfigError::ProbLenMismatch {
                    expected: n_pred,
                    got: self.pred_prob.len(),
                });
            }
            for &p in &self.pred_prob {
                if !(0.0..=1.0).contains(&p) {
                    return Err(ConfigError::OutOfRange {
                        name: "predProb",
                        lo: 0.0,
                        hi: 1.0,
                        got: p,
                    });
                }
            }
            if self.pred_fixed == 0 && self.pred_prob.iter().all(|&p| p == 0.0) {
                return Err(ConfigError::NoCandidates);
            }
        }

        if !self.reg_mono.is_empty() {
            if self.reg_mono.len() != frame.n_pred_num() {
                return Err(ConfigError::MonoLenMismatch {
                    expected: frame.n_pred_num(),
                    got: self.reg_mono.len(),
                });
            }
            for &m in &self.reg_mono {
                if !(-1.0..=1.0).contains(&m) {
                    return Err(ConfigError::OutOfRange {
                        name: "regMono",
                        lo: -1.0,
                        hi: 1.0,
                        got: m,
                    });
                }
            }
        }

        if !self.split_quant.is_empty() {
            if self.split_quant.len() != n_pred {
                return Err(ConfigError::QuantLenMismatch {
                    expected: n_pred,
                    got: self.split_quant.len(),
                });
            }
            for &q in &self.split_quant {
                if !(0.0..=1.0).contains(&q) {
                    return Err(ConfigError::OutOfRange {
                        name: "splitQuant",
                        lo: 0.0,
                        hi: 1.0,
                        got: q,
                    });
                }
            }
        }

        Ok(())
    }

    /// Sample count for a bag over `n_obs` observations.
    #[inline]
    pub fn resolved_n_samp(&self, n_obs: usize) -> usize {
        if self.n_samp == 0 {
            n_obs
        } else {
            self.n_samp
        }
    }

    /// Candidacy probability for a predictor, defaulting to uniform.
    #[inline]
    pub fn pred_prob(&self, pred_idx: usize) -> f64 {
        if self.pred_prob.is_empty() {
            1.0
        } else {
            self.pred_prob[pred_idx]
        }
    }

    /// Cut placement quantile for a predictor.
    #[inline]
    pub fn split_quant(&self, pred_idx: usize) -> f64 {
        if self.split_quant.is_empty() {
            0.5
        } else {
            self.split_quant[pred_idx]
        }
    }

    /// Monotone mode for a numeric predictor: sign of the constraint, or
    /// zero when unconstrained.
    #[inline]
    pub fn mono_sign(&self, num_idx: usize) -> f64 {
        if self.reg_mono.is_empty() {
            0.0
        } else {
            self.reg_mono[num_idx]
        }
    }
}

/// Parallelism strategy for training operations.
///
/// This is a hint: components may run sequentially when the workload is too
/// small to benefit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parallelism {
    /// Strictly sequential execution, no thread spawning.
    Sequential,
    /// Parallel execution with up to `n` threads.
    Parallel(usize),
}

impl Parallelism {
    /// Create a parallelism hint from a thread count.
    ///
    /// - `0` uses rayon's current thread count
    /// - `1` is sequential
    /// - `n > 1` is parallel with up to `n` threads
    #[inline]
    pub fn from_threads(n_threads: usize) -> Self {
        match n_threads {
            0 => Self::Parallel(rayon::current_num_threads()),
            1 => Self::Sequential,
            n => Self::Parallel(n),
        }
    }

    /// Returns `true` if parallel execution is allowed.
    #[inline]
    pub fn allows_parallel(self) -> bool {
        matches!(self, Self::Parallel(n) if n > 1)
    }
}
