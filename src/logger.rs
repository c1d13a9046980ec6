//! Structured training progress output.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Verbosity level for training output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Verbosity {
    /// No output.
    #[default]
    Silent,
    /// Per-block progress and a final summary.
    Info,
    /// Additionally reports per-tree node counts.
    Debug,
}

/// Logger for the training loop.
///
/// Writes to stderr so that piped program output stays clean.
pub struct TrainingLogger {
    verbosity: Verbosity,
    started: Option<Instant>,
    n_tree: usize,
}

impl TrainingLogger {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            started: None,
            n_tree: 0,
        }
    }

    pub fn start_training(&mut self, n_tree: usize) {
        self.n_tree = n_tree;
        self.started = Some(Instant::now());
        if self.verbosity >= Verbosity::Info {
            eprintln!("[canopy] training {n_tree} trees");
        }
    }

    pub fn block_done(&self, trees_done: usize) {
        if self.verbosity >= Verbosity::Info {
            eprintln!("[canopy] {trees_done}/{} trees", self.n_tree);
        }
    }

    pub fn tree_done(&self, tree_idx: usize, n_nodes: usize, n_leaves: usize) {
        if self.verbosity >= Verbosity::Debug {
            eprintln!("[canopy]   tree {tree_idx}: {n_nodes} nodes, {n_leaves} leaves");
        }
    }

    pub fn finish_training(&self, total_nodes: usize) {
        if self.verbosity >= Verbosity::Info {
            let elapsed = self
                .started
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or_default();
            eprintln!(
                "[canopy] done: {} trees, {total_nodes} nodes, {elapsed:.2}s",
                self.n_tree
            );
        }
    }
}
