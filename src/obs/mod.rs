//! Double-buffered observation partitions.
//!
//! Per predictor, two buffers of staged observations plus the machinery to
//! write them: initial staging from the ranked frame, and per-level
//! restaging into path buckets. Exactly one buffer is authoritative for a
//! given `(layer, predictor)` at any time; a restage flips the buffer.

mod path;

pub use path::{IdxPath, PATH_MAX};

use crate::frame::PredictorFrame;
use crate::sample::SampledObs;

/// One staged observation: predictor rank, sample id and response summary.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Obs {
    pub rank: u32,
    pub s_idx: u32,
    pub s_count: u32,
    pub ctg: u32,
    pub y_sum: f64,
}

/// Outcome of staging one predictor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageCount {
    /// Explicit observations written.
    pub idx_expl: usize,
    /// Whether the predictor is single-valued over the bag.
    pub singleton: bool,
}

/// Per-predictor double-buffered observation storage for one tree.
///
/// Layout: predictor-major regions of `2 * bag_count` entries, buffer 0
/// first. Regions are independent, so restaging parallelizes over
/// predictors without aliasing.
pub struct ObsPart {
    bag_count: usize,
    n_pred: usize,
    obs: Vec<Obs>,
}

impl ObsPart {
    pub fn new(n_pred: usize, bag_count: usize) -> Self {
        Self {
            bag_count,
            n_pred,
            obs: vec![Obs::default(); n_pred * 2 * bag_count],
        }
    }

    #[inline]
    pub fn bag_count(&self) -> usize {
        self.bag_count
    }

    #[inline]
    pub fn n_pred(&self) -> usize {
        self.n_pred
    }

    /// Entries per predictor region.
    #[inline]
    pub fn region_stride(&self) -> usize {
        2 * self.bag_count
    }

    /// Authoritative buffer of one predictor.
    #[inline]
    pub fn buf(&self, pred_idx: usize, buf: u8) -> &[Obs] {
        let base = (pred_idx * 2 + buf as usize) * self.bag_count;
        &self.obs[base..base + self.bag_count]
    }

    #[inline]
    pub fn buf_mut(&mut self, pred_idx: usize, buf: u8) -> &mut [Obs] {
        let base = (pred_idx * 2 + buf as usize) * self.bag_count;
        &mut self.obs[base..base + self.bag_count]
    }

    /// Full backing slice, for parallel iteration by predictor region.
    #[inline]
    pub fn all_mut(&mut self) -> &mut [Obs] {
        &mut self.obs
    }

    /// Splits a predictor region into its two buffers.
    #[inline]
    pub fn split_region(region: &mut [Obs], bag_count: usize) -> (&mut [Obs], &mut [Obs]) {
        region.split_at_mut(bag_count)
    }

    /// Stages every predictor into buffer 0.
    ///
    /// Walks each predictor's ranked list, writing one entry per sampled
    /// row. Rows of the implicit rank produce no entries; their count is
    /// recovered as `bag_count - idx_expl`.
    pub fn stage(&mut self, frame: &PredictorFrame, sampled: &SampledObs) -> Vec<StageCount> {
        let mut counts = Vec::with_capacity(self.n_pred);
        for pred_idx in 0..self.n_pred {
            counts.push(self.stage_pred(pred_idx, frame, sampled));
        }
        counts
    }

    fn stage_pred(
        &mut self,
        pred_idx: usize,
        frame: &PredictorFrame,
        sampled: &SampledObs,
    ) -> StageCount {
        let bag_count = self.bag_count;
        let buf = self.buf_mut(pred_idx, 0);

        let mut slot = 0usize;
        let mut rank_first = u32::MAX;
        let mut multi_rank = false;
        for pair in frame.ranked_pred(pred_idx).pairs() {
            if let Some(s_idx) = sampled.sample_of_row(pair.row as usize) {
                let nux = sampled.nux(s_idx as usize);
                buf[slot] = Obs {
                    rank: pair.rank,
                    s_idx,
                    s_count: nux.s_count,
                    ctg: nux.ctg,
                    y_sum: nux.y_sum,
                };
                slot += 1;
                if rank_first == u32::MAX {
                    rank_first = pair.rank;
                } else if pair.rank != rank_first {
                    multi_rank = true;
                }
            }
        }

        let implicit = bag_count - slot;
        let singleton = if slot == 0 {
            true // All samples implicit.
        } else {
            !multi_rank && implicit == 0
        };

        StageCount {
            idx_expl: slot,
            singleton,
        }
    }
}
