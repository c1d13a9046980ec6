//! Numeric cut accumulators.
//!
//! One left-to-right sweep over a candidate's rank-ordered observations,
//! accumulating running response aggregates and scoring every rank
//! boundary. An implicit run participates as a residual pseudo-run whose
//! aggregates are the node totals minus the explicit totals, injected at
//! the implicit rank's ordered position.

use crate::frame::RankedPred;
use crate::obs::Obs;

use super::nux::{SplitEncoding, SplitNux};

/// Best boundary seen so far.
struct BestCut {
    obs_right_rel: usize,
    rank_left: u32,
    rank_right: u32,
    implicit_true: bool,
}

/// Boundary scoring for one response flavor.
trait CutScorer {
    fn add(&mut self, obs: &Obs);
    fn add_residual(&mut self);
    /// Score the current boundary, or `None` when a side is empty or a
    /// constraint rejects it.
    fn score(&self) -> Option<f64>;
}

/// Weighted-variance scoring with optional monotone gating.
struct RegScorer {
    sum: f64,
    s_count: u32,
    sum_l: f64,
    cnt_l: u32,
    resid_sum: f64,
    resid_cnt: u32,
    mono: i8,
}

impl RegScorer {
    fn new(nux: &SplitNux, obs: &[Obs], mono: i8) -> Self {
        let (expl_sum, expl_cnt) = obs
            .iter()
            .fold((0.0, 0u32), |(s, c), o| (s + o.y_sum, c + o.s_count));
        Self {
            sum: nux.sum,
            s_count: nux.s_count,
            sum_l: 0.0,
            cnt_l: 0,
            resid_sum: nux.sum - expl_sum,
            resid_cnt: nux.s_count - expl_cnt,
            mono,
        }
    }
}

impl CutScorer for RegScorer {
    fn add(&mut self, obs: &Obs) {
        self.sum_l += obs.y_sum;
        self.cnt_l += obs.s_count;
    }

    fn add_residual(&mut self) {
        self.sum_l += self.resid_sum;
        self.cnt_l += self.resid_cnt;
    }

    fn score(&self) -> Option<f64> {
        let cnt_r = self.s_count - self.cnt_l;
        if self.cnt_l == 0 || cnt_r == 0 {
            return None;
        }
        let sum_r = self.sum - self.sum_l;

        if self.mono != 0 {
            let mean_l = self.sum_l / self.cnt_l as f64;
            let mean_r = sum_r / cnt_r as f64;
            let ascending = mean_l <= mean_r;
            if (self.mono > 0) != ascending && mean_l != mean_r {
                return None;
            }
        }

        Some(self.sum_l * self.sum_l / self.cnt_l as f64 + sum_r * sum_r / cnt_r as f64)
    }
}

/// Gini scoring over the category census.
struct CtgScorer {
    sum: f64,
    sum_l: f64,
    /// Running left census and residual census, by category.
    ctg_l: Vec<f64>,
    resid_ctg: Vec<f64>,
    /// Node census, fixed.
    ctg_tot: Vec<f64>,
    ss_l: f64,
    ss_r: f64,
}

impl CtgScorer {
    fn new(nux: &SplitNux, obs: &[Obs], ctg_tot: &[f64]) -> Self {
        let n_ctg = ctg_tot.len();
        let mut expl_ctg = vec![0.0; n_ctg];
        for o in obs {
            expl_ctg[o.ctg as usize] += o.y_sum;
        }
        let resid_ctg: Vec<f64> = ctg_tot
            .iter()
            .zip(expl_ctg.iter())
            .map(|(t, e)| t - e)
            .collect();
        let ss_r = ctg_tot.iter().map(|t| t * t).sum();

        Self {
            sum: nux.sum,
            sum_l: 0.0,
            ctg_l: vec![0.0; n_ctg],
            resid_ctg,
            ctg_tot: ctg_tot.to_vec(),
            ss_l: 0.0,
            ss_r,
        }
    }

    fn accum(&mut self, y_sum: f64, ctg: usize) {
        let left = self.ctg_l[ctg];
        let right = self.ctg_tot[ctg] - left;
        self.ss_l += y_sum * (2.0 * left + y_sum);
        self.ss_r += y_sum * (y_sum - 2.0 * right);
        self.ctg_l[ctg] = left + y_sum;
        self.sum_l += y_sum;
    }
}

impl CutScorer for CtgScorer {
    fn add(&mut self, obs: &Obs) {
        self.accum(obs.y_sum, obs.ctg as usize);
    }

    fn add_residual(&mut self) {
        let resid: Vec<f64> = self.resid_ctg.clone();
        for (ctg, y_sum) in resid.into_iter().enumerate() {
            if y_sum != 0.0 {
                self.accum(y_sum, ctg);
            }
        }
    }

    fn score(&self) -> Option<f64> {
        let sum_r = self.sum - self.sum_l;
        if self.sum_l <= 0.0 || sum_r <= 0.0 {
            return None;
        }
        Some(self.ss_l / self.sum_l + self.ss_r / sum_r)
    }
}

/// Sweeps rank boundaries, injecting the residual run at its position.
fn sweep<S: CutScorer>(
    scorer: &mut S,
    obs: &[Obs],
    implicit_rank: Option<u32>,
    pre_bias: f64,
) -> (f64, Option<BestCut>) {
    let mut max_val = pre_bias;
    let mut best: Option<BestCut> = None;
    let mut resid_pending = implicit_rank.is_some();
    let irank = implicit_rank.unwrap_or(u32::MAX);
    let mut prev_rank: Option<u32> = None;

    let try_boundary =
        |scorer: &S,
         max_val: &mut f64,
         best: &mut Option<BestCut>,
         rank_left: u32,
         rank_right: u32,
         obs_right_rel: usize,
         implicit_true: bool| {
            if let Some(val) = scorer.score() {
                if val > *max_val {
                    *max_val = val;
                    *best = Some(BestCut {
                        obs_right_rel,
                        rank_left,
                        rank_right,
                        implicit_true,
                    });
                }
            }
        };

    for (i, ob) in obs.iter().enumerate() {
        match prev_rank {
            Some(rank) if ob.rank != rank => {
                if resid_pending && irank > rank && irank < ob.rank {
                    // Boundary left of the implicit run, then the run
                    // itself joins the left side.
                    try_boundary(scorer, &mut max_val, &mut best, rank, irank, i, false);
                    scorer.add_residual();
                    resid_pending = false;
                    try_boundary(scorer, &mut max_val, &mut best, irank, ob.rank, i, true);
                } else {
                    let implicit_left = implicit_rank.is_some() && !resid_pending;
                    try_boundary(
                        scorer,
                        &mut max_val,
                        &mut best,
                        rank,
                        ob.rank,
                        i,
                        implicit_left,
                    );
                }
            }
            None if resid_pending && irank < ob.rank => {
                // Implicit run precedes every explicit rank.
                scorer.add_residual();
                resid_pending = false;
                try_boundary(scorer, &mut max_val, &mut best, irank, ob.rank, i, true);
            }
            _ => {}
        }
        scorer.add(ob);
        prev_rank = Some(ob.rank);
    }

    // Implicit run trailing every explicit rank.
    if resid_pending {
        if let Some(rank) = prev_rank {
            if irank > rank {
                try_boundary(scorer, &mut max_val, &mut best, rank, irank, obs.len(), false);
            }
        }
    }

    (max_val, best)
}

/// Interpolated cut value between adjacent boundary ranks.
fn cut_value(ranked: &RankedPred, rank_left: u32, rank_right: u32, quant: f64) -> f64 {
    let lo = ranked.value(rank_left);
    let hi = ranked.value(rank_right);
    lo + quant * (hi - lo)
}

/// Scores a numeric regression candidate, writing the best cut into the nux.
pub fn split_num_reg(nux: &mut SplitNux, obs: &[Obs], ranked: &RankedPred, quant: f64, mono: i8) {
    let implicit_rank = (nux.implicit > 0).then(|| ranked.implicit_rank().unwrap());
    let pre_bias = nux.sum * nux.sum / nux.s_count as f64;
    let mut scorer = RegScorer::new(nux, obs, mono);

    let (max_val, best) = sweep(&mut scorer, obs, implicit_rank, pre_bias);
    if let Some(cut) = best {
        nux.info = max_val - pre_bias;
        nux.encoding = Some(SplitEncoding::Cut {
            cut_value: cut_value(ranked, cut.rank_left, cut.rank_right, quant),
            obs_right: nux.range.start + cut.obs_right_rel,
            implicit_true: cut.implicit_true,
        });
    }
}

/// Scores a numeric classification candidate via Gini.
pub fn split_num_ctg(
    nux: &mut SplitNux,
    obs: &[Obs],
    ranked: &RankedPred,
    quant: f64,
    ctg_tot: &[f64],
) {
    let implicit_rank = (nux.implicit > 0).then(|| ranked.implicit_rank().unwrap());
    let ss_node: f64 = ctg_tot.iter().map(|t| t * t).sum();
    let pre_bias = ss_node / nux.sum;
    let mut scorer = CtgScorer::new(nux, obs, ctg_tot);

    let (max_val, best) = sweep(&mut scorer, obs, implicit_rank, pre_bias);
    if let Some(cut) = best {
        nux.info = max_val - pre_bias;
        nux.encoding = Some(SplitEncoding::Cut {
            cut_value: cut_value(ranked, cut.rank_left, cut.rank_right, quant),
            obs_right: nux.range.start + cut.obs_right_rel,
            implicit_true: cut.implicit_true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameBuilder;
    use crate::util::IndexRange;
    use approx::assert_relative_eq;

    fn obs_entry(rank: u32, s_idx: u32, y: f64) -> Obs {
        Obs {
            rank,
            s_idx,
            s_count: 1,
            ctg: 0,
            y_sum: y,
        }
    }

    fn ctg_entry(rank: u32, s_idx: u32, ctg: u32) -> Obs {
        Obs {
            rank,
            s_idx,
            s_count: 1,
            ctg,
            y_sum: 1.0,
        }
    }

    #[test]
    fn test_reg_cut_at_mean_step() {
        // Values 1..4 with responses 10, 10, 20, 20: cut between ranks 1, 2.
        let frame = FrameBuilder::new(4)
            .add_numeric(vec![1.0, 2.0, 3.0, 4.0])
            .build()
            .unwrap();
        let obs: Vec<Obs> = (0..4)
            .map(|i| obs_entry(i, i, if i < 2 { 10.0 } else { 20.0 }))
            .collect();

        let mut nux = SplitNux::new(0, 0, 0, IndexRange::new(0, 4), 0, 60.0, 4);
        split_num_reg(&mut nux, &obs, frame.ranked_pred(0), 0.5, 0);

        assert!(nux.info > 0.0);
        match nux.encoding.as_ref().unwrap() {
            SplitEncoding::Cut {
                cut_value,
                obs_right,
                implicit_true,
            } => {
                assert_relative_eq!(*cut_value, 2.5);
                assert_eq!(*obs_right, 2);
                assert!(!implicit_true);
            }
            other => panic!("unexpected encoding {other:?}"),
        }
    }

    #[test]
    fn test_reg_no_signal_no_split() {
        let frame = FrameBuilder::new(3)
            .add_numeric(vec![1.0, 2.0, 3.0])
            .build()
            .unwrap();
        let obs: Vec<Obs> = (0..3).map(|i| obs_entry(i, i, 5.0)).collect();

        let mut nux = SplitNux::new(0, 0, 0, IndexRange::new(0, 3), 0, 15.0, 3);
        split_num_reg(&mut nux, &obs, frame.ranked_pred(0), 0.5, 0);
        assert!(nux.encoding.is_none());
        assert_eq!(nux.info, 0.0);
    }

    #[test]
    fn test_reg_monotone_rejects_decreasing() {
        let frame = FrameBuilder::new(4)
            .add_numeric(vec![1.0, 2.0, 3.0, 4.0])
            .build()
            .unwrap();
        // Response decreases in x.
        let obs: Vec<Obs> = (0..4)
            .map(|i| obs_entry(i, i, if i < 2 { 20.0 } else { 10.0 }))
            .collect();

        let mut increasing = SplitNux::new(0, 0, 0, IndexRange::new(0, 4), 0, 60.0, 4);
        split_num_reg(&mut increasing, &obs, frame.ranked_pred(0), 0.5, 1);
        assert!(increasing.encoding.is_none());

        let mut decreasing = SplitNux::new(0, 0, 0, IndexRange::new(0, 4), 0, 60.0, 4);
        split_num_reg(&mut decreasing, &obs, frame.ranked_pred(0), 0.5, -1);
        assert!(decreasing.encoding.is_some());
    }

    #[test]
    fn test_reg_implicit_residual_separates() {
        // Sparse: rows 2 and 7 carry 5.0, rest implicit zero. Response is
        // high exactly on the explicit rows.
        let frame = FrameBuilder::new(10)
            .add_sparse_numeric(vec![2, 7], vec![5.0, 5.0])
            .build()
            .unwrap();
        let ranked = frame.ranked_pred(0);
        assert_eq!(ranked.implicit_rank(), Some(0));

        let obs = vec![obs_entry(1, 2, 100.0), obs_entry(1, 7, 100.0)];
        // Node totals include eight implicit samples with response 1.0.
        let mut nux = SplitNux::new(0, 0, 0, IndexRange::new(0, 2), 8, 208.0, 10);
        split_num_reg(&mut nux, &obs, ranked, 0.5, 0);

        assert!(nux.info > 0.0);
        match nux.encoding.as_ref().unwrap() {
            SplitEncoding::Cut {
                cut_value,
                obs_right,
                implicit_true,
            } => {
                // Implicit zero block on the true side, cut below 5.0.
                assert!(*implicit_true);
                assert_relative_eq!(*cut_value, 2.5);
                assert_eq!(*obs_right, 0);
            }
            other => panic!("unexpected encoding {other:?}"),
        }
    }

    #[test]
    fn test_ctg_gini_cut() {
        let frame = FrameBuilder::new(4)
            .add_numeric(vec![1.0, 2.0, 3.0, 4.0])
            .build()
            .unwrap();
        // Classes 0, 0, 1, 1 in rank order.
        let obs: Vec<Obs> = (0..4).map(|i| ctg_entry(i, i, u32::from(i >= 2))).collect();

        let mut nux = SplitNux::new(0, 0, 0, IndexRange::new(0, 4), 0, 4.0, 4);
        split_num_ctg(&mut nux, &obs, frame.ranked_pred(0), 0.5, &[2.0, 2.0]);

        assert!(nux.info > 0.0);
        match nux.encoding.as_ref().unwrap() {
            SplitEncoding::Cut { obs_right, .. } => assert_eq!(*obs_right, 2),
            other => panic!("unexpected encoding {other:?}"),
        }
    }

    #[test]
    fn test_quantile_placement() {
        let frame = FrameBuilder::new(2)
            .add_numeric(vec![1.0, 3.0])
            .build()
            .unwrap();
        let obs = vec![obs_entry(0, 0, 0.0), obs_entry(1, 1, 10.0)];

        let mut nux = SplitNux::new(0, 0, 0, IndexRange::new(0, 2), 0, 10.0, 2);
        split_num_reg(&mut nux, &obs, frame.ranked_pred(0), 0.25, 0);
        match nux.encoding.as_ref().unwrap() {
            SplitEncoding::Cut { cut_value, .. } => assert_relative_eq!(*cut_value, 1.5),
            other => panic!("unexpected encoding {other:?}"),
        }
    }
}
