//! Tree traversal and forest prediction.
//!
//! The core exposes enough traversal to validate a trained forest: mean
//! leaf scores for regression, per-tree category votes for classification,
//! and out-of-bag variants driven by the sampling record. Richer reporting
//! (confusion, quantiles, permutation importance) belongs to callers.

use std::collections::HashSet;

use crate::error::{DataError, Warning};
use crate::forest::Forest;
use crate::sample::SamplerBlock;

/// Prediction-time predictor values, numeric block first.
#[derive(Debug)]
pub struct TestFrame {
    n_rows: usize,
    num: Vec<Vec<f64>>,
    fac: Vec<Vec<u32>>,
}

impl TestFrame {
    /// Assembles a frame from numeric and factor columns, validating a
    /// consistent row count.
    pub fn new(num: Vec<Vec<f64>>, fac: Vec<Vec<u32>>) -> Result<Self, DataError> {
        let n_rows = num
            .first()
            .map(|c| c.len())
            .or_else(|| fac.first().map(|c| c.len()))
            .unwrap_or(0);
        for (pred_idx, col) in num.iter().enumerate() {
            if col.len() != n_rows {
                return Err(DataError::ShapeMismatch {
                    pred_idx,
                    expected: n_rows,
                    got: col.len(),
                });
            }
        }
        for (fac_idx, col) in fac.iter().enumerate() {
            if col.len() != n_rows {
                return Err(DataError::ShapeMismatch {
                    pred_idx: num.len() + fac_idx,
                    expected: n_rows,
                    got: col.len(),
                });
            }
        }
        Ok(Self { n_rows, num, fac })
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }
}

/// Walks one tree to a leaf, returning its node index within the tree.
///
/// Factor levels outside the training cardinality behave as a proxy level
/// matching no split: they fail right, with a warning recorded once per
/// `{predictor, level}`.
fn walk_tree(
    forest: &Forest,
    tree_idx: usize,
    frame: &TestFrame,
    row: usize,
    seen: &mut HashSet<(u32, u32)>,
    warnings: &mut Vec<Warning>,
) -> usize {
    let nodes = forest.tree_nodes(tree_idx);
    let mut idx = 0usize;
    while !nodes[idx].is_leaf() {
        let pred_idx = nodes[idx].pred_idx as usize;
        let sense = if forest.is_factor(pred_idx) {
            let level = frame.fac[pred_idx - forest.n_pred_num()][row];
            if level >= forest.cardinality(pred_idx) {
                if seen.insert((pred_idx as u32, level)) {
                    warnings.push(Warning::UnseenFactorLevel { pred_idx, level });
                }
                false
            } else {
                forest.test_fac_bit(tree_idx, nodes[idx].bit_offset(), level)
            }
        } else {
            frame.num[pred_idx][row] <= nodes[idx].cut_value()
        };
        idx += nodes[idx].lh_del as usize + usize::from(!sense);
    }
    idx
}

/// Regression prediction: mean leaf score over all trees.
pub fn predict_reg(forest: &Forest, frame: &TestFrame) -> (Vec<f64>, Vec<Warning>) {
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();
    let y_pred = (0..frame.n_rows())
        .map(|row| {
            let total: f64 = (0..forest.n_tree())
                .map(|tree_idx| {
                    let leaf = walk_tree(forest, tree_idx, frame, row, &mut seen, &mut warnings);
                    forest.tree_scores(tree_idx)[leaf]
                })
                .sum();
            total / forest.n_tree() as f64
        })
        .collect();
    (y_pred, warnings)
}

/// Classification prediction by per-tree vote.
///
/// Returns the winning category per row plus the vote census.
pub fn predict_ctg(
    forest: &Forest,
    n_ctg: usize,
    frame: &TestFrame,
) -> (Vec<u32>, Vec<Vec<f64>>, Vec<Warning>) {
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();
    let mut y_pred = Vec::with_capacity(frame.n_rows());
    let mut census = Vec::with_capacity(frame.n_rows());

    for row in 0..frame.n_rows() {
        let mut votes = vec![0.0f64; n_ctg];
        for tree_idx in 0..forest.n_tree() {
            let leaf = walk_tree(forest, tree_idx, frame, row, &mut seen, &mut warnings);
            let ctg = forest.tree_scores(tree_idx)[leaf] as usize;
            votes[ctg] += 1.0;
        }
        y_pred.push(arg_max(&votes));
        census.push(votes);
    }
    (y_pred, census, warnings)
}

/// Out-of-bag regression prediction: rows score only against trees whose
/// bag excludes them. Rows bagged by every tree yield `NaN`.
pub fn predict_reg_oob(
    forest: &Forest,
    sampler: &SamplerBlock,
    frame: &TestFrame,
) -> (Vec<f64>, Vec<Warning>) {
    let bag = sampler.bag_matrix();
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();

    let y_pred = (0..frame.n_rows())
        .map(|row| {
            let mut total = 0.0;
            let mut count = 0usize;
            for tree_idx in 0..forest.n_tree() {
                if bag.test(tree_idx, row) {
                    continue;
                }
                let leaf = walk_tree(forest, tree_idx, frame, row, &mut seen, &mut warnings);
                total += forest.tree_scores(tree_idx)[leaf];
                count += 1;
            }
            if count == 0 {
                f64::NAN
            } else {
                total / count as f64
            }
        })
        .collect();
    (y_pred, warnings)
}

/// Out-of-bag classification votes. Rows bagged by every tree carry an
/// empty census and a sentinel prediction.
pub fn predict_ctg_oob(
    forest: &Forest,
    n_ctg: usize,
    sampler: &SamplerBlock,
    frame: &TestFrame,
) -> (Vec<u32>, Vec<Vec<f64>>, Vec<Warning>) {
    let bag = sampler.bag_matrix();
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();
    let mut y_pred = Vec::with_capacity(frame.n_rows());
    let mut census = Vec::with_capacity(frame.n_rows());

    for row in 0..frame.n_rows() {
        let mut votes = vec![0.0f64; n_ctg];
        let mut count = 0usize;
        for tree_idx in 0..forest.n_tree() {
            if bag.test(tree_idx, row) {
                continue;
            }
            let leaf = walk_tree(forest, tree_idx, frame, row, &mut seen, &mut warnings);
            votes[forest.tree_scores(tree_idx)[leaf] as usize] += 1.0;
            count += 1;
        }
        y_pred.push(if count == 0 { u32::MAX } else { arg_max(&votes) });
        census.push(votes);
    }
    (y_pred, census, warnings)
}

fn arg_max(votes: &[f64]) -> u32 {
    let mut best = 0usize;
    for (ctg, &v) in votes.iter().enumerate() {
        if v > votes[best] {
            best = ctg;
        }
    }
    best as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pretree::PreTree;
    use crate::split::{SplitEncoding, SplitNux};
    use crate::util::IndexRange;

    /// One tree: numeric cut at 2.5, true leaf 10, false leaf 20.
    fn cut_forest() -> Forest {
        let mut pt = PreTree::new(1);
        let mut nux = SplitNux::new(0, 0, 0, IndexRange::new(0, 4), 0, 1.0, 4);
        nux.info = 1.0;
        nux.encoding = Some(SplitEncoding::Cut {
            cut_value: 2.5,
            obs_right: 2,
            implicit_true: false,
        });
        let (t, f) = pt.add_criterion(0, &nux, 0);
        pt.set_node_stats(t, 10.0, Vec::new());
        pt.set_node_stats(f, 20.0, Vec::new());

        let mut forest = Forest::new(1, 1, Vec::new());
        forest.append_tree(&pt);
        forest
    }

    /// One tree: factor level 0 true (class 1), others false (class 0).
    fn fac_forest() -> Forest {
        let mut pt = PreTree::new(1);
        let mut nux = SplitNux::new(0, 0, 0, IndexRange::new(0, 4), 0, 1.0, 4);
        nux.info = 1.0;
        nux.encoding = Some(SplitEncoding::Bits {
            bits: vec![0],
            implicit_true: false,
        });
        let (t, f) = pt.add_criterion(0, &nux, 3);
        pt.set_node_stats(t, 1.0, vec![0.0, 2.0]);
        pt.set_node_stats(f, 0.0, vec![2.0, 0.0]);

        let mut forest = Forest::new(1, 0, vec![3]);
        forest.append_tree(&pt);
        forest
    }

    #[test]
    fn test_reg_prediction_routes_by_cut() {
        let forest = cut_forest();
        let frame = TestFrame::new(vec![vec![1.0, 2.5, 3.0]], Vec::new()).unwrap();
        let (y_pred, warnings) = predict_reg(&forest, &frame);
        assert_eq!(y_pred, vec![10.0, 10.0, 20.0]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_ctg_prediction_votes() {
        let forest = fac_forest();
        let frame = TestFrame::new(Vec::new(), vec![vec![0, 1, 2]]).unwrap();
        let (y_pred, census, warnings) = predict_ctg(&forest, 2, &frame);
        assert_eq!(y_pred, vec![1, 0, 0]);
        assert_eq!(census[0], vec![0.0, 1.0]);
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_unseen_level_fails_right_with_warning() {
        let forest = fac_forest();
        let frame = TestFrame::new(Vec::new(), vec![vec![7]]).unwrap();
        let (y_pred, _, warnings) = predict_ctg(&forest, 2, &frame);
        // Proxy level routes false.
        assert_eq!(y_pred, vec![0]);
        assert_eq!(
            warnings,
            vec![Warning::UnseenFactorLevel {
                pred_idx: 0,
                level: 7
            }]
        );
    }

    #[test]
    fn test_frame_shape_validation() {
        let err = TestFrame::new(vec![vec![1.0, 2.0], vec![1.0]], Vec::new()).unwrap_err();
        assert!(matches!(err, DataError::ShapeMismatch { pred_idx: 1, .. }));
    }
}
