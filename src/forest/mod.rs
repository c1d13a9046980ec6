//! Trained forest representation.
//!
//! Consumed pre-trees flatten into per-tree node records, a packed factor
//! bit stream and parallel score arrays, concatenated across trees with
//! running heights for O(1) tree boundaries. A [`Leaf`] block carries
//! per-leaf summaries for downstream quantile and out-of-bag use.

mod codec;

pub use codec::DecodeError;

use crate::pretree::{PreTree, SplitCode};

/// One flattened decision node.
///
/// `split_code` is a union: the cut value's bits for numeric splits, the
/// tree-local factor bit offset for factor splits, zero for leaves.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ForestNode {
    /// Offset to the true-branch child; zero marks a leaf.
    pub lh_del: u32,
    pub pred_idx: u32,
    pub split_code: u64,
    pub info: f64,
}

impl ForestNode {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.lh_del == 0
    }

    /// Numeric cut value. Meaningful only for numeric splits.
    #[inline]
    pub fn cut_value(&self) -> f64 {
        f64::from_bits(self.split_code)
    }

    /// Tree-local factor bit offset. Meaningful only for factor splits.
    #[inline]
    pub fn bit_offset(&self) -> usize {
        self.split_code as usize
    }
}

/// Crescent forest: trees append as they are consumed.
#[derive(Clone, Debug, PartialEq)]
pub struct Forest {
    n_pred: usize,
    n_pred_num: usize,
    /// Factor cardinalities, in factor-block order.
    cardinality: Vec<u32>,
    nodes: Vec<ForestNode>,
    scores: Vec<f64>,
    /// Running node count per tree.
    node_heights: Vec<usize>,
    fac_words: Vec<u64>,
    /// Running factor word count per tree.
    fac_heights: Vec<usize>,
    /// Per-predictor split information sums.
    pred_info: Vec<f64>,
}

impl Forest {
    pub fn new(n_pred: usize, n_pred_num: usize, cardinality: Vec<u32>) -> Self {
        Self {
            n_pred,
            n_pred_num,
            cardinality,
            nodes: Vec::new(),
            scores: Vec::new(),
            node_heights: Vec::new(),
            fac_words: Vec::new(),
            fac_heights: Vec::new(),
            pred_info: vec![0.0; n_pred],
        }
    }

    /// Consumes a pre-tree, appending its reachable nodes.
    ///
    /// Returns the leaf ordinal per pre-tree node id, for leaf-block
    /// assembly: `None` for nonterminals and unreachable nodes.
    pub fn append_tree(&mut self, pretree: &PreTree) -> Vec<Option<u32>> {
        let live = pretree.live_nodes();
        let mut new_id = vec![u32::MAX; pretree.height()];
        for (new, &old) in live.iter().enumerate() {
            new_id[old] = new as u32;
        }

        let mut leaf_ordinal = vec![None; pretree.height()];
        let mut next_leaf = 0u32;
        for &old in &live {
            let node = pretree.node(old);
            let record = if node.is_terminal() {
                leaf_ordinal[old] = Some(next_leaf);
                next_leaf += 1;
                ForestNode {
                    lh_del: 0,
                    pred_idx: 0,
                    split_code: 0,
                    info: 0.0,
                }
            } else {
                let lh_del = new_id[pretree.id_true(old)] - new_id[old];
                let split_code = match node.split {
                    SplitCode::Cut(value) => value.to_bits(),
                    SplitCode::Bits { offset, .. } => offset as u64,
                    SplitCode::None => unreachable!("nonterminal without split"),
                };
                ForestNode {
                    lh_del,
                    pred_idx: node.pred_idx,
                    split_code,
                    info: node.info,
                }
            };
            self.nodes.push(record);
            self.scores.push(pretree.score(old));
        }

        self.fac_words.extend_from_slice(pretree.split_bits().words());
        self.node_heights.push(self.nodes.len());
        self.fac_heights.push(self.fac_words.len());
        for (pred_idx, info) in pretree.pred_info().iter().enumerate() {
            self.pred_info[pred_idx] += info;
        }

        leaf_ordinal
    }

    #[inline]
    pub fn n_tree(&self) -> usize {
        self.node_heights.len()
    }

    /// Total node count across trees.
    #[inline]
    pub fn height(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn n_pred(&self) -> usize {
        self.n_pred
    }

    #[inline]
    pub fn n_pred_num(&self) -> usize {
        self.n_pred_num
    }

    #[inline]
    pub fn is_factor(&self, pred_idx: usize) -> bool {
        pred_idx >= self.n_pred_num
    }

    /// Cardinality of a factor predictor, zero for numeric.
    #[inline]
    pub fn cardinality(&self, pred_idx: usize) -> u32 {
        if self.is_factor(pred_idx) {
            self.cardinality[pred_idx - self.n_pred_num]
        } else {
            0
        }
    }

    /// Node records of one tree.
    pub fn tree_nodes(&self, tree_idx: usize) -> &[ForestNode] {
        let lo = if tree_idx == 0 {
            0
        } else {
            self.node_heights[tree_idx - 1]
        };
        &self.nodes[lo..self.node_heights[tree_idx]]
    }

    /// Scores of one tree, parallel to its node records.
    pub fn tree_scores(&self, tree_idx: usize) -> &[f64] {
        let lo = if tree_idx == 0 {
            0
        } else {
            self.node_heights[tree_idx - 1]
        };
        &self.scores[lo..self.node_heights[tree_idx]]
    }

    /// Tests a factor-split bit within one tree's word stream.
    pub fn test_fac_bit(&self, tree_idx: usize, offset: usize, level: u32) -> bool {
        let lo = if tree_idx == 0 {
            0
        } else {
            self.fac_heights[tree_idx - 1]
        };
        let bit = offset + level as usize;
        let word = lo + bit / 64;
        word < self.fac_heights[tree_idx] && (self.fac_words[word] >> (bit % 64)) & 1 != 0
    }

    /// Per-predictor split information sums.
    #[inline]
    pub fn pred_info(&self) -> &[f64] {
        &self.pred_info
    }

    pub(crate) fn raw_parts(
        &self,
    ) -> (
        &[ForestNode],
        &[f64],
        &[usize],
        &[u64],
        &[usize],
        &[u32],
        &[f64],
    ) {
        (
            &self.nodes,
            &self.scores,
            &self.node_heights,
            &self.fac_words,
            &self.fac_heights,
            &self.cardinality,
            &self.pred_info,
        )
    }

    pub(crate) fn from_raw_parts(
        n_pred: usize,
        n_pred_num: usize,
        cardinality: Vec<u32>,
        nodes: Vec<ForestNode>,
        scores: Vec<f64>,
        node_heights: Vec<usize>,
        fac_words: Vec<u64>,
        fac_heights: Vec<usize>,
        pred_info: Vec<f64>,
    ) -> Self {
        Self {
            n_pred,
            n_pred_num,
            cardinality,
            nodes,
            scores,
            node_heights,
            fac_words,
            fac_heights,
            pred_info,
        }
    }
}

/// One bagged sample retained with a leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeafSample {
    pub row: u32,
    pub s_count: u32,
}

/// Per-leaf summaries of a trained forest.
#[derive(Clone, Debug, Default)]
pub struct Leaf {
    n_ctg: usize,
    /// Leaf scores per tree, leaf-ordinal order.
    scores: Vec<Vec<f64>>,
    /// Category weight rows per tree: `leaf_count * n_ctg`. Empty for
    /// regression.
    ctg_weights: Vec<Vec<f64>>,
    /// Bagged samples per leaf, unless trained with thin leaves.
    samples: Vec<Vec<Vec<LeafSample>>>,
}

impl Leaf {
    pub fn new(n_ctg: usize) -> Self {
        Self {
            n_ctg,
            ..Default::default()
        }
    }

    pub fn push_tree(
        &mut self,
        scores: Vec<f64>,
        ctg_weights: Vec<f64>,
        samples: Option<Vec<Vec<LeafSample>>>,
    ) {
        self.scores.push(scores);
        self.ctg_weights.push(ctg_weights);
        if let Some(lists) = samples {
            self.samples.push(lists);
        }
    }

    #[inline]
    pub fn n_ctg(&self) -> usize {
        self.n_ctg
    }

    #[inline]
    pub fn n_tree(&self) -> usize {
        self.scores.len()
    }

    /// Leaf scores of one tree.
    pub fn tree_scores(&self, tree_idx: usize) -> &[f64] {
        &self.scores[tree_idx]
    }

    /// Category weights of one leaf.
    pub fn leaf_weights(&self, tree_idx: usize, leaf_idx: usize) -> &[f64] {
        let lo = leaf_idx * self.n_ctg;
        &self.ctg_weights[tree_idx][lo..lo + self.n_ctg]
    }

    /// Bagged samples of one leaf, when retained.
    pub fn leaf_samples(&self, tree_idx: usize, leaf_idx: usize) -> Option<&[LeafSample]> {
        self.samples
            .get(tree_idx)
            .map(|tree| tree[leaf_idx].as_slice())
    }

    #[inline]
    pub fn has_samples(&self) -> bool {
        !self.samples.is_empty()
    }
}
