//! Crescent pre-tree.
//!
//! Nodes append in creation order as criteria commit; a nonterminal stores
//! the offset to its true-branch child, with the false branch adjacent.
//! After training the tree may merge leaves back up to a budget before
//! being consumed into the forest.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::split::{SplitEncoding, SplitNux};
use crate::util::BitVec;

/// Split payload of a nonterminal.
#[derive(Clone, Debug, PartialEq)]
pub enum SplitCode {
    /// Terminal placeholder.
    None,
    /// Numeric cut value; values at or below take the true branch.
    Cut(f64),
    /// Factor levels at `offset` in the tree's bit vector; set levels take
    /// the true branch.
    Bits { offset: usize, cardinality: u32 },
}

/// One pre-tree node.
#[derive(Clone, Debug)]
pub struct PTNode {
    /// Offset to the true-branch child; zero marks a terminal.
    pub lh_del: usize,
    pub pred_idx: u32,
    pub info: f64,
    pub split: SplitCode,
}

impl PTNode {
    fn terminal() -> Self {
        Self {
            lh_del: 0,
            pred_idx: 0,
            info: 0.0,
            split: SplitCode::None,
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.lh_del == 0
    }
}

/// Min-heap entry for leaf merging.
struct MergeCand {
    info: f64,
    pt_id: usize,
}

impl PartialEq for MergeCand {
    fn eq(&self, other: &Self) -> bool {
        self.info == other.info && self.pt_id == other.pt_id
    }
}
impl Eq for MergeCand {}

impl Ord for MergeCand {
    fn cmp(&self, other: &Self) -> Ordering {
        // Inverted: BinaryHeap pops the lowest information first.
        other
            .info
            .partial_cmp(&self.info)
            .unwrap_or(Ordering::Equal)
            .then(other.pt_id.cmp(&self.pt_id))
    }
}
impl PartialOrd for MergeCand {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// In-memory tree under construction.
pub struct PreTree {
    nodes: Vec<PTNode>,
    scores: Vec<f64>,
    /// Category weight rows per node. Empty rows for regression.
    ctg_census: Vec<Vec<f64>>,
    split_bits: BitVec,
    leaf_count: usize,
    /// Per-predictor split information sums.
    pred_info: Vec<f64>,
}

impl PreTree {
    /// A single-leaf tree awaiting criteria.
    pub fn new(n_pred: usize) -> Self {
        Self {
            nodes: vec![PTNode::terminal()],
            scores: vec![0.0],
            ctg_census: vec![Vec::new()],
            split_bits: BitVec::new(),
            leaf_count: 1,
            pred_info: vec![0.0; n_pred],
        }
    }

    /// Converts a terminal into a nonterminal, appending its offspring.
    ///
    /// Returns the pre-tree ids of the true and false successors.
    pub fn add_criterion(&mut self, pt_id: usize, nux: &SplitNux, cardinality: u32) -> (usize, usize) {
        debug_assert!(self.nodes[pt_id].is_terminal());

        let split = match nux.encoding.as_ref().expect("committing unencoded split") {
            SplitEncoding::Cut { cut_value, .. } => SplitCode::Cut(*cut_value),
            SplitEncoding::Bits { bits, .. } => {
                let offset = self.split_bits.append_run(cardinality as usize);
                for &level in bits {
                    self.split_bits.set_in_run(offset, level as usize);
                }
                SplitCode::Bits {
                    offset,
                    cardinality,
                }
            }
        };

        let child = self.nodes.len();
        self.nodes[pt_id] = PTNode {
            lh_del: child - pt_id,
            pred_idx: nux.pred_idx,
            info: nux.info,
            split,
        };
        self.pred_info[nux.pred_idx as usize] += nux.info;

        self.nodes.push(PTNode::terminal());
        self.nodes.push(PTNode::terminal());
        self.scores.extend([0.0, 0.0]);
        self.ctg_census.extend([Vec::new(), Vec::new()]);
        self.leaf_count += 1;

        (child, child + 1)
    }

    /// Records a node's response summary.
    pub fn set_node_stats(&mut self, pt_id: usize, score: f64, census: Vec<f64>) {
        self.scores[pt_id] = score;
        self.ctg_census[pt_id] = census;
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    #[inline]
    pub fn node(&self, pt_id: usize) -> &PTNode {
        &self.nodes[pt_id]
    }

    #[inline]
    pub fn score(&self, pt_id: usize) -> f64 {
        self.scores[pt_id]
    }

    #[inline]
    pub fn census(&self, pt_id: usize) -> &[f64] {
        &self.ctg_census[pt_id]
    }

    #[inline]
    pub fn split_bits(&self) -> &BitVec {
        &self.split_bits
    }

    #[inline]
    pub fn pred_info(&self) -> &[f64] {
        &self.pred_info
    }

    #[inline]
    pub fn id_true(&self, pt_id: usize) -> usize {
        pt_id + self.nodes[pt_id].lh_del
    }

    #[inline]
    pub fn id_false(&self, pt_id: usize) -> usize {
        pt_id + self.nodes[pt_id].lh_del + 1
    }

    /// Whether a nonterminal has two terminal children.
    fn is_mergeable(&self, pt_id: usize) -> bool {
        !self.nodes[pt_id].is_terminal()
            && self.nodes[self.id_true(pt_id)].is_terminal()
            && self.nodes[self.id_false(pt_id)].is_terminal()
    }

    /// Merges leaves from lowest information upward until the leaf count
    /// drops to `leaf_max`.
    ///
    /// Returns a remap from each node id to its surviving node: identity,
    /// except nodes swallowed by a merged ancestor. `leaf_max` of zero is
    /// a no-op.
    pub fn leaf_merge(&mut self, leaf_max: usize) -> Vec<u32> {
        let mut remap: Vec<u32> = (0..self.nodes.len() as u32).collect();
        if leaf_max == 0 || self.leaf_count <= leaf_max {
            return remap;
        }

        let parent = self.parents();
        let mut heap = BinaryHeap::new();
        for pt_id in 0..self.nodes.len() {
            if self.is_mergeable(pt_id) {
                heap.push(MergeCand {
                    info: self.nodes[pt_id].info,
                    pt_id,
                });
            }
        }

        while self.leaf_count > leaf_max {
            let cand = heap.pop().expect("mergeable node below leaf budget");
            if !self.is_mergeable(cand.pt_id) {
                continue; // Stale entry.
            }
            let id_true = self.id_true(cand.pt_id);
            let id_false = self.id_false(cand.pt_id);
            remap[id_true] = cand.pt_id as u32;
            remap[id_false] = cand.pt_id as u32;
            self.nodes[cand.pt_id] = PTNode {
                lh_del: 0,
                pred_idx: 0,
                info: 0.0,
                split: SplitCode::None,
            };
            self.leaf_count -= 1;

            if let Some(par) = parent[cand.pt_id] {
                if self.is_mergeable(par) {
                    heap.push(MergeCand {
                        info: self.nodes[par].info,
                        pt_id: par,
                    });
                }
            }
        }

        // Resolve chains of swallowed nodes to their surviving ancestor.
        for pt_id in 0..remap.len() {
            let mut target = remap[pt_id];
            while remap[target as usize] != target {
                target = remap[target as usize];
            }
            remap[pt_id] = target;
        }
        remap
    }

    fn parents(&self) -> Vec<Option<usize>> {
        let mut parent = vec![None; self.nodes.len()];
        for pt_id in 0..self.nodes.len() {
            if !self.nodes[pt_id].is_terminal() {
                parent[self.id_true(pt_id)] = Some(pt_id);
                parent[self.id_false(pt_id)] = Some(pt_id);
            }
        }
        parent
    }

    /// Reachable node ids in pre-order, after any merging.
    pub fn live_nodes(&self) -> Vec<usize> {
        let mut live = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![0usize];
        while let Some(pt_id) = stack.pop() {
            live.push(pt_id);
            if !self.nodes[pt_id].is_terminal() {
                // False child visits after true, matching child id order.
                stack.push(self.id_false(pt_id));
                stack.push(self.id_true(pt_id));
            }
        }
        live.sort_unstable();
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::IndexRange;

    fn cut_nux(pred_idx: u32, info: f64) -> SplitNux {
        let mut nux = SplitNux::new(0, pred_idx, 0, IndexRange::new(0, 4), 0, 1.0, 4);
        nux.info = info;
        nux.encoding = Some(SplitEncoding::Cut {
            cut_value: 0.5,
            obs_right: 2,
            implicit_true: false,
        });
        nux
    }

    fn bits_nux(levels: Vec<u32>, info: f64) -> SplitNux {
        let mut nux = SplitNux::new(0, 0, 0, IndexRange::new(0, 4), 0, 1.0, 4);
        nux.info = info;
        nux.encoding = Some(SplitEncoding::Bits {
            bits: levels,
            implicit_true: false,
        });
        nux
    }

    #[test]
    fn test_criterion_appends_offspring() {
        let mut pt = PreTree::new(2);
        let (t, f) = pt.add_criterion(0, &cut_nux(1, 3.0), 0);
        assert_eq!((t, f), (1, 2));
        assert_eq!(pt.height(), 3);
        assert_eq!(pt.leaf_count(), 2);
        assert!(!pt.node(0).is_terminal());
        assert_eq!(pt.id_true(0), 1);
        assert_eq!(pt.id_false(0), 2);
        assert_eq!(pt.pred_info()[1], 3.0);
    }

    #[test]
    fn test_factor_bits_recorded() {
        let mut pt = PreTree::new(1);
        pt.add_criterion(0, &bits_nux(vec![0, 2], 1.0), 3);
        match pt.node(0).split {
            SplitCode::Bits {
                offset,
                cardinality,
            } => {
                assert_eq!(cardinality, 3);
                assert!(pt.split_bits().test_in_run(offset, 0));
                assert!(!pt.split_bits().test_in_run(offset, 1));
                assert!(pt.split_bits().test_in_run(offset, 2));
            }
            ref other => panic!("unexpected split code {other:?}"),
        }
    }

    #[test]
    fn test_leaf_merge_to_budget() {
        // Root splits; both children split; four leaves total. The false
        // child carries the lower information, so it merges first.
        let mut pt = PreTree::new(1);
        let (t, f) = pt.add_criterion(0, &cut_nux(0, 10.0), 0);
        let (tt, _tf) = pt.add_criterion(t, &cut_nux(0, 5.0), 0);
        let (ft, _ff) = pt.add_criterion(f, &cut_nux(0, 1.0), 0);
        assert_eq!(pt.leaf_count(), 4);

        let remap = pt.leaf_merge(3);
        assert_eq!(pt.leaf_count(), 3);
        assert!(pt.node(f).is_terminal());
        assert!(!pt.node(t).is_terminal());
        assert_eq!(remap[ft], f as u32);

        // Merging to two removes the other grandchild pair.
        let remap = pt.leaf_merge(2);
        assert_eq!(pt.leaf_count(), 2);
        assert!(pt.node(t).is_terminal());
        assert_eq!(remap[tt], t as u32);
    }

    #[test]
    fn test_leaf_merge_cascades_to_root() {
        let mut pt = PreTree::new(1);
        let (t, _) = pt.add_criterion(0, &cut_nux(0, 10.0), 0);
        pt.add_criterion(t, &cut_nux(0, 5.0), 0);

        let remap = pt.leaf_merge(1);
        assert_eq!(pt.leaf_count(), 1);
        assert!(pt.node(0).is_terminal());
        // Every node resolves to the root.
        assert!(remap.iter().all(|&r| r == 0));
    }

    #[test]
    fn test_leaf_merge_noop_at_budget() {
        let mut pt = PreTree::new(1);
        pt.add_criterion(0, &cut_nux(0, 10.0), 0);
        let before = pt.leaf_count();
        pt.leaf_merge(8);
        assert_eq!(pt.leaf_count(), before);
        pt.leaf_merge(0);
        assert_eq!(pt.leaf_count(), before);
    }

    #[test]
    fn test_live_nodes_skip_merged() {
        let mut pt = PreTree::new(1);
        let (t, f) = pt.add_criterion(0, &cut_nux(0, 10.0), 0);
        pt.add_criterion(f, &cut_nux(0, 1.0), 0);
        pt.leaf_merge(2);

        let live = pt.live_nodes();
        assert_eq!(live, vec![0, t, f]);
    }
}
