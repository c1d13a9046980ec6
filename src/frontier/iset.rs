//! Live frontier nodes.

use crate::sample::{SampledObs, SumCount};
use crate::split::SplitNux;
use crate::util::IndexRange;

/// Aggregates of one successor, accumulated during branch replay.
#[derive(Clone, Debug, Default)]
pub struct SuccStats {
    pub extent: usize,
    pub s_count: u32,
    pub sum: f64,
    pub ctg_sum: Vec<SumCount>,
}

impl SuccStats {
    pub fn zero(n_ctg: usize) -> Self {
        Self {
            ctg_sum: vec![SumCount::default(); n_ctg],
            ..Default::default()
        }
    }

    #[inline]
    pub fn accum(&mut self, y_sum: f64, s_count: u32, ctg: u32) {
        self.extent += 1;
        self.s_count += s_count;
        self.sum += y_sum;
        if !self.ctg_sum.is_empty() {
            self.ctg_sum[ctg as usize].accum(y_sum, s_count);
        }
    }
}

/// A split committed to the pre-tree, pending reindexing.
#[derive(Clone, Debug)]
pub struct CommittedSplit {
    pub nux: SplitNux,
    /// Branch taken by implicit samples.
    pub implicit_sense: bool,
    pub true_stats: SuccStats,
    pub false_stats: SuccStats,
    /// Pre-tree ids of the successors.
    pub pt_true: usize,
    pub pt_false: usize,
    /// Next-level node indices of the successors.
    pub succ_true: usize,
    pub succ_false: usize,
}

/// One live node of the current level.
#[derive(Clone, Debug)]
pub struct IndexSet {
    pub node_idx: usize,
    /// Cell in buffer index space. Successor cells subdivide it.
    pub range: IndexRange,
    pub s_count: u32,
    pub sum: f64,
    /// Category census. Empty for regression.
    pub ctg_sum: Vec<SumCount>,
    pub pt_id: usize,
    /// Branch path from the root, truncated to the path window.
    pub path: u8,
    /// Information floor inherited through the min-ratio rule.
    pub min_info: f64,
    pub unsplitable: bool,
    pub split: Option<CommittedSplit>,
}

impl IndexSet {
    /// Root node over a freshly staged bag.
    pub fn root(sampled: &SampledObs, min_node: usize) -> Self {
        let bag_count = sampled.bag_count();
        let s_count = sampled.s_count_total();
        let ctg_sum: Vec<SumCount> = sampled.ctg_root().to_vec();

        let mut iset = Self {
            node_idx: 0,
            range: IndexRange::new(0, bag_count),
            s_count,
            sum: sampled.bag_sum(),
            ctg_sum,
            pt_id: 0,
            path: 0,
            min_info: 0.0,
            unsplitable: false,
            split: None,
        };
        iset.unsplitable = iset.decide_unsplitable(min_node);
        iset
    }

    /// Successor of a committed split.
    #[allow(clippy::too_many_arguments)]
    pub fn successor(
        node_idx: usize,
        range: IndexRange,
        stats: &SuccStats,
        pt_id: usize,
        parent_path: u8,
        sense_true: bool,
        min_info: f64,
        min_node: usize,
    ) -> Self {
        let mut iset = Self {
            node_idx,
            range,
            s_count: stats.s_count,
            sum: stats.sum,
            ctg_sum: stats.ctg_sum.clone(),
            pt_id,
            path: (parent_path << 1) | u8::from(!sense_true),
            min_info,
            unsplitable: false,
            split: None,
        };
        iset.unsplitable = iset.decide_unsplitable(min_node);
        iset
    }

    /// Terminality by node shape: too few samples, a single cell, or a
    /// pure categorical census.
    fn decide_unsplitable(&self, min_node: usize) -> bool {
        if (self.s_count as usize) < min_node || self.range.extent < 2 {
            return true;
        }
        if !self.ctg_sum.is_empty() {
            let live_classes = self.ctg_sum.iter().filter(|sc| sc.s_count > 0).count();
            if live_classes < 2 {
                return true;
            }
        }
        false
    }

    /// Per-category response sums: the Gini slice, doubling as the leaf
    /// weight row.
    pub fn ctg_sums(&self) -> Vec<f64> {
        self.ctg_sum.iter().map(|sc| sc.sum).collect()
    }

    /// Node score: mean response, or the plurality category.
    pub fn score(&self) -> f64 {
        if self.ctg_sum.is_empty() {
            self.sum / self.s_count as f64
        } else {
            let mut best = 0usize;
            for (ctg, sc) in self.ctg_sum.iter().enumerate() {
                if sc.sum > self.ctg_sum[best].sum {
                    best = ctg;
                }
            }
            best as f64
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{Response, SamplerNux};

    #[test]
    fn test_root_aggregates() {
        let (response, _) = Response::regression(vec![10.0, 20.0, 30.0]).unwrap();
        let bag = vec![
            SamplerNux::new(0, 2),
            SamplerNux::new(1, 1),
            SamplerNux::new(1, 1),
        ];
        let sampled = SampledObs::new(&bag, &response);
        let iset = IndexSet::root(&sampled, 1);

        assert_eq!(iset.range, IndexRange::new(0, 3));
        assert_eq!(iset.s_count, 4);
        assert_eq!(iset.sum, 70.0);
        assert!(!iset.unsplitable);
        assert_eq!(iset.score(), 70.0 / 4.0);
    }

    #[test]
    fn test_min_node_terminalizes() {
        let (response, _) = Response::regression(vec![10.0, 20.0]).unwrap();
        let bag = vec![SamplerNux::new(0, 1), SamplerNux::new(1, 1)];
        let sampled = SampledObs::new(&bag, &response);
        let iset = IndexSet::root(&sampled, 5);
        assert!(iset.unsplitable);
    }

    #[test]
    fn test_pure_class_terminalizes() {
        let (response, _) = Response::classification(vec![1, 1, 1], 2, None).unwrap();
        let bag = vec![
            SamplerNux::new(0, 1),
            SamplerNux::new(1, 1),
            SamplerNux::new(1, 1),
        ];
        let sampled = SampledObs::new(&bag, &response);
        let iset = IndexSet::root(&sampled, 1);
        assert!(iset.unsplitable);
        assert_eq!(iset.score(), 1.0);
    }

    #[test]
    fn test_successor_path_encoding() {
        let stats = SuccStats {
            extent: 2,
            s_count: 2,
            sum: 5.0,
            ctg_sum: Vec::new(),
        };
        let t = IndexSet::successor(0, IndexRange::new(0, 2), &stats, 1, 0b1, true, 0.0, 1);
        let f = IndexSet::successor(1, IndexRange::new(2, 2), &stats, 2, 0b1, false, 0.0, 1);
        assert_eq!(t.path, 0b10);
        assert_eq!(f.path, 0b11);
    }
}
