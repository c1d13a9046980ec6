//! One layer of the definition map.
//!
//! A layer snapshots the `{node, predictor}` definitions of a past level.
//! The front layer (back-distance zero) describes the current level; rear
//! layers describe ancestors whose observation buffers have not yet been
//! restaged forward. Reaching paths are rebuilt every level: a node at
//! back-distance `del` fans out to as many as `2^del` front nodes.

use crate::util::IndexRange;

/// Inattainable node index, marking unreached paths.
pub const NO_NODE: u32 = u32::MAX;

/// Definition state of one `{node, predictor}` pair.
///
/// A set `singleton` bit records that the pair has collapsed to a single
/// run: it stays on the books but neither restages nor splits.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefCell {
    pub defined: bool,
    pub buf: u8,
    pub singleton: bool,
}

/// Implicit-run accounting for one `{node, predictor}` pair.
///
/// `margin` is the distance between the nominal cell start and the packed
/// position of the explicit entries; `implicit` counts unstored samples.
#[derive(Clone, Copy, Debug, Default)]
pub struct DenseCell {
    pub margin: u32,
    pub implicit: u32,
}

/// Restage target for one reaching-path pattern: the front node reached and
/// its cell in buffer index space.
#[derive(Clone, Copy, Debug)]
pub struct NodePath {
    pub front_idx: u32,
    pub range: IndexRange,
}

impl Default for NodePath {
    fn default() -> Self {
        Self {
            front_idx: NO_NODE,
            range: IndexRange::default(),
        }
    }
}

/// Per-level reaching definitions.
#[derive(Clone, Debug)]
pub struct DefLayer {
    /// Back-distance from the front. Increments at each overlap.
    del: usize,
    n_split: usize,
    n_pred: usize,
    def: Vec<DefCell>,
    dense: Vec<DenseCell>,
    /// Ancestor cells, by node.
    cell: Vec<IndexRange>,
    /// Reaching paths: `n_split << del` entries, rebuilt per level.
    node_path: Vec<NodePath>,
    /// Per-node count of reaching front nodes, rebuilt per level.
    live_count: Vec<u32>,
    def_count: usize,
}

impl DefLayer {
    /// New front layer over `n_split` nodes.
    pub fn new(n_split: usize, n_pred: usize, track_dense: bool) -> Self {
        Self {
            del: 0,
            n_split,
            n_pred,
            def: vec![DefCell::default(); n_split * n_pred],
            dense: if track_dense {
                vec![DenseCell::default(); n_split * n_pred]
            } else {
                Vec::new()
            },
            cell: vec![IndexRange::default(); n_split],
            node_path: Vec::new(),
            live_count: Vec::new(),
            def_count: 0,
        }
    }

    #[inline]
    fn pair(&self, node_idx: usize, pred_idx: usize) -> usize {
        node_idx * self.n_pred + pred_idx
    }

    #[inline]
    pub fn del(&self) -> usize {
        self.del
    }

    #[inline]
    pub fn n_split(&self) -> usize {
        self.n_split
    }

    #[inline]
    pub fn def_count(&self) -> usize {
        self.def_count
    }

    /// Paths reaching from one node: `1 << del` entries.
    #[inline]
    pub fn paths_of(&self, node_idx: usize) -> &[NodePath] {
        let fan = 1usize << self.del;
        &self.node_path[node_idx * fan..(node_idx + 1) * fan]
    }

    /// Records a node's cell in buffer index space.
    #[inline]
    pub fn init_ancestor(&mut self, node_idx: usize, range: IndexRange) {
        self.cell[node_idx] = range;
    }

    #[inline]
    pub fn cell(&self, node_idx: usize) -> IndexRange {
        self.cell[node_idx]
    }

    /// Defines a pair, unless already defined.
    pub fn define(&mut self, node_idx: usize, pred_idx: usize, buf: u8, singleton: bool) -> bool {
        let idx = self.pair(node_idx, pred_idx);
        let cell = &mut self.def[idx];
        if cell.defined {
            false
        } else {
            *cell = DefCell {
                defined: true,
                buf,
                singleton,
            };
            self.def_count += 1;
            true
        }
    }

    /// Consumes a definition, returning its buffer and singleton state.
    pub fn consume(&mut self, node_idx: usize, pred_idx: usize) -> (u8, bool) {
        let idx = self.pair(node_idx, pred_idx);
        debug_assert!(self.def[idx].defined);
        let cell = self.def[idx];
        self.def[idx].defined = false;
        self.def_count -= 1;
        (cell.buf, cell.singleton)
    }

    pub fn undefine(&mut self, node_idx: usize, pred_idx: usize) {
        let idx = self.pair(node_idx, pred_idx);
        if self.def[idx].defined {
            self.def[idx].defined = false;
            self.def_count -= 1;
        }
    }

    #[inline]
    pub fn is_defined(&self, node_idx: usize, pred_idx: usize) -> bool {
        self.def[self.pair(node_idx, pred_idx)].defined
    }

    #[inline]
    pub fn is_singleton(&self, node_idx: usize, pred_idx: usize) -> bool {
        self.def[self.pair(node_idx, pred_idx)].singleton
    }

    #[inline]
    pub fn set_singleton(&mut self, node_idx: usize, pred_idx: usize) {
        let idx = self.pair(node_idx, pred_idx);
        self.def[idx].singleton = true;
    }

    #[inline]
    pub fn buf(&self, node_idx: usize, pred_idx: usize) -> u8 {
        self.def[self.pair(node_idx, pred_idx)].buf
    }

    /// Implicit-run record of a pair. Zeroes when dense tracking is off.
    #[inline]
    pub fn dense(&self, node_idx: usize, pred_idx: usize) -> DenseCell {
        if self.dense.is_empty() {
            DenseCell::default()
        } else {
            self.dense[node_idx * self.n_pred + pred_idx]
        }
    }

    pub fn set_dense(&mut self, node_idx: usize, pred_idx: usize, margin: u32, implicit: u32) {
        if !self.dense.is_empty() {
            let idx = self.pair(node_idx, pred_idx);
            self.dense[idx] = DenseCell { margin, implicit };
        }
    }

    /// Shifts a cell to cover only explicit entries.
    pub fn adjust_range(&self, node_idx: usize, pred_idx: usize, range: IndexRange) -> IndexRange {
        let dense = self.dense(node_idx, pred_idx);
        IndexRange::new(
            range.start - dense.margin as usize,
            range.extent - dense.implicit as usize,
        )
    }

    /// Deepens the layer by one level and resets its reaching paths.
    pub fn deepen(&mut self) {
        self.del += 1;
        let fan = 1usize << self.del;
        self.node_path = vec![NodePath::default(); self.n_split * fan];
        self.live_count = vec![0; self.n_split];
    }

    /// Registers a front node along one reaching path of its ancestor.
    pub fn path_init(&mut self, mrra_idx: usize, path_bits: u8, front_idx: u32, range: IndexRange) {
        let fan = 1usize << self.del;
        self.node_path[mrra_idx * fan + path_bits as usize] = NodePath { front_idx, range };
        self.live_count[mrra_idx] += 1;
    }

    /// Purges definitions of nodes no front node reaches.
    ///
    /// Returns true iff any definition was purged.
    pub fn nonreach_purge(&mut self) -> bool {
        let mut purged = false;
        for node_idx in 0..self.n_split {
            if self.live_count[node_idx] == 0 {
                for pred_idx in 0..self.n_pred {
                    if self.is_defined(node_idx, pred_idx) {
                        self.undefine(node_idx, pred_idx);
                        purged = true;
                    }
                }
            }
        }
        purged
    }

    /// Iterates defined pairs.
    pub fn defined_pairs(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::with_capacity(self.def_count);
        for node_idx in 0..self.n_split {
            for pred_idx in 0..self.n_pred {
                if self.is_defined(node_idx, pred_idx) {
                    pairs.push((node_idx, pred_idx));
                }
            }
        }
        pairs
    }
}
