//! Split candidates and their scored outcomes.

use crate::util::IndexRange;

/// How a committed split partitions its node.
#[derive(Clone, Debug, PartialEq)]
pub enum SplitEncoding {
    /// Numeric cut: explicit entries left of `obs_right` take the true
    /// branch, as do implicit samples when `implicit_true` is set.
    Cut {
        cut_value: f64,
        /// Absolute buffer index of the first false-side explicit entry.
        obs_right: usize,
        implicit_true: bool,
    },
    /// Factor partition: levels in `bits` take the true branch.
    Bits { bits: Vec<u32>, implicit_true: bool },
}

/// One `{node, predictor}` split candidate.
///
/// Constructed per scheduled pair with node aggregates fixed from the index
/// set; the accumulator fills `info` and `encoding` during splitting. A
/// candidate with zero information is ignored.
#[derive(Clone, Debug)]
pub struct SplitNux {
    pub node_idx: u32,
    pub pred_idx: u32,
    /// Authoritative buffer for the pair.
    pub buf: u8,
    /// Explicit-entry range within the buffer.
    pub range: IndexRange,
    /// Implicit sample count for the pair.
    pub implicit: u32,
    /// Node response sum, fixed by the index set.
    pub sum: f64,
    /// Node sample multiplicity, fixed by the index set.
    pub s_count: u32,
    /// Information gain over the node's impurity. Zero until split.
    pub info: f64,
    pub encoding: Option<SplitEncoding>,
}

impl SplitNux {
    pub fn new(
        node_idx: u32,
        pred_idx: u32,
        buf: u8,
        range: IndexRange,
        implicit: u32,
        sum: f64,
        s_count: u32,
    ) -> Self {
        Self {
            node_idx,
            pred_idx,
            buf,
            range,
            implicit,
            sum,
            s_count,
            info: 0.0,
            encoding: None,
        }
    }

    /// Whether the candidate found an informative split.
    #[inline]
    pub fn is_informative(&self, min_info: f64) -> bool {
        self.encoding.is_some() && self.info > min_info
    }

    /// Whether implicit samples route to the true branch.
    #[inline]
    pub fn implicit_true(&self) -> bool {
        match &self.encoding {
            Some(SplitEncoding::Cut { implicit_true, .. })
            | Some(SplitEncoding::Bits { implicit_true, .. }) => *implicit_true,
            None => false,
        }
    }
}
