//! Per-sample branch routing for one level.
//!
//! Splitting replays the winning predictor's observation slice, marking
//! explicit samples with their branch sense. Implicit samples carry no
//! entries; their sense is the per-node implicit sense recorded with the
//! committed split.

use crate::util::BitVec;

/// Branch decisions for every sample of the current level.
pub struct BranchSense {
    sense: BitVec,
    explicit: BitVec,
}

impl BranchSense {
    pub fn new(bag_count: usize) -> Self {
        Self {
            sense: BitVec::zeroed(bag_count),
            explicit: BitVec::zeroed(bag_count),
        }
    }

    /// Resets all decisions for a new level.
    pub fn clear(&mut self) {
        self.sense.clear_all();
        self.explicit.clear_all();
    }

    /// Marks a sample as explicitly replayed, routing it by `sense_true`.
    #[inline]
    pub fn mark(&mut self, s_idx: usize, sense_true: bool) {
        self.explicit.set(s_idx);
        if sense_true {
            self.sense.set(s_idx);
        }
    }

    /// Branch sense of a sample; unmarked samples take their node's
    /// implicit sense.
    #[inline]
    pub fn sense(&self, s_idx: usize, implicit_sense: bool) -> bool {
        if self.explicit.test(s_idx) {
            self.sense.test(s_idx)
        } else {
            implicit_sense
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_marks_win() {
        let mut branch = BranchSense::new(4);
        branch.mark(0, true);
        branch.mark(1, false);

        assert!(branch.sense(0, false));
        assert!(!branch.sense(1, true));
        // Unmarked samples follow the implicit sense.
        assert!(branch.sense(2, true));
        assert!(!branch.sense(2, false));
    }

    #[test]
    fn test_clear_resets() {
        let mut branch = BranchSense::new(2);
        branch.mark(0, true);
        branch.clear();
        assert!(!branch.sense(0, false));
    }
}
