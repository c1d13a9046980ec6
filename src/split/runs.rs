//! Factor-run accumulators.
//!
//! A candidate's observations collapse into per-level runs; splitting then
//! partitions runs rather than individual ranks. Regression and binary
//! classification order runs by response and evaluate prefix partitions;
//! multi-class classification enumerates run subsets outright, collapsing
//! the lowest-weight runs into a single wide pseudo-run when the run count
//! exceeds [`RUN_MAX`].

use crate::obs::Obs;
use crate::util::{BHeap, SlotPair};

use super::nux::{SplitEncoding, SplitNux};

/// Widest run count evaluated exactly.
pub const RUN_MAX: usize = 10;

/// One run: a maximal block of observations sharing a factor level.
#[derive(Clone, Debug)]
struct RunSlot {
    /// Levels subsumed; more than one only for the wide pseudo-run.
    ranks: Vec<u32>,
    s_count: u32,
    sum: f64,
    /// Per-category response sums. Empty for regression.
    ctg: Vec<f64>,
    /// Whether this run stands for the implicit block.
    implicit: bool,
}

/// Runs of one factor candidate.
struct RunSet {
    slots: Vec<RunSlot>,
}

impl RunSet {
    /// Condenses a rank-ordered slice into runs, appending a residual run
    /// for implicit samples.
    fn build(nux: &SplitNux, obs: &[Obs], ctg_tot: &[f64], implicit_rank: Option<u32>) -> Self {
        let n_ctg = ctg_tot.len();
        let mut slots: Vec<RunSlot> = Vec::new();

        for ob in obs {
            match slots.last_mut() {
                Some(slot) if slot.ranks[0] == ob.rank => {
                    slot.s_count += ob.s_count;
                    slot.sum += ob.y_sum;
                    if n_ctg > 0 {
                        slot.ctg[ob.ctg as usize] += ob.y_sum;
                    }
                }
                _ => {
                    let mut ctg = vec![0.0; n_ctg];
                    if n_ctg > 0 {
                        ctg[ob.ctg as usize] = ob.y_sum;
                    }
                    slots.push(RunSlot {
                        ranks: vec![ob.rank],
                        s_count: ob.s_count,
                        sum: ob.y_sum,
                        ctg,
                        implicit: false,
                    });
                }
            }
        }

        if let Some(rank) = implicit_rank {
            let expl_sum: f64 = slots.iter().map(|s| s.sum).sum();
            let expl_cnt: u32 = slots.iter().map(|s| s.s_count).sum();
            let mut ctg = vec![0.0; n_ctg];
            for (c, tot) in ctg_tot.iter().enumerate() {
                ctg[c] = tot - slots.iter().map(|s| s.ctg[c]).sum::<f64>();
            }
            slots.push(RunSlot {
                ranks: vec![rank],
                s_count: nux.s_count - expl_cnt,
                sum: nux.sum - expl_sum,
                ctg,
                implicit: true,
            });
        }

        Self { slots }
    }

    /// Collapses the lowest-weight runs into one wide pseudo-run until at
    /// most `RUN_MAX` slots remain.
    fn de_wide(&mut self) {
        if self.slots.len() <= RUN_MAX {
            return;
        }
        let mut order: Vec<usize> = (0..self.slots.len()).collect();
        order.sort_by(|&a, &b| {
            self.slots[a]
                .sum
                .partial_cmp(&self.slots[b].sum)
                .unwrap()
                .then(self.slots[a].ranks[0].cmp(&self.slots[b].ranks[0]))
        });

        let collapse: Vec<usize> = order[..self.slots.len() - RUN_MAX + 1].to_vec();
        let mut wide = RunSlot {
            ranks: Vec::new(),
            s_count: 0,
            sum: 0.0,
            ctg: vec![0.0; self.slots[0].ctg.len()],
            implicit: false,
        };
        for &idx in &collapse {
            let slot = &self.slots[idx];
            wide.ranks.extend_from_slice(&slot.ranks);
            wide.s_count += slot.s_count;
            wide.sum += slot.sum;
            for (c, v) in slot.ctg.iter().enumerate() {
                wide.ctg[c] += v;
            }
            wide.implicit |= slot.implicit;
        }

        let mut keep: Vec<RunSlot> = Vec::with_capacity(RUN_MAX);
        for (idx, slot) in self.slots.drain(..).enumerate() {
            if !collapse.contains(&idx) {
                keep.push(slot);
            }
        }
        keep.push(wide);
        self.slots = keep;
    }

    /// Heap-orders slot indices by key, ascending.
    fn order_by<F: Fn(&RunSlot) -> f64>(&self, key: F) -> Vec<u32> {
        let mut heap = vec![SlotPair::default(); self.slots.len()];
        for (idx, slot) in self.slots.iter().enumerate() {
            BHeap::insert(&mut heap, idx, idx as u32, key(slot));
        }
        BHeap::depopulate(&mut heap, self.slots.len())
    }

    /// True-branch encoding for a chosen set of slots.
    fn encode(&self, chosen: &[u32]) -> SplitEncoding {
        let mut bits = Vec::new();
        let mut implicit_true = false;
        for &slot_idx in chosen {
            let slot = &self.slots[slot_idx as usize];
            bits.extend_from_slice(&slot.ranks);
            implicit_true |= slot.implicit;
        }
        bits.sort_unstable();
        SplitEncoding::Bits {
            bits,
            implicit_true,
        }
    }
}

/// Scores a factor regression candidate.
///
/// Runs are ordered by mean response; prefix partitions of that order
/// contain the optimal binary partition.
pub fn split_fac_reg(nux: &mut SplitNux, obs: &[Obs], implicit_rank: Option<u32>) {
    let implicit_rank = (nux.implicit > 0).then_some(implicit_rank).flatten();
    let runs = RunSet::build(nux, obs, &[], implicit_rank);
    if runs.slots.len() < 2 {
        return;
    }

    let order = runs.order_by(|slot| slot.sum / slot.s_count as f64);
    let pre_bias = nux.sum * nux.sum / nux.s_count as f64;

    let mut max_val = pre_bias;
    let mut best_prefix = 0usize;
    let mut sum_l = 0.0;
    let mut cnt_l = 0u32;
    for prefix in 0..order.len() - 1 {
        let slot = &runs.slots[order[prefix] as usize];
        sum_l += slot.sum;
        cnt_l += slot.s_count;
        let cnt_r = nux.s_count - cnt_l;
        if cnt_r == 0 {
            break;
        }
        let sum_r = nux.sum - sum_l;
        let val = sum_l * sum_l / cnt_l as f64 + sum_r * sum_r / cnt_r as f64;
        if val > max_val {
            max_val = val;
            best_prefix = prefix + 1;
        }
    }

    if best_prefix > 0 {
        nux.info = max_val - pre_bias;
        nux.encoding = Some(runs.encode(&order[..best_prefix]));
    }
}

/// Scores a factor classification candidate.
///
/// Binary responses reduce to an ordering by class-one proportion; wider
/// responses enumerate run subsets.
pub fn split_fac_ctg(nux: &mut SplitNux, obs: &[Obs], ctg_tot: &[f64], implicit_rank: Option<u32>) {
    let implicit_rank = (nux.implicit > 0).then_some(implicit_rank).flatten();
    let mut runs = RunSet::build(nux, obs, ctg_tot, implicit_rank);
    if runs.slots.len() < 2 {
        return;
    }

    if ctg_tot.len() == 2 {
        split_fac_binary(nux, &runs, ctg_tot);
    } else {
        runs.de_wide();
        split_fac_subsets(nux, &runs, ctg_tot);
    }
}

fn split_fac_binary(nux: &mut SplitNux, runs: &RunSet, ctg_tot: &[f64]) {
    let order = runs.order_by(|slot| slot.ctg[1] / slot.sum);
    let ss_node: f64 = ctg_tot.iter().map(|t| t * t).sum();
    let pre_bias = ss_node / nux.sum;

    let mut max_val = pre_bias;
    let mut best_prefix = 0usize;
    let mut sum_l0 = 0.0;
    let mut sum_l1 = 0.0;
    for prefix in 0..order.len() - 1 {
        let slot = &runs.slots[order[prefix] as usize];
        sum_l0 += slot.ctg[0];
        sum_l1 += slot.ctg[1];
        let sum_l = sum_l0 + sum_l1;
        let sum_r = nux.sum - sum_l;
        if sum_l <= 0.0 || sum_r <= 0.0 {
            continue;
        }
        let ss_l = sum_l0 * sum_l0 + sum_l1 * sum_l1;
        let r0 = ctg_tot[0] - sum_l0;
        let r1 = ctg_tot[1] - sum_l1;
        let ss_r = r0 * r0 + r1 * r1;
        let val = ss_l / sum_l + ss_r / sum_r;
        if val > max_val {
            max_val = val;
            best_prefix = prefix + 1;
        }
    }

    if best_prefix > 0 {
        nux.info = max_val - pre_bias;
        nux.encoding = Some(runs.encode(&order[..best_prefix]));
    }
}

fn split_fac_subsets(nux: &mut SplitNux, runs: &RunSet, ctg_tot: &[f64]) {
    let slot_sup = runs.slots.len() - 1;
    let full = (1u32 << slot_sup) - 1;
    let ss_node: f64 = ctg_tot.iter().map(|t| t * t).sum();
    let pre_bias = ss_node / nux.sum;

    let mut max_val = pre_bias;
    let mut best_bits = 0u32;
    for subset in 1..=full {
        let mut sum_l = 0.0;
        let mut ss_l = 0.0;
        let mut ss_r = 0.0;
        for (ctg, &tot) in ctg_tot.iter().enumerate() {
            let mut slot_sum = 0.0;
            for slot in 0..slot_sup {
                if subset & (1u32 << slot) != 0 {
                    slot_sum += runs.slots[slot].ctg[ctg];
                }
            }
            sum_l += slot_sum;
            ss_l += slot_sum * slot_sum;
            ss_r += (tot - slot_sum) * (tot - slot_sum);
        }
        let sum_r = nux.sum - sum_l;
        if sum_l <= 0.0 || sum_r <= 0.0 {
            continue;
        }
        let val = ss_l / sum_l + ss_r / sum_r;
        if val > max_val {
            max_val = val;
            best_bits = subset;
        }
    }

    if best_bits != 0 {
        let chosen: Vec<u32> = (0..slot_sup as u32)
            .filter(|slot| best_bits & (1u32 << slot) != 0)
            .collect();
        nux.info = max_val - pre_bias;
        nux.encoding = Some(runs.encode(&chosen));
    }
}
