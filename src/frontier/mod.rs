//! Level-synchronous tree growth.
//!
//! One tree trains breadth-first: every live node schedules candidates,
//! restages lazily through the definition map, splits, then reindexes its
//! samples into successor cells. Successor cells subdivide the parent cell,
//! true branch first, so buffer order tracks the frontier's node order.

mod branch;
mod iset;

pub use branch::BranchSense;
pub use iset::{CommittedSplit, IndexSet, SuccStats};

use rand_xoshiro::Xoshiro256PlusPlus;

use crate::config::{Parallelism, TrainConfig};
use crate::def::DefMap;
use crate::frame::PredictorFrame;
use crate::obs::ObsPart;
use crate::pretree::PreTree;
use crate::sample::{SampledObs, SumCount};
use crate::split::{self, NodeCtx, SplitEncoding};
use crate::util::IndexRange;

/// Result of growing one tree.
pub struct TreeGrowth {
    pub pretree: PreTree,
    /// Final pre-tree leaf id per sample.
    pub sample_to_leaf: Vec<u32>,
}

/// Grows a single tree over a staged bag.
pub fn grow_tree(
    frame: &PredictorFrame,
    config: &TrainConfig,
    sampled: &SampledObs,
    rng: &mut Xoshiro256PlusPlus,
    parallel: Parallelism,
) -> TreeGrowth {
    let bag_count = sampled.bag_count();
    let mut obs_part = ObsPart::new(frame.n_pred(), bag_count);
    let stage_counts = obs_part.stage(frame, sampled);

    let mut def_map = DefMap::new(frame, bag_count, config.flush_efficiency);
    def_map.root_def(frame, &stage_counts, bag_count);

    let mut pretree = PreTree::new(frame.n_pred());
    let mut index_sets = vec![IndexSet::root(sampled, config.min_node)];
    let mut st2split = vec![0u32; bag_count];
    let mut st2pt = vec![0u32; bag_count];
    let mut branch = BranchSense::new(bag_count);

    let mut level = 0usize;
    while !index_sets.is_empty() {
        if level + 1 >= config.tot_levels {
            for iset in &mut index_sets {
                iset.unsplitable = true;
            }
        }

        def_map.flush_rear();
        let nodes: Vec<NodeCtx> = index_sets.iter().map(node_ctx).collect();
        let precand = split::select_candidates(frame, config, &nodes, &mut def_map, rng);
        def_map.restage_all(&mut obs_part, parallel);

        let gates = split::draw_mono_gates(config, nodes.len(), frame.n_pred_num(), rng);
        let cands = split::split_candidates(
            frame, config, &nodes, &def_map, &obs_part, &precand, &gates, parallel,
        );
        let mut best = split::arg_max(cands, &nodes);

        // Commit: record node summaries, replay winning splits.
        branch.clear();
        for (node_idx, iset) in index_sets.iter_mut().enumerate() {
            pretree.set_node_stats(iset.pt_id, iset.score(), iset.ctg_sums());
            if let Some(nux) = best[node_idx].take() {
                commit_split(iset, nux, &obs_part, &mut branch, &mut pretree, frame);
            }
        }

        // Produce successors, true branch leading, parents in node order.
        let mut next_sets: Vec<IndexSet> = Vec::new();
        for iset in &mut index_sets {
            if let Some(split) = &mut iset.split {
                let min_info = config.min_ratio * split.nux.info;
                let range_true = IndexRange::new(iset.range.start, split.true_stats.extent);
                let range_false = IndexRange::new(
                    iset.range.start + split.true_stats.extent,
                    split.false_stats.extent,
                );

                split.succ_true = next_sets.len();
                next_sets.push(IndexSet::successor(
                    split.succ_true,
                    range_true,
                    &split.true_stats,
                    split.pt_true,
                    iset.path,
                    true,
                    min_info,
                    config.min_node,
                ));
                split.succ_false = next_sets.len();
                next_sets.push(IndexSet::successor(
                    split.succ_false,
                    range_false,
                    &split.false_stats,
                    split.pt_false,
                    iset.path,
                    false,
                    min_info,
                    config.min_node,
                ));
            }
        }

        def_map.overlap(next_sets.len());
        if !next_sets.is_empty() {
            for iset in &index_sets {
                if let Some(split) = &iset.split {
                    let succ_t = &next_sets[split.succ_true];
                    def_map.reaching_path(split.succ_true, iset.node_idx, succ_t.range, succ_t.path);
                    let succ_f = &next_sets[split.succ_false];
                    def_map.reaching_path(
                        split.succ_false,
                        iset.node_idx,
                        succ_f.range,
                        succ_f.path,
                    );
                }
            }
        }

        // Reindex: move each live sample into its successor, or retire it
        // with its terminal's pre-tree id.
        for s_idx in 0..bag_count {
            if !def_map.sample_live(s_idx) {
                continue;
            }
            let iset = &index_sets[st2split[s_idx] as usize];
            match &iset.split {
                None => {
                    st2pt[s_idx] = iset.pt_id as u32;
                    def_map.extinct_sample(s_idx);
                }
                Some(split) => {
                    let sense = branch.sense(s_idx, split.implicit_sense);
                    let (succ, pt) = if sense {
                        (split.succ_true, split.pt_true)
                    } else {
                        (split.succ_false, split.pt_false)
                    };
                    st2split[s_idx] = succ as u32;
                    st2pt[s_idx] = pt as u32;
                    def_map.advance_sample(s_idx, sense);
                }
            }
        }

        index_sets = next_sets;
        level += 1;
    }

    TreeGrowth {
        pretree,
        sample_to_leaf: st2pt,
    }
}

fn node_ctx(iset: &IndexSet) -> NodeCtx {
    NodeCtx {
        range: iset.range,
        sum: iset.sum,
        s_count: iset.s_count,
        min_info: iset.min_info,
        unsplitable: iset.unsplitable,
        ctg_sum: iset.ctg_sums(),
    }
}

/// Replays the winning slice, marking branch senses and accumulating
/// successor aggregates, then commits the criterion to the pre-tree.
fn commit_split(
    iset: &mut IndexSet,
    nux: crate::split::SplitNux,
    obs_part: &ObsPart,
    branch: &mut BranchSense,
    pretree: &mut PreTree,
    frame: &PredictorFrame,
) {
    let implicit_sense = nux.implicit_true();
    let n_ctg = iset.ctg_sum.len();
    let slice = &obs_part.buf(nux.pred_idx as usize, nux.buf)[nux.range.start..nux.range.end()];

    let mut expl_true = SuccStats::zero(n_ctg);
    let mut expl_all = SuccStats::zero(n_ctg);
    match nux.encoding.as_ref().expect("committing unencoded split") {
        SplitEncoding::Cut { obs_right, .. } => {
            for (i, ob) in slice.iter().enumerate() {
                let sense = nux.range.start + i < *obs_right;
                branch.mark(ob.s_idx as usize, sense);
                if sense {
                    expl_true.accum(ob.y_sum, ob.s_count, ob.ctg);
                }
                expl_all.accum(ob.y_sum, ob.s_count, ob.ctg);
            }
        }
        SplitEncoding::Bits { bits, .. } => {
            for ob in slice {
                let sense = bits.binary_search(&ob.rank).is_ok();
                branch.mark(ob.s_idx as usize, sense);
                if sense {
                    expl_true.accum(ob.y_sum, ob.s_count, ob.ctg);
                }
                expl_all.accum(ob.y_sum, ob.s_count, ob.ctg);
            }
        }
    }

    // Implicit samples aggregate by subtraction from the node totals.
    let mut true_stats = expl_true;
    if implicit_sense {
        true_stats.extent += nux.implicit as usize;
        true_stats.s_count += iset.s_count - expl_all.s_count;
        true_stats.sum += iset.sum - expl_all.sum;
        for (ctg, sc) in true_stats.ctg_sum.iter_mut().enumerate() {
            sc.accum(
                iset.ctg_sum[ctg].sum - expl_all.ctg_sum[ctg].sum,
                iset.ctg_sum[ctg].s_count - expl_all.ctg_sum[ctg].s_count,
            );
        }
    }

    let mut false_ctg: Vec<SumCount> = iset.ctg_sum.clone();
    for (ctg, sc) in false_ctg.iter_mut().enumerate() {
        sc.decr(&true_stats.ctg_sum[ctg]);
    }
    let false_stats = SuccStats {
        extent: iset.range.extent - true_stats.extent,
        s_count: iset.s_count - true_stats.s_count,
        sum: iset.sum - true_stats.sum,
        ctg_sum: false_ctg,
    };

    let (pt_true, pt_false) =
        pretree.add_criterion(iset.pt_id, &nux, frame.cardinality(nux.pred_idx as usize));

    iset.split = Some(CommittedSplit {
        nux,
        implicit_sense,
        true_stats,
        false_stats,
        pt_true,
        pt_false,
        succ_true: 0,
        succ_false: 0,
    });
}
