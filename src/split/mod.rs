//! Split scheduling and scoring for one frontier level.
//!
//! Candidate pairs are drawn per node, either Bernoulli by per-predictor
//! probability or as a fixed-size weighted draw off a heap, then scored by
//! one of four accumulators keyed on response flavor and predictor kind.

mod cut;
mod nux;
mod runs;

pub use nux::{SplitEncoding, SplitNux};
pub use runs::RUN_MAX;

use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;

use crate::config::{Parallelism, TrainConfig};
use crate::def::DefMap;
use crate::frame::PredictorFrame;
use crate::obs::ObsPart;
use crate::util::{BHeap, IndexRange, SlotPair};

/// Immutable node context for one level of splitting.
#[derive(Clone, Debug)]
pub struct NodeCtx {
    /// Nominal cell in buffer index space.
    pub range: IndexRange,
    pub sum: f64,
    pub s_count: u32,
    /// Information a candidate must exceed, from the min-ratio rule.
    pub min_info: f64,
    pub unsplitable: bool,
    /// Per-category response sums. Empty for regression.
    pub ctg_sum: Vec<f64>,
}

/// Accumulator selection per candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SplitKind {
    NumReg,
    NumCtg,
    FacReg,
    FacCtg,
}

impl SplitKind {
    fn resolve(is_factor: bool, is_ctg: bool) -> Self {
        match (is_factor, is_ctg) {
            (false, false) => SplitKind::NumReg,
            (false, true) => SplitKind::NumCtg,
            (true, false) => SplitKind::FacReg,
            (true, true) => SplitKind::FacCtg,
        }
    }
}

/// Selects and preschedules split candidates for every node.
///
/// Uniform variates are drawn up front so that downstream parallelism
/// cannot perturb the stream. Returns `(node, pred)` pairs; restage
/// coordinates accumulate inside the definition map.
pub fn select_candidates(
    frame: &PredictorFrame,
    config: &TrainConfig,
    nodes: &[NodeCtx],
    def_map: &mut DefMap,
    rng: &mut Xoshiro256PlusPlus,
) -> Vec<(u32, u32)> {
    let n_pred = frame.n_pred();
    let ru: Vec<f64> = (0..nodes.len() * n_pred).map(|_| rng.gen()).collect();

    let mut precand = Vec::new();
    let mut heap = vec![SlotPair::default(); n_pred];
    for (node_idx, node) in nodes.iter().enumerate() {
        if node.unsplitable {
            continue;
        }
        let off = node_idx * n_pred;

        if config.pred_fixed == 0 {
            for pred_idx in 0..n_pred {
                if ru[off + pred_idx] < config.pred_prob(pred_idx)
                    && def_map.preschedule(node_idx, pred_idx)
                {
                    precand.push((node_idx as u32, pred_idx as u32));
                }
            }
        } else {
            // Negated weighted variates: lowest pops first.
            for pred_idx in 0..n_pred {
                BHeap::insert(
                    &mut heap,
                    pred_idx,
                    pred_idx as u32,
                    -ru[off + pred_idx] * config.pred_prob(pred_idx),
                );
            }
            let mut sched = 0usize;
            for heap_size in (0..n_pred).rev() {
                let pred_idx = BHeap::slot_pop(&mut heap, heap_size) as usize;
                if def_map.preschedule(node_idx, pred_idx) {
                    precand.push((node_idx as u32, pred_idx as u32));
                    sched += 1;
                    if sched == config.pred_fixed {
                        break;
                    }
                }
            }
        }
    }
    precand
}

/// Per-level monotone gating: one uniform per `{node, numeric predictor}`.
///
/// Empty when no constraints are configured.
pub fn draw_mono_gates(
    config: &TrainConfig,
    n_nodes: usize,
    n_pred_num: usize,
    rng: &mut Xoshiro256PlusPlus,
) -> Vec<f64> {
    if config.reg_mono.is_empty() {
        Vec::new()
    } else {
        (0..n_nodes * n_pred_num).map(|_| rng.gen()).collect()
    }
}

fn mono_mode(config: &TrainConfig, gates: &[f64], node_idx: usize, num_idx: usize, n_pred_num: usize) -> i8 {
    let sign = config.mono_sign(num_idx);
    if sign == 0.0 || gates.is_empty() {
        return 0;
    }
    let gate = gates[node_idx * n_pred_num + num_idx];
    if sign > 0.0 && gate < sign {
        1
    } else if sign < 0.0 && gate < -sign {
        -1
    } else {
        0
    }
}

/// Scores every prescheduled candidate surviving restage.
///
/// Candidates parallelize per pair; the observation partition is read-only
/// here.
pub fn split_candidates(
    frame: &PredictorFrame,
    config: &TrainConfig,
    nodes: &[NodeCtx],
    def_map: &DefMap,
    obs_part: &ObsPart,
    precand: &[(u32, u32)],
    mono_gates: &[f64],
    parallel: Parallelism,
) -> Vec<SplitNux> {
    let is_ctg = nodes.first().is_some_and(|n| !n.ctg_sum.is_empty());

    // Restaging may have exposed fresh singletons; drop them here.
    let mut nuxes: Vec<SplitNux> = precand
        .iter()
        .filter(|&&(node_idx, pred_idx)| !def_map.is_singleton(node_idx as usize, pred_idx as usize))
        .map(|&(node_idx, pred_idx)| {
            let node = &nodes[node_idx as usize];
            let (range, implicit) =
                def_map.candidate_range(node_idx as usize, pred_idx as usize, node.range);
            SplitNux::new(
                node_idx,
                pred_idx,
                def_map.front_buf(node_idx as usize, pred_idx as usize),
                range,
                implicit,
                node.sum,
                node.s_count,
            )
        })
        .collect();

    let score = |nux: &mut SplitNux| {
        let pred_idx = nux.pred_idx as usize;
        let node = &nodes[nux.node_idx as usize];
        let ranked = frame.ranked_pred(pred_idx);
        let obs = &obs_part.buf(pred_idx, nux.buf)[nux.range.start..nux.range.end()];

        match SplitKind::resolve(frame.is_factor(pred_idx), is_ctg) {
            SplitKind::NumReg => {
                let mono = mono_mode(
                    config,
                    mono_gates,
                    nux.node_idx as usize,
                    pred_idx,
                    frame.n_pred_num(),
                );
                cut::split_num_reg(nux, obs, ranked, config.split_quant(pred_idx), mono);
            }
            SplitKind::NumCtg => {
                cut::split_num_ctg(nux, obs, ranked, config.split_quant(pred_idx), &node.ctg_sum);
            }
            SplitKind::FacReg => {
                runs::split_fac_reg(nux, obs, ranked.implicit_rank());
            }
            SplitKind::FacCtg => {
                runs::split_fac_ctg(nux, obs, &node.ctg_sum, ranked.implicit_rank());
            }
        }
    };

    if parallel.allows_parallel() {
        nuxes.par_iter_mut().for_each(score);
    } else {
        nuxes.iter_mut().for_each(score);
    }
    nuxes
}

/// Best informative candidate per node.
///
/// Ties in information break toward the lower predictor index, then the
/// earlier candidate, keeping results reproducible.
pub fn arg_max(candidates: Vec<SplitNux>, nodes: &[NodeCtx]) -> Vec<Option<SplitNux>> {
    let mut best: Vec<Option<SplitNux>> = vec![None; nodes.len()];
    for cand in candidates {
        let node_idx = cand.node_idx as usize;
        if !cand.is_informative(nodes[node_idx].min_info) {
            continue;
        }
        match &best[node_idx] {
            Some(incumbent)
                if incumbent.info > cand.info
                    || (incumbent.info == cand.info && incumbent.pred_idx <= cand.pred_idx) => {}
            _ => best[node_idx] = Some(cand),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn reg_node(range: IndexRange, sum: f64, s_count: u32) -> NodeCtx {
        NodeCtx {
            range,
            sum,
            s_count,
            min_info: 0.0,
            unsplitable: false,
            ctg_sum: Vec::new(),
        }
    }

    #[test]
    fn test_arg_max_prefers_higher_info() {
        let nodes = vec![reg_node(IndexRange::new(0, 4), 10.0, 4)];
        let mut weak = SplitNux::new(0, 1, 0, IndexRange::new(0, 4), 0, 10.0, 4);
        weak.info = 1.0;
        weak.encoding = Some(SplitEncoding::Cut {
            cut_value: 0.5,
            obs_right: 2,
            implicit_true: false,
        });
        let mut strong = SplitNux::new(0, 0, 0, IndexRange::new(0, 4), 0, 10.0, 4);
        strong.info = 2.0;
        strong.encoding = Some(SplitEncoding::Cut {
            cut_value: 1.5,
            obs_right: 3,
            implicit_true: false,
        });

        let best = arg_max(vec![weak, strong], &nodes);
        assert_eq!(best[0].as_ref().unwrap().pred_idx, 0);
        assert_eq!(best[0].as_ref().unwrap().info, 2.0);
    }

    #[test]
    fn test_arg_max_tie_breaks_low_pred() {
        let nodes = vec![reg_node(IndexRange::new(0, 4), 10.0, 4)];
        let encoding = SplitEncoding::Cut {
            cut_value: 0.5,
            obs_right: 2,
            implicit_true: false,
        };
        let mut a = SplitNux::new(0, 3, 0, IndexRange::new(0, 4), 0, 10.0, 4);
        a.info = 2.0;
        a.encoding = Some(encoding.clone());
        let mut b = SplitNux::new(0, 1, 0, IndexRange::new(0, 4), 0, 10.0, 4);
        b.info = 2.0;
        b.encoding = Some(encoding);

        let best = arg_max(vec![a, b], &nodes);
        assert_eq!(best[0].as_ref().unwrap().pred_idx, 1);
    }

    #[test]
    fn test_arg_max_honors_min_info() {
        let mut node = reg_node(IndexRange::new(0, 4), 10.0, 4);
        node.min_info = 5.0;
        let mut cand = SplitNux::new(0, 0, 0, IndexRange::new(0, 4), 0, 10.0, 4);
        cand.info = 2.0;
        cand.encoding = Some(SplitEncoding::Cut {
            cut_value: 0.5,
            obs_right: 2,
            implicit_true: false,
        });

        let best = arg_max(vec![cand], &[node]);
        assert!(best[0].is_none());
    }

    #[test]
    fn test_mono_mode_gating() {
        let config = TrainConfig {
            reg_mono: vec![1.0, -0.5, 0.0],
            ..Default::default()
        };
        // Gates below the magnitude enforce; above skip.
        let gates = vec![0.3, 0.3, 0.3, 0.9, 0.9, 0.9];
        assert_eq!(mono_mode(&config, &gates, 0, 0, 3), 1);
        assert_eq!(mono_mode(&config, &gates, 0, 1, 3), -1);
        assert_eq!(mono_mode(&config, &gates, 0, 2, 3), 0);
        assert_eq!(mono_mode(&config, &gates, 1, 0, 3), 1); // magnitude one always enforces
        assert_eq!(mono_mode(&config, &gates, 1, 1, 3), 0);
    }

    #[test]
    fn test_candidate_draws_deterministic() {
        use crate::frame::FrameBuilder;
        use crate::sample::{Response, SampledObs, SamplerNux};

        let frame = FrameBuilder::new(4)
            .add_numeric(vec![1.0, 2.0, 3.0, 4.0])
            .add_numeric(vec![4.0, 3.0, 2.0, 1.0])
            .build()
            .unwrap();
        let (response, _) = Response::regression(vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let bag: Vec<SamplerNux> = (0..4)
            .map(|i| SamplerNux::new(u32::from(i > 0), 1))
            .collect();
        let sampled = SampledObs::new(&bag, &response);

        let config = TrainConfig {
            pred_fixed: 1,
            ..Default::default()
        };
        let nodes = vec![reg_node(IndexRange::new(0, 4), 10.0, 4)];

        let run = |seed: u64| {
            let mut part = ObsPart::new(2, 4);
            let counts = part.stage(&frame, &sampled);
            let mut map = DefMap::new(&frame, 4, 0.15);
            map.root_def(&frame, &counts, 4);
            let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
            select_candidates(&frame, &config, &nodes, &mut map, &mut rng)
        };

        assert_eq!(run(7), run(7));
        let cands = run(7);
        assert_eq!(cands.len(), 1);
    }
}
