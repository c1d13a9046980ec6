//! Forest training entry points.
//!
//! Trees dispatch in blocks across the worker pool; each tree owns its
//! observation partition, definition map, frontier and pre-tree, so blocks
//! synchronize only when their results move into the forest.
//!
//! # Threading contract
//!
//! - `n_thread == 0`: use rayon's global pool
//! - `n_thread == 1`: strictly sequential
//! - `n_thread > 1`: a dedicated pool for this training call

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::config::{Parallelism, TrainConfig};
use crate::error::{DataError, TrainError, Warning};
use crate::forest::{Forest, Leaf, LeafSample};
use crate::frame::PredictorFrame;
use crate::frontier;
use crate::logger::TrainingLogger;
use crate::pretree::PreTree;
use crate::sample::{Response, SampledObs, Sampler, SamplerBlock, SamplerNux};

/// A trained forest with its sampling record and leaf block.
#[derive(Debug)]
pub struct TrainedForest {
    pub forest: Forest,
    pub leaf: Leaf,
    pub sampler: SamplerBlock,
    pub warnings: Vec<Warning>,
}

/// Trains a regression forest.
pub fn train_reg(
    frame: &PredictorFrame,
    y: Vec<f64>,
    row_weight: Option<&[f64]>,
    config: &TrainConfig,
) -> Result<TrainedForest, TrainError> {
    let (response, warnings) = Response::regression(y)?;
    train_response(frame, &response, row_weight, config, warnings)
}

/// Trains a classification forest over category codes in `[0, n_ctg)`.
pub fn train_ctg(
    frame: &PredictorFrame,
    y_ctg: Vec<u32>,
    n_ctg: usize,
    class_weight: Option<&[f64]>,
    row_weight: Option<&[f64]>,
    config: &TrainConfig,
) -> Result<TrainedForest, TrainError> {
    let (response, warnings) = Response::classification(y_ctg, n_ctg, class_weight)?;
    train_response(frame, &response, row_weight, config, warnings)
}

/// One tree's training output, pending consumption into the forest.
struct TreeOut {
    bag: Vec<SamplerNux>,
    pretree: PreTree,
    /// Node remap produced by leaf merging.
    remap: Vec<u32>,
    sample_to_leaf: Vec<u32>,
    s_counts: Vec<u32>,
}

fn train_response(
    frame: &PredictorFrame,
    response: &Response,
    row_weight: Option<&[f64]>,
    config: &TrainConfig,
    warnings: Vec<Warning>,
) -> Result<TrainedForest, TrainError> {
    config.validate(frame)?;
    if response.n_obs() != frame.n_obs() {
        return Err(DataError::ResponseLenMismatch {
            expected: frame.n_obs(),
            got: response.n_obs(),
        }
        .into());
    }

    let n_obs = frame.n_obs();
    let n_samp = config.resolved_n_samp(n_obs);
    let sampler = Sampler::new(n_obs, n_samp, config.replace, row_weight)?;

    let parallelism = Parallelism::from_threads(config.n_thread);
    let trained = match config.n_thread {
        0 | 1 => train_blocks(frame, response, &sampler, config, parallelism),
        n => {
            let pool = ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .expect("failed to build training thread pool");
            pool.install(|| train_blocks(frame, response, &sampler, config, parallelism))
        }
    };

    let (forest, leaf, sampler_block) = trained;
    Ok(TrainedForest {
        forest,
        leaf,
        sampler: sampler_block,
        warnings,
    })
}

fn train_blocks(
    frame: &PredictorFrame,
    response: &Response,
    sampler: &Sampler,
    config: &TrainConfig,
    parallelism: Parallelism,
) -> (Forest, Leaf, SamplerBlock) {
    let n_ctg = response.n_ctg();
    let cardinality: Vec<u32> = (frame.n_pred_num()..frame.n_pred())
        .map(|pred_idx| frame.cardinality(pred_idx))
        .collect();

    let mut forest = Forest::new(frame.n_pred(), frame.n_pred_num(), cardinality);
    let mut leaf = Leaf::new(n_ctg);
    let mut sampler_block = SamplerBlock::new(sampler.n_obs(), sampler.n_samp());

    let mut logger = TrainingLogger::new(config.verbosity);
    logger.start_training(config.n_tree);

    let mut block_start = 0usize;
    while block_start < config.n_tree {
        let block_end = (block_start + config.tree_block).min(config.n_tree);

        let outputs: Vec<TreeOut> = if parallelism.allows_parallel() {
            (block_start..block_end)
                .into_par_iter()
                .map(|tree_idx| train_one(frame, response, sampler, config, tree_idx, parallelism))
                .collect()
        } else {
            (block_start..block_end)
                .map(|tree_idx| train_one(frame, response, sampler, config, tree_idx, parallelism))
                .collect()
        };

        for (offset, out) in outputs.into_iter().enumerate() {
            logger.tree_done(
                block_start + offset,
                out.pretree.height(),
                out.pretree.leaf_count(),
            );
            consume_tree(&mut forest, &mut leaf, &mut sampler_block, out, config, n_ctg);
        }
        logger.block_done(block_end);
        block_start = block_end;
    }

    logger.finish_training(forest.height());
    (forest, leaf, sampler_block)
}

/// Trains one tree: sample, stage, grow, merge.
fn train_one(
    frame: &PredictorFrame,
    response: &Response,
    sampler: &Sampler,
    config: &TrainConfig,
    tree_idx: usize,
    parallelism: Parallelism,
) -> TreeOut {
    // Per-tree generator: reproducible at any thread count.
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(config.seed.wrapping_add(tree_idx as u64));

    let bag = sampler.sample_tree(&mut rng);
    let sampled = SampledObs::new(&bag, response);
    let s_counts: Vec<u32> = (0..sampled.bag_count())
        .map(|s_idx| sampled.nux(s_idx).s_count)
        .collect();

    let growth = frontier::grow_tree(frame, config, &sampled, &mut rng, parallelism);
    let mut pretree = growth.pretree;
    let remap = pretree.leaf_merge(config.leaf_max);

    TreeOut {
        bag,
        pretree,
        remap,
        sample_to_leaf: growth.sample_to_leaf,
        s_counts,
    }
}

/// Moves one tree's results into the forest, leaf block and sampling
/// record.
fn consume_tree(
    forest: &mut Forest,
    leaf: &mut Leaf,
    sampler_block: &mut SamplerBlock,
    out: TreeOut,
    config: &TrainConfig,
    n_ctg: usize,
) {
    let ordinals = forest.append_tree(&out.pretree);
    let n_leaf = ordinals.iter().flatten().count();

    let mut scores = vec![0.0; n_leaf];
    let mut ctg_weights = vec![0.0; n_leaf * n_ctg];
    for (pt_id, ordinal) in ordinals.iter().enumerate() {
        if let Some(ordinal) = ordinal {
            let ordinal = *ordinal as usize;
            scores[ordinal] = out.pretree.score(pt_id);
            let census = out.pretree.census(pt_id);
            ctg_weights[ordinal * n_ctg..ordinal * n_ctg + census.len()].copy_from_slice(census);
        }
    }

    let samples = if config.thin_leaves {
        None
    } else {
        let mut rows = Vec::with_capacity(out.bag.len());
        let mut row = 0u32;
        for nux in &out.bag {
            row += nux.del_row();
            rows.push(row);
        }

        let mut lists: Vec<Vec<LeafSample>> = vec![Vec::new(); n_leaf];
        for (s_idx, &pt_id) in out.sample_to_leaf.iter().enumerate() {
            let surviving = out.remap[pt_id as usize] as usize;
            let ordinal = ordinals[surviving].expect("sample mapped to nonterminal");
            lists[ordinal as usize].push(LeafSample {
                row: rows[s_idx],
                s_count: out.s_counts[s_idx],
            });
        }
        Some(lists)
    };

    leaf.push_tree(scores, ctg_weights, samples);
    sampler_block.push_tree(out.bag);
}
