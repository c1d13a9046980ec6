//! Per-tree observation sampling.
//!
//! A [`Sampler`] draws one bag per tree under one of four modes: uniform or
//! weighted, with or without replacement. Bags are recorded compactly as
//! [`SamplerNux`] runs, `(row gap, multiplicity)` pairs in ascending row
//! order, and collected across trees into a [`SamplerBlock`].

mod obs;
mod response;
mod walker;

pub use obs::{SampleNux, SampledObs, SumCount};
pub use response::Response;
pub use walker::Walker;

use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::error::{ConfigError, DataError, TrainError};
use crate::util::BitRows;

/// Log2 of the locality bin width used when tallying sampled indices.
const LOC_EXP: u32 = 18;

/// Compressed record of one sampled row: gap to the previous retained row
/// and the number of times drawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplerNux {
    del_row: u32,
    s_count: u32,
}

impl SamplerNux {
    pub fn new(del_row: u32, s_count: u32) -> Self {
        Self { del_row, s_count }
    }

    #[inline]
    pub fn del_row(&self) -> u32 {
        self.del_row
    }

    #[inline]
    pub fn s_count(&self) -> u32 {
        self.s_count
    }
}

/// Draw mode resolved from the replacement flag and optional weights.
#[derive(Clone, Debug)]
enum DrawMode {
    UniformRepl,
    WeightedRepl(Walker),
    UniformNoRepl,
    WeightedNoRepl(Vec<f64>),
}

/// Draws per-tree bags over `[0, n_obs)`.
#[derive(Clone, Debug)]
pub struct Sampler {
    n_obs: usize,
    n_samp: usize,
    mode: DrawMode,
}

impl Sampler {
    /// Resolve the draw mode and validate weights.
    pub fn new(
        n_obs: usize,
        n_samp: usize,
        replace: bool,
        weight: Option<&[f64]>,
    ) -> Result<Self, TrainError> {
        if !replace && n_samp > n_obs {
            return Err(ConfigError::SampleExceedsObservations { n_samp, n_obs }.into());
        }

        let mode = match weight {
            Some(w) => {
                if w.len() != n_obs {
                    return Err(DataError::WeightLenMismatch {
                        expected: n_obs,
                        got: w.len(),
                    }
                    .into());
                }
                if w.iter().any(|&x| x < 0.0 || !x.is_finite()) || w.iter().sum::<f64>() <= 0.0 {
                    return Err(DataError::DegenerateWeights.into());
                }
                if replace {
                    DrawMode::WeightedRepl(Walker::new(w))
                } else {
                    DrawMode::WeightedNoRepl(w.to_vec())
                }
            }
            None => {
                if replace {
                    DrawMode::UniformRepl
                } else {
                    DrawMode::UniformNoRepl
                }
            }
        };

        Ok(Self {
            n_obs,
            n_samp,
            mode,
        })
    }

    #[inline]
    pub fn n_samp(&self) -> usize {
        self.n_samp
    }

    #[inline]
    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    /// Draw one tree's bag.
    pub fn sample_tree(&self, rng: &mut Xoshiro256PlusPlus) -> Vec<SamplerNux> {
        let idx = match &self.mode {
            DrawMode::UniformRepl => (0..self.n_samp)
                .map(|_| rng.gen_range(0..self.n_obs))
                .collect(),
            DrawMode::WeightedRepl(walker) => walker.sample(self.n_samp, rng),
            DrawMode::UniformNoRepl => sample_uniform_no_replace(self.n_obs, self.n_samp, rng),
            DrawMode::WeightedNoRepl(weight) => sample_efraimidis(weight, self.n_samp, rng),
        };

        self.append_samples(&idx)
    }

    /// Tallies drawn indices into ascending `(del_row, s_count)` runs.
    fn append_samples(&self, idx: &[usize]) -> Vec<SamplerNux> {
        let s_count_row = if bin_idx(self.n_obs) > 0 {
            count_samples(self.n_obs, &bin_indices(self.n_obs, idx))
        } else {
            count_samples(self.n_obs, idx)
        };

        let mut nux = Vec::new();
        let mut row_prev = 0usize;
        for (row, &count) in s_count_row.iter().enumerate() {
            if count > 0 {
                nux.push(SamplerNux::new((row - row_prev) as u32, count));
                row_prev = row;
            }
        }
        nux
    }
}

/// Maps an index into its locality bin.
#[inline]
fn bin_idx(idx: usize) -> usize {
    idx >> LOC_EXP
}

/// Bins a vector of indices for coarse locality.
///
/// Equivalent to the first pass of a radix sort: counting occurrences of the
/// binned output walks memory near-sequentially.
fn bin_indices(n_obs: usize, idx: &[usize]) -> Vec<usize> {
    // Bin populations, then prefix-accumulated offsets.
    let mut bin_pop = vec![0usize; 1 + bin_idx(n_obs)];
    for &val in idx {
        bin_pop[bin_idx(val)] += 1;
    }
    for i in 1..bin_pop.len() {
        bin_pop[i] += bin_pop[i - 1];
    }

    let mut idx_avail: Vec<isize> = bin_pop.iter().map(|&p| p as isize - 1).collect();
    let mut binned = vec![0usize; idx.len()];
    for &val in idx {
        let dest = idx_avail[bin_idx(val)];
        idx_avail[bin_idx(val)] -= 1;
        binned[dest as usize] = val;
    }
    binned
}

/// Tabulates a collection of indices by occurrence.
fn count_samples(n_obs: usize, idx: &[usize]) -> Vec<u32> {
    let mut sc = vec![0u32; n_obs];
    for &index in idx {
        sc[index] += 1;
    }
    sc
}

/// Uniform draw without replacement via partial Fisher-Yates shuffle.
fn sample_uniform_no_replace<R: Rng>(n_obs: usize, n_samp: usize, rng: &mut R) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n_obs).collect();
    for i in 0..n_samp {
        let j = rng.gen_range(i..n_obs);
        indices.swap(i, j);
    }
    indices.truncate(n_samp);
    indices
}

/// Weighted draw without replacement: Efraimidis-Spirakis keys
/// `u^(1/w)`, retaining the top `n_samp`.
fn sample_efraimidis<R: Rng>(weight: &[f64], n_samp: usize, rng: &mut R) -> Vec<usize> {
    let mut keyed: Vec<(f64, usize)> = weight
        .iter()
        .enumerate()
        .filter(|&(_, &w)| w > 0.0)
        .map(|(i, &w)| {
            let u: f64 = rng.gen();
            (u.powf(1.0 / w), i)
        })
        .collect();
    keyed.sort_unstable_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
    keyed.truncate(n_samp);
    keyed.into_iter().map(|(_, i)| i).collect()
}

/// Trained sampling record: one `SamplerNux` run per tree.
#[derive(Clone, Debug, Default)]
pub struct SamplerBlock {
    n_obs: usize,
    n_samp: usize,
    samples: Vec<Vec<SamplerNux>>,
}

impl SamplerBlock {
    pub fn new(n_obs: usize, n_samp: usize) -> Self {
        Self {
            n_obs,
            n_samp,
            samples: Vec::new(),
        }
    }

    pub fn push_tree(&mut self, nux: Vec<SamplerNux>) {
        self.samples.push(nux);
    }

    #[inline]
    pub fn n_tree(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    #[inline]
    pub fn n_samp(&self) -> usize {
        self.n_samp
    }

    /// Distinct sampled rows of one tree.
    #[inline]
    pub fn bag_count(&self, tree_idx: usize) -> usize {
        self.samples[tree_idx].len()
    }

    #[inline]
    pub fn tree(&self, tree_idx: usize) -> &[SamplerNux] {
        &self.samples[tree_idx]
    }

    /// Reconstructs a tree's sampled rows from the delta encoding.
    pub fn rows(&self, tree_idx: usize) -> Vec<u32> {
        let mut rows = Vec::with_capacity(self.samples[tree_idx].len());
        let mut row = 0u32;
        for nux in &self.samples[tree_idx] {
            row += nux.del_row();
            rows.push(row);
        }
        rows
    }

    /// Packed in-bag matrix: `n_tree` rows of `n_obs` bits.
    pub fn bag_matrix(&self) -> BitRows {
        let mut matrix = BitRows::new(self.samples.len(), self.n_obs);
        for tree_idx in 0..self.samples.len() {
            let mut row = 0u32;
            for nux in &self.samples[tree_idx] {
                row += nux.del_row();
                matrix.set(tree_idx, row as usize);
            }
        }
        matrix
    }
}
