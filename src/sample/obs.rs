//! Sampled-response materialization for a single tree.

use super::response::Response;
use super::SamplerNux;

/// Sum / count pair for category censuses.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SumCount {
    pub sum: f64,
    pub s_count: u32,
}

impl SumCount {
    pub fn new(sum: f64, s_count: u32) -> Self {
        Self { sum, s_count }
    }

    #[inline]
    pub fn accum(&mut self, sum: f64, s_count: u32) {
        self.sum += sum;
        self.s_count += s_count;
    }

    /// Subtracts the contents of the pair passed.
    #[inline]
    pub fn decr(&mut self, subtrahend: &SumCount) {
        self.sum -= subtrahend.sum;
        self.s_count -= subtrahend.s_count;
    }
}

/// Per-sample response summary: row gap, multiplicity, response sum and
/// category. `y_sum` is the sampled response times the multiplicity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleNux {
    pub del_row: u32,
    pub s_count: u32,
    pub y_sum: f64,
    pub ctg: u32,
}

/// Sentinel marking rows absent from the bag.
const NOT_SAMPLED: u32 = u32::MAX;

/// One tree's sampled observations, indexed by sample id.
#[derive(Clone, Debug)]
pub struct SampledObs {
    sample_nux: Vec<SampleNux>,
    /// Maps row index to sample index; out-of-bag rows carry a sentinel.
    row_to_sample: Vec<u32>,
    /// Root census of the categorical response. Empty for regression.
    ctg_root: Vec<SumCount>,
    bag_sum: f64,
}

impl SampledObs {
    /// Projects the response into per-sample summaries for one bag.
    pub fn new(bag: &[SamplerNux], response: &Response) -> Self {
        let n_obs = response.n_obs();
        let n_ctg = response.n_ctg();

        let mut sample_nux = Vec::with_capacity(bag.len());
        let mut row_to_sample = vec![NOT_SAMPLED; n_obs];
        let mut ctg_root = vec![SumCount::default(); n_ctg];
        let mut bag_sum = 0.0;

        let mut row = 0usize;
        for (s_idx, nux) in bag.iter().enumerate() {
            row += nux.del_row() as usize;
            let s_count = nux.s_count();
            let ctg = response.ctg(row);
            let y_sum = response.y_value(row) * s_count as f64;

            sample_nux.push(SampleNux {
                del_row: nux.del_row(),
                s_count,
                y_sum,
                ctg,
            });
            row_to_sample[row] = s_idx as u32;
            if n_ctg > 0 {
                ctg_root[ctg as usize].accum(y_sum, s_count);
            }
            bag_sum += y_sum;
        }

        Self {
            sample_nux,
            row_to_sample,
            ctg_root,
            bag_sum,
        }
    }

    /// Number of distinct sampled rows.
    #[inline]
    pub fn bag_count(&self) -> usize {
        self.sample_nux.len()
    }

    /// Sum of bagged responses.
    #[inline]
    pub fn bag_sum(&self) -> f64 {
        self.bag_sum
    }

    /// Total sample multiplicity over the bag.
    pub fn s_count_total(&self) -> u32 {
        self.sample_nux.iter().map(|nux| nux.s_count).sum()
    }

    #[inline]
    pub fn n_ctg(&self) -> usize {
        self.ctg_root.len()
    }

    /// Root category census for classification.
    #[inline]
    pub fn ctg_root(&self) -> &[SumCount] {
        &self.ctg_root
    }

    #[inline]
    pub fn nux(&self, s_idx: usize) -> &SampleNux {
        &self.sample_nux[s_idx]
    }

    /// Sample index of a row, if bagged.
    #[inline]
    pub fn sample_of_row(&self, row: usize) -> Option<u32> {
        let s_idx = self.row_to_sample[row];
        (s_idx != NOT_SAMPLED).then_some(s_idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regression_projection() {
        let (response, _) = Response::regression(vec![10.0, 20.0, 30.0, 40.0]).unwrap();
        // Rows 0 (twice), 2 and 3.
        let bag = vec![
            SamplerNux::new(0, 2),
            SamplerNux::new(2, 1),
            SamplerNux::new(1, 1),
        ];
        let obs = SampledObs::new(&bag, &response);

        assert_eq!(obs.bag_count(), 3);
        assert_eq!(obs.s_count_total(), 4);
        assert_eq!(obs.nux(0).y_sum, 20.0);
        assert_eq!(obs.nux(1).y_sum, 30.0);
        assert_eq!(obs.bag_sum(), 90.0);
        assert_eq!(obs.sample_of_row(0), Some(0));
        assert_eq!(obs.sample_of_row(1), None);
        assert_eq!(obs.sample_of_row(3), Some(2));
    }

    #[test]
    fn test_classification_census() {
        let (response, _) = Response::classification(vec![0, 1, 1, 0], 2, None).unwrap();
        let bag = vec![
            SamplerNux::new(0, 1),
            SamplerNux::new(1, 3),
            SamplerNux::new(1, 1),
        ];
        let obs = SampledObs::new(&bag, &response);

        assert_eq!(obs.n_ctg(), 2);
        let census = obs.ctg_root();
        assert_eq!(census[0].s_count, 1);
        assert_eq!(census[1].s_count, 4);
        assert_eq!(census[1].sum, 4.0);
    }

    #[test]
    fn test_sum_count_decr() {
        let mut sc = SumCount::new(5.0, 3);
        sc.decr(&SumCount::new(2.0, 1));
        assert_eq!(sc, SumCount::new(3.0, 2));
    }
}
