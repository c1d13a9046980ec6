//! Walker alias table for weighted sampling with replacement.
//!
//! Builds the table once per training call; each draw is O(1).

use rand::Rng;

/// Alias table over a fixed weight vector.
#[derive(Clone, Debug)]
pub struct Walker {
    /// Acceptance probability per slot.
    prob: Vec<f64>,
    /// Fallback slot on rejection.
    alias: Vec<u32>,
}

impl Walker {
    /// Build the table from non-negative weights with a positive sum.
    pub fn new(weights: &[f64]) -> Self {
        let n = weights.len();
        let total: f64 = weights.iter().sum();
        debug_assert!(total > 0.0);

        // Scaled weights partitioned into under- and over-full slots.
        let mut prob: Vec<f64> = weights.iter().map(|&w| w * n as f64 / total).collect();
        let mut alias = vec![0u32; n];

        let mut small: Vec<u32> = Vec::new();
        let mut large: Vec<u32> = Vec::new();
        for (i, &p) in prob.iter().enumerate() {
            if p < 1.0 {
                small.push(i as u32);
            } else {
                large.push(i as u32);
            }
        }

        while let (Some(s), Some(l)) = (small.pop(), large.pop()) {
            alias[s as usize] = l;
            prob[l as usize] -= 1.0 - prob[s as usize];
            if prob[l as usize] < 1.0 {
                small.push(l);
            } else {
                large.push(l);
            }
        }

        // Remaining slots saturate from rounding.
        for s in small.into_iter().chain(large) {
            prob[s as usize] = 1.0;
        }

        Self { prob, alias }
    }

    /// Draw one index.
    #[inline]
    pub fn draw<R: Rng>(&self, rng: &mut R) -> usize {
        let slot = rng.gen_range(0..self.prob.len());
        if rng.gen::<f64>() < self.prob[slot] {
            slot
        } else {
            self.alias[slot] as usize
        }
    }

    /// Draw `n` indices with replacement.
    pub fn sample<R: Rng>(&self, n: usize, rng: &mut R) -> Vec<usize> {
        (0..n).map(|_| self.draw(rng)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_zero_weight_never_drawn() {
        let walker = Walker::new(&[0.0, 1.0, 1.0]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        for idx in walker.sample(1000, &mut rng) {
            assert_ne!(idx, 0);
        }
    }

    #[test]
    fn test_weights_respected() {
        let walker = Walker::new(&[1.0, 3.0]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);
        let draws = walker.sample(40_000, &mut rng);
        let ones = draws.iter().filter(|&&i| i == 1).count();
        let frac = ones as f64 / draws.len() as f64;
        assert!((frac - 0.75).abs() < 0.02, "got {frac}");
    }

    #[test]
    fn test_uniform_degenerates() {
        let walker = Walker::new(&[2.0, 2.0, 2.0, 2.0]);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let draws = walker.sample(40_000, &mut rng);
        for target in 0..4usize {
            let count = draws.iter().filter(|&&i| i == target).count();
            let frac = count as f64 / draws.len() as f64;
            assert!((frac - 0.25).abs() < 0.02, "slot {target}: {frac}");
        }
    }
}
