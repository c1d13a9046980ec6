//! Training response: continuous or categorical.

use crate::error::{DataError, Warning};

/// Response values for a training call.
///
/// Classification carries a proxy value per row, the class weight, whose
/// per-sample sums drive the category census used by Gini scoring.
#[derive(Clone, Debug)]
pub enum Response {
    Reg {
        y: Vec<f64>,
    },
    Ctg {
        y_ctg: Vec<u32>,
        n_ctg: usize,
        proxy: Vec<f64>,
    },
}

impl Response {
    /// Continuous response for regression.
    pub fn regression(y: Vec<f64>) -> Result<(Self, Vec<Warning>), DataError> {
        let mut warnings = Vec::new();
        if let Some(row) = y.iter().position(|v| !v.is_finite()) {
            return Err(DataError::NonFinite { pred_idx: 0, row });
        }
        if !y.is_empty() && y.iter().all(|&v| v == y[0]) {
            warnings.push(Warning::DegenerateResponse);
        }
        Ok((Response::Reg { y }, warnings))
    }

    /// Categorical response with optional per-class weights.
    pub fn classification(
        y_ctg: Vec<u32>,
        n_ctg: usize,
        class_weight: Option<&[f64]>,
    ) -> Result<(Self, Vec<Warning>), DataError> {
        if let Some(&ctg) = y_ctg.iter().find(|&&c| c as usize >= n_ctg) {
            return Err(DataError::CategoryOutOfRange {
                ctg,
                n_ctg: n_ctg as u32,
            });
        }

        let weight = match class_weight {
            Some(w) => {
                if w.len() != n_ctg {
                    return Err(DataError::WeightLenMismatch {
                        expected: n_ctg,
                        got: w.len(),
                    });
                }
                if w.iter().any(|&x| x < 0.0) || w.iter().sum::<f64>() <= 0.0 {
                    return Err(DataError::DegenerateWeights);
                }
                w.to_vec()
            }
            None => vec![1.0; n_ctg],
        };

        let mut warnings = Vec::new();
        let mut seen = vec![false; n_ctg];
        for &c in &y_ctg {
            seen[c as usize] = true;
        }
        for (ctg, present) in seen.iter().enumerate() {
            if !present {
                warnings.push(Warning::AbsentCategory { ctg: ctg as u32 });
            }
        }
        if !y_ctg.is_empty() && y_ctg.iter().all(|&c| c == y_ctg[0]) {
            warnings.push(Warning::DegenerateResponse);
        }

        let proxy = y_ctg.iter().map(|&c| weight[c as usize]).collect();
        Ok((
            Response::Ctg {
                y_ctg,
                n_ctg,
                proxy,
            },
            warnings,
        ))
    }

    #[inline]
    pub fn n_obs(&self) -> usize {
        match self {
            Response::Reg { y } => y.len(),
            Response::Ctg { y_ctg, .. } => y_ctg.len(),
        }
    }

    /// Category count: zero for regression.
    #[inline]
    pub fn n_ctg(&self) -> usize {
        match self {
            Response::Reg { .. } => 0,
            Response::Ctg { n_ctg, .. } => *n_ctg,
        }
    }

    #[inline]
    pub fn is_ctg(&self) -> bool {
        matches!(self, Response::Ctg { .. })
    }

    /// Response value summed into samples: y for regression, the class
    /// weight proxy for classification.
    #[inline]
    pub fn y_value(&self, row: usize) -> f64 {
        match self {
            Response::Reg { y } => y[row],
            Response::Ctg { proxy, .. } => proxy[row],
        }
    }

    /// Response category: zero for regression.
    #[inline]
    pub fn ctg(&self, row: usize) -> u32 {
        match self {
            Response::Reg { .. } => 0,
            Response::Ctg { y_ctg, .. } => y_ctg[row],
        }
    }
}
