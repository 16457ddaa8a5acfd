use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use thiserror::Error;

use crate::consts::{FLOAT_COMPARISON_EPSILON, NUMBER_OF_OPTIMIZATION_OBJECTIVES};
use crate::evolution::objective::MeanVarianceObjective;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProblemError {
    #[error("the asset universe is empty")]
    EmptyUniverse,
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("covariance matrix is not symmetric at ({row}, {column})")]
    AsymmetricCovariance { row: usize, column: usize },
    #[error("covariance matrix has a negative variance for asset {0}")]
    NegativeVariance(usize),
    #[error("model inputs contain non-finite values")]
    NonFiniteInput,
}

/// What the evaluation of a single candidate produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Objective values, minimization form.
    pub objectives: Vec<f64>,
    /// Equality constraint residuals, driven toward zero by the engine.
    pub equality_residuals: Vec<f64>,
}

/// The seam between the search engine and the model it optimizes.
///
/// Implementations hold no mutable state: `evaluate` is pure and safe to call
/// from several threads on disjoint rows.
pub trait Problem: Sync {
    fn number_of_variables(&self) -> usize;
    fn number_of_objectives(&self) -> usize;
    /// Hard variable bounds, enforced by the engine and never evaluated.
    fn lower_bounds(&self) -> &[f64];
    fn upper_bounds(&self) -> &[f64];
    /// Evaluates a batch of candidates (rows) in order.
    fn evaluate(&self, candidates: &[Vec<f64>]) -> Vec<Evaluation>;
}

/// Long-only, fully invested mean-variance portfolio selection.
///
/// Objective 1 is wᵀΣw, objective 2 is −w·μ, and the single equality
/// constraint is sum(w) − 1 = 0. Bounds are 0 ≤ wᵢ ≤ 1.
#[derive(Debug, Clone)]
pub struct PortfolioProblem {
    mean: DVector<f64>,
    covariance: DMatrix<f64>,
    lower_bounds: Vec<f64>,
    upper_bounds: Vec<f64>,
}

impl PortfolioProblem {
    pub fn new(mean: DVector<f64>, covariance: DMatrix<f64>) -> Result<Self, ProblemError> {
        let number_of_assets = mean.len();
        if number_of_assets == 0 {
            return Err(ProblemError::EmptyUniverse);
        }
        if covariance.nrows() != number_of_assets {
            return Err(ProblemError::DimensionMismatch {
                expected: number_of_assets,
                found: covariance.nrows(),
            });
        }
        if covariance.ncols() != number_of_assets {
            return Err(ProblemError::DimensionMismatch {
                expected: number_of_assets,
                found: covariance.ncols(),
            });
        }
        if mean.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
            return Err(ProblemError::NonFiniteInput);
        }
        for row in 0..number_of_assets {
            if covariance[(row, row)] < 0.0 {
                return Err(ProblemError::NegativeVariance(row));
            }
            for column in (row + 1)..number_of_assets {
                let scale = covariance[(row, column)]
                    .abs()
                    .max(covariance[(column, row)].abs())
                    .max(1.0);
                if (covariance[(row, column)] - covariance[(column, row)]).abs()
                    > FLOAT_COMPARISON_EPSILON * scale
                {
                    return Err(ProblemError::AsymmetricCovariance { row, column });
                }
            }
        }

        Ok(PortfolioProblem {
            mean,
            covariance,
            lower_bounds: vec![0.0; number_of_assets],
            upper_bounds: vec![1.0; number_of_assets],
        })
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    /// Evaluates one weight vector.
    pub fn evaluate_weights(&self, weights: &[f64]) -> Evaluation {
        if weights.len() != self.mean.len() {
            // Malformed rows are reported as non-finite so the engine ranks
            // them last instead of aborting the batch.
            return Evaluation {
                objectives: vec![f64::NAN; NUMBER_OF_OPTIMIZATION_OBJECTIVES],
                equality_residuals: vec![f64::NAN],
            };
        }
        let weights_vector = DVector::from_column_slice(weights);
        let objectives = MeanVarianceObjective::ALL
            .iter()
            .map(|objective| objective.compute(&weights_vector, &self.mean, &self.covariance))
            .collect();

        Evaluation {
            objectives,
            equality_residuals: vec![weights.iter().sum::<f64>() - 1.0],
        }
    }
}

impl Problem for PortfolioProblem {
    fn number_of_variables(&self) -> usize {
        self.mean.len()
    }

    fn number_of_objectives(&self) -> usize {
        NUMBER_OF_OPTIMIZATION_OBJECTIVES
    }

    fn lower_bounds(&self) -> &[f64] {
        &self.lower_bounds
    }

    fn upper_bounds(&self) -> &[f64] {
        &self.upper_bounds
    }

    fn evaluate(&self, candidates: &[Vec<f64>]) -> Vec<Evaluation> {
        candidates
            .par_iter()
            .map(|weights| self.evaluate_weights(weights))
            .collect()
    }
}
