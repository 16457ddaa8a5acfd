use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum OptimizationDirection {
    Maximize,
    Minimize,
}

/// The two objectives of the mean-variance model.
///
/// The engine only minimizes, so every objective is reported in
/// minimization form by [`MeanVarianceObjective::compute`] and can be turned
/// back into its natural value with [`MeanVarianceObjective::natural_value`].
#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum MeanVarianceObjective {
    /// Portfolio variance, wᵀΣw.
    Variance,
    /// Expected portfolio return, w·μ.
    Return,
}

impl MeanVarianceObjective {
    pub const ALL: [MeanVarianceObjective; 2] =
        [MeanVarianceObjective::Variance, MeanVarianceObjective::Return];

    pub fn direction(&self) -> OptimizationDirection {
        match self {
            MeanVarianceObjective::Variance => OptimizationDirection::Minimize,
            MeanVarianceObjective::Return => OptimizationDirection::Maximize,
        }
    }

    /// Objective value in minimization form.
    pub fn compute(
        &self,
        weights: &DVector<f64>,
        mean: &DVector<f64>,
        covariance: &DMatrix<f64>,
    ) -> f64 {
        let value = match self {
            MeanVarianceObjective::Variance => weights.dot(&(covariance * weights)),
            MeanVarianceObjective::Return => weights.dot(mean),
        };
        self.to_minimization(value)
    }

    fn to_minimization(&self, natural_value: f64) -> f64 {
        match self.direction() {
            OptimizationDirection::Minimize => natural_value,
            OptimizationDirection::Maximize => -natural_value,
        }
    }

    /// Inverse of the minimization transform, e.g. `-(-w·μ) = w·μ`.
    pub fn natural_value(&self, minimized_value: f64) -> f64 {
        // negation is its own inverse
        self.to_minimization(minimized_value)
    }
}
