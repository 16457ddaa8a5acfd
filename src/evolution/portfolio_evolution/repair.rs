use serde::{Deserialize, Serialize};

/// How candidates are pulled back onto the budget constraint before they are
/// evaluated. Bounds are always enforced by clipping, whatever the strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RepairStrategy {
    /// Divide by the weight sum. Never leaves [0, 1] for non-negative input.
    #[default]
    Normalize,
    /// Euclidean projection onto the simplex {w >= 0, sum(w) = 1}.
    SimplexProjection,
    /// No repair, the budget is handled by constraint-domination alone.
    None,
}

impl RepairStrategy {
    pub fn apply(&self, weights: &mut [f64]) {
        match self {
            RepairStrategy::Normalize => normalize(weights),
            RepairStrategy::SimplexProjection => {
                let projected = project_onto_simplex(weights);
                weights.copy_from_slice(&projected);
            }
            RepairStrategy::None => {}
        }
    }
}

fn normalize(weights: &mut [f64]) {
    let total: f64 = weights.iter().sum();
    // an all-zero vector cannot be rescaled, leave it to the ranking
    if total > 0.0 && total.is_finite() {
        weights.iter_mut().for_each(|w| *w /= total);
    }
}

/// Projects the weight vector onto the simplex defined by w_i >= 0 and
/// sum(w_i) = 1, i.e. solves min 1/2||w - x||^2 under those constraints,
/// without the overhead of an actual QP solver.
pub fn project_onto_simplex(weights: &[f64]) -> Vec<f64> {
    let n = weights.len();
    if n == 0 {
        return vec![];
    }
    let mut sorted_weights = weights.to_vec();
    sorted_weights.sort_by(|a, b| b.total_cmp(a));

    // Find how many of the largest values stay positive
    let mut sum = 0.0;
    let mut k = n;
    for (i, &value) in sorted_weights.iter().enumerate() {
        sum += value;
        let theta = (sum - 1.0) / (i + 1) as f64;
        if value - theta <= 0.0 {
            k = i;
            break;
        }
    }
    // k == 0 only when the largest value is already below the threshold
    let k = k.max(1);

    // Distribute the excess across the non-zero values
    let sum_top_k = sorted_weights[..k].iter().sum::<f64>();
    let theta = (sum_top_k - 1.0) / k as f64;

    let projected_weights = weights
        .iter()
        .map(|w| (w - theta).max(0.))
        .collect::<Vec<f64>>();

    let projected_sum = projected_weights.iter().sum::<f64>();
    if !projected_sum.is_finite() || projected_sum.abs() < 1e-10 * n as f64 {
        vec![1. / n as f64; n]
    } else {
        // Final normalization for stability
        projected_weights
            .into_iter()
            .map(|w| (w / projected_sum).min(1.0))
            .collect::<Vec<f64>>()
    }
}
