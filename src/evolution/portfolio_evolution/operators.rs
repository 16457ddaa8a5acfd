//! Real-valued genetic operators: uniform sampling, binary tournament,
//! simulated binary crossover (SBX) and polynomial mutation.
//!
//! Every operator keeps genes inside the problem bounds and draws its
//! randomness from the generator it is handed, never from a global source.

use std::cmp::Ordering;

use rand::Rng;

use crate::portfolio::Individual;

/// Below this spread two parent genes are treated as identical by SBX.
const SBX_GENE_EPSILON: f64 = 1e-14;

/// Samples a weight vector uniformly inside the bounds.
pub fn sample_uniform<R: Rng>(rng: &mut R, lower_bounds: &[f64], upper_bounds: &[f64]) -> Vec<f64> {
    lower_bounds
        .iter()
        .zip(upper_bounds.iter())
        .map(|(&lower, &upper)| {
            if upper > lower {
                rng.gen_range(lower..upper)
            } else {
                lower
            }
        })
        .collect()
}

/// Binary tournament on constraint violation, then (rank, crowding distance).
/// Ties are broken by a coin toss.
pub fn binary_tournament<'a, R: Rng>(population: &'a [Individual], rng: &mut R) -> &'a Individual {
    let first = &population[rng.gen_range(0..population.len())];
    let second = &population[rng.gen_range(0..population.len())];

    let ordering = if first.is_feasible() && second.is_feasible() {
        first.crowded_cmp(second)
    } else {
        first
            .constraint_violation
            .total_cmp(&second.constraint_violation)
            .then_with(|| first.crowded_cmp(second))
    };

    match ordering {
        Ordering::Less => first,
        Ordering::Greater => second,
        Ordering::Equal => {
            if rng.gen_bool(0.5) {
                first
            } else {
                second
            }
        }
    }
}

/// Spread factor of bounded SBX for one side of the parent interval.
fn sbx_beta_q(random: f64, beta: f64, eta: f64) -> f64 {
    let alpha = 2.0 - beta.powf(-(eta + 1.0));
    if random <= 1.0 / alpha {
        (random * alpha).powf(1.0 / (eta + 1.0))
    } else {
        (1.0 / (2.0 - random * alpha)).powf(1.0 / (eta + 1.0))
    }
}

/// Bounded simulated binary crossover.
///
/// With probability `crossover_probability` the parents are recombined; each
/// gene then takes part with probability 1/2. Children are clipped to the
/// bounds and swapped at random per gene.
///
/// # Arguments
/// * `eta`: distribution index, larger values keep children near the parents.
pub fn simulated_binary_crossover<R: Rng>(
    parent_1: &[f64],
    parent_2: &[f64],
    lower_bounds: &[f64],
    upper_bounds: &[f64],
    crossover_probability: f64,
    eta: f64,
    rng: &mut R,
) -> (Vec<f64>, Vec<f64>) {
    let mut child_1 = parent_1.to_vec();
    let mut child_2 = parent_2.to_vec();

    if !rng.gen_bool(crossover_probability.clamp(0.0, 1.0)) {
        return (child_1, child_2);
    }

    for i in 0..parent_1.len() {
        if !rng.gen_bool(0.5) {
            continue;
        }
        let (lower, upper) = (lower_bounds[i], upper_bounds[i]);
        let (x1, x2) = (parent_1[i], parent_2[i]);
        if (x1 - x2).abs() <= SBX_GENE_EPSILON {
            continue;
        }
        let (y1, y2) = if x1 < x2 { (x1, x2) } else { (x2, x1) };
        let spread = y2 - y1;

        let random: f64 = rng.gen();
        let beta_low = 1.0 + 2.0 * (y1 - lower) / spread;
        let c1 = 0.5 * ((y1 + y2) - sbx_beta_q(random, beta_low, eta) * spread);
        let beta_high = 1.0 + 2.0 * (upper - y2) / spread;
        let c2 = 0.5 * ((y1 + y2) + sbx_beta_q(random, beta_high, eta) * spread);

        let c1 = c1.clamp(lower, upper);
        let c2 = c2.clamp(lower, upper);

        if rng.gen_bool(0.5) {
            child_1[i] = c2;
            child_2[i] = c1;
        } else {
            child_1[i] = c1;
            child_2[i] = c2;
        }
    }

    (child_1, child_2)
}

/// Bounded polynomial mutation, applied to each gene with
/// `mutation_probability`.
pub fn polynomial_mutation<R: Rng>(
    weights: &mut [f64],
    lower_bounds: &[f64],
    upper_bounds: &[f64],
    mutation_probability: f64,
    eta: f64,
    rng: &mut R,
) {
    let probability = mutation_probability.clamp(0.0, 1.0);
    let mutation_power = 1.0 / (eta + 1.0);

    for (i, weight) in weights.iter_mut().enumerate() {
        if !rng.gen_bool(probability) {
            continue;
        }
        let (lower, upper) = (lower_bounds[i], upper_bounds[i]);
        let range = upper - lower;
        if range <= 0.0 {
            *weight = lower;
            continue;
        }
        let y = weight.clamp(lower, upper);
        let delta_1 = (y - lower) / range;
        let delta_2 = (upper - y) / range;
        let random: f64 = rng.gen();

        let delta_q = if random < 0.5 {
            let xy = 1.0 - delta_1;
            let value = 2.0 * random + (1.0 - 2.0 * random) * xy.powf(eta + 1.0);
            value.powf(mutation_power) - 1.0
        } else {
            let xy = 1.0 - delta_2;
            let value = 2.0 * (1.0 - random) + 2.0 * (random - 0.5) * xy.powf(eta + 1.0);
            1.0 - value.powf(mutation_power)
        };

        *weight = (y + delta_q * range).clamp(lower, upper);
    }
}

/// Chebyshev distance check used by duplicate elimination.
pub fn is_duplicate(candidate: &[f64], existing: &[f64], tolerance: f64) -> bool {
    candidate.len() == existing.len()
        && candidate
            .iter()
            .zip(existing.iter())
            .all(|(a, b)| (a - b).abs() <= tolerance)
}
