use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A candidate allocation living inside the search population.
///
/// `objectives` are always in minimization form (see
/// [`crate::evolution::objective::MeanVarianceObjective`]), and
/// `constraint_violation` is the magnitude of the budget residual once it
/// exceeds the feasibility tolerance (0 for feasible individuals).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Individual {
    pub id: usize,
    pub rank: Option<usize>,
    pub crowding_distance: Option<f64>,
    pub weights: Vec<f64>,
    pub objectives: Vec<f64>,
    /// Raw residual of the budget constraint, sum(w) - 1.
    pub budget_residual: f64,
    pub constraint_violation: f64,
}

impl PartialEq for Individual {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Individual {
    pub fn new(
        id: usize,
        weights: Vec<f64>,
        objectives: Vec<f64>,
        budget_residual: f64,
        feasibility_tolerance: f64,
    ) -> Self {
        let degenerate = objectives.iter().any(|value| !value.is_finite())
            || !budget_residual.is_finite();

        // NaN objectives (e.g. from a broken covariance) must not poison the
        // sort, so those individuals get the worst possible standing instead.
        let (objectives, constraint_violation) = if degenerate {
            (vec![f64::INFINITY; objectives.len()], f64::INFINITY)
        } else if budget_residual.abs() > feasibility_tolerance {
            (objectives, budget_residual.abs())
        } else {
            (objectives, 0.0)
        };

        Individual {
            id,
            rank: None,
            crowding_distance: None,
            weights,
            objectives,
            budget_residual,
            constraint_violation,
        }
    }

    pub fn is_feasible(&self) -> bool {
        self.constraint_violation == 0.0
    }

    /// Plain Pareto dominance on the (minimized) objectives.
    pub fn pareto_dominates(&self, other: &Individual) -> bool {
        let no_worse_everywhere = self
            .objectives
            .iter()
            .zip(other.objectives.iter())
            .all(|(mine, theirs)| mine <= theirs);
        let strictly_better_somewhere = self
            .objectives
            .iter()
            .zip(other.objectives.iter())
            .any(|(mine, theirs)| mine < theirs);

        no_worse_everywhere && strictly_better_somewhere
    }

    /// Constraint-domination: feasibility first, then violation, then Pareto.
    pub fn constrained_dominates(&self, other: &Individual) -> bool {
        match (self.is_feasible(), other.is_feasible()) {
            (true, false) => true,
            (false, true) => false,
            (false, false) => self.constraint_violation < other.constraint_violation,
            (true, true) => self.pareto_dominates(other),
        }
    }

    pub fn is_dominated_by(&self, other: &Individual) -> bool {
        other.constrained_dominates(self)
    }

    /// Crowded comparison used by tournaments: lower rank wins, then larger
    /// crowding distance. `Less` means `self` is the better one.
    pub fn crowded_cmp(&self, other: &Individual) -> Ordering {
        let rank_a = self.rank.unwrap_or(usize::MAX);
        let rank_b = other.rank.unwrap_or(usize::MAX);
        rank_a.cmp(&rank_b).then_with(|| {
            let distance_a = self.crowding_distance.unwrap_or(f64::NEG_INFINITY);
            let distance_b = other.crowding_distance.unwrap_or(f64::NEG_INFINITY);
            distance_b.total_cmp(&distance_a)
        })
    }

    /// Risk (variance), the first objective as-is.
    pub fn risk(&self) -> f64 {
        self.objectives[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn individual(id: usize, risk: f64, negative_return: f64, residual: f64) -> Individual {
        Individual::new(id, vec![1.0], vec![risk, negative_return], residual, 1e-6)
    }

    #[test]
    fn test_pareto_dominance() {
        let a = individual(0, 0.01, -0.10, 0.0);
        let b = individual(1, 0.02, -0.05, 0.0);
        let c = individual(2, 0.005, -0.02, 0.0);
        assert!(a.pareto_dominates(&b));
        assert!(!b.pareto_dominates(&a));
        assert!(!a.pareto_dominates(&c));
        assert!(!c.pareto_dominates(&a));
        assert!(!a.pareto_dominates(&a.clone()));
    }

    #[test]
    fn test_feasible_beats_infeasible() {
        let feasible_but_poor = individual(0, 1.0, 1.0, 0.0);
        let infeasible_but_great = individual(1, 0.0, -10.0, 0.5);
        assert!(feasible_but_poor.constrained_dominates(&infeasible_but_great));
        assert!(infeasible_but_great.is_dominated_by(&feasible_but_poor));
    }

    #[test]
    fn test_smaller_violation_dominates() {
        let a = individual(0, 0.5, 0.5, 0.01);
        let b = individual(1, 0.1, -0.5, -0.2);
        assert!(a.constrained_dominates(&b));
        assert!(!b.constrained_dominates(&a));
        assert!((b.constraint_violation - 0.2).abs() < 1e-15);
    }

    #[test]
    fn test_residual_within_tolerance_is_feasible() {
        let a = individual(0, 0.1, -0.1, 5e-7);
        assert!(a.is_feasible());
        assert_eq!(a.budget_residual, 5e-7);
    }

    #[test]
    fn test_nan_objectives_are_worst() {
        let broken = individual(0, f64::NAN, -0.1, 0.0);
        let infeasible = individual(1, 0.1, -0.1, 0.9);
        assert!(!broken.is_feasible());
        assert!(infeasible.constrained_dominates(&broken));
        assert!(broken.objectives.iter().all(|v| v.is_infinite()));
    }

    #[test]
    fn test_crowded_cmp() {
        let mut a = individual(0, 0.1, -0.1, 0.0);
        let mut b = individual(1, 0.1, -0.1, 0.0);
        a.rank = Some(0);
        b.rank = Some(1);
        a.crowding_distance = Some(0.1);
        b.crowding_distance = Some(f64::INFINITY);
        assert_eq!(a.crowded_cmp(&b), Ordering::Less);

        b.rank = Some(0);
        assert_eq!(a.crowded_cmp(&b), Ordering::Greater);
    }
}
