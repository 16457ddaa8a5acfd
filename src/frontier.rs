//! Post-processing of the final Pareto front: volatility, Sharpe ratio, the
//! canonical portfolios and the full frontier table.

use itertools::izip;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{DEFAULT_ALLOCATION_DISPLAY_THRESHOLD, FLOAT_COMPARISON_EPSILON};
use crate::evolution::objective::MeanVarianceObjective;
use crate::portfolio::Individual;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrontierError {
    #[error("the frontier is empty, nothing to analyze")]
    EmptyFrontier,
    #[error("portfolio has {found} weights but the universe has {expected} assets")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("invalid allocation request: {0}")]
    InvalidAllocation(String),
}

/// One non-dominated portfolio as handed over by the search engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierPoint {
    /// Portfolio variance.
    pub risk: f64,
    pub expected_return: f64,
    pub weights: Vec<f64>,
}

impl FrontierPoint {
    /// Reads risk and return back out of an individual's minimized objectives.
    pub fn from_individual(individual: &Individual) -> Self {
        let natural = |objective: MeanVarianceObjective, index: usize| {
            objective.natural_value(individual.objectives.get(index).copied().unwrap_or(f64::NAN))
        };
        FrontierPoint {
            risk: natural(MeanVarianceObjective::Variance, 0),
            expected_return: natural(MeanVarianceObjective::Return, 1),
            weights: individual.weights.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierRow {
    pub risk: f64,
    pub volatility: f64,
    pub expected_return: f64,
    pub sharpe_ratio: f64,
    pub weights: Vec<f64>,
}

impl FrontierRow {
    fn new(point: &FrontierPoint, risk_free_rate: f64) -> Self {
        // tiny negative variances only come from rounding
        let volatility = point.risk.max(0.0).sqrt();
        FrontierRow {
            risk: point.risk,
            volatility,
            expected_return: point.expected_return,
            sharpe_ratio: sharpe_ratio(point.expected_return, volatility, risk_free_rate),
            weights: point.weights.clone(),
        }
    }
}

/// Excess return per unit of volatility. A riskless portfolio has no
/// meaningful ratio and reports 0.
pub fn sharpe_ratio(expected_return: f64, volatility: f64, risk_free_rate: f64) -> f64 {
    if volatility < FLOAT_COMPARISON_EPSILON {
        0.0
    } else {
        (expected_return - risk_free_rate) / volatility
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub asset: String,
    pub weight: f64,
    pub amount: f64,
}

/// How a given capital would be spread over a frontier portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub capital: f64,
    /// Holdings strictly above the threshold, largest first.
    pub holdings: Vec<Holding>,
    /// Everything under the threshold, grouped together.
    pub other_weight: f64,
    pub other_amount: f64,
}

/// The analyzed frontier. `rows` are sorted by ascending risk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frontier {
    pub assets: Vec<String>,
    pub risk_free_rate: f64,
    pub rows: Vec<FrontierRow>,
    pub min_risk: FrontierRow,
    pub max_return: FrontierRow,
    pub max_sharpe: FrontierRow,
}

impl Frontier {
    /// Builds the frontier table and picks the canonical portfolios.
    ///
    /// # Arguments
    /// * `points`: the non-dominated portfolios, in any order.
    /// * `assets`: asset names, in the order of the weight vectors.
    /// * `risk_free_rate`: annualized, decimal form.
    ///
    /// # Returns
    /// The frontier, or `EmptyFrontier` when there is nothing to analyze.
    pub fn extract(
        points: &[FrontierPoint],
        assets: &[String],
        risk_free_rate: f64,
    ) -> Result<Self, FrontierError> {
        if points.is_empty() {
            return Err(FrontierError::EmptyFrontier);
        }
        if let Some(point) = points.iter().find(|p| p.weights.len() != assets.len()) {
            return Err(FrontierError::DimensionMismatch {
                expected: assets.len(),
                found: point.weights.len(),
            });
        }

        let mut rows: Vec<FrontierRow> = points
            .iter()
            .map(|point| FrontierRow::new(point, risk_free_rate))
            .collect();
        rows.sort_by(|a, b| {
            a.risk
                .total_cmp(&b.risk)
                .then_with(|| b.expected_return.total_cmp(&a.expected_return))
        });

        // rows are sorted, so the first row is the minimum-risk one
        let min_risk = rows[0].clone();
        let max_return = first_maximum(&rows, |row| row.expected_return).clone();
        let max_sharpe = first_maximum(&rows, |row| row.sharpe_ratio).clone();

        Ok(Frontier {
            assets: assets.to_vec(),
            risk_free_rate,
            rows,
            min_risk,
            max_return,
            max_sharpe,
        })
    }

    /// Same as [`Frontier::extract`], straight from the engine's front.
    pub fn from_individuals(
        individuals: &[Individual],
        assets: &[String],
        risk_free_rate: f64,
    ) -> Result<Self, FrontierError> {
        let points: Vec<FrontierPoint> = individuals
            .iter()
            .map(FrontierPoint::from_individual)
            .collect();
        Self::extract(&points, assets, risk_free_rate)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Splits `capital` across the assets of `row`. Assets weighing `min_weight`
    /// or less are lumped into `other_*`.
    pub fn allocation(
        &self,
        row: &FrontierRow,
        capital: f64,
        min_weight: f64,
    ) -> Result<Allocation, FrontierError> {
        if !(capital.is_finite() && capital >= 0.0) {
            return Err(FrontierError::InvalidAllocation(format!(
                "capital must be a non-negative amount, got {capital}"
            )));
        }
        if !(0.0..=1.0).contains(&min_weight) {
            return Err(FrontierError::InvalidAllocation(format!(
                "min_weight must be within [0, 1], got {min_weight}"
            )));
        }
        if row.weights.len() != self.assets.len() {
            return Err(FrontierError::DimensionMismatch {
                expected: self.assets.len(),
                found: row.weights.len(),
            });
        }

        let mut holdings = Vec::new();
        let mut other_weight = 0.0;
        for (asset, &weight) in izip!(self.assets.iter(), row.weights.iter()) {
            if weight > min_weight && weight > 0.0 {
                holdings.push(Holding {
                    asset: asset.clone(),
                    weight,
                    amount: weight * capital,
                });
            } else {
                other_weight += weight;
            }
        }
        holdings.sort_by(|a, b| b.weight.total_cmp(&a.weight));

        Ok(Allocation {
            capital,
            holdings,
            other_weight,
            other_amount: other_weight * capital,
        })
    }

    /// [`Frontier::allocation`] with the usual 0.5% display threshold.
    pub fn default_allocation(
        &self,
        row: &FrontierRow,
        capital: f64,
    ) -> Result<Allocation, FrontierError> {
        self.allocation(row, capital, DEFAULT_ALLOCATION_DISPLAY_THRESHOLD)
    }
}

fn first_maximum<F>(rows: &[FrontierRow], key: F) -> &FrontierRow
where
    F: Fn(&FrontierRow) -> f64,
{
    let mut best = &rows[0];
    for row in rows.iter().skip(1) {
        if key(row).total_cmp(&key(best)).is_gt() {
            best = row;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assets() -> Vec<String> {
        vec!["A".to_string(), "B".to_string()]
    }

    fn point(risk: f64, expected_return: f64, w: f64) -> FrontierPoint {
        FrontierPoint {
            risk,
            expected_return,
            weights: vec![w, 1.0 - w],
        }
    }

    #[test]
    fn test_empty_frontier() {
        assert_eq!(
            Frontier::extract(&[], &assets(), 0.1).unwrap_err(),
            FrontierError::EmptyFrontier
        );
        assert_eq!(
            Frontier::from_individuals(&[], &assets(), 0.1).unwrap_err(),
            FrontierError::EmptyFrontier
        );
    }

    #[test]
    fn test_rows_sorted_and_canonical_rows() {
        let points = vec![
            point(0.09, 0.15, 0.0),
            point(0.01, 0.05, 1.0),
            point(0.04, 0.12, 0.4),
        ];
        let frontier = Frontier::extract(&points, &assets(), 0.02).unwrap();

        let risks: Vec<f64> = frontier.rows.iter().map(|r| r.risk).collect();
        assert_eq!(risks, vec![0.01, 0.04, 0.09]);

        assert_eq!(frontier.min_risk.risk, 0.01);
        assert_eq!(frontier.max_return.expected_return, 0.15);
        // Sharpe: (0.05-0.02)/0.1 = 0.3, (0.12-0.02)/0.2 = 0.5, (0.15-0.02)/0.3 ~ 0.433
        assert!((frontier.max_sharpe.sharpe_ratio - 0.5).abs() < 1e-12);
        assert!((frontier.rows[0].volatility - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_negative_sharpe_picks_least_negative() {
        let points = vec![point(0.01, 0.05, 1.0), point(0.04, 0.08, 0.5)];
        let frontier = Frontier::extract(&points, &assets(), 0.50).unwrap();
        // (0.05-0.5)/0.1 = -4.5, (0.08-0.5)/0.2 = -2.1
        assert!(frontier.rows.iter().all(|r| r.sharpe_ratio < 0.0));
        assert!((frontier.max_sharpe.sharpe_ratio + 2.1).abs() < 1e-12);
    }

    #[test]
    fn test_zero_volatility_sharpe() {
        assert_eq!(sharpe_ratio(0.1, 0.0, 0.05), 0.0);
        let frontier = Frontier::extract(&[point(0.0, 0.1, 0.5)], &assets(), 0.05).unwrap();
        assert_eq!(frontier.rows[0].sharpe_ratio, 0.0);
        assert_eq!(frontier.len(), 1);
    }

    #[test]
    fn test_from_individuals_restores_natural_return() {
        let individual = Individual::new(0, vec![0.3, 0.7], vec![0.02, -0.11], 0.0, 1e-6);
        let frontier = Frontier::from_individuals(&[individual], &assets(), 0.0).unwrap();
        assert!((frontier.rows[0].expected_return - 0.11).abs() < 1e-15);
        assert_eq!(frontier.rows[0].risk, 0.02);
    }

    #[test]
    fn test_dimension_mismatch() {
        let bad = FrontierPoint {
            risk: 0.01,
            expected_return: 0.1,
            weights: vec![1.0],
        };
        assert_eq!(
            Frontier::extract(&[bad], &assets(), 0.0).unwrap_err(),
            FrontierError::DimensionMismatch {
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_allocation_groups_small_holdings() {
        let names = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let points = vec![FrontierPoint {
            risk: 0.02,
            expected_return: 0.1,
            weights: vec![0.3, 0.698, 0.002],
        }];
        let frontier = Frontier::extract(&points, &names, 0.0).unwrap();
        let allocation = frontier
            .default_allocation(&frontier.rows[0], 1_000.0)
            .unwrap();

        let held: Vec<&str> = allocation.holdings.iter().map(|h| h.asset.as_str()).collect();
        assert_eq!(held, vec!["B", "A"]);
        assert!((allocation.holdings[0].amount - 698.0).abs() < 1e-9);
        assert!((allocation.other_weight - 0.002).abs() < 1e-15);
        assert!((allocation.other_amount - 2.0).abs() < 1e-9);

        assert!(frontier.allocation(&frontier.rows[0], -1.0, 0.01).is_err());
        assert!(frontier.allocation(&frontier.rows[0], 1.0, 2.0).is_err());
    }

    #[test]
    fn test_allocation_threshold_is_exclusive() {
        let names = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let points = vec![FrontierPoint {
            risk: 0.02,
            expected_return: 0.1,
            weights: vec![0.3, 0.695, 0.005],
        }];
        let frontier = Frontier::extract(&points, &names, 0.0).unwrap();
        let allocation = frontier
            .default_allocation(&frontier.rows[0], 1_000.0)
            .unwrap();

        // exactly 0.5% is not a holding of its own
        assert_eq!(allocation.holdings.len(), 2);
        assert!(allocation.holdings.iter().all(|h| h.asset != "C"));
        assert!((allocation.other_weight - 0.005).abs() < 1e-15);
        assert!((allocation.other_amount - 5.0).abs() < 1e-9);
    }
}
