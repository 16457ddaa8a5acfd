//! Wires the four stages together: statistics, problem model, search and
//! frontier extraction.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::consts::FALLBACK_RISK_FREE_RATE;
use crate::error::PipelineError;
use crate::evolution::portfolio_evolution::{
    EvolutionConfig, GenerationSummary, PortfolioEvolution,
};
use crate::evolution::problem::PortfolioProblem;
use crate::frontier::Frontier;
use crate::statistics::{
    latest_risk_free_rate, union_calendar, MarketStatistics, PriceSeries, StatisticsBuilder,
    StatisticsConfig,
};

/// Everything a run needs, as read from a run file.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RunInput {
    /// Trading calendar; the union of all observed dates when absent.
    ///
    /// Supply it for mixed universes (e.g. crypto next to equities): the union
    /// then contains weekend dates on which forward-filled equities record
    /// zero returns, which biases μ and Σ. A benchmark's trading days are the
    /// usual choice.
    #[serde(default)]
    pub calendar: Option<Vec<NaiveDate>>,
    /// Closing prices per asset.
    pub prices: BTreeMap<String, BTreeMap<NaiveDate, f64>>,
    /// Annualized decimal rate. Takes precedence over the series.
    #[serde(default)]
    pub risk_free_rate: Option<f64>,
    /// Annual rate observations in percent (10.5 for 10.5%).
    #[serde(default)]
    pub risk_free_rate_series: Option<BTreeMap<NaiveDate, f64>>,
    #[serde(default)]
    pub statistics: StatisticsConfig,
    #[serde(default)]
    pub evolution: EvolutionConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OptimizationReport {
    pub assets: Vec<String>,
    pub dropped_assets: Vec<String>,
    pub risk_free_rate: f64,
    pub observations: usize,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub generations: usize,
    pub seed: u64,
    pub frontier: Frontier,
    pub history: Vec<GenerationSummary>,
}

impl RunInput {
    /// The rate used for Sharpe ratios: the explicit rate, else the latest
    /// series value at `as_of`, else the fallback.
    pub fn resolve_risk_free_rate(&self, as_of: NaiveDate) -> Result<f64, PipelineError> {
        match (self.risk_free_rate, &self.risk_free_rate_series) {
            (Some(rate), _) if !rate.is_finite() => Err(PipelineError::InvalidInput(format!(
                "risk_free_rate must be finite, got {rate}"
            ))),
            (Some(rate), _) => Ok(rate),
            (None, Some(series)) => Ok(latest_risk_free_rate(
                series,
                as_of,
                FALLBACK_RISK_FREE_RATE,
            )),
            (None, None) => Ok(FALLBACK_RISK_FREE_RATE),
        }
    }
}

/// Runs the whole pipeline on a run file's content.
pub fn optimize(input: &RunInput) -> Result<OptimizationReport, PipelineError> {
    optimize_with_stop_flag(input, None)
}

pub fn optimize_with_stop_flag(
    input: &RunInput,
    stop_flag: Option<Arc<AtomicBool>>,
) -> Result<OptimizationReport, PipelineError> {
    let series: Vec<PriceSeries> = input
        .prices
        .iter()
        .map(|(asset, observations)| PriceSeries::new(asset.as_str(), observations.clone()))
        .collect();
    let calendar = match &input.calendar {
        Some(calendar) => calendar.clone(),
        None => union_calendar(&series),
    };

    let builder = StatisticsBuilder::new(input.statistics.clone())?;
    let statistics = builder.build(&calendar, &series)?;
    let risk_free_rate = input.resolve_risk_free_rate(statistics.last_date)?;
    info!(
        "Risk-free rate as of {}: {:.4}",
        statistics.last_date, risk_free_rate
    );

    optimize_statistics(&statistics, risk_free_rate, input.evolution.clone(), stop_flag)
}

/// Runs the problem, search and frontier stages on precomputed statistics.
pub fn optimize_statistics(
    statistics: &MarketStatistics,
    risk_free_rate: f64,
    config: EvolutionConfig,
    stop_flag: Option<Arc<AtomicBool>>,
) -> Result<OptimizationReport, PipelineError> {
    let problem = PortfolioProblem::new(statistics.mean.clone(), statistics.covariance.clone())?;
    info!("Problem model ready for {} assets", statistics.assets.len());

    let mut engine = PortfolioEvolution::new(problem, config)?;
    if let Some(stop_flag) = stop_flag {
        engine = engine.with_stop_flag(stop_flag);
    }
    let result = engine.run()?;

    let frontier =
        Frontier::from_individuals(&result.pareto_front, &statistics.assets, risk_free_rate)?;
    info!(
        "Frontier has {} portfolios, max Sharpe {:.4}",
        frontier.len(),
        frontier.max_sharpe.sharpe_ratio
    );

    Ok(OptimizationReport {
        assets: statistics.assets.clone(),
        dropped_assets: statistics.dropped_assets.clone(),
        risk_free_rate,
        observations: statistics.observations,
        first_date: statistics.first_date,
        last_date: statistics.last_date,
        generations: result.generations,
        seed: result.seed,
        frontier,
        history: result.history,
    })
}
