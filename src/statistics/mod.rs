//! Turns aligned price histories into the annualized inputs of the
//! mean-variance model: the mean vector μ and the covariance matrix Σ.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use thiserror::Error;
use tracing::{info, warn};

use crate::consts::{MINIMUM_RETURN_OBSERVATIONS, TRADING_DAYS_PER_YEAR};

pub mod alignment;

pub use alignment::{
    align_to_calendar, compact, union_calendar, AlignedPrices, PriceSeries, PriceTable,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatisticsError {
    #[error(
        "insufficient data: {observations} overlapping observation(s), at least {required} needed"
    )]
    InsufficientData { observations: usize, required: usize },
    /// Non-fatal, the asset is excluded from the universe.
    #[error("asset `{asset}` has no valid price data and was dropped")]
    AssetDropped { asset: String },
    #[error("no asset has usable price data")]
    NoAssets,
    #[error("the trading calendar is empty")]
    InvalidCalendar,
    #[error("asset `{0}` appears more than once")]
    DuplicateAsset(String),
    #[error("malformed price table: {0}")]
    MalformedTable(String),
    #[error("invalid statistics configuration: {0}")]
    BadConfiguration(String),
}

fn default_trading_days_per_year() -> f64 {
    TRADING_DAYS_PER_YEAR
}

fn default_minimum_observations() -> usize {
    MINIMUM_RETURN_OBSERVATIONS
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatisticsConfig {
    /// Annualization factor applied to the daily mean and covariance.
    #[serde(default = "default_trading_days_per_year")]
    pub trading_days_per_year: f64,
    /// Minimum number of daily returns required; never below 2.
    #[serde(default = "default_minimum_observations")]
    pub minimum_observations: usize,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        StatisticsConfig {
            trading_days_per_year: default_trading_days_per_year(),
            minimum_observations: default_minimum_observations(),
        }
    }
}

/// Daily fractional returns, rows = trading dates, columns = assets.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnSeries {
    /// Date at which each return was realized (the later date of each pair).
    pub dates: Vec<NaiveDate>,
    pub assets: Vec<String>,
    pub returns: DMatrix<f64>,
}

impl ReturnSeries {
    pub fn number_of_observations(&self) -> usize {
        self.returns.nrows()
    }
}

/// The annualized inputs of the optimization, in asset order.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketStatistics {
    pub assets: Vec<String>,
    pub mean: DVector<f64>,
    pub covariance: DMatrix<f64>,
    /// Number of daily returns behind the estimates.
    pub observations: usize,
    pub first_date: NaiveDate,
    pub last_date: NaiveDate,
    pub dropped_assets: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StatisticsBuilder {
    config: StatisticsConfig,
}

impl StatisticsBuilder {
    pub fn new(config: StatisticsConfig) -> Result<Self, StatisticsError> {
        if !(config.trading_days_per_year.is_finite() && config.trading_days_per_year > 0.0) {
            return Err(StatisticsError::BadConfiguration(format!(
                "trading_days_per_year must be positive, got {}",
                config.trading_days_per_year
            )));
        }
        Ok(StatisticsBuilder { config })
    }

    pub fn config(&self) -> &StatisticsConfig {
        &self.config
    }

    /// Aligns raw series onto `calendar` and computes the annualized statistics.
    pub fn build(
        &self,
        calendar: &[NaiveDate],
        series: &[PriceSeries],
    ) -> Result<MarketStatistics, StatisticsError> {
        let aligned = align_to_calendar(calendar, series)?;
        self.from_aligned(aligned)
    }

    /// Same as [`StatisticsBuilder::build`] for a table that is already keyed
    /// on the trading calendar.
    pub fn from_price_table(&self, table: PriceTable) -> Result<MarketStatistics, StatisticsError> {
        let aligned = compact(table)?;
        self.from_aligned(aligned)
    }

    fn from_aligned(&self, aligned: AlignedPrices) -> Result<MarketStatistics, StatisticsError> {
        let returns = self.daily_returns(&aligned.table)?;
        let (mean, covariance) = self.annualize(&returns)?;

        // annualize already guarantees at least one row
        let first_date = returns.dates[0];
        let last_date = returns.dates[returns.dates.len() - 1];

        info!(
            "Statistics ready for {} asset(s) over {} return(s), {} to {} ({} dropped)",
            returns.assets.len(),
            returns.number_of_observations(),
            first_date,
            last_date,
            aligned.dropped_assets.len()
        );

        Ok(MarketStatistics {
            assets: returns.assets,
            mean,
            covariance,
            observations: returns.returns.nrows(),
            first_date,
            last_date,
            dropped_assets: aligned.dropped_assets,
        })
    }

    /// Simple daily returns `p_t / p_{t-1} - 1`. The table must be complete.
    pub fn daily_returns(&self, table: &PriceTable) -> Result<ReturnSeries, StatisticsError> {
        if !table.is_complete() {
            return Err(StatisticsError::MalformedTable(
                "missing prices remain after alignment".into(),
            ));
        }
        let observations = table.number_of_dates().saturating_sub(1);
        let number_of_assets = table.number_of_assets();

        let returns = DMatrix::from_fn(observations, number_of_assets, |row, asset| {
            let column = &table.columns[asset];
            // completeness was checked above
            let previous = column[row].unwrap_or(f64::NAN);
            let current = column[row + 1].unwrap_or(f64::NAN);
            current / previous - 1.0
        });

        Ok(ReturnSeries {
            dates: table.dates.iter().skip(1).copied().collect(),
            assets: table.assets.clone(),
            returns,
        })
    }

    /// μ = mean × D and Σ = sample covariance × D.
    pub fn annualize(
        &self,
        returns: &ReturnSeries,
    ) -> Result<(DVector<f64>, DMatrix<f64>), StatisticsError> {
        let required = self.config.minimum_observations.max(MINIMUM_RETURN_OBSERVATIONS);
        let observations = returns.number_of_observations();
        if observations < required {
            return Err(StatisticsError::InsufficientData {
                observations,
                required,
            });
        }

        let factor = self.config.trading_days_per_year;
        let columns: Vec<Vec<f64>> = returns
            .returns
            .column_iter()
            .map(|column| column.iter().copied().collect())
            .collect();
        let number_of_assets = columns.len();

        let mean = DVector::from_iterator(
            number_of_assets,
            columns.iter().map(|column| column.iter().mean() * factor),
        );

        // Only the upper triangle is computed so Σ is exactly symmetric
        let mut covariance = DMatrix::zeros(number_of_assets, number_of_assets);
        for i in 0..number_of_assets {
            for j in i..number_of_assets {
                let value = columns[i].iter().covariance(columns[j].iter()) * factor;
                covariance[(i, j)] = value;
                covariance[(j, i)] = value;
            }
        }

        Ok((mean, covariance))
    }
}

/// Latest annual risk-free rate at or before `as_of`, converted from percent
/// (10.5) to decimal (0.105).
///
/// Falls back to `fallback` (already a decimal) when the series has nothing to
/// offer, as the rate collaborator is allowed to fail.
pub fn latest_risk_free_rate(
    rates_in_percent: &BTreeMap<NaiveDate, f64>,
    as_of: NaiveDate,
    fallback: f64,
) -> f64 {
    match rates_in_percent
        .range(..=as_of)
        .rev()
        .map(|(_, &rate)| rate)
        .find(|rate| rate.is_finite())
    {
        Some(rate) => rate / 100.0,
        None => {
            warn!(
                "No risk-free rate observed up to {}, using fallback of {:.4}",
                as_of, fallback
            );
            fallback
        }
    }
}
