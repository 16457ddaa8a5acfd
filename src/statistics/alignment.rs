use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::StatisticsError;

/// Raw price history of a single asset, as handed over by the data collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub asset: String,
    pub observations: BTreeMap<NaiveDate, f64>,
}

impl PriceSeries {
    pub fn new(asset: impl Into<String>, observations: BTreeMap<NaiveDate, f64>) -> Self {
        PriceSeries {
            asset: asset.into(),
            observations,
        }
    }

    /// Last valid price observed at or before `date`.
    fn price_as_of(&self, date: NaiveDate) -> Option<f64> {
        self.observations
            .range(..=date)
            .rev()
            .map(|(_, &price)| price)
            .find(|&price| is_valid_price(price))
    }
}

/// Price table keyed by trading date, one column per asset.
///
/// `columns[j][t]` is the price of `assets[j]` on `dates[t]`; `None` marks a
/// missing value.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    pub dates: Vec<NaiveDate>,
    pub assets: Vec<String>,
    pub columns: Vec<Vec<Option<f64>>>,
}

impl PriceTable {
    pub fn number_of_assets(&self) -> usize {
        self.assets.len()
    }

    pub fn number_of_dates(&self) -> usize {
        self.dates.len()
    }

    /// True when no value is missing anywhere in the table.
    pub fn is_complete(&self) -> bool {
        self.columns
            .iter()
            .all(|column| column.iter().all(|price| price.is_some()))
    }

    fn validate_shape(&self) -> Result<(), StatisticsError> {
        if self.columns.len() != self.assets.len() {
            return Err(StatisticsError::MalformedTable(format!(
                "{} asset names but {} price columns",
                self.assets.len(),
                self.columns.len()
            )));
        }
        if let Some((asset, column)) = self
            .assets
            .iter()
            .zip(self.columns.iter())
            .find(|(_, column)| column.len() != self.dates.len())
        {
            return Err(StatisticsError::MalformedTable(format!(
                "column `{}` has {} prices for {} dates",
                asset,
                column.len(),
                self.dates.len()
            )));
        }
        if self.dates.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(StatisticsError::MalformedTable(
                "dates must be strictly increasing".into(),
            ));
        }
        Ok(())
    }
}

/// A table where every remaining asset has a price on every remaining date.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedPrices {
    pub table: PriceTable,
    /// Assets removed because they had no valid price at all.
    pub dropped_assets: Vec<String>,
}

fn is_valid_price(price: f64) -> bool {
    price.is_finite() && price > 0.0
}

/// Reindexes every series onto `calendar` by forward fill.
///
/// The calendar is sorted and deduplicated first. Assets that never have a
/// valid price on the calendar are dropped (and logged), then the leading rows
/// where some asset has not started trading yet are removed.
pub fn align_to_calendar(
    calendar: &[NaiveDate],
    series: &[PriceSeries],
) -> Result<AlignedPrices, StatisticsError> {
    let mut dates = calendar.to_vec();
    dates.sort_unstable();
    dates.dedup();
    if dates.is_empty() {
        return Err(StatisticsError::InvalidCalendar);
    }

    let mut seen = HashSet::new();
    for price_series in series {
        if !seen.insert(price_series.asset.as_str()) {
            return Err(StatisticsError::DuplicateAsset(price_series.asset.clone()));
        }
    }

    let columns = series
        .iter()
        .map(|price_series| {
            dates
                .iter()
                .map(|&date| price_series.price_as_of(date))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let table = PriceTable {
        dates,
        assets: series.iter().map(|s| s.asset.clone()).collect(),
        columns,
    };
    compact(table)
}

/// Union of every observation date across `series`, used when no master
/// calendar was supplied.
pub fn union_calendar(series: &[PriceSeries]) -> Vec<NaiveDate> {
    let mut dates = series
        .iter()
        .flat_map(|s| s.observations.keys().copied())
        .collect::<Vec<_>>();
    dates.sort_unstable();
    dates.dedup();
    dates
}

/// Brings an already calendar-aligned table into the "no missing values" shape.
///
/// Interior gaps are forward filled, all-missing assets are dropped, and the
/// leading incomplete rows are trimmed.
pub fn compact(mut table: PriceTable) -> Result<AlignedPrices, StatisticsError> {
    table.validate_shape()?;
    if table.dates.is_empty() {
        return Err(StatisticsError::InvalidCalendar);
    }

    // Forward fill, treating invalid prices as missing
    for column in table.columns.iter_mut() {
        let mut last_valid: Option<f64> = None;
        for price in column.iter_mut() {
            match *price {
                Some(value) if is_valid_price(value) => last_valid = Some(value),
                _ => *price = last_valid,
            }
        }
    }

    // Drop the assets that never traded
    let mut dropped_assets = Vec::new();
    let mut kept_assets = Vec::new();
    let mut kept_columns = Vec::new();
    for (asset, column) in table.assets.into_iter().zip(table.columns) {
        if column.iter().all(Option::is_none) {
            warn!("{}", StatisticsError::AssetDropped { asset: asset.clone() });
            dropped_assets.push(asset);
        } else {
            kept_assets.push(asset);
            kept_columns.push(column);
        }
    }
    if kept_assets.is_empty() {
        return Err(StatisticsError::NoAssets);
    }

    // Once a forward-filled column has a value it keeps one, so the first
    // complete row marks where the overlap starts.
    let first_complete_row = (0..table.dates.len())
        .find(|&row| kept_columns.iter().all(|column| column[row].is_some()))
        .ok_or(StatisticsError::InsufficientData {
            observations: 0,
            required: 1,
        })?;
    if first_complete_row > 0 {
        debug!(
            "Dropping {} leading row(s) before every asset has a price",
            first_complete_row
        );
    }

    let dates = table.dates.split_off(first_complete_row);
    let columns = kept_columns
        .into_iter()
        .map(|mut column| column.split_off(first_complete_row))
        .collect();

    Ok(AlignedPrices {
        table: PriceTable {
            dates,
            assets: kept_assets,
            columns,
        },
        dropped_assets,
    })
}
