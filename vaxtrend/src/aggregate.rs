//! Aggregation of cleaned records into calendar-month buckets.
//!
//! Rows without a valid vaccination date are excluded. Months with no
//! records produce no bucket at all (the series has gaps, never zeros); the
//! ordinal index is assigned after sorting so the regression feature stays
//! contiguous regardless.

use anyhow::{bail, Result};
use itertools::izip;
use polars::prelude::*;

use crate::clean::{has_column, parsed_date_expr};
use crate::COL;

/// Aggregate count of records for one calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthlyBucket {
    pub year: i32,
    pub month: u32,
    pub total: u32,
    /// Zero-based position in the chronologically sorted series.
    pub ordinal: usize,
}

/// A single vaccination site's own monthly series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationSeries {
    pub location: String,
    pub buckets: Vec<MonthlyBucket>,
}

/// Count of records sharing one value of a categorical column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryCount {
    pub value: String,
    pub total: u32,
}

fn dated_frame(df: &DataFrame) -> Result<LazyFrame> {
    let date_expr = parsed_date_expr(df)?;
    Ok(df
        .clone()
        .lazy()
        .with_column(date_expr.alias(COL::DATA_VACINACAO))
        .filter(col(COL::DATA_VACINACAO).is_not_null())
        .with_columns([
            col(COL::DATA_VACINACAO)
                .dt()
                .year()
                .cast(DataType::Int32)
                .alias(COL::ANO),
            col(COL::DATA_VACINACAO)
                .dt()
                .month()
                .cast(DataType::Int32)
                .alias(COL::MES),
        ]))
}

/// Group cleaned records by calendar month, sorted ascending with a
/// contiguous zero-based ordinal.
pub fn monthly_series(df: &DataFrame) -> Result<Vec<MonthlyBucket>> {
    let grouped = dated_frame(df)?
        .group_by([col(COL::ANO), col(COL::MES)])
        .agg([len().alias(COL::TOTAL)])
        .collect()?
        .sort([COL::ANO, COL::MES], SortMultipleOptions::default())?;

    let years = grouped.column(COL::ANO)?.i32()?;
    let months = grouped.column(COL::MES)?.i32()?;
    let totals = grouped.column(COL::TOTAL)?.u32()?;
    let buckets = izip!(
        years.into_no_null_iter(),
        months.into_no_null_iter(),
        totals.into_no_null_iter()
    )
    .enumerate()
    .map(|(ordinal, (year, month, total))| MonthlyBucket {
        year,
        month: month as u32,
        total,
        ordinal,
    })
    .collect();
    Ok(buckets)
}

/// Per-site monthly sub-series, each with its own zero-based ordinals.
/// Sites are returned in alphabetical order for reproducible output.
pub fn location_monthly_series(df: &DataFrame) -> Result<Vec<LocationSeries>> {
    if !has_column(df, COL::LOCAL_VACINACAO) {
        bail!("column '{}' not found in the registry", COL::LOCAL_VACINACAO);
    }
    let grouped = dated_frame(df)?
        .filter(col(COL::LOCAL_VACINACAO).is_not_null())
        .group_by([col(COL::LOCAL_VACINACAO), col(COL::ANO), col(COL::MES)])
        .agg([len().alias(COL::TOTAL)])
        .collect()?
        .sort(
            [COL::LOCAL_VACINACAO, COL::ANO, COL::MES],
            SortMultipleOptions::default(),
        )?;

    let locations = grouped.column(COL::LOCAL_VACINACAO)?.str()?;
    let years = grouped.column(COL::ANO)?.i32()?;
    let months = grouped.column(COL::MES)?.i32()?;
    let totals = grouped.column(COL::TOTAL)?.u32()?;

    let mut series: Vec<LocationSeries> = Vec::new();
    for (location, year, month, total) in izip!(
        locations.into_no_null_iter(),
        years.into_no_null_iter(),
        months.into_no_null_iter(),
        totals.into_no_null_iter()
    ) {
        // Rows arrive sorted by location, so a change of name starts a new
        // sub-series.
        if series.last().map(|s| s.location.as_str()) != Some(location) {
            series.push(LocationSeries {
                location: location.to_string(),
                buckets: Vec::new(),
            });
        }
        let current = series.last_mut().expect("pushed above");
        let ordinal = current.buckets.len();
        current.buckets.push(MonthlyBucket {
            year,
            month: month as u32,
            total,
            ordinal,
        });
    }
    Ok(series)
}

/// Count records per distinct value of `column`, most frequent first.
/// Ties are broken alphabetically so repeated runs agree.
pub fn category_counts(df: &DataFrame, column: &str) -> Result<Vec<CategoryCount>> {
    if !has_column(df, column) {
        bail!("column '{column}' not found in the registry");
    }
    let grouped = df
        .clone()
        .lazy()
        .filter(col(column).is_not_null())
        .group_by([col(column)])
        .agg([len().alias(COL::TOTAL)])
        .collect()?
        .sort([column], SortMultipleOptions::default())?
        .sort(
            [COL::TOTAL],
            SortMultipleOptions::default()
                .with_order_descending(true)
                .with_maintain_order(true),
        )?;

    let values = grouped.column(column)?.cast(&DataType::String)?;
    let values = values.str()?;
    let totals = grouped.column(COL::TOTAL)?.u32()?;
    Ok(
        izip!(values.into_no_null_iter(), totals.into_no_null_iter())
            .map(|(value, total)| CategoryCount {
                value: value.to_string(),
                total,
            })
            .collect(),
    )
}

/// The `n` most frequent values of `column`.
pub fn top_categories(df: &DataFrame, column: &str, n: usize) -> Result<Vec<CategoryCount>> {
    let mut counts = category_counts(df, column)?;
    counts.truncate(n);
    Ok(counts)
}
