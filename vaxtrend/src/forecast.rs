//! Trend fitting and projection over monthly buckets.
//!
//! The dashboard path fits an ordinary least-squares line on the ordinal
//! time index; the alternate strategy reuses the random-forest pipeline from
//! [`crate::model`]. Both project the months immediately after the latest
//! observed one. Projections are raw extrapolations: negative values are not
//! clamped, so a collapsing trend stays visible.

use anyhow::{anyhow, bail, Result};
use chrono::{Datelike, Months, NaiveDate};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::aggregate::{self, MonthlyBucket};
use crate::model::{self, TrainedPipeline};
use crate::COL;

/// Months projected by the dashboard path.
pub const DEFAULT_HORIZON: usize = 3;

/// Which fitting procedure backs the projection.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, EnumString, Display, PartialEq, Eq)]
#[strum(ascii_case_insensitive)]
pub enum TrendStrategy {
    Linear,
    Forest,
}

/// A future calendar month paired with its predicted total.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub year: i32,
    pub month: u32,
    pub predicted: f64,
}

impl ForecastPoint {
    /// Short month label, e.g. "Mar 2021".
    pub fn label(&self) -> String {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .map(|date| date.format("%b %Y").to_string())
            .unwrap_or_default()
    }
}

/// Per-priority-group apportionment of the aggregate forecast.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupForecast {
    pub group: String,
    pub historical_total: u32,
    pub projected: f64,
}

/// One projected month for one vaccination site.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationForecast {
    pub location: String,
    pub year: i32,
    pub month: u32,
    pub predicted: f64,
}

impl LocationForecast {
    pub fn label(&self) -> String {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .map(|date| date.format("%b %Y").to_string())
            .unwrap_or_default()
    }
}

/// Ordinary least-squares fit of count on the ordinal time index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearTrend {
    pub intercept: f64,
    pub slope: f64,
}

impl LinearTrend {
    pub fn fit(points: &[(f64, f64)]) -> Result<Self> {
        if points.len() < 2 {
            bail!(
                "at least 2 observations are required to fit a trend (got {})",
                points.len()
            );
        }
        let n = points.len() as f64;
        let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
        let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
        let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
        if sxx == 0.0 {
            bail!("cannot fit a trend: no variation in the time index");
        }
        let sxy: f64 = points
            .iter()
            .map(|(x, y)| (x - mean_x) * (y - mean_y))
            .sum();
        let slope = sxy / sxx;
        Ok(Self {
            intercept: mean_y - slope * mean_x,
            slope,
        })
    }

    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

fn bucket_points(buckets: &[MonthlyBucket]) -> Vec<(f64, f64)> {
    buckets
        .iter()
        .map(|bucket| (bucket.ordinal as f64, bucket.total as f64))
        .collect()
}

/// The `horizon` calendar months following (`year`, `month`).
fn next_months(year: i32, month: u32, horizon: usize) -> Result<Vec<(i32, u32)>> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| anyhow!("invalid calendar month {year}-{month}"))?;
    (1..=horizon)
        .map(|step| {
            let date = start
                .checked_add_months(Months::new(step as u32))
                .ok_or_else(|| anyhow!("calendar overflow projecting {step} months ahead"))?;
            Ok((date.year(), date.month()))
        })
        .collect()
}

/// Project the aggregate series `horizon` months past its latest bucket with
/// a linear trend on the ordinal index.
pub fn forecast_linear(buckets: &[MonthlyBucket], horizon: usize) -> Result<Vec<ForecastPoint>> {
    let Some(latest) = buckets.last() else {
        bail!("no monthly buckets to forecast from");
    };
    let trend = LinearTrend::fit(&bucket_points(buckets))?;
    let months = next_months(latest.year, latest.month, horizon)?;
    Ok(months
        .into_iter()
        .enumerate()
        .map(|(step, (year, month))| ForecastPoint {
            year,
            month,
            predicted: trend.predict((buckets.len() + step) as f64),
        })
        .collect())
}

/// Project with a freshly fitted scaler + forest pipeline over all buckets.
pub fn forecast_forest(buckets: &[MonthlyBucket], horizon: usize) -> Result<Vec<ForecastPoint>> {
    let Some(latest) = buckets.last() else {
        bail!("no monthly buckets to forecast from");
    };
    let features: Vec<Vec<f64>> = buckets.iter().map(model::bucket_features).collect();
    let targets: Vec<f64> = buckets.iter().map(|bucket| bucket.total as f64).collect();
    let pipeline = TrainedPipeline::fit(&features, &targets, model::DEFAULT_SEED)?;

    let months = next_months(latest.year, latest.month, horizon)?;
    let future: Vec<Vec<f64>> = months
        .iter()
        .enumerate()
        .map(|(step, (year, month))| {
            vec![
                (buckets.len() + step) as f64,
                *year as f64,
                *month as f64,
            ]
        })
        .collect();
    let predictions = pipeline.predict(&future);
    Ok(months
        .into_iter()
        .zip(predictions)
        .map(|((year, month), predicted)| ForecastPoint {
            year,
            month,
            predicted,
        })
        .collect())
}

/// Project the aggregate series with the chosen strategy.
pub fn forecast_monthly(
    buckets: &[MonthlyBucket],
    horizon: usize,
    strategy: TrendStrategy,
) -> Result<Vec<ForecastPoint>> {
    match strategy {
        TrendStrategy::Linear => forecast_linear(buckets, horizon),
        TrendStrategy::Forest => forecast_forest(buckets, horizon),
    }
}

/// Apportion the final aggregate forecast value across priority groups by
/// each group's historical share of all cleaned rows. Shares are assumed to
/// hold constant into the forecast window.
pub fn forecast_by_group(df: &DataFrame, points: &[ForecastPoint]) -> Result<Vec<GroupForecast>> {
    let Some(last) = points.last() else {
        bail!("no aggregate forecast to apportion");
    };
    let rows = df.height();
    if rows == 0 {
        bail!("no records to derive group shares from");
    }
    let counts = aggregate::category_counts(df, COL::GRUPO)?;
    Ok(counts
        .into_iter()
        .map(|count| GroupForecast {
            projected: count.total as f64 / rows as f64 * last.predicted,
            group: count.value,
            historical_total: count.total,
        })
        .collect())
}

/// Fit an independent linear trend per vaccination site and project
/// `horizon` months ahead. Sites with fewer than 2 monthly observations are
/// skipped. Future month labels come from the registry-wide latest date, so
/// every site is projected over the same window.
pub fn forecast_by_location(df: &DataFrame, horizon: usize) -> Result<Vec<LocationForecast>> {
    let overall = aggregate::monthly_series(df)?;
    let Some(latest) = overall.last() else {
        bail!("no dated records to forecast from");
    };
    let months = next_months(latest.year, latest.month, horizon)?;

    let mut forecasts = Vec::new();
    for series in aggregate::location_monthly_series(df)? {
        if series.buckets.len() < 2 {
            continue;
        }
        let trend = LinearTrend::fit(&bucket_points(&series.buckets))?;
        for (step, (year, month)) in months.iter().enumerate() {
            forecasts.push(LocationForecast {
                location: series.location.clone(),
                year: *year,
                month: *month,
                predicted: trend.predict((series.buckets.len() + step) as f64),
            });
        }
    }
    Ok(forecasts)
}

#[cfg(test)]
mod tests {
    use polars::df;

    use super::*;

    fn two_month_series() -> Vec<MonthlyBucket> {
        vec![
            MonthlyBucket {
                year: 2021,
                month: 1,
                total: 2,
                ordinal: 0,
            },
            MonthlyBucket {
                year: 2021,
                month: 2,
                total: 1,
                ordinal: 1,
            },
        ]
    }

    #[test]
    fn test_linear_fit() {
        let trend = LinearTrend::fit(&[(0.0, 2.0), (1.0, 1.0)]).unwrap();
        assert!((trend.slope - -1.0).abs() < 1e-12);
        assert!((trend.intercept - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_linear_fit_needs_two_points() {
        assert!(LinearTrend::fit(&[(0.0, 2.0)]).is_err());
    }

    #[test]
    fn test_decreasing_projection_is_not_clamped() {
        let points = forecast_linear(&two_month_series(), DEFAULT_HORIZON).unwrap();
        let months: Vec<(i32, u32)> = points.iter().map(|p| (p.year, p.month)).collect();
        assert_eq!(months, vec![(2021, 3), (2021, 4), (2021, 5)]);
        let predicted: Vec<f64> = points.iter().map(|p| p.predicted).collect();
        assert!((predicted[0] - 0.0).abs() < 1e-12);
        assert!((predicted[1] - -1.0).abs() < 1e-12);
        assert!((predicted[2] - -2.0).abs() < 1e-12);
    }

    #[test]
    fn test_projection_crosses_year_boundary() {
        let buckets = vec![
            MonthlyBucket {
                year: 2021,
                month: 11,
                total: 5,
                ordinal: 0,
            },
            MonthlyBucket {
                year: 2021,
                month: 12,
                total: 7,
                ordinal: 1,
            },
        ];
        let points = forecast_linear(&buckets, 3).unwrap();
        let months: Vec<(i32, u32)> = points.iter().map(|p| (p.year, p.month)).collect();
        assert_eq!(months, vec![(2022, 1), (2022, 2), (2022, 3)]);
    }

    #[test]
    fn test_forecast_is_deterministic() {
        let first = forecast_linear(&two_month_series(), 3).unwrap();
        let second = forecast_linear(&two_month_series(), 3).unwrap();
        assert_eq!(first, second);

        let first = forecast_forest(&two_month_series(), 3).unwrap();
        let second = forecast_forest(&two_month_series(), 3).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_strategy_parses_case_insensitively() {
        use std::str::FromStr;
        assert_eq!(
            TrendStrategy::from_str("linear").unwrap(),
            TrendStrategy::Linear
        );
        assert_eq!(
            TrendStrategy::from_str("FOREST").unwrap(),
            TrendStrategy::Forest
        );
        assert!(TrendStrategy::from_str("prophet").is_err());
    }

    #[test]
    fn test_group_apportionment() {
        let df = df!(
            COL::ID => &[1i64, 2, 3, 4],
            COL::GRUPO => &["IDOSO", "IDOSO", "IDOSO", "SAUDE"],
            COL::DATA_VACINACAO => &["2021-01-01", "2021-01-02", "2021-02-01", "2021-02-02"],
        )
        .unwrap();
        let points = vec![ForecastPoint {
            year: 2021,
            month: 5,
            predicted: 100.0,
        }];
        let groups = forecast_by_group(&df, &points).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].group, "IDOSO");
        assert!((groups[0].projected - 75.0).abs() < 1e-12);
        assert_eq!(groups[0].historical_total, 3);
        assert!((groups[1].projected - 25.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_month_location_is_skipped() {
        let df = df!(
            COL::ID => &[1i64, 2, 3, 4],
            COL::LOCAL_VACINACAO => &["USF 1", "USF 1", "USF 1", "USF 2"],
            COL::DATA_VACINACAO => &["2021-01-15", "2021-01-20", "2021-02-01", "2021-02-10"],
        )
        .unwrap();
        let forecasts = forecast_by_location(&df, 3).unwrap();
        // USF 2 has one observed month and produces no forecast at all.
        assert!(forecasts.iter().all(|f| f.location == "USF 1"));
        assert_eq!(forecasts.len(), 3);
        // The window starts after the registry-wide latest month.
        assert_eq!((forecasts[0].year, forecasts[0].month), (2021, 3));
    }

    #[test]
    fn test_forecast_point_label() {
        let point = ForecastPoint {
            year: 2021,
            month: 3,
            predicted: 1.0,
        };
        assert_eq!(point.label(), "Mar 2021");
    }
}
