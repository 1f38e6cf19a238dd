//! Demand forecasting: consumption patterns, forecasts and stockout
//! predictions derived from movement history.

pub mod engine;

pub use engine::{DemandForecaster, DemandPredictor};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Daily-bucketed consumption series. Missing days are zero.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySeries {
    pub start: NaiveDate,
    pub values: Vec<f64>,
}

impl DailySeries {
    /// Bucket `(date, quantity)` samples into one value per day across
    /// `[start, end]`, summing same-day samples.
    pub fn bucket(start: NaiveDate, end: NaiveDate, samples: &[(NaiveDate, f64)]) -> Self {
        let days = (end - start).num_days().max(0) as usize + 1;
        let mut values = vec![0.0; days];
        for (date, quantity) in samples {
            if *date < start || *date > end {
                continue;
            }
            let index = (*date - start).num_days() as usize;
            values[index] += quantity;
        }
        Self { start, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn date_at(&self, index: usize) -> NaiveDate {
        self.start + chrono::Duration::days(index as i64)
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Sample standard deviation.
    pub fn std_dev(&self) -> f64 {
        if self.values.len() < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
            / (self.values.len() - 1) as f64;
        variance.sqrt()
    }

    /// Least-squares slope of consumption per day.
    pub fn slope(&self) -> f64 {
        let n = self.values.len();
        if n < 2 {
            return 0.0;
        }
        let n_f = n as f64;
        let x_mean = (n_f - 1.0) / 2.0;
        let y_mean = self.mean();
        let mut num = 0.0;
        let mut den = 0.0;
        for (i, y) in self.values.iter().enumerate() {
            let dx = i as f64 - x_mean;
            num += dx * (y - y_mean);
            den += dx * dx;
        }
        if den == 0.0 {
            0.0
        } else {
            num / den
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// Historical consumption profile for one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumptionPattern {
    pub item_id: Uuid,
    pub window_days: u32,
    pub average_daily: f64,
    pub average_weekly: f64,
    pub average_monthly: f64,
    /// Sample standard deviation of daily consumption.
    pub volatility: f64,
    /// Monday-first mean ratio per weekday relative to the overall mean.
    pub weekday_factors: [f64; 7],
    /// January-first mean ratio per month relative to the overall mean.
    pub monthly_factors: [f64; 12],
    pub trend: TrendDirection,
    /// Days whose consumption exceeded mean + 3 sigma.
    pub outliers: Vec<(NaiveDate, f64)>,
}

impl ConsumptionPattern {
    /// Derive the pattern from a daily series.
    pub fn from_series(item_id: Uuid, series: &DailySeries) -> Self {
        let mean = series.mean();
        let volatility = series.std_dev();

        let mut weekday_sums = [0.0; 7];
        let mut weekday_counts = [0u32; 7];
        let mut month_sums = [0.0; 12];
        let mut month_counts = [0u32; 12];
        let mut outliers = Vec::new();
        let outlier_threshold = mean + 3.0 * volatility;

        for (i, &value) in series.values.iter().enumerate() {
            let date = series.date_at(i);
            let weekday = date.weekday().num_days_from_monday() as usize;
            weekday_sums[weekday] += value;
            weekday_counts[weekday] += 1;
            let month = date.month0() as usize;
            month_sums[month] += value;
            month_counts[month] += 1;
            if volatility > 0.0 && value > outlier_threshold {
                outliers.push((date, value));
            }
        }

        let factor = |sum: f64, count: u32| -> f64 {
            if count == 0 || mean == 0.0 {
                1.0
            } else {
                (sum / count as f64) / mean
            }
        };
        let mut weekday_factors = [1.0; 7];
        for i in 0..7 {
            weekday_factors[i] = factor(weekday_sums[i], weekday_counts[i]);
        }
        let mut monthly_factors = [1.0; 12];
        for i in 0..12 {
            monthly_factors[i] = factor(month_sums[i], month_counts[i]);
        }

        Self {
            item_id,
            window_days: series.len() as u32,
            average_daily: mean,
            average_weekly: mean * 7.0,
            average_monthly: mean * 30.0,
            volatility,
            weekday_factors,
            monthly_factors,
            trend: trend_direction(&series.values),
            outliers,
        }
    }
}

/// Compare first- and second-half means; a ±10% difference moves the
/// direction off `Stable`.
fn trend_direction(values: &[f64]) -> TrendDirection {
    if values.len() < 2 {
        return TrendDirection::Stable;
    }
    let mid = values.len() / 2;
    let first = values[..mid].iter().sum::<f64>() / mid.max(1) as f64;
    let second = values[mid..].iter().sum::<f64>() / (values.len() - mid) as f64;
    if first == 0.0 {
        return if second > 0.0 { TrendDirection::Increasing } else { TrendDirection::Stable };
    }
    let ratio = second / first;
    if ratio > 1.1 {
        TrendDirection::Increasing
    } else if ratio < 0.9 {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    }
}

/// One forecast step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemandForecast {
    pub item_id: Uuid,
    pub horizon_days: u32,
    pub total_demand: f64,
    /// Confidence level of the interval, e.g. 0.95.
    pub confidence_level: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub points: Vec<ForecastPoint>,
    pub weekday_factors: [f64; 7],
    pub trend_slope: f64,
    /// Relative half-window mean shift, clamped to [-1, 1].
    pub trend_strength: f64,
    pub algorithm: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockoutPrediction {
    pub item_id: Uuid,
    /// 0..=100.
    pub probability: f64,
    pub predicted_date: Option<NaiveDate>,
    pub days_until_stockout: Option<i64>,
    pub recommended_action: String,
    pub urgency: UrgencyLevel,
}
