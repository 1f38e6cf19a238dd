//! Forecast engine: series preparation, delegation to the external
//! predictor, and post-processing with seasonal and trend factors.

use super::{
    ConsumptionPattern, DailySeries, DemandForecast, ForecastPoint, StockoutPrediction,
    UrgencyLevel,
};
use crate::item::InventoryItem;
use crate::ledger::{LedgerStore, MovementFilter};
use crate::movement::MovementDirection;
use crate::types::Page;
use async_trait::async_trait;
use chrono::{Datelike, Duration, Utc};
use roastline_core::{OpContext, ResilienceManager, Result};
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

pub const DEFAULT_LOOKBACK_DAYS: i64 = 365;
const CONFIDENCE_LEVEL: f64 = 0.95;
const Z_95: f64 = 1.96;
/// Widening applied to the confidence interval when the external predictor
/// is unavailable and the moving-average fallback is used.
const FALLBACK_WIDENING: f64 = 2.0;

/// External prediction capability (the ML boundary). Given the historical
/// daily series, returns one predicted value per horizon day.
#[async_trait]
pub trait DemandPredictor: Send + Sync {
    fn name(&self) -> &str;
    async fn predict(
        &self,
        ctx: &OpContext,
        history: &[f64],
        horizon_days: u32,
    ) -> Result<Vec<f64>>;
}

pub struct DemandForecaster {
    ledger: Arc<dyn LedgerStore>,
    resilience: Arc<ResilienceManager>,
    predictor: Option<Arc<dyn DemandPredictor>>,
    lookback_days: i64,
}

impl DemandForecaster {
    pub fn new(ledger: Arc<dyn LedgerStore>, resilience: Arc<ResilienceManager>) -> Self {
        Self { ledger, resilience, predictor: None, lookback_days: DEFAULT_LOOKBACK_DAYS }
    }

    pub fn with_predictor(mut self, predictor: Arc<dyn DemandPredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    pub fn with_lookback(mut self, days: i64) -> Self {
        self.lookback_days = days.max(1);
        self
    }

    /// Daily outbound consumption over the lookback window.
    async fn outbound_series(&self, ctx: &OpContext, item_id: Uuid) -> Result<DailySeries> {
        ctx.check("forecast.series")?;
        let end = Utc::now().date_naive();
        let start = end - Duration::days(self.lookback_days - 1);
        let from = start
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(Utc::now);

        let filter = MovementFilter {
            item_id: Some(item_id),
            direction: Some(MovementDirection::Out),
            from_date: Some(from),
            ..Default::default()
        };

        let mut samples = Vec::new();
        let mut page_number = 1u32;
        loop {
            let page = Page { page: Some(page_number), size: Some(1000) };
            let batch = self.ledger.list_movements(&filter, &page).await?;
            let fetched = batch.data.len();
            for movement in batch.data {
                let quantity = movement.quantity.abs().to_f64().unwrap_or(0.0);
                samples.push((movement.created_at.date_naive(), quantity));
            }
            if fetched < 1000 {
                break;
            }
            page_number += 1;
        }
        debug!(item_id = %item_id, samples = samples.len(), "built outbound series");
        Ok(DailySeries::bucket(start, end, &samples))
    }

    #[instrument(skip(self, ctx))]
    pub async fn consumption_pattern(
        &self,
        ctx: &OpContext,
        item_id: Uuid,
    ) -> Result<ConsumptionPattern> {
        let series = self.outbound_series(ctx, item_id).await?;
        Ok(ConsumptionPattern::from_series(item_id, &series))
    }

    /// Forecast demand over `horizon_days`. Delegates to the external
    /// predictor under the `ai_provider` policy; when unavailable, falls
    /// back to `average_daily * horizon` with a widened interval.
    #[instrument(skip(self, ctx))]
    pub async fn forecast(
        &self,
        ctx: &OpContext,
        item_id: Uuid,
        horizon_days: u32,
    ) -> Result<DemandForecast> {
        let series = self.outbound_series(ctx, item_id).await?;
        let pattern = ConsumptionPattern::from_series(item_id, &series);

        let (base, algorithm, widening) = match self.base_prediction(ctx, &series, horizon_days).await
        {
            Some((base, name)) => (base, name, 1.0),
            None => (
                vec![pattern.average_daily; horizon_days as usize],
                "moving_average_fallback".to_string(),
                FALLBACK_WIDENING,
            ),
        };

        let today = Utc::now().date_naive();
        let margin = Z_95 * pattern.volatility * widening;
        let mut points = Vec::with_capacity(horizon_days as usize);
        let mut total = 0.0;
        for (i, base_value) in base.iter().enumerate() {
            let date = today + Duration::days(i as i64 + 1);
            let weekday = pattern.weekday_factors[date.weekday().num_days_from_monday() as usize];
            let month = pattern.monthly_factors[date.month0() as usize];
            let value = (base_value * weekday * month).max(0.0);
            total += value;
            points.push(ForecastPoint {
                date,
                value,
                lower: (value - margin).max(0.0),
                upper: value + margin,
            });
        }

        let horizon_margin = Z_95 * pattern.volatility * (horizon_days as f64).sqrt() * widening;
        Ok(DemandForecast {
            item_id,
            horizon_days,
            total_demand: total,
            confidence_level: CONFIDENCE_LEVEL,
            lower_bound: (total - horizon_margin).max(0.0),
            upper_bound: total + horizon_margin,
            points,
            weekday_factors: pattern.weekday_factors,
            trend_slope: series.slope(),
            trend_strength: half_window_shift(&series.values),
            algorithm,
        })
    }

    async fn base_prediction(
        &self,
        ctx: &OpContext,
        series: &DailySeries,
        horizon_days: u32,
    ) -> Option<(Vec<f64>, String)> {
        let predictor = self.predictor.as_ref()?;
        let result = self
            .resilience
            .execute("ai_provider", ctx, "forecast.predict", || {
                predictor.predict(ctx, &series.values, horizon_days)
            })
            .await;
        match result {
            Ok(base) if base.len() == horizon_days as usize => {
                Some((base, predictor.name().to_string()))
            }
            Ok(base) => {
                warn!(
                    expected = horizon_days,
                    got = base.len(),
                    "predictor returned wrong horizon, falling back"
                );
                None
            }
            Err(err) => {
                warn!(error = %err, "external predictor unavailable, falling back");
                None
            }
        }
    }

    /// Stockout probability and date from current stock and the item's
    /// consumption pattern.
    #[instrument(skip(self, ctx, item), fields(item_id = %item.id))]
    pub async fn predict_stockout(
        &self,
        ctx: &OpContext,
        item: &InventoryItem,
    ) -> Result<StockoutPrediction> {
        let pattern = self.consumption_pattern(ctx, item.id).await?;
        let current = item.current_stock.to_f64().unwrap_or(0.0);

        if pattern.average_daily <= 0.0 {
            return Ok(StockoutPrediction {
                item_id: item.id,
                probability: 0.0,
                predicted_date: None,
                days_until_stockout: None,
                recommended_action: "monitor".to_string(),
                urgency: UrgencyLevel::Low,
            });
        }

        let days_until = (current / pattern.average_daily).floor() as i64;
        let stock_ratio = current / (pattern.average_daily * 30.0);
        let (urgency, base_probability) = if stock_ratio < 0.1 {
            (UrgencyLevel::Critical, 95.0)
        } else if stock_ratio < 0.3 {
            (UrgencyLevel::High, 75.0)
        } else if stock_ratio < 0.5 {
            (UrgencyLevel::Medium, 50.0)
        } else {
            (UrgencyLevel::Low, 25.0)
        };
        let probability =
            (base_probability + (pattern.volatility / pattern.average_daily) * 20.0).min(100.0);

        let recommended_action = match urgency {
            UrgencyLevel::Critical => "reorder immediately",
            UrgencyLevel::High => "expedite replenishment",
            UrgencyLevel::Medium => "schedule reorder",
            UrgencyLevel::Low => "monitor",
        };

        Ok(StockoutPrediction {
            item_id: item.id,
            probability,
            predicted_date: Some(Utc::now().date_naive() + Duration::days(days_until)),
            days_until_stockout: Some(days_until),
            recommended_action: recommended_action.to_string(),
            urgency,
        })
    }
}

/// Relative second-half versus first-half mean shift, clamped to [-1, 1].
fn half_window_shift(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mid = values.len() / 2;
    let first = values[..mid].iter().sum::<f64>() / mid.max(1) as f64;
    let second = values[mid..].iter().sum::<f64>() / (values.len() - mid) as f64;
    if first == 0.0 {
        if second > 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        ((second - first) / first).clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_window_shift_is_clamped() {
        assert_eq!(half_window_shift(&[1.0, 1.0, 10.0, 10.0]), 1.0);
        assert!((half_window_shift(&[10.0, 10.0, 5.0, 5.0]) + 0.5).abs() < 1e-9);
        assert_eq!(half_window_shift(&[0.0, 0.0, 3.0, 3.0]), 1.0);
        assert_eq!(half_window_shift(&[]), 0.0);
    }
}
