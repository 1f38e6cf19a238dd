//! Supplier master data: identity, catalog and delivery performance.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "supplier_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SupplierStatus {
    Active,
    Inactive,
    Pending,
    Suspended,
    Terminated,
}

/// Delivery and quality track record, updated as orders complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierPerformance {
    /// Fraction of orders delivered by the promised date, 0..=1.
    pub on_time_delivery_rate: f64,
    /// Fraction of received units rejected at quality control, 0..=1.
    pub quality_reject_rate: f64,
    /// Fraction of ordered quantity actually delivered, 0..=1.
    pub order_fulfillment_rate: f64,
    pub total_orders: u32,
    pub last_order_date: Option<DateTime<Utc>>,
}

impl Default for SupplierPerformance {
    fn default() -> Self {
        Self {
            on_time_delivery_rate: 1.0,
            quality_reject_rate: 0.0,
            order_fulfillment_rate: 1.0,
            total_orders: 0,
            last_order_date: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub status: SupplierStatus,
    /// 0..=5 overall rating.
    pub rating: f64,
    pub is_preferred: bool,
    pub payment_terms: String,
    pub delivery_terms: String,
    pub currency: String,
    pub performance: SupplierPerformance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Supplier {
    pub fn is_active(&self) -> bool {
        self.status == SupplierStatus::Active
    }

    /// Composite reliability used for ranking:
    /// `0.4·on_time + 0.3·(1 − reject) + 0.2·fulfillment + 0.1·(rating/5)`.
    pub fn reliability_score(&self) -> f64 {
        let p = &self.performance;
        0.4 * p.on_time_delivery_rate
            + 0.3 * (1.0 - p.quality_reject_rate)
            + 0.2 * p.order_fulfillment_rate
            + 0.1 * (self.rating / 5.0)
    }

    /// Fold one completed order into the running rates.
    pub fn record_delivery(&mut self, on_time: bool, fulfillment: f64, delivered_at: DateTime<Utc>) {
        let p = &mut self.performance;
        let n = p.total_orders as f64;
        p.on_time_delivery_rate =
            (p.on_time_delivery_rate * n + if on_time { 1.0 } else { 0.0 }) / (n + 1.0);
        p.order_fulfillment_rate =
            (p.order_fulfillment_rate * n + fulfillment.clamp(0.0, 1.0)) / (n + 1.0);
        p.total_orders += 1;
        p.last_order_date = Some(delivered_at);
    }
}

/// A quantity-break price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTier {
    pub min_quantity: Decimal,
    pub unit_price: Decimal,
}

/// One catalog entry: a SKU a supplier carries, with MOQ, lead time and
/// tiered pricing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierProduct {
    pub id: Uuid,
    pub supplier_id: Uuid,
    pub sku: String,
    pub minimum_order_quantity: Decimal,
    pub lead_time_days: u32,
    /// Sorted ascending by `min_quantity`; the first tier starts at zero.
    pub price_tiers: Vec<PriceTier>,
}

impl SupplierProduct {
    /// Unit price applicable at `quantity`: the tier with the largest
    /// `min_quantity` not exceeding it.
    pub fn unit_price_at(&self, quantity: Decimal) -> Option<Decimal> {
        self.price_tiers
            .iter()
            .filter(|t| t.min_quantity <= quantity)
            .max_by_key(|t| t.min_quantity)
            .map(|t| t.unit_price)
    }

    pub fn total_cost_at(&self, quantity: Decimal) -> Option<Decimal> {
        self.unit_price_at(quantity).map(|p| p * quantity)
    }
}
