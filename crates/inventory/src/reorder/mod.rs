//! Reorder decisions: recommendation models, urgency scoring and the
//! purchase-order synthesis engine.

pub mod engine;
pub mod order;

pub use engine::ReorderEngine;
pub use order::{OrderLine, OrderPriority, OrderStatus, PurchaseOrder};

use crate::item::{InventoryItem, ReorderMethod};
use crate::types::ItemCategory;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReorderPriority {
    Low,
    Medium,
    High,
    Critical,
}

/// One supplier candidate for a recommendation, in ranking order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedSupplier {
    pub supplier_id: Uuid,
    pub supplier_name: String,
    pub is_preferred: bool,
    pub reliability: f64,
    pub rating: f64,
    pub unit_price: Decimal,
    pub total_cost: Decimal,
    pub lead_time_days: u32,
    pub minimum_order_quantity: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorderRecommendation {
    pub item_id: Uuid,
    pub sku: String,
    pub name: String,
    pub location_id: Uuid,
    pub category: ItemCategory,
    pub current_stock: Decimal,
    pub available_stock: Decimal,
    pub reorder_point: Decimal,
    pub recommended_quantity: Decimal,
    pub method: ReorderMethod,
    /// 0..=100.
    pub urgency_score: u32,
    pub priority: ReorderPriority,
    /// Ranked best-first; empty when no active supplier carries the SKU.
    pub suppliers: Vec<RankedSupplier>,
    /// Cost of the recommended quantity at the top-ranked supplier.
    pub estimated_cost: Decimal,
}

impl ReorderRecommendation {
    pub fn top_supplier(&self) -> Option<&RankedSupplier> {
        self.suppliers.first()
    }
}

/// Caller-supplied filters applied after recommendations are computed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReorderCriteria {
    pub max_order_value: Option<Decimal>,
    pub min_urgency: Option<u32>,
    /// Allow-list; when set, only these suppliers are considered.
    pub preferred_suppliers: Option<Vec<Uuid>>,
    pub max_lead_time_days: Option<u32>,
    pub min_quality_rating: Option<f64>,
    /// Allow-list; when set, only these categories are considered.
    pub categories: Option<Vec<ItemCategory>>,
    pub excluded_items: Vec<Uuid>,
}

/// Urgency: a stock-ratio band plus a velocity bonus, clamped to 100.
/// Out-of-stock items are always 100.
pub fn urgency_score(item: &InventoryItem, average_daily: f64) -> u32 {
    if item.current_stock.is_zero() {
        return 100;
    }
    let current = item.current_stock.to_f64().unwrap_or(0.0);

    let base = if average_daily > 0.0 {
        let ratio = current / (average_daily * 30.0);
        if ratio < 0.1 {
            90
        } else if ratio < 0.3 {
            70
        } else if ratio < 0.5 {
            50
        } else {
            30
        }
    } else {
        30
    };

    let bonus = if average_daily > 0.0 {
        let days_of_stock = current / average_daily;
        if days_of_stock < 7.0 {
            20
        } else if days_of_stock < 14.0 {
            10
        } else {
            0
        }
    } else {
        0
    };

    (base + bonus).min(100)
}

/// Priority band from the urgency score and stock position.
pub fn priority_for(item: &InventoryItem, urgency: u32) -> ReorderPriority {
    if urgency >= 90 || item.current_stock.is_zero() {
        ReorderPriority::Critical
    } else if urgency >= 70 || item.current_stock <= item.minimum_stock {
        ReorderPriority::High
    } else if urgency >= 50 {
        ReorderPriority::Medium
    } else {
        ReorderPriority::Low
    }
}

/// Economic order quantity: `sqrt(2 * D * S / H)` with
/// `H = unit_cost * holding_rate`. Returns `None` when a parameter makes
/// the formula meaningless (zero demand, zero unit cost).
pub fn economic_order_quantity(
    annual_demand: f64,
    setup_cost: Decimal,
    holding_rate: f64,
    unit_cost: Decimal,
) -> Option<Decimal> {
    let setup = setup_cost.to_f64()?;
    let cost = unit_cost.to_f64()?;
    if annual_demand <= 0.0 || setup <= 0.0 || holding_rate <= 0.0 || cost <= 0.0 {
        return None;
    }
    let holding = cost * holding_rate;
    let eoq = ((2.0 * annual_demand * setup) / holding).sqrt();
    Decimal::from_f64_retain(eoq.ceil())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ItemStatus, ReorderRules, StorageRequirements};
    use crate::types::{Money, UnitOfMeasure};
    use chrono::Utc;

    fn item(current: i64, minimum: i64) -> InventoryItem {
        let now = Utc::now();
        InventoryItem {
            id: Uuid::new_v4(),
            sku: "SYR-VAN-001".to_string(),
            name: "Vanilla syrup".to_string(),
            unit: UnitOfMeasure::Liter,
            category: ItemCategory::Syrup,
            location_id: Uuid::new_v4(),
            current_stock: Decimal::from(current),
            reserved_stock: Decimal::ZERO,
            available_stock: Decimal::from(current),
            minimum_stock: Decimal::from(minimum),
            maximum_stock: Decimal::from(100),
            reorder_point: Decimal::from(30),
            reorder_quantity: Decimal::from(50),
            safety_stock: Decimal::from(5),
            unit_cost: Money::usd(Decimal::ONE),
            last_cost: Money::usd(Decimal::ONE),
            average_cost: Money::usd(Decimal::ONE),
            total_value: Money::usd(Decimal::from(current)),
            is_perishable: false,
            shelf_life_days: None,
            storage: StorageRequirements::default(),
            batches: Vec::new(),
            reorder_rules: ReorderRules::default(),
            status: ItemStatus::Active,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    #[test]
    fn eoq_matches_the_classic_formula() {
        // sqrt((2 * 3650 * 50) / (0.2 * 1.00)) = sqrt(1,825,000) ~= 1350.9
        let eoq = economic_order_quantity(3650.0, Decimal::from(50), 0.2, Decimal::ONE).unwrap();
        assert_eq!(eoq, Decimal::from(1351));
    }

    #[test]
    fn eoq_rejects_degenerate_parameters() {
        assert!(economic_order_quantity(0.0, Decimal::from(50), 0.2, Decimal::ONE).is_none());
        assert!(economic_order_quantity(3650.0, Decimal::from(50), 0.2, Decimal::ZERO).is_none());
    }

    #[test]
    fn urgency_is_maximal_when_out_of_stock() {
        assert_eq!(urgency_score(&item(0, 10), 5.0), 100);
    }

    #[test]
    fn urgency_bands_follow_stock_ratio() {
        // 2 units at 1/day: ratio 2/30 < 0.1 -> 90, days 2 < 7 -> +20, clamped.
        assert_eq!(urgency_score(&item(2, 10), 1.0), 100);
        // 25 units at 2/day: ratio 25/60 ~ 0.42 -> 50, days 12.5 -> +10.
        assert_eq!(urgency_score(&item(25, 10), 2.0), 60);
        // 50 units at 1/day: ratio 50/30 > 0.5 -> 30, days 50 -> +0.
        assert_eq!(urgency_score(&item(50, 10), 1.0), 30);
        // No consumption history.
        assert_eq!(urgency_score(&item(50, 10), 0.0), 30);
    }

    #[test]
    fn priority_bands() {
        assert_eq!(priority_for(&item(0, 10), 100), ReorderPriority::Critical);
        assert_eq!(priority_for(&item(5, 10), 75), ReorderPriority::High);
        // At or below minimum forces at least High.
        assert_eq!(priority_for(&item(10, 10), 40), ReorderPriority::High);
        assert_eq!(priority_for(&item(25, 10), 55), ReorderPriority::Medium);
        assert_eq!(priority_for(&item(40, 10), 30), ReorderPriority::Low);
    }
}
