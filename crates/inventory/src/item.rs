//! Inventory item aggregate and its batches.
//!
//! The item owns its batches; batch mutations only happen inside the
//! owning item's ledger transaction, so the item's optimistic version
//! check serializes them.

use crate::types::{ItemCategory, Money, UnitOfMeasure};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Days before expiration at which an item is flagged `Expiring`.
pub const EXPIRY_WARNING_DAYS: i64 = 7;

/// Tolerance for the `total_value == current * average_cost` invariant.
pub const VALUE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "item_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Active,
    LowStock,
    OutOfStock,
    Expiring,
    Expired,
    Discontinued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "quality_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QualityStatus {
    Pending,
    Approved,
    Rejected,
    Quarantine,
    Expired,
}

/// Environmental constraints for storing an item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageRequirements {
    pub temperature_min: Option<f64>,
    pub temperature_max: Option<f64>,
    pub humidity_min: Option<f64>,
    pub humidity_max: Option<f64>,
    pub requires_refrigeration: bool,
    pub requires_freezing: bool,
    pub special_handling: Option<String>,
}

/// Replenishment policy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reorder_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReorderMethod {
    Fixed,
    EconomicOrderQuantity,
    ForecastBased,
}

/// Per-item reorder rules. EOQ parameters live here rather than as global
/// constants so individual items can be tuned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReorderRules {
    pub enabled: bool,
    pub method: ReorderMethod,
    /// Cost of placing one order, in the item's currency.
    pub setup_cost: Decimal,
    /// Annual holding cost as a fraction of unit cost.
    pub holding_rate: f64,
}

impl Default for ReorderRules {
    fn default() -> Self {
        Self {
            enabled: true,
            method: ReorderMethod::Fixed,
            setup_cost: Decimal::from(50),
            holding_rate: 0.2,
        }
    }
}

/// A lot received in one receipt: single cost, single expiration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryBatch {
    pub id: Uuid,
    pub batch_number: String,
    pub quantity: Decimal,
    pub unit_cost: Money,
    pub expiration_date: Option<NaiveDate>,
    pub manufacture_date: Option<NaiveDate>,
    pub received_date: DateTime<Utc>,
    pub supplier_id: Option<Uuid>,
    pub quality: QualityStatus,
    pub is_active: bool,
}

impl InventoryBatch {
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiration_date.is_some_and(|d| d < today)
    }

    pub fn expires_within(&self, today: NaiveDate, days: i64) -> bool {
        self.expiration_date
            .is_some_and(|d| d >= today && (d - today).num_days() <= days)
    }
}

/// The inventory aggregate for one SKU at one location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub unit: UnitOfMeasure,
    pub category: ItemCategory,
    pub location_id: Uuid,

    pub current_stock: Decimal,
    pub reserved_stock: Decimal,
    pub available_stock: Decimal,

    pub minimum_stock: Decimal,
    pub maximum_stock: Decimal,
    pub reorder_point: Decimal,
    pub reorder_quantity: Decimal,
    pub safety_stock: Decimal,

    pub unit_cost: Money,
    pub last_cost: Money,
    pub average_cost: Money,
    pub total_value: Money,

    pub is_perishable: bool,
    pub shelf_life_days: Option<i32>,
    pub storage: StorageRequirements,

    pub batches: Vec<InventoryBatch>,
    pub reorder_rules: ReorderRules,
    pub status: ItemStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl InventoryItem {
    pub fn active_batches(&self) -> impl Iterator<Item = &InventoryBatch> {
        self.batches.iter().filter(|b| b.is_active)
    }

    /// Active batch quantities must sum to `current_stock`.
    pub fn batch_quantity_sum(&self) -> Decimal {
        self.active_batches().map(|b| b.quantity).sum()
    }

    /// Active batches in consumption order: ascending expiration date with
    /// `None` last, ties broken by received date.
    pub fn fifo_batch_ids(&self) -> Vec<Uuid> {
        let mut batches: Vec<&InventoryBatch> = self.active_batches().collect();
        batches.sort_by(|a, b| {
            match (a.expiration_date, b.expiration_date) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
            .then(a.received_date.cmp(&b.received_date))
        });
        batches.into_iter().map(|b| b.id).collect()
    }

    pub fn needs_reorder(&self) -> bool {
        self.reorder_rules.enabled && self.current_stock <= self.reorder_point
    }

    pub fn is_operational(&self) -> bool {
        self.status != ItemStatus::Discontinued
    }

    /// Recompute every derived field from the primary counters and batches.
    /// Called after each mutation, before the transaction commits.
    pub fn recompute_derived(&mut self, today: NaiveDate) {
        self.available_stock = self.current_stock - self.reserved_stock;

        // An emptied item keeps its last average for reporting.
        let active_quantity = self.batch_quantity_sum();
        if active_quantity > Decimal::ZERO {
            let active_value: Decimal =
                self.active_batches().map(|b| b.unit_cost.amount * b.quantity).sum();
            self.average_cost = Money::new(
                (active_value / active_quantity).round_dp_with_strategy(
                    crate::types::MONEY_SCALE,
                    RoundingStrategy::MidpointNearestEven,
                ),
                self.average_cost.currency.clone(),
            );
        }

        self.total_value = self.average_cost.times(self.current_stock).rounded();
        self.status = self.computed_status(today);
    }

    fn computed_status(&self, today: NaiveDate) -> ItemStatus {
        if self.status == ItemStatus::Discontinued {
            return ItemStatus::Discontinued;
        }
        if self.current_stock.is_zero() {
            return ItemStatus::OutOfStock;
        }
        let active: Vec<&InventoryBatch> = self.active_batches().collect();
        if !active.is_empty() && active.iter().all(|b| b.is_expired(today)) {
            return ItemStatus::Expired;
        }
        if self.current_stock <= self.minimum_stock {
            return ItemStatus::LowStock;
        }
        if active.iter().any(|b| b.expires_within(today, EXPIRY_WARNING_DAYS)) {
            return ItemStatus::Expiring;
        }
        ItemStatus::Active
    }

    /// Bump audit fields for a committed mutation.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }

    /// Check the universal invariants. Returns the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.current_stock < Decimal::ZERO {
            return Err(format!("current_stock negative: {}", self.current_stock));
        }
        if self.reserved_stock < Decimal::ZERO {
            return Err(format!("reserved_stock negative: {}", self.reserved_stock));
        }
        if self.reserved_stock > self.current_stock {
            return Err(format!(
                "reserved {} exceeds current {}",
                self.reserved_stock, self.current_stock
            ));
        }
        if self.available_stock != self.current_stock - self.reserved_stock {
            return Err(format!(
                "available {} != current {} - reserved {}",
                self.available_stock, self.current_stock, self.reserved_stock
            ));
        }
        if !self.batches.is_empty() && self.batch_quantity_sum() != self.current_stock {
            return Err(format!(
                "active batch sum {} != current {}",
                self.batch_quantity_sum(),
                self.current_stock
            ));
        }
        if self.is_perishable && self.batches.iter().any(|b| b.expiration_date.is_none()) {
            return Err("perishable item has a batch without expiration".to_string());
        }
        let expected_value = self.average_cost.times(self.current_stock).rounded().amount;
        if (self.total_value.amount - expected_value).abs() > VALUE_TOLERANCE {
            return Err(format!(
                "total_value {} != current * average_cost {}",
                self.total_value.amount, expected_value
            ));
        }
        Ok(())
    }
}
