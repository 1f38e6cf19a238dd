//! Typed commands accepted by the engine. Validation rules live beside the
//! command definitions and run before any ledger work.

use crate::item::{ItemStatus, ReorderRules, StorageRequirements};
use crate::reorder::ReorderCriteria;
use crate::types::{ItemCategory, Money, UnitOfMeasure};
use roastline_core::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

pub use crate::movement::{
    AdjustStockRequest, IssueStockRequest, ReceiveStockRequest, ReleaseStockRequest,
    ReserveStockRequest, TransferStockRequest,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateInventoryItemCommand {
    #[validate(length(min = 1, max = 64))]
    pub sku: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub unit: UnitOfMeasure,
    pub category: ItemCategory,
    pub location_id: Uuid,

    pub minimum_stock: Decimal,
    pub maximum_stock: Decimal,
    pub reorder_point: Decimal,
    pub reorder_quantity: Decimal,
    pub safety_stock: Decimal,

    pub unit_cost: Money,
    pub is_perishable: bool,
    #[validate(range(min = 1, max = 3650))]
    pub shelf_life_days: Option<i32>,
    pub storage: StorageRequirements,
    pub reorder_rules: Option<ReorderRules>,
}

impl CreateInventoryItemCommand {
    /// Structural checks the derive cannot express.
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(|e| Error::invalid_input(e.to_string()))?;
        for (label, value) in [
            ("minimum_stock", self.minimum_stock),
            ("maximum_stock", self.maximum_stock),
            ("reorder_point", self.reorder_point),
            ("reorder_quantity", self.reorder_quantity),
            ("safety_stock", self.safety_stock),
        ] {
            if value < Decimal::ZERO {
                return Err(Error::invalid_input(format!("{label} cannot be negative")));
            }
        }
        if self.maximum_stock < self.minimum_stock {
            return Err(Error::invalid_input("maximum_stock cannot be below minimum_stock"));
        }
        if self.unit_cost.amount < Decimal::ZERO {
            return Err(Error::invalid_input("unit_cost cannot be negative"));
        }
        if self.is_perishable && self.shelf_life_days.is_none() {
            return Err(Error::invalid_input("perishable items require shelf_life_days"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateInventoryItemCommand {
    pub item_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub minimum_stock: Option<Decimal>,
    pub maximum_stock: Option<Decimal>,
    pub reorder_point: Option<Decimal>,
    pub reorder_quantity: Option<Decimal>,
    pub safety_stock: Option<Decimal>,
    pub unit_cost: Option<Money>,
    pub storage: Option<StorageRequirements>,
    pub reorder_rules: Option<ReorderRules>,
    /// Only `Discontinued` may be set directly; stock-driven statuses are
    /// derived.
    pub status: Option<ItemStatus>,
}

impl UpdateInventoryItemCommand {
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(|e| Error::invalid_input(e.to_string()))?;
        for value in [
            self.minimum_stock,
            self.maximum_stock,
            self.reorder_point,
            self.reorder_quantity,
            self.safety_stock,
        ]
        .into_iter()
        .flatten()
        {
            if value < Decimal::ZERO {
                return Err(Error::invalid_input("stock parameters cannot be negative"));
            }
        }
        if let Some(status) = self.status {
            if status != ItemStatus::Discontinued {
                return Err(Error::invalid_input(
                    "only the discontinued status can be set directly",
                ));
            }
        }
        Ok(())
    }
}

/// One line of a bulk stock correction.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BulkStockAdjustment {
    pub item_id: Uuid,
    pub delta: Decimal,
    #[validate(length(min = 1, max = 255))]
    pub reason: String,
}

/// Applies each adjustment in its own transaction and reports per-line
/// outcomes; one bad line does not abort the rest.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BulkUpdateStockCommand {
    #[validate(length(min = 1, max = 500), nested)]
    pub adjustments: Vec<BulkStockAdjustment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessAutomaticReordersCommand {
    pub location_id: Option<Uuid>,
    pub criteria: ReorderCriteria,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_command() -> CreateInventoryItemCommand {
        CreateInventoryItemCommand {
            sku: "BEAN-COL-002".to_string(),
            name: "Colombia Supremo".to_string(),
            unit: UnitOfMeasure::Kilogram,
            category: ItemCategory::CoffeeBeans,
            location_id: Uuid::new_v4(),
            minimum_stock: Decimal::from(20),
            maximum_stock: Decimal::from(500),
            reorder_point: Decimal::from(30),
            reorder_quantity: Decimal::from(50),
            safety_stock: Decimal::from(10),
            unit_cost: Money::usd(Decimal::new(1200, 2)),
            is_perishable: true,
            shelf_life_days: Some(240),
            storage: StorageRequirements::default(),
            reorder_rules: None,
        }
    }

    #[test]
    fn valid_command_passes() {
        assert!(create_command().check().is_ok());
    }

    #[test]
    fn empty_sku_is_rejected() {
        let mut cmd = create_command();
        cmd.sku = String::new();
        assert!(cmd.check().is_err());
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let mut cmd = create_command();
        cmd.maximum_stock = Decimal::from(10);
        assert!(cmd.check().is_err());
    }

    #[test]
    fn perishable_requires_shelf_life() {
        let mut cmd = create_command();
        cmd.shelf_life_days = None;
        assert!(cmd.check().is_err());
    }

    #[test]
    fn update_rejects_direct_stock_statuses() {
        let cmd = UpdateInventoryItemCommand {
            item_id: Uuid::new_v4(),
            name: None,
            minimum_stock: None,
            maximum_stock: None,
            reorder_point: None,
            reorder_quantity: None,
            safety_stock: None,
            unit_cost: None,
            storage: None,
            reorder_rules: None,
            status: Some(ItemStatus::OutOfStock),
        };
        assert!(cmd.check().is_err());

        let discontinue = UpdateInventoryItemCommand {
            status: Some(ItemStatus::Discontinued),
            ..cmd
        };
        assert!(discontinue.check().is_ok());
    }
}
