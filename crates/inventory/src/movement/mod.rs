//! Stock movements: the append-only journal of every stock change.

pub mod engine;

pub use engine::MovementEngine;

use crate::types::Money;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "movement_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Receipt,
    Issue,
    Transfer,
    Adjustment,
    Reservation,
    Release,
    Consumption,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "movement_direction", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MovementDirection {
    In,
    Out,
    Move,
    Adjust,
}

impl MovementType {
    pub fn direction(self) -> MovementDirection {
        match self {
            MovementType::Receipt => MovementDirection::In,
            MovementType::Issue | MovementType::Consumption => MovementDirection::Out,
            MovementType::Transfer => MovementDirection::Move,
            MovementType::Adjustment
            | MovementType::Reservation
            | MovementType::Release => MovementDirection::Adjust,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "movement_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MovementStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One journal entry. Immutable once `status` reaches `Completed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: Uuid,
    pub movement_number: String,
    pub movement_type: MovementType,
    pub direction: MovementDirection,
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub unit_cost: Option<Money>,
    pub from_location_id: Option<Uuid>,
    pub to_location_id: Option<Uuid>,
    pub batch_number: Option<String>,
    pub reason: String,
    pub status: MovementStatus,
    pub processed_by: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StockMovement {
    /// Movement numbers are generated, unique, and sortable by creation.
    pub fn generate_number(movement_type: MovementType) -> String {
        let prefix = match movement_type {
            MovementType::Receipt => "RCV",
            MovementType::Issue => "ISS",
            MovementType::Transfer => "TRF",
            MovementType::Adjustment => "ADJ",
            MovementType::Reservation => "RSV",
            MovementType::Release => "REL",
            MovementType::Consumption => "CNS",
        };
        let suffix = Uuid::new_v4().simple().to_string();
        format!("MV-{prefix}-{}-{}", Utc::now().format("%Y%m%d%H%M%S"), &suffix[..8])
    }
}

/// Details for the batch a receipt creates.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewBatch {
    #[validate(length(min = 1, max = 64))]
    pub batch_number: Option<String>,
    pub expiration_date: Option<NaiveDate>,
    pub manufacture_date: Option<NaiveDate>,
    pub supplier_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReceiveStockRequest {
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub unit_cost: Money,
    #[validate(nested)]
    pub batch: Option<NewBatch>,
    #[validate(length(min = 1, max = 255))]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IssueStockRequest {
    pub item_id: Uuid,
    pub quantity: Decimal,
    #[validate(length(min = 1, max = 255))]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TransferStockRequest {
    pub item_id: Uuid,
    pub quantity: Decimal,
    pub from_location_id: Uuid,
    pub to_location_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AdjustStockRequest {
    pub item_id: Uuid,
    /// Signed delta; negative writes stock off.
    pub delta: Decimal,
    #[validate(length(min = 1, max = 255))]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReserveStockRequest {
    pub item_id: Uuid,
    pub quantity: Decimal,
    #[validate(length(min = 1, max = 255))]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReleaseStockRequest {
    pub item_id: Uuid,
    pub quantity: Decimal,
    #[validate(length(min = 1, max = 255))]
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directions_match_types() {
        assert_eq!(MovementType::Receipt.direction(), MovementDirection::In);
        assert_eq!(MovementType::Issue.direction(), MovementDirection::Out);
        assert_eq!(MovementType::Consumption.direction(), MovementDirection::Out);
        assert_eq!(MovementType::Transfer.direction(), MovementDirection::Move);
        assert_eq!(MovementType::Adjustment.direction(), MovementDirection::Adjust);
    }

    #[test]
    fn movement_numbers_are_unique_and_prefixed() {
        let a = StockMovement::generate_number(MovementType::Receipt);
        let b = StockMovement::generate_number(MovementType::Receipt);
        assert!(a.starts_with("MV-RCV-"));
        assert_ne!(a, b);
    }
}
