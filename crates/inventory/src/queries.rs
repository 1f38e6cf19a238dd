//! Query surface: typed read requests with pagination defaults and their
//! result shapes.

use crate::item::ItemStatus;
use crate::ledger::{ItemFilter, MovementFilter};
use crate::reorder::ReorderCriteria;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;
use validator::Validate;

pub use crate::ledger::ItemSortKey;
pub use crate::types::{Page, Paginated};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListInventoryItemsQuery {
    pub filter: ItemFilter,
    pub page: Page,
    pub sort: ItemSortKey,
}

/// Movements are sorted newest-first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetStockMovementsQuery {
    pub filter: MovementFilter,
    pub page: Page,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GetDemandForecastQuery {
    pub item_id: Uuid,
    #[validate(range(min = 1, max = 365))]
    pub horizon_days: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetReorderRecommendationsQuery {
    pub location_id: Option<Uuid>,
    pub criteria: ReorderCriteria,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetInventoryOverviewQuery {
    pub location_id: Option<Uuid>,
}

/// Aggregate stock position, optionally scoped to one location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryOverview {
    pub location_id: Option<Uuid>,
    pub total_items: u64,
    pub counts_by_status: HashMap<ItemStatus, u64>,
    pub items_needing_reorder: u64,
    /// Total stock valuation per currency.
    pub total_value: HashMap<String, Decimal>,
    /// Items with the highest outbound quantity in the recent window,
    /// `(sku, quantity)` pairs, best first.
    pub top_movers: Vec<(String, Decimal)>,
}
