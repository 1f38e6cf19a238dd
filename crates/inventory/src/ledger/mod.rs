//! Ledger store: persistence and transactional scope for every aggregate.
//!
//! Reads go through [`LedgerStore`]; multi-row writes go through a
//! [`LedgerTransaction`] obtained from `begin`. Transactions observe a
//! consistent snapshot, commit atomically, and roll back entirely when
//! dropped without commit. Writes use optimistic concurrency: the caller
//! bumps the aggregate version before writing and the store rejects the
//! write with `VersionConflict` unless the stored version is exactly one
//! behind.

pub mod memory;
pub mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PostgresLedger;

use crate::item::{InventoryItem, ItemStatus};
use crate::location::Location;
use crate::movement::{MovementDirection, MovementType, StockMovement};
use crate::reorder::order::{OrderStatus, PurchaseOrder};
use crate::supplier::{Supplier, SupplierProduct};
use crate::types::{ItemCategory, Page, Paginated};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roastline_core::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Listing filter for inventory items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemFilter {
    pub location_id: Option<Uuid>,
    pub status: Option<ItemStatus>,
    pub category: Option<ItemCategory>,
    pub sku: Option<String>,
}

/// Sort keys for item listings; default is `Sku`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemSortKey {
    #[default]
    Sku,
    Name,
    CurrentStock,
    TotalValue,
    UpdatedAt,
}

/// Listing filter for stock movements; range-scannable by item, direction
/// and date.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MovementFilter {
    pub item_id: Option<Uuid>,
    pub movement_type: Option<MovementType>,
    pub direction: Option<MovementDirection>,
    pub from_date: Option<DateTime<Utc>>,
    pub to_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderFilter {
    pub supplier_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
}

/// A supplier able to deliver a SKU, paired with its catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierOffer {
    pub supplier: Supplier,
    pub product: SupplierProduct,
}

/// Read-side plus transaction entry point.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>>;

    // Items
    async fn item(&self, id: Uuid) -> Result<Option<InventoryItem>>;
    async fn item_by_sku(&self, sku: &str, location_id: Uuid) -> Result<Option<InventoryItem>>;
    async fn list_items(
        &self,
        filter: &ItemFilter,
        sort: ItemSortKey,
        page: &Page,
    ) -> Result<Paginated<InventoryItem>>;
    async fn low_stock_items(&self, location_id: Option<Uuid>) -> Result<Vec<InventoryItem>>;
    async fn out_of_stock_items(&self, location_id: Option<Uuid>) -> Result<Vec<InventoryItem>>;
    async fn items_needing_reorder(&self, location_id: Option<Uuid>) -> Result<Vec<InventoryItem>>;
    /// Items with an active batch expiring within `within_days` of today.
    async fn expiring_items(
        &self,
        within_days: i64,
        location_id: Option<Uuid>,
    ) -> Result<Vec<InventoryItem>>;

    // Movements
    async fn list_movements(
        &self,
        filter: &MovementFilter,
        page: &Page,
    ) -> Result<Paginated<StockMovement>>;

    // Suppliers
    async fn supplier(&self, id: Uuid) -> Result<Option<Supplier>>;
    /// Active suppliers carrying the SKU, with lead time and tiered price.
    async fn suppliers_for_sku(&self, sku: &str) -> Result<Vec<SupplierOffer>>;

    // Purchase orders
    async fn purchase_order(&self, id: Uuid) -> Result<Option<PurchaseOrder>>;
    async fn list_purchase_orders(
        &self,
        filter: &OrderFilter,
        page: &Page,
    ) -> Result<Paginated<PurchaseOrder>>;

    // Locations
    async fn location(&self, id: Uuid) -> Result<Option<Location>>;
    async fn list_locations(&self) -> Result<Vec<Location>>;
}

/// Transaction-bound repository view. Dropping without `commit` rolls back.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Load an item and lock it against concurrent writers for the duration
    /// of the transaction.
    async fn item_for_update(&mut self, id: Uuid) -> Result<InventoryItem>;
    async fn item_by_sku_for_update(
        &mut self,
        sku: &str,
        location_id: Uuid,
    ) -> Result<Option<InventoryItem>>;
    async fn insert_item(&mut self, item: &InventoryItem) -> Result<()>;
    /// Persist an item whose `version` was already bumped by the caller.
    /// Fails with `VersionConflict` unless the stored version is exactly
    /// `item.version - 1`.
    async fn update_item(&mut self, item: &InventoryItem) -> Result<()>;

    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<()>;

    async fn insert_purchase_order(&mut self, order: &PurchaseOrder) -> Result<()>;
    async fn purchase_order_for_update(&mut self, id: Uuid) -> Result<PurchaseOrder>;
    /// Same version discipline as [`Self::update_item`].
    async fn update_purchase_order(&mut self, order: &PurchaseOrder) -> Result<()>;

    async fn insert_supplier(&mut self, supplier: &Supplier) -> Result<()>;
    async fn supplier_for_update(&mut self, id: Uuid) -> Result<Supplier>;
    async fn update_supplier(&mut self, supplier: &Supplier) -> Result<()>;
    async fn insert_supplier_product(&mut self, product: &SupplierProduct) -> Result<()>;

    async fn insert_location(&mut self, location: &Location) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}
