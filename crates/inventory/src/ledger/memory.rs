//! In-memory ledger used by tests and embedded deployments.
//!
//! A transaction takes the state lock for its whole lifetime and works on a
//! staged copy, so commits are atomic and a dropped transaction leaves no
//! residue. Version checks behave exactly like the Postgres implementation.

use super::{
    ItemFilter, ItemSortKey, LedgerStore, LedgerTransaction, MovementFilter, OrderFilter,
    SupplierOffer,
};
use crate::item::InventoryItem;
use crate::location::Location;
use crate::movement::StockMovement;
use crate::reorder::order::PurchaseOrder;
use crate::supplier::{Supplier, SupplierProduct};
use crate::types::{Page, Paginated};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use roastline_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct LedgerState {
    items: HashMap<Uuid, InventoryItem>,
    movements: Vec<StockMovement>,
    orders: HashMap<Uuid, PurchaseOrder>,
    suppliers: HashMap<Uuid, Supplier>,
    supplier_products: Vec<SupplierProduct>,
    locations: HashMap<Uuid, Location>,
}

#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<LedgerState>,
    staged: LedgerState,
}

impl MemoryTransaction {
    fn check_version(stored: i64, incoming: i64, resource: String) -> Result<()> {
        if stored != incoming - 1 {
            return Err(Error::version_conflict(resource, stored, incoming - 1));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerTransaction for MemoryTransaction {
    async fn item_for_update(&mut self, id: Uuid) -> Result<InventoryItem> {
        self.staged
            .items
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("inventory item {id}")))
    }

    async fn item_by_sku_for_update(
        &mut self,
        sku: &str,
        location_id: Uuid,
    ) -> Result<Option<InventoryItem>> {
        Ok(self
            .staged
            .items
            .values()
            .find(|i| i.sku == sku && i.location_id == location_id)
            .cloned())
    }

    async fn insert_item(&mut self, item: &InventoryItem) -> Result<()> {
        if self.staged.items.contains_key(&item.id) {
            return Err(Error::new(
                roastline_core::ErrorKind::AlreadyExists,
                format!("inventory item {} already exists", item.id),
            ));
        }
        if self
            .staged
            .items
            .values()
            .any(|i| i.sku == item.sku && i.location_id == item.location_id)
        {
            return Err(Error::new(
                roastline_core::ErrorKind::AlreadyExists,
                format!("sku {} already exists at location {}", item.sku, item.location_id),
            ));
        }
        self.staged.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn update_item(&mut self, item: &InventoryItem) -> Result<()> {
        let stored = self
            .staged
            .items
            .get(&item.id)
            .ok_or_else(|| Error::not_found(format!("inventory item {}", item.id)))?;
        Self::check_version(stored.version, item.version, format!("inventory item {}", item.id))?;
        self.staged.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<()> {
        self.staged.movements.push(movement.clone());
        Ok(())
    }

    async fn insert_purchase_order(&mut self, order: &PurchaseOrder) -> Result<()> {
        if self.staged.orders.contains_key(&order.id) {
            return Err(Error::new(
                roastline_core::ErrorKind::AlreadyExists,
                format!("purchase order {} already exists", order.order_number),
            ));
        }
        self.staged.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn purchase_order_for_update(&mut self, id: Uuid) -> Result<PurchaseOrder> {
        self.staged
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("purchase order {id}")))
    }

    async fn update_purchase_order(&mut self, order: &PurchaseOrder) -> Result<()> {
        let stored = self
            .staged
            .orders
            .get(&order.id)
            .ok_or_else(|| Error::not_found(format!("purchase order {}", order.id)))?;
        Self::check_version(
            stored.version,
            order.version,
            format!("purchase order {}", order.order_number),
        )?;
        self.staged.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn insert_supplier(&mut self, supplier: &Supplier) -> Result<()> {
        self.staged.suppliers.insert(supplier.id, supplier.clone());
        Ok(())
    }

    async fn supplier_for_update(&mut self, id: Uuid) -> Result<Supplier> {
        self.staged
            .suppliers
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("supplier {id}")))
    }

    async fn update_supplier(&mut self, supplier: &Supplier) -> Result<()> {
        let stored = self
            .staged
            .suppliers
            .get(&supplier.id)
            .ok_or_else(|| Error::not_found(format!("supplier {}", supplier.id)))?;
        Self::check_version(stored.version, supplier.version, format!("supplier {}", supplier.id))?;
        self.staged.suppliers.insert(supplier.id, supplier.clone());
        Ok(())
    }

    async fn insert_supplier_product(&mut self, product: &SupplierProduct) -> Result<()> {
        self.staged.supplier_products.push(product.clone());
        Ok(())
    }

    async fn insert_location(&mut self, location: &Location) -> Result<()> {
        self.staged.locations.insert(location.id, location.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut guard = self.guard;
        *guard = self.staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn paginate<T: Clone>(mut all: Vec<T>, page: &Page) -> Paginated<T> {
    let total = all.len() as u64;
    let start = (page.offset() as usize).min(all.len());
    let end = (start + page.limit() as usize).min(all.len());
    let data = all.drain(start..end).collect();
    Paginated::new(data, page, total)
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, staged }))
    }

    async fn item(&self, id: Uuid) -> Result<Option<InventoryItem>> {
        Ok(self.state.lock().await.items.get(&id).cloned())
    }

    async fn item_by_sku(&self, sku: &str, location_id: Uuid) -> Result<Option<InventoryItem>> {
        Ok(self
            .state
            .lock()
            .await
            .items
            .values()
            .find(|i| i.sku == sku && i.location_id == location_id)
            .cloned())
    }

    async fn list_items(
        &self,
        filter: &ItemFilter,
        sort: ItemSortKey,
        page: &Page,
    ) -> Result<Paginated<InventoryItem>> {
        let state = self.state.lock().await;
        let mut items: Vec<InventoryItem> = state
            .items
            .values()
            .filter(|i| filter.location_id.is_none_or(|l| i.location_id == l))
            .filter(|i| filter.status.is_none_or(|s| i.status == s))
            .filter(|i| filter.category.is_none_or(|c| i.category == c))
            .filter(|i| filter.sku.as_ref().is_none_or(|sku| i.sku.contains(sku.as_str())))
            .cloned()
            .collect();
        match sort {
            ItemSortKey::Sku => items.sort_by(|a, b| a.sku.cmp(&b.sku)),
            ItemSortKey::Name => items.sort_by(|a, b| a.name.cmp(&b.name)),
            ItemSortKey::CurrentStock => {
                items.sort_by(|a, b| b.current_stock.cmp(&a.current_stock))
            }
            ItemSortKey::TotalValue => {
                items.sort_by(|a, b| b.total_value.amount.cmp(&a.total_value.amount))
            }
            ItemSortKey::UpdatedAt => items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
        }
        Ok(paginate(items, page))
    }

    async fn low_stock_items(&self, location_id: Option<Uuid>) -> Result<Vec<InventoryItem>> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .values()
            .filter(|i| location_id.is_none_or(|l| i.location_id == l))
            .filter(|i| {
                i.is_operational()
                    && !i.current_stock.is_zero()
                    && i.current_stock <= i.minimum_stock
            })
            .cloned()
            .collect())
    }

    async fn out_of_stock_items(&self, location_id: Option<Uuid>) -> Result<Vec<InventoryItem>> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .values()
            .filter(|i| location_id.is_none_or(|l| i.location_id == l))
            .filter(|i| i.is_operational() && i.current_stock.is_zero())
            .cloned()
            .collect())
    }

    async fn items_needing_reorder(&self, location_id: Option<Uuid>) -> Result<Vec<InventoryItem>> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .values()
            .filter(|i| location_id.is_none_or(|l| i.location_id == l))
            .filter(|i| i.is_operational() && i.needs_reorder())
            .cloned()
            .collect())
    }

    async fn expiring_items(
        &self,
        within_days: i64,
        location_id: Option<Uuid>,
    ) -> Result<Vec<InventoryItem>> {
        let today = Utc::now().date_naive();
        let horizon = today + Duration::days(within_days);
        let state = self.state.lock().await;
        Ok(state
            .items
            .values()
            .filter(|i| location_id.is_none_or(|l| i.location_id == l))
            .filter(|i| {
                i.active_batches()
                    .any(|b| b.expiration_date.is_some_and(|d| d <= horizon))
            })
            .cloned()
            .collect())
    }

    async fn list_movements(
        &self,
        filter: &MovementFilter,
        page: &Page,
    ) -> Result<Paginated<StockMovement>> {
        let state = self.state.lock().await;
        let mut movements: Vec<StockMovement> = state
            .movements
            .iter()
            .filter(|m| filter.item_id.is_none_or(|id| m.item_id == id))
            .filter(|m| filter.movement_type.is_none_or(|t| m.movement_type == t))
            .filter(|m| filter.direction.is_none_or(|d| m.direction == d))
            .filter(|m| filter.from_date.is_none_or(|from| m.created_at >= from))
            .filter(|m| filter.to_date.is_none_or(|to| m.created_at <= to))
            .cloned()
            .collect();
        movements.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(movements, page))
    }

    async fn supplier(&self, id: Uuid) -> Result<Option<Supplier>> {
        Ok(self.state.lock().await.suppliers.get(&id).cloned())
    }

    async fn suppliers_for_sku(&self, sku: &str) -> Result<Vec<SupplierOffer>> {
        let state = self.state.lock().await;
        Ok(state
            .supplier_products
            .iter()
            .filter(|p| p.sku == sku)
            .filter_map(|p| {
                state
                    .suppliers
                    .get(&p.supplier_id)
                    .filter(|s| s.is_active())
                    .map(|s| SupplierOffer { supplier: s.clone(), product: p.clone() })
            })
            .collect())
    }

    async fn purchase_order(&self, id: Uuid) -> Result<Option<PurchaseOrder>> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn list_purchase_orders(
        &self,
        filter: &OrderFilter,
        page: &Page,
    ) -> Result<Paginated<PurchaseOrder>> {
        let state = self.state.lock().await;
        let mut orders: Vec<PurchaseOrder> = state
            .orders
            .values()
            .filter(|o| filter.supplier_id.is_none_or(|s| o.supplier_id == s))
            .filter(|o| filter.location_id.is_none_or(|l| o.location_id == l))
            .filter(|o| filter.status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(orders, page))
    }

    async fn location(&self, id: Uuid) -> Result<Option<Location>> {
        Ok(self.state.lock().await.locations.get(&id).cloned())
    }

    async fn list_locations(&self) -> Result<Vec<Location>> {
        let state = self.state.lock().await;
        let mut locations: Vec<Location> = state.locations.values().cloned().collect();
        locations.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(locations)
    }
}
