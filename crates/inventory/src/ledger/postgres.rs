//! PostgreSQL ledger implementation.
//!
//! Runtime-checked queries over sqlx; enumerations are stored as text and
//! round-tripped through their serde names. Item rows are locked with
//! `FOR UPDATE` inside transactions, and every versioned write compares the
//! stored version before touching the row.

use super::{
    ItemFilter, ItemSortKey, LedgerStore, LedgerTransaction, MovementFilter, OrderFilter,
    SupplierOffer,
};
use crate::item::{InventoryBatch, InventoryItem, QualityStatus, ReorderRules, StorageRequirements};
use crate::location::{Location, LocationCapacity, StorageZone};
use crate::movement::StockMovement;
use crate::reorder::order::{OrderLine, PurchaseOrder};
use crate::supplier::{PriceTier, Supplier, SupplierPerformance, SupplierProduct};
use crate::types::{Money, Page, Paginated};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use roastline_core::{Error, ErrorKind, Result};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::types::Json;
use sqlx::{FromRow, QueryBuilder, Row, Transaction};
use uuid::Uuid;

pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32, min_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .connect(url)
            .await
            .map_err(db_err)?;
        Ok(Self::new(pool))
    }

    /// Apply embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::storage(format!("migration failed: {e}")))
    }

    async fn attach_batches(&self, items: &mut [InventoryItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = items.iter().map(|i| i.id).collect();
        let rows: Vec<BatchRow> = sqlx::query_as(
            "SELECT id, item_id, batch_number, quantity, unit_cost, currency,
                    expiration_date, manufacture_date, received_date, supplier_id,
                    quality, is_active
             FROM batches WHERE item_id = ANY($1)
             ORDER BY received_date",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        for row in rows {
            let item_id = row.item_id;
            if let Some(item) = items.iter_mut().find(|i| i.id == item_id) {
                item.batches.push(row.into_batch()?);
            }
        }
        Ok(())
    }

    async fn fetch_items_where(&self, suffix: &str, location_id: Option<Uuid>) -> Result<Vec<InventoryItem>> {
        let mut qb = item_select();
        qb.push(" WHERE status <> 'discontinued'");
        if let Some(location) = location_id {
            qb.push(" AND location_id = ").push_bind(location);
        }
        qb.push(" ").push(suffix);
        let rows: Vec<ItemRow> = qb.build_query_as().fetch_all(&self.pool).await.map_err(db_err)?;
        let mut items = rows.into_iter().map(ItemRow::into_item).collect::<Result<Vec<_>>>()?;
        self.attach_batches(&mut items).await?;
        Ok(items)
    }
}

// === Row types ===

#[derive(FromRow)]
struct ItemRow {
    id: Uuid,
    sku: String,
    name: String,
    unit: String,
    category: String,
    location_id: Uuid,
    current_stock: Decimal,
    reserved_stock: Decimal,
    available_stock: Decimal,
    minimum_stock: Decimal,
    maximum_stock: Decimal,
    reorder_point: Decimal,
    reorder_quantity: Decimal,
    safety_stock: Decimal,
    unit_cost: Decimal,
    last_cost: Decimal,
    average_cost: Decimal,
    total_value: Decimal,
    currency: String,
    is_perishable: bool,
    shelf_life_days: Option<i32>,
    storage: Json<StorageRequirements>,
    reorder_rules: Json<ReorderRules>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl ItemRow {
    fn into_item(self) -> Result<InventoryItem> {
        let currency = self.currency.trim().to_string();
        Ok(InventoryItem {
            id: self.id,
            sku: self.sku,
            name: self.name,
            unit: enum_from(&self.unit)?,
            category: enum_from(&self.category)?,
            location_id: self.location_id,
            current_stock: self.current_stock,
            reserved_stock: self.reserved_stock,
            available_stock: self.available_stock,
            minimum_stock: self.minimum_stock,
            maximum_stock: self.maximum_stock,
            reorder_point: self.reorder_point,
            reorder_quantity: self.reorder_quantity,
            safety_stock: self.safety_stock,
            unit_cost: Money::new(self.unit_cost, currency.clone()),
            last_cost: Money::new(self.last_cost, currency.clone()),
            average_cost: Money::new(self.average_cost, currency.clone()),
            total_value: Money::new(self.total_value, currency),
            is_perishable: self.is_perishable,
            shelf_life_days: self.shelf_life_days,
            storage: self.storage.0,
            batches: Vec::new(),
            reorder_rules: self.reorder_rules.0,
            status: enum_from(&self.status)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        })
    }
}

#[derive(FromRow)]
struct BatchRow {
    id: Uuid,
    item_id: Uuid,
    batch_number: String,
    quantity: Decimal,
    unit_cost: Decimal,
    currency: String,
    expiration_date: Option<NaiveDate>,
    manufacture_date: Option<NaiveDate>,
    received_date: DateTime<Utc>,
    supplier_id: Option<Uuid>,
    quality: String,
    is_active: bool,
}

impl BatchRow {
    fn into_batch(self) -> Result<InventoryBatch> {
        Ok(InventoryBatch {
            id: self.id,
            batch_number: self.batch_number,
            quantity: self.quantity,
            unit_cost: Money::new(self.unit_cost, self.currency.trim().to_string()),
            expiration_date: self.expiration_date,
            manufacture_date: self.manufacture_date,
            received_date: self.received_date,
            supplier_id: self.supplier_id,
            quality: enum_from::<QualityStatus>(&self.quality)?,
            is_active: self.is_active,
        })
    }
}

#[derive(FromRow)]
struct MovementRow {
    id: Uuid,
    movement_number: String,
    movement_type: String,
    direction: String,
    item_id: Uuid,
    quantity: Decimal,
    unit_cost: Option<Decimal>,
    currency: Option<String>,
    from_location_id: Option<Uuid>,
    to_location_id: Option<Uuid>,
    batch_number: Option<String>,
    reason: String,
    status: String,
    processed_by: String,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl MovementRow {
    fn into_movement(self) -> Result<StockMovement> {
        let unit_cost = match (self.unit_cost, self.currency) {
            (Some(amount), Some(currency)) => {
                Some(Money::new(amount, currency.trim().to_string()))
            }
            _ => None,
        };
        Ok(StockMovement {
            id: self.id,
            movement_number: self.movement_number,
            movement_type: enum_from(&self.movement_type)?,
            direction: enum_from(&self.direction)?,
            item_id: self.item_id,
            quantity: self.quantity,
            unit_cost,
            from_location_id: self.from_location_id,
            to_location_id: self.to_location_id,
            batch_number: self.batch_number,
            reason: self.reason,
            status: enum_from(&self.status)?,
            processed_by: self.processed_by,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(FromRow)]
struct SupplierRow {
    id: Uuid,
    code: String,
    name: String,
    status: String,
    rating: f64,
    is_preferred: bool,
    payment_terms: String,
    delivery_terms: String,
    currency: String,
    on_time_delivery_rate: f64,
    quality_reject_rate: f64,
    order_fulfillment_rate: f64,
    total_orders: i32,
    last_order_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl SupplierRow {
    fn into_supplier(self) -> Result<Supplier> {
        Ok(Supplier {
            id: self.id,
            code: self.code,
            name: self.name,
            status: enum_from(&self.status)?,
            rating: self.rating,
            is_preferred: self.is_preferred,
            payment_terms: self.payment_terms,
            delivery_terms: self.delivery_terms,
            currency: self.currency.trim().to_string(),
            performance: SupplierPerformance {
                on_time_delivery_rate: self.on_time_delivery_rate,
                quality_reject_rate: self.quality_reject_rate,
                order_fulfillment_rate: self.order_fulfillment_rate,
                total_orders: self.total_orders.max(0) as u32,
                last_order_date: self.last_order_date,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        })
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    supplier_id: Uuid,
    location_id: Uuid,
    created_by: String,
    status: String,
    priority: String,
    subtotal: Decimal,
    tax: Decimal,
    shipping: Decimal,
    discount: Decimal,
    total: Decimal,
    currency: String,
    payment_terms: String,
    delivery_terms: String,
    requested_date: DateTime<Utc>,
    ordered_date: Option<DateTime<Utc>>,
    confirmed_date: Option<DateTime<Utc>>,
    promised_date: Option<DateTime<Utc>>,
    shipped_date: Option<DateTime<Utc>>,
    delivered_date: Option<DateTime<Utc>>,
    cancelled_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl OrderRow {
    fn into_order(self, lines: Vec<OrderLine>) -> Result<PurchaseOrder> {
        let currency = self.currency.trim().to_string();
        Ok(PurchaseOrder {
            id: self.id,
            order_number: self.order_number,
            supplier_id: self.supplier_id,
            location_id: self.location_id,
            created_by: self.created_by,
            status: enum_from(&self.status)?,
            priority: enum_from(&self.priority)?,
            subtotal: Money::new(self.subtotal, currency.clone()),
            tax: Money::new(self.tax, currency.clone()),
            shipping: Money::new(self.shipping, currency.clone()),
            discount: Money::new(self.discount, currency.clone()),
            total: Money::new(self.total, currency),
            payment_terms: self.payment_terms,
            delivery_terms: self.delivery_terms,
            requested_date: self.requested_date,
            ordered_date: self.ordered_date,
            confirmed_date: self.confirmed_date,
            promised_date: self.promised_date,
            shipped_date: self.shipped_date,
            delivered_date: self.delivered_date,
            cancelled_date: self.cancelled_date,
            lines,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        })
    }
}

#[derive(FromRow)]
struct OrderLineRow {
    sku: String,
    description: String,
    quantity_ordered: Decimal,
    unit_price: Decimal,
    quantity_received: Decimal,
    quantity_remaining: Decimal,
}

#[derive(FromRow)]
struct LocationRow {
    id: Uuid,
    code: String,
    name: String,
    kind: String,
    parent_id: Option<Uuid>,
    zones: Json<Vec<StorageZone>>,
    capacity: Json<LocationCapacity>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl LocationRow {
    fn into_location(self) -> Result<Location> {
        Ok(Location {
            id: self.id,
            code: self.code,
            name: self.name,
            kind: enum_from(&self.kind)?,
            parent_id: self.parent_id,
            zones: self.zones.0,
            capacity: self.capacity.0,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        })
    }
}

// === Helpers ===

fn db_err(err: sqlx::Error) -> Error {
    match err {
        sqlx::Error::RowNotFound => Error::not_found("row"),
        other => Error::storage(format!("database error: {other}")).with_component("postgres_ledger"),
    }
}

/// Enumerations round-trip through their serde (snake_case) names.
fn enum_str<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(Error::internal(format!("expected string enum, got {other}"))),
    }
}

fn enum_from<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|e| Error::internal(format!("unknown enum value '{raw}': {e}")))
}

const ITEM_COLUMNS: &str = "id, sku, name, unit, category, location_id, current_stock, \
    reserved_stock, available_stock, minimum_stock, maximum_stock, reorder_point, \
    reorder_quantity, safety_stock, unit_cost, last_cost, average_cost, total_value, \
    currency, is_perishable, shelf_life_days, storage, reorder_rules, status, \
    created_at, updated_at, version";

fn item_select() -> QueryBuilder<'static, Postgres> {
    QueryBuilder::new(format!("SELECT {ITEM_COLUMNS} FROM items"))
}

fn push_item_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &ItemFilter) -> Result<()> {
    qb.push(" WHERE 1 = 1");
    if let Some(location) = filter.location_id {
        qb.push(" AND location_id = ").push_bind(location);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(enum_str(&status)?);
    }
    if let Some(category) = filter.category {
        qb.push(" AND category = ").push_bind(enum_str(&category)?);
    }
    if let Some(sku) = &filter.sku {
        qb.push(" AND sku LIKE ").push_bind(format!("%{sku}%"));
    }
    Ok(())
}

fn push_movement_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &MovementFilter) -> Result<()> {
    qb.push(" WHERE 1 = 1");
    if let Some(item_id) = filter.item_id {
        qb.push(" AND item_id = ").push_bind(item_id);
    }
    if let Some(movement_type) = filter.movement_type {
        qb.push(" AND movement_type = ").push_bind(enum_str(&movement_type)?);
    }
    if let Some(direction) = filter.direction {
        qb.push(" AND direction = ").push_bind(enum_str(&direction)?);
    }
    if let Some(from) = filter.from_date {
        qb.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to_date {
        qb.push(" AND created_at <= ").push_bind(to);
    }
    Ok(())
}

async fn fetch_order_lines(
    pool: &PgPool,
    order_ids: &[Uuid],
) -> Result<std::collections::HashMap<Uuid, Vec<OrderLine>>> {
    let mut grouped: std::collections::HashMap<Uuid, Vec<OrderLine>> = Default::default();
    if order_ids.is_empty() {
        return Ok(grouped);
    }
    let rows = sqlx::query(
        "SELECT order_id, sku, description, quantity_ordered, unit_price,
                quantity_received, quantity_remaining
         FROM order_lines WHERE order_id = ANY($1)
         ORDER BY order_id, line_number",
    )
    .bind(order_ids)
    .fetch_all(pool)
    .await
    .map_err(db_err)?;

    for row in rows {
        let order_id: Uuid = row.try_get("order_id").map_err(db_err)?;
        let line = OrderLineRow {
            sku: row.try_get("sku").map_err(db_err)?,
            description: row.try_get("description").map_err(db_err)?,
            quantity_ordered: row.try_get("quantity_ordered").map_err(db_err)?,
            unit_price: row.try_get("unit_price").map_err(db_err)?,
            quantity_received: row.try_get("quantity_received").map_err(db_err)?,
            quantity_remaining: row.try_get("quantity_remaining").map_err(db_err)?,
        };
        grouped.entry(order_id).or_default().push(OrderLine {
            sku: line.sku,
            description: line.description,
            quantity_ordered: line.quantity_ordered,
            unit_price: line.unit_price,
            quantity_received: line.quantity_received,
            quantity_remaining: line.quantity_remaining,
        });
    }
    Ok(grouped)
}

// === Store implementation ===

#[async_trait]
impl LedgerStore for PostgresLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn item(&self, id: Uuid) -> Result<Option<InventoryItem>> {
        let row: Option<ItemRow> =
            sqlx::query_as(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        match row {
            Some(row) => {
                let mut items = vec![row.into_item()?];
                self.attach_batches(&mut items).await?;
                Ok(items.pop())
            }
            None => Ok(None),
        }
    }

    async fn item_by_sku(&self, sku: &str, location_id: Uuid) -> Result<Option<InventoryItem>> {
        let row: Option<ItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE sku = $1 AND location_id = $2"
        ))
        .bind(sku)
        .bind(location_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => {
                let mut items = vec![row.into_item()?];
                self.attach_batches(&mut items).await?;
                Ok(items.pop())
            }
            None => Ok(None),
        }
    }

    async fn list_items(
        &self,
        filter: &ItemFilter,
        sort: ItemSortKey,
        page: &Page,
    ) -> Result<Paginated<InventoryItem>> {
        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM items");
        push_item_filters(&mut count_qb, filter)?;
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        let mut qb = item_select();
        push_item_filters(&mut qb, filter)?;
        qb.push(match sort {
            ItemSortKey::Sku => " ORDER BY sku",
            ItemSortKey::Name => " ORDER BY name",
            ItemSortKey::CurrentStock => " ORDER BY current_stock DESC",
            ItemSortKey::TotalValue => " ORDER BY total_value DESC",
            ItemSortKey::UpdatedAt => " ORDER BY updated_at DESC",
        });
        qb.push(" LIMIT ").push_bind(page.limit() as i64);
        qb.push(" OFFSET ").push_bind(page.offset() as i64);

        let rows: Vec<ItemRow> = qb.build_query_as().fetch_all(&self.pool).await.map_err(db_err)?;
        let mut items = rows.into_iter().map(ItemRow::into_item).collect::<Result<Vec<_>>>()?;
        self.attach_batches(&mut items).await?;
        Ok(Paginated::new(items, page, total.max(0) as u64))
    }

    async fn low_stock_items(&self, location_id: Option<Uuid>) -> Result<Vec<InventoryItem>> {
        self.fetch_items_where(
            "AND current_stock > 0 AND current_stock <= minimum_stock ORDER BY sku",
            location_id,
        )
        .await
    }

    async fn out_of_stock_items(&self, location_id: Option<Uuid>) -> Result<Vec<InventoryItem>> {
        self.fetch_items_where("AND current_stock = 0 ORDER BY sku", location_id).await
    }

    async fn items_needing_reorder(&self, location_id: Option<Uuid>) -> Result<Vec<InventoryItem>> {
        self.fetch_items_where(
            "AND current_stock <= reorder_point
             AND (reorder_rules ->> 'enabled')::boolean
             ORDER BY sku",
            location_id,
        )
        .await
    }

    async fn expiring_items(
        &self,
        within_days: i64,
        location_id: Option<Uuid>,
    ) -> Result<Vec<InventoryItem>> {
        let horizon = Utc::now().date_naive() + Duration::days(within_days);
        let mut qb = item_select();
        qb.push(
            " WHERE status <> 'discontinued' AND id IN \
             (SELECT DISTINCT item_id FROM batches \
              WHERE is_active AND expiration_date IS NOT NULL AND expiration_date <= ",
        );
        qb.push_bind(horizon);
        qb.push(")");
        if let Some(location) = location_id {
            qb.push(" AND location_id = ").push_bind(location);
        }
        qb.push(" ORDER BY sku");
        let rows: Vec<ItemRow> = qb.build_query_as().fetch_all(&self.pool).await.map_err(db_err)?;
        let mut items = rows.into_iter().map(ItemRow::into_item).collect::<Result<Vec<_>>>()?;
        self.attach_batches(&mut items).await?;
        Ok(items)
    }

    async fn list_movements(
        &self,
        filter: &MovementFilter,
        page: &Page,
    ) -> Result<Paginated<StockMovement>> {
        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM movements");
        push_movement_filters(&mut count_qb, filter)?;
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        let mut qb = QueryBuilder::new(
            "SELECT id, movement_number, movement_type, direction, item_id, quantity, \
             unit_cost, currency, from_location_id, to_location_id, batch_number, reason, \
             status, processed_by, created_at, completed_at FROM movements",
        );
        push_movement_filters(&mut qb, filter)?;
        qb.push(" ORDER BY created_at DESC");
        qb.push(" LIMIT ").push_bind(page.limit() as i64);
        qb.push(" OFFSET ").push_bind(page.offset() as i64);

        let rows: Vec<MovementRow> =
            qb.build_query_as().fetch_all(&self.pool).await.map_err(db_err)?;
        let movements =
            rows.into_iter().map(MovementRow::into_movement).collect::<Result<Vec<_>>>()?;
        Ok(Paginated::new(movements, page, total.max(0) as u64))
    }

    async fn supplier(&self, id: Uuid) -> Result<Option<Supplier>> {
        let row: Option<SupplierRow> = sqlx::query_as(
            "SELECT id, code, name, status, rating, is_preferred, payment_terms,
                    delivery_terms, currency, on_time_delivery_rate, quality_reject_rate,
                    order_fulfillment_rate, total_orders, last_order_date,
                    created_at, updated_at, version
             FROM suppliers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(SupplierRow::into_supplier).transpose()
    }

    async fn suppliers_for_sku(&self, sku: &str) -> Result<Vec<SupplierOffer>> {
        let rows = sqlx::query(
            "SELECT s.id, s.code, s.name, s.status, s.rating, s.is_preferred,
                    s.payment_terms, s.delivery_terms, s.currency,
                    s.on_time_delivery_rate, s.quality_reject_rate,
                    s.order_fulfillment_rate, s.total_orders, s.last_order_date,
                    s.created_at, s.updated_at, s.version,
                    p.id AS product_id, p.sku, p.minimum_order_quantity,
                    p.lead_time_days, p.price_tiers
             FROM supplier_products p
             JOIN suppliers s ON s.id = p.supplier_id
             WHERE p.sku = $1 AND s.status = 'active'
             ORDER BY s.name",
        )
        .bind(sku)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut offers = Vec::with_capacity(rows.len());
        for row in rows {
            let supplier = SupplierRow {
                id: row.try_get("id").map_err(db_err)?,
                code: row.try_get("code").map_err(db_err)?,
                name: row.try_get("name").map_err(db_err)?,
                status: row.try_get("status").map_err(db_err)?,
                rating: row.try_get("rating").map_err(db_err)?,
                is_preferred: row.try_get("is_preferred").map_err(db_err)?,
                payment_terms: row.try_get("payment_terms").map_err(db_err)?,
                delivery_terms: row.try_get("delivery_terms").map_err(db_err)?,
                currency: row.try_get("currency").map_err(db_err)?,
                on_time_delivery_rate: row.try_get("on_time_delivery_rate").map_err(db_err)?,
                quality_reject_rate: row.try_get("quality_reject_rate").map_err(db_err)?,
                order_fulfillment_rate: row.try_get("order_fulfillment_rate").map_err(db_err)?,
                total_orders: row.try_get("total_orders").map_err(db_err)?,
                last_order_date: row.try_get("last_order_date").map_err(db_err)?,
                created_at: row.try_get("created_at").map_err(db_err)?,
                updated_at: row.try_get("updated_at").map_err(db_err)?,
                version: row.try_get("version").map_err(db_err)?,
            }
            .into_supplier()?;
            let tiers: Json<Vec<PriceTier>> = row.try_get("price_tiers").map_err(db_err)?;
            let product = SupplierProduct {
                id: row.try_get("product_id").map_err(db_err)?,
                supplier_id: supplier.id,
                sku: row.try_get("sku").map_err(db_err)?,
                minimum_order_quantity: row.try_get("minimum_order_quantity").map_err(db_err)?,
                lead_time_days: row.try_get::<i32, _>("lead_time_days").map_err(db_err)?.max(0)
                    as u32,
                price_tiers: tiers.0,
            };
            offers.push(SupplierOffer { supplier, product });
        }
        Ok(offers)
    }

    async fn purchase_order(&self, id: Uuid) -> Result<Option<PurchaseOrder>> {
        let row: Option<OrderRow> = sqlx::query_as(
            "SELECT id, order_number, supplier_id, location_id, created_by, status,
                    priority, subtotal, tax, shipping, discount, total, currency,
                    payment_terms, delivery_terms, requested_date, ordered_date,
                    confirmed_date, promised_date, shipped_date, delivered_date,
                    cancelled_date, created_at, updated_at, version
             FROM purchase_orders WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => {
                let mut lines = fetch_order_lines(&self.pool, &[row.id]).await?;
                let lines = lines.remove(&row.id).unwrap_or_default();
                Ok(Some(row.into_order(lines)?))
            }
            None => Ok(None),
        }
    }

    async fn list_purchase_orders(
        &self,
        filter: &OrderFilter,
        page: &Page,
    ) -> Result<Paginated<PurchaseOrder>> {
        let push_filters = |qb: &mut QueryBuilder<'_, Postgres>| -> Result<()> {
            qb.push(" WHERE 1 = 1");
            if let Some(supplier) = filter.supplier_id {
                qb.push(" AND supplier_id = ").push_bind(supplier);
            }
            if let Some(location) = filter.location_id {
                qb.push(" AND location_id = ").push_bind(location);
            }
            if let Some(status) = filter.status {
                qb.push(" AND status = ").push_bind(enum_str(&status)?);
            }
            Ok(())
        };

        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM purchase_orders");
        push_filters(&mut count_qb)?;
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        let mut qb = QueryBuilder::new(
            "SELECT id, order_number, supplier_id, location_id, created_by, status, \
             priority, subtotal, tax, shipping, discount, total, currency, payment_terms, \
             delivery_terms, requested_date, ordered_date, confirmed_date, promised_date, \
             shipped_date, delivered_date, cancelled_date, created_at, updated_at, version \
             FROM purchase_orders",
        );
        push_filters(&mut qb)?;
        qb.push(" ORDER BY created_at DESC");
        qb.push(" LIMIT ").push_bind(page.limit() as i64);
        qb.push(" OFFSET ").push_bind(page.offset() as i64);

        let rows: Vec<OrderRow> = qb.build_query_as().fetch_all(&self.pool).await.map_err(db_err)?;
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut lines = fetch_order_lines(&self.pool, &ids).await?;
        let orders = rows
            .into_iter()
            .map(|row| {
                let order_lines = lines.remove(&row.id).unwrap_or_default();
                row.into_order(order_lines)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Paginated::new(orders, page, total.max(0) as u64))
    }

    async fn location(&self, id: Uuid) -> Result<Option<Location>> {
        let row: Option<LocationRow> = sqlx::query_as(
            "SELECT id, code, name, kind, parent_id, zones, capacity, is_active,
                    created_at, updated_at, version
             FROM locations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(LocationRow::into_location).transpose()
    }

    async fn list_locations(&self) -> Result<Vec<Location>> {
        let rows: Vec<LocationRow> = sqlx::query_as(
            "SELECT id, code, name, kind, parent_id, zones, capacity, is_active,
                    created_at, updated_at, version
             FROM locations ORDER BY code",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(LocationRow::into_location).collect()
    }
}

// === Transaction implementation ===

struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    async fn load_batches(&mut self, item_id: Uuid) -> Result<Vec<InventoryBatch>> {
        let rows: Vec<BatchRow> = sqlx::query_as(
            "SELECT id, item_id, batch_number, quantity, unit_cost, currency,
                    expiration_date, manufacture_date, received_date, supplier_id,
                    quality, is_active
             FROM batches WHERE item_id = $1
             ORDER BY received_date
             FOR UPDATE",
        )
        .bind(item_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(BatchRow::into_batch).collect()
    }

    async fn replace_batches(&mut self, item: &InventoryItem) -> Result<()> {
        sqlx::query("DELETE FROM batches WHERE item_id = $1")
            .bind(item.id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        for batch in &item.batches {
            sqlx::query(
                "INSERT INTO batches
                 (id, item_id, batch_number, quantity, unit_cost, currency,
                  expiration_date, manufacture_date, received_date, supplier_id,
                  quality, is_active)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            )
            .bind(batch.id)
            .bind(item.id)
            .bind(&batch.batch_number)
            .bind(batch.quantity)
            .bind(batch.unit_cost.amount)
            .bind(&batch.unit_cost.currency)
            .bind(batch.expiration_date)
            .bind(batch.manufacture_date)
            .bind(batch.received_date)
            .bind(batch.supplier_id)
            .bind(enum_str(&batch.quality)?)
            .bind(batch.is_active)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn replace_order_lines(&mut self, order: &PurchaseOrder) -> Result<()> {
        sqlx::query("DELETE FROM order_lines WHERE order_id = $1")
            .bind(order.id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        for (index, line) in order.lines.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_lines
                 (order_id, line_number, sku, description, quantity_ordered,
                  unit_price, quantity_received, quantity_remaining)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(order.id)
            .bind(index as i32)
            .bind(&line.sku)
            .bind(&line.description)
            .bind(line.quantity_ordered)
            .bind(line.unit_price)
            .bind(line.quantity_received)
            .bind(line.quantity_remaining)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerTransaction for PostgresTransaction {
    async fn item_for_update(&mut self, id: Uuid) -> Result<InventoryItem> {
        let row: Option<ItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;
        let row = row.ok_or_else(|| Error::not_found(format!("inventory item {id}")))?;
        let mut item = row.into_item()?;
        item.batches = self.load_batches(item.id).await?;
        Ok(item)
    }

    async fn item_by_sku_for_update(
        &mut self,
        sku: &str,
        location_id: Uuid,
    ) -> Result<Option<InventoryItem>> {
        let row: Option<ItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE sku = $1 AND location_id = $2 FOR UPDATE"
        ))
        .bind(sku)
        .bind(location_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => {
                let mut item = row.into_item()?;
                item.batches = self.load_batches(item.id).await?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }

    async fn insert_item(&mut self, item: &InventoryItem) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO items
             (id, sku, name, unit, category, location_id, current_stock, reserved_stock,
              available_stock, minimum_stock, maximum_stock, reorder_point,
              reorder_quantity, safety_stock, unit_cost, last_cost, average_cost,
              total_value, currency, is_perishable, shelf_life_days, storage,
              reorder_rules, status, created_at, updated_at, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                     $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27)
             ON CONFLICT DO NOTHING",
        )
        .bind(item.id)
        .bind(&item.sku)
        .bind(&item.name)
        .bind(enum_str(&item.unit)?)
        .bind(enum_str(&item.category)?)
        .bind(item.location_id)
        .bind(item.current_stock)
        .bind(item.reserved_stock)
        .bind(item.available_stock)
        .bind(item.minimum_stock)
        .bind(item.maximum_stock)
        .bind(item.reorder_point)
        .bind(item.reorder_quantity)
        .bind(item.safety_stock)
        .bind(item.unit_cost.amount)
        .bind(item.last_cost.amount)
        .bind(item.average_cost.amount)
        .bind(item.total_value.amount)
        .bind(&item.unit_cost.currency)
        .bind(item.is_perishable)
        .bind(item.shelf_life_days)
        .bind(Json(&item.storage))
        .bind(Json(&item.reorder_rules))
        .bind(enum_str(&item.status)?)
        .bind(item.created_at)
        .bind(item.updated_at)
        .bind(item.version)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::new(
                ErrorKind::AlreadyExists,
                format!("sku {} already exists at location {}", item.sku, item.location_id),
            ));
        }
        self.replace_batches(item).await
    }

    async fn update_item(&mut self, item: &InventoryItem) -> Result<()> {
        let result = sqlx::query(
            "UPDATE items SET
                 name = $3, current_stock = $4, reserved_stock = $5, available_stock = $6,
                 minimum_stock = $7, maximum_stock = $8, reorder_point = $9,
                 reorder_quantity = $10, safety_stock = $11, unit_cost = $12,
                 last_cost = $13, average_cost = $14, total_value = $15,
                 shelf_life_days = $16, storage = $17, reorder_rules = $18, status = $19,
                 updated_at = $20, version = $2
             WHERE id = $1 AND version = $2 - 1",
        )
        .bind(item.id)
        .bind(item.version)
        .bind(&item.name)
        .bind(item.current_stock)
        .bind(item.reserved_stock)
        .bind(item.available_stock)
        .bind(item.minimum_stock)
        .bind(item.maximum_stock)
        .bind(item.reorder_point)
        .bind(item.reorder_quantity)
        .bind(item.safety_stock)
        .bind(item.unit_cost.amount)
        .bind(item.last_cost.amount)
        .bind(item.average_cost.amount)
        .bind(item.total_value.amount)
        .bind(item.shelf_life_days)
        .bind(Json(&item.storage))
        .bind(Json(&item.reorder_rules))
        .bind(enum_str(&item.status)?)
        .bind(item.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            let stored: Option<i64> = sqlx::query_scalar("SELECT version FROM items WHERE id = $1")
                .bind(item.id)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(db_err)?;
            return match stored {
                Some(version) => Err(Error::version_conflict(
                    format!("inventory item {}", item.id),
                    version,
                    item.version - 1,
                )),
                None => Err(Error::not_found(format!("inventory item {}", item.id))),
            };
        }
        self.replace_batches(item).await
    }

    async fn insert_movement(&mut self, movement: &StockMovement) -> Result<()> {
        sqlx::query(
            "INSERT INTO movements
             (id, movement_number, movement_type, direction, item_id, quantity,
              unit_cost, currency, from_location_id, to_location_id, batch_number,
              reason, status, processed_by, created_at, completed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(movement.id)
        .bind(&movement.movement_number)
        .bind(enum_str(&movement.movement_type)?)
        .bind(enum_str(&movement.direction)?)
        .bind(movement.item_id)
        .bind(movement.quantity)
        .bind(movement.unit_cost.as_ref().map(|m| m.amount))
        .bind(movement.unit_cost.as_ref().map(|m| m.currency.clone()))
        .bind(movement.from_location_id)
        .bind(movement.to_location_id)
        .bind(&movement.batch_number)
        .bind(&movement.reason)
        .bind(enum_str(&movement.status)?)
        .bind(&movement.processed_by)
        .bind(movement.created_at)
        .bind(movement.completed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_purchase_order(&mut self, order: &PurchaseOrder) -> Result<()> {
        sqlx::query(
            "INSERT INTO purchase_orders
             (id, order_number, supplier_id, location_id, created_by, status, priority,
              subtotal, tax, shipping, discount, total, currency, payment_terms,
              delivery_terms, requested_date, ordered_date, confirmed_date,
              promised_date, shipped_date, delivered_date, cancelled_date,
              created_at, updated_at, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                     $16, $17, $18, $19, $20, $21, $22, $23, $24, $25)",
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.supplier_id)
        .bind(order.location_id)
        .bind(&order.created_by)
        .bind(enum_str(&order.status)?)
        .bind(enum_str(&order.priority)?)
        .bind(order.subtotal.amount)
        .bind(order.tax.amount)
        .bind(order.shipping.amount)
        .bind(order.discount.amount)
        .bind(order.total.amount)
        .bind(&order.subtotal.currency)
        .bind(&order.payment_terms)
        .bind(&order.delivery_terms)
        .bind(order.requested_date)
        .bind(order.ordered_date)
        .bind(order.confirmed_date)
        .bind(order.promised_date)
        .bind(order.shipped_date)
        .bind(order.delivered_date)
        .bind(order.cancelled_date)
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.version)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        self.replace_order_lines(order).await
    }

    async fn purchase_order_for_update(&mut self, id: Uuid) -> Result<PurchaseOrder> {
        let row: Option<OrderRow> = sqlx::query_as(
            "SELECT id, order_number, supplier_id, location_id, created_by, status,
                    priority, subtotal, tax, shipping, discount, total, currency,
                    payment_terms, delivery_terms, requested_date, ordered_date,
                    confirmed_date, promised_date, shipped_date, delivered_date,
                    cancelled_date, created_at, updated_at, version
             FROM purchase_orders WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;
        let row = row.ok_or_else(|| Error::not_found(format!("purchase order {id}")))?;

        let line_rows: Vec<OrderLineRow> = sqlx::query_as(
            "SELECT sku, description, quantity_ordered, unit_price, quantity_received,
                    quantity_remaining
             FROM order_lines WHERE order_id = $1 ORDER BY line_number FOR UPDATE",
        )
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)?;
        let lines = line_rows
            .into_iter()
            .map(|l| OrderLine {
                sku: l.sku,
                description: l.description,
                quantity_ordered: l.quantity_ordered,
                unit_price: l.unit_price,
                quantity_received: l.quantity_received,
                quantity_remaining: l.quantity_remaining,
            })
            .collect();
        row.into_order(lines)
    }

    async fn update_purchase_order(&mut self, order: &PurchaseOrder) -> Result<()> {
        let result = sqlx::query(
            "UPDATE purchase_orders SET
                 status = $3, priority = $4, subtotal = $5, tax = $6, shipping = $7,
                 discount = $8, total = $9, ordered_date = $10, confirmed_date = $11,
                 promised_date = $12, shipped_date = $13, delivered_date = $14,
                 cancelled_date = $15, updated_at = $16, version = $2
             WHERE id = $1 AND version = $2 - 1",
        )
        .bind(order.id)
        .bind(order.version)
        .bind(enum_str(&order.status)?)
        .bind(enum_str(&order.priority)?)
        .bind(order.subtotal.amount)
        .bind(order.tax.amount)
        .bind(order.shipping.amount)
        .bind(order.discount.amount)
        .bind(order.total.amount)
        .bind(order.ordered_date)
        .bind(order.confirmed_date)
        .bind(order.promised_date)
        .bind(order.shipped_date)
        .bind(order.delivered_date)
        .bind(order.cancelled_date)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            let stored: Option<i64> =
                sqlx::query_scalar("SELECT version FROM purchase_orders WHERE id = $1")
                    .bind(order.id)
                    .fetch_optional(&mut *self.tx)
                    .await
                    .map_err(db_err)?;
            return match stored {
                Some(version) => Err(Error::version_conflict(
                    format!("purchase order {}", order.order_number),
                    version,
                    order.version - 1,
                )),
                None => Err(Error::not_found(format!("purchase order {}", order.id))),
            };
        }
        self.replace_order_lines(order).await
    }

    async fn insert_supplier(&mut self, supplier: &Supplier) -> Result<()> {
        sqlx::query(
            "INSERT INTO suppliers
             (id, code, name, status, rating, is_preferred, payment_terms,
              delivery_terms, currency, on_time_delivery_rate, quality_reject_rate,
              order_fulfillment_rate, total_orders, last_order_date,
              created_at, updated_at, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                     $15, $16, $17)",
        )
        .bind(supplier.id)
        .bind(&supplier.code)
        .bind(&supplier.name)
        .bind(enum_str(&supplier.status)?)
        .bind(supplier.rating)
        .bind(supplier.is_preferred)
        .bind(&supplier.payment_terms)
        .bind(&supplier.delivery_terms)
        .bind(&supplier.currency)
        .bind(supplier.performance.on_time_delivery_rate)
        .bind(supplier.performance.quality_reject_rate)
        .bind(supplier.performance.order_fulfillment_rate)
        .bind(supplier.performance.total_orders as i32)
        .bind(supplier.performance.last_order_date)
        .bind(supplier.created_at)
        .bind(supplier.updated_at)
        .bind(supplier.version)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn supplier_for_update(&mut self, id: Uuid) -> Result<Supplier> {
        let row: Option<SupplierRow> = sqlx::query_as(
            "SELECT id, code, name, status, rating, is_preferred, payment_terms,
                    delivery_terms, currency, on_time_delivery_rate, quality_reject_rate,
                    order_fulfillment_rate, total_orders, last_order_date,
                    created_at, updated_at, version
             FROM suppliers WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;
        row.ok_or_else(|| Error::not_found(format!("supplier {id}")))?.into_supplier()
    }

    async fn update_supplier(&mut self, supplier: &Supplier) -> Result<()> {
        let result = sqlx::query(
            "UPDATE suppliers SET
                 name = $3, status = $4, rating = $5, is_preferred = $6,
                 payment_terms = $7, delivery_terms = $8, on_time_delivery_rate = $9,
                 quality_reject_rate = $10, order_fulfillment_rate = $11,
                 total_orders = $12, last_order_date = $13, updated_at = $14,
                 version = $2
             WHERE id = $1 AND version = $2 - 1",
        )
        .bind(supplier.id)
        .bind(supplier.version)
        .bind(&supplier.name)
        .bind(enum_str(&supplier.status)?)
        .bind(supplier.rating)
        .bind(supplier.is_preferred)
        .bind(&supplier.payment_terms)
        .bind(&supplier.delivery_terms)
        .bind(supplier.performance.on_time_delivery_rate)
        .bind(supplier.performance.quality_reject_rate)
        .bind(supplier.performance.order_fulfillment_rate)
        .bind(supplier.performance.total_orders as i32)
        .bind(supplier.performance.last_order_date)
        .bind(supplier.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            let stored: Option<i64> =
                sqlx::query_scalar("SELECT version FROM suppliers WHERE id = $1")
                    .bind(supplier.id)
                    .fetch_optional(&mut *self.tx)
                    .await
                    .map_err(db_err)?;
            return match stored {
                Some(version) => Err(Error::version_conflict(
                    format!("supplier {}", supplier.id),
                    version,
                    supplier.version - 1,
                )),
                None => Err(Error::not_found(format!("supplier {}", supplier.id))),
            };
        }
        Ok(())
    }

    async fn insert_supplier_product(&mut self, product: &SupplierProduct) -> Result<()> {
        sqlx::query(
            "INSERT INTO supplier_products
             (id, supplier_id, sku, minimum_order_quantity, lead_time_days, price_tiers)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(product.id)
        .bind(product.supplier_id)
        .bind(&product.sku)
        .bind(product.minimum_order_quantity)
        .bind(product.lead_time_days as i32)
        .bind(Json(&product.price_tiers))
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_location(&mut self, location: &Location) -> Result<()> {
        sqlx::query(
            "INSERT INTO locations
             (id, code, name, kind, parent_id, zones, capacity, is_active,
              created_at, updated_at, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(location.id)
        .bind(&location.code)
        .bind(&location.name)
        .bind(enum_str(&location.kind)?)
        .bind(location.parent_id)
        .bind(Json(&location.zones))
        .bind(Json(&location.capacity))
        .bind(location.is_active)
        .bind(location.created_at)
        .bind(location.updated_at)
        .bind(location.version)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(|e| {
            Error::storage(format!("commit failed: {e}")).with_component("postgres_ledger")
        })
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(db_err)
    }
}
