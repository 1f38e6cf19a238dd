//! Inventory service: the composition of ledger, movement engine, reorder
//! engine and forecaster behind the typed command/query surface.

use crate::commands::{
    BulkUpdateStockCommand, CreateInventoryItemCommand, ProcessAutomaticReordersCommand,
    UpdateInventoryItemCommand,
};
use crate::forecast::{
    ConsumptionPattern, DemandForecast, DemandForecaster, StockoutPrediction,
};
use crate::item::{InventoryItem, ItemStatus};
use crate::ledger::{LedgerStore, MovementFilter};
use crate::movement::{
    AdjustStockRequest, IssueStockRequest, MovementDirection, MovementEngine, NewBatch,
    ReceiveStockRequest, ReleaseStockRequest, ReserveStockRequest, StockMovement,
    TransferStockRequest,
};
use crate::queries::{
    GetDemandForecastQuery, GetInventoryOverviewQuery, GetReorderRecommendationsQuery,
    GetStockMovementsQuery, InventoryOverview, ListInventoryItemsQuery,
};
use crate::reorder::{PurchaseOrder, ReorderEngine, ReorderRecommendation};
use crate::types::{Money, Page, Paginated};
use chrono::{NaiveDate, Utc};
use roastline_core::config::ReorderConfig;
use roastline_core::{
    DomainEvent, Error, EventSink, EventType, OpContext, ResilienceManager, Result,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Per-line outcome of a bulk stock update.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BulkAdjustmentOutcome {
    pub item_id: Uuid,
    pub movement_number: Option<String>,
    pub error: Option<String>,
}

pub struct InventoryService {
    ledger: Arc<dyn LedgerStore>,
    events: Arc<dyn EventSink>,
    movements: MovementEngine,
    reorder: ReorderEngine,
    forecaster: Arc<DemandForecaster>,
}

impl InventoryService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        events: Arc<dyn EventSink>,
        resilience: Arc<ResilienceManager>,
        config: ReorderConfig,
    ) -> Self {
        let forecaster = Arc::new(DemandForecaster::new(ledger.clone(), resilience));
        Self::with_forecaster(ledger, events, forecaster, config)
    }

    /// Composition root for callers that configure the forecaster (external
    /// predictor, custom lookback) themselves.
    pub fn with_forecaster(
        ledger: Arc<dyn LedgerStore>,
        events: Arc<dyn EventSink>,
        forecaster: Arc<DemandForecaster>,
        config: ReorderConfig,
    ) -> Self {
        let movements = MovementEngine::new(ledger.clone(), events.clone());
        let reorder =
            ReorderEngine::new(ledger.clone(), forecaster.clone(), events.clone(), config);
        Self { ledger, events, movements, reorder, forecaster }
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    pub fn movements(&self) -> &MovementEngine {
        &self.movements
    }

    pub fn reorder(&self) -> &ReorderEngine {
        &self.reorder
    }

    pub fn forecaster(&self) -> &Arc<DemandForecaster> {
        &self.forecaster
    }

    // === Item lifecycle ===

    #[instrument(skip(self, ctx, command), fields(sku = %command.sku))]
    pub async fn create_item(
        &self,
        ctx: &OpContext,
        actor: &str,
        command: CreateInventoryItemCommand,
    ) -> Result<InventoryItem> {
        command.check()?;
        ctx.check("item.create")?;

        let now = Utc::now();
        let currency = command.unit_cost.currency.clone();
        let mut item = InventoryItem {
            id: Uuid::new_v4(),
            sku: command.sku,
            name: command.name,
            unit: command.unit,
            category: command.category,
            location_id: command.location_id,
            current_stock: Decimal::ZERO,
            reserved_stock: Decimal::ZERO,
            available_stock: Decimal::ZERO,
            minimum_stock: command.minimum_stock,
            maximum_stock: command.maximum_stock,
            reorder_point: command.reorder_point,
            reorder_quantity: command.reorder_quantity,
            safety_stock: command.safety_stock,
            unit_cost: command.unit_cost.clone(),
            last_cost: command.unit_cost.clone(),
            average_cost: command.unit_cost,
            total_value: Money::zero(currency),
            is_perishable: command.is_perishable,
            shelf_life_days: command.shelf_life_days,
            storage: command.storage,
            batches: Vec::new(),
            reorder_rules: command.reorder_rules.unwrap_or_default(),
            status: ItemStatus::Active,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        item.recompute_derived(now.date_naive());

        let mut tx = self.ledger.begin().await?;
        tx.insert_item(&item).await?;
        tx.commit().await?;

        self.publish(
            EventType::InventoryItemCreated,
            item.id,
            serde_json::json!({
                "item_id": item.id,
                "sku": item.sku,
                "location_id": item.location_id,
                "created_by": actor,
            }),
        )
        .await;
        Ok(item)
    }

    #[instrument(skip(self, ctx, command), fields(item_id = %command.item_id))]
    pub async fn update_item(
        &self,
        ctx: &OpContext,
        actor: &str,
        command: UpdateInventoryItemCommand,
    ) -> Result<InventoryItem> {
        command.check()?;
        ctx.check("item.update")?;

        let mut tx = self.ledger.begin().await?;
        let mut item = tx.item_for_update(command.item_id).await?;

        if let Some(name) = command.name {
            item.name = name;
        }
        if let Some(value) = command.minimum_stock {
            item.minimum_stock = value;
        }
        if let Some(value) = command.maximum_stock {
            item.maximum_stock = value;
        }
        if let Some(value) = command.reorder_point {
            item.reorder_point = value;
        }
        if let Some(value) = command.reorder_quantity {
            item.reorder_quantity = value;
        }
        if let Some(value) = command.safety_stock {
            item.safety_stock = value;
        }
        if let Some(cost) = command.unit_cost {
            if cost.currency != item.unit_cost.currency {
                return Err(Error::invalid_input("unit cost currency cannot change"));
            }
            item.unit_cost = cost;
        }
        if let Some(storage) = command.storage {
            item.storage = storage;
        }
        if let Some(rules) = command.reorder_rules {
            item.reorder_rules = rules;
        }
        if let Some(status) = command.status {
            // Validated to be Discontinued; retirement is a status flip, the
            // row stays for audit.
            item.status = status;
        }
        if item.maximum_stock < item.minimum_stock {
            return Err(Error::invalid_input("maximum_stock cannot be below minimum_stock"));
        }

        item.recompute_derived(Utc::now().date_naive());
        item.touch();
        tx.update_item(&item).await?;
        tx.commit().await?;

        self.publish(
            EventType::InventoryItemUpdated,
            item.id,
            serde_json::json!({
                "item_id": item.id,
                "sku": item.sku,
                "status": item.status,
                "updated_by": actor,
            }),
        )
        .await;
        Ok(item)
    }

    // === Stock commands ===

    pub async fn receive_stock(
        &self,
        ctx: &OpContext,
        actor: &str,
        request: ReceiveStockRequest,
    ) -> Result<StockMovement> {
        self.movements.receive(ctx, actor, request).await
    }

    pub async fn issue_stock(
        &self,
        ctx: &OpContext,
        actor: &str,
        request: IssueStockRequest,
    ) -> Result<Vec<StockMovement>> {
        self.movements.issue(ctx, actor, request).await
    }

    pub async fn transfer_stock(
        &self,
        ctx: &OpContext,
        actor: &str,
        request: TransferStockRequest,
    ) -> Result<Vec<StockMovement>> {
        self.movements.transfer(ctx, actor, request).await
    }

    pub async fn adjust_stock(
        &self,
        ctx: &OpContext,
        actor: &str,
        request: AdjustStockRequest,
    ) -> Result<StockMovement> {
        self.movements.adjust(ctx, actor, request).await
    }

    pub async fn reserve_stock(
        &self,
        ctx: &OpContext,
        actor: &str,
        request: ReserveStockRequest,
    ) -> Result<StockMovement> {
        self.movements.reserve(ctx, actor, request).await
    }

    pub async fn release_stock(
        &self,
        ctx: &OpContext,
        actor: &str,
        request: ReleaseStockRequest,
    ) -> Result<StockMovement> {
        self.movements.release(ctx, actor, request).await
    }

    /// Apply each adjustment in its own transaction; a failing line is
    /// reported, not fatal.
    #[instrument(skip(self, ctx, command))]
    pub async fn bulk_update_stock(
        &self,
        ctx: &OpContext,
        actor: &str,
        command: BulkUpdateStockCommand,
    ) -> Result<Vec<BulkAdjustmentOutcome>> {
        command.validate().map_err(|e| Error::invalid_input(e.to_string()))?;
        let mut outcomes = Vec::with_capacity(command.adjustments.len());
        for adjustment in command.adjustments {
            ctx.check("stock.bulk_update")?;
            let item_id = adjustment.item_id;
            let result = self
                .movements
                .adjust(
                    ctx,
                    actor,
                    AdjustStockRequest {
                        item_id,
                        delta: adjustment.delta,
                        reason: adjustment.reason,
                    },
                )
                .await;
            outcomes.push(match result {
                Ok(movement) => BulkAdjustmentOutcome {
                    item_id,
                    movement_number: Some(movement.movement_number),
                    error: None,
                },
                Err(err) => {
                    warn!(item_id = %item_id, error = %err, "bulk adjustment line failed");
                    BulkAdjustmentOutcome {
                        item_id,
                        movement_number: None,
                        error: Some(err.to_string()),
                    }
                }
            });
        }
        Ok(outcomes)
    }

    // === Replenishment ===

    pub async fn process_automatic_reorders(
        &self,
        ctx: &OpContext,
        actor: &str,
        command: ProcessAutomaticReordersCommand,
    ) -> Result<Vec<PurchaseOrder>> {
        self.reorder.process(ctx, actor, command.location_id, &command.criteria).await
    }

    pub async fn reorder_recommendations(
        &self,
        ctx: &OpContext,
        query: GetReorderRecommendationsQuery,
    ) -> Result<Vec<ReorderRecommendation>> {
        self.reorder.evaluate(ctx, query.location_id, &query.criteria).await
    }

    /// Receive goods against a purchase-order line: posts the stock receipt
    /// through the movement engine, then records it on the order.
    pub async fn receive_order_goods(
        &self,
        ctx: &OpContext,
        actor: &str,
        order_id: Uuid,
        sku: &str,
        quantity: Decimal,
        expiration_date: Option<NaiveDate>,
    ) -> Result<PurchaseOrder> {
        let order = self
            .ledger
            .purchase_order(order_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("purchase order {order_id}")))?;
        let line = order
            .lines
            .iter()
            .find(|l| l.sku == sku)
            .ok_or_else(|| Error::not_found(format!("order line for sku {sku}")))?;
        let item = self
            .ledger
            .item_by_sku(sku, order.location_id)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("sku {sku} at location {}", order.location_id))
            })?;

        self.movements
            .receive(
                ctx,
                actor,
                ReceiveStockRequest {
                    item_id: item.id,
                    quantity,
                    unit_cost: Money::new(line.unit_price, order.subtotal.currency.clone()),
                    batch: Some(NewBatch {
                        batch_number: None,
                        expiration_date,
                        manufacture_date: None,
                        supplier_id: Some(order.supplier_id),
                    }),
                    reason: format!("goods receipt for {}", order.order_number),
                },
            )
            .await?;

        self.reorder.receive_order_line(ctx, order_id, sku, quantity).await
    }

    // === Forecasting queries ===

    pub async fn demand_forecast(
        &self,
        ctx: &OpContext,
        query: GetDemandForecastQuery,
    ) -> Result<DemandForecast> {
        query.validate().map_err(|e| Error::invalid_input(e.to_string()))?;
        self.forecaster.forecast(ctx, query.item_id, query.horizon_days).await
    }

    pub async fn consumption_pattern(
        &self,
        ctx: &OpContext,
        item_id: Uuid,
    ) -> Result<ConsumptionPattern> {
        self.forecaster.consumption_pattern(ctx, item_id).await
    }

    pub async fn stockout_prediction(
        &self,
        ctx: &OpContext,
        item_id: Uuid,
    ) -> Result<StockoutPrediction> {
        let item = self
            .ledger
            .item(item_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("inventory item {item_id}")))?;
        self.forecaster.predict_stockout(ctx, &item).await
    }

    // === Listing queries ===

    pub async fn list_items(
        &self,
        ctx: &OpContext,
        query: ListInventoryItemsQuery,
    ) -> Result<Paginated<InventoryItem>> {
        ctx.check("query.list_items")?;
        self.ledger.list_items(&query.filter, query.sort, &query.page).await
    }

    pub async fn stock_movements(
        &self,
        ctx: &OpContext,
        query: GetStockMovementsQuery,
    ) -> Result<Paginated<StockMovement>> {
        ctx.check("query.stock_movements")?;
        self.ledger.list_movements(&query.filter, &query.page).await
    }

    #[instrument(skip(self, ctx))]
    pub async fn inventory_overview(
        &self,
        ctx: &OpContext,
        query: GetInventoryOverviewQuery,
    ) -> Result<InventoryOverview> {
        ctx.check("query.inventory_overview")?;
        let filter = crate::ledger::ItemFilter {
            location_id: query.location_id,
            ..Default::default()
        };
        let page = Page { page: Some(1), size: Some(1000) };
        let mut counts_by_status: HashMap<ItemStatus, u64> = HashMap::new();
        let mut total_value: HashMap<String, Decimal> = HashMap::new();
        let mut needing_reorder = 0u64;
        let mut total_items = 0u64;
        let mut sku_by_id: HashMap<Uuid, String> = HashMap::new();

        let mut page_number = 1u32;
        loop {
            let current = Page { page: Some(page_number), size: page.size };
            let batch =
                self.ledger.list_items(&filter, Default::default(), &current).await?;
            let fetched = batch.data.len();
            for item in batch.data {
                total_items += 1;
                *counts_by_status.entry(item.status).or_default() += 1;
                *total_value.entry(item.total_value.currency.clone()).or_default() +=
                    item.total_value.amount;
                if item.needs_reorder() {
                    needing_reorder += 1;
                }
                sku_by_id.insert(item.id, item.sku);
            }
            if fetched < page.size() as usize {
                break;
            }
            page_number += 1;
        }

        let top_movers = self.top_movers(ctx, &sku_by_id).await?;
        Ok(InventoryOverview {
            location_id: query.location_id,
            total_items,
            counts_by_status,
            items_needing_reorder: needing_reorder,
            total_value,
            top_movers,
        })
    }

    /// Outbound quantity per SKU over the last 30 days, top five.
    async fn top_movers(
        &self,
        ctx: &OpContext,
        sku_by_id: &HashMap<Uuid, String>,
    ) -> Result<Vec<(String, Decimal)>> {
        ctx.check("query.top_movers")?;
        let filter = MovementFilter {
            direction: Some(MovementDirection::Out),
            from_date: Some(Utc::now() - chrono::Duration::days(30)),
            ..Default::default()
        };
        let mut totals: HashMap<Uuid, Decimal> = HashMap::new();
        let mut page_number = 1u32;
        loop {
            let page = Page { page: Some(page_number), size: Some(1000) };
            let batch = self.ledger.list_movements(&filter, &page).await?;
            let fetched = batch.data.len();
            for movement in batch.data {
                if sku_by_id.contains_key(&movement.item_id) {
                    *totals.entry(movement.item_id).or_default() += movement.quantity.abs();
                }
            }
            if fetched < 1000 {
                break;
            }
            page_number += 1;
        }
        let mut ranked: Vec<(String, Decimal)> = totals
            .into_iter()
            .filter_map(|(id, quantity)| sku_by_id.get(&id).map(|sku| (sku.clone(), quantity)))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(5);
        Ok(ranked)
    }

    // === Purchase order lifecycle ===

    pub async fn approve_order(&self, ctx: &OpContext, order_id: Uuid) -> Result<PurchaseOrder> {
        self.reorder.approve_order(ctx, order_id).await
    }

    pub async fn reject_order(&self, ctx: &OpContext, order_id: Uuid) -> Result<PurchaseOrder> {
        self.reorder.reject_order(ctx, order_id).await
    }

    pub async fn send_order(&self, ctx: &OpContext, order_id: Uuid) -> Result<PurchaseOrder> {
        self.reorder.send_order(ctx, order_id).await
    }

    pub async fn confirm_order(
        &self,
        ctx: &OpContext,
        order_id: Uuid,
        promised_date: Option<chrono::DateTime<Utc>>,
    ) -> Result<PurchaseOrder> {
        self.reorder.confirm_order(ctx, order_id, promised_date).await
    }

    pub async fn cancel_order(&self, ctx: &OpContext, order_id: Uuid) -> Result<PurchaseOrder> {
        self.reorder.cancel_order(ctx, order_id).await
    }

    pub async fn close_order(&self, ctx: &OpContext, order_id: Uuid) -> Result<PurchaseOrder> {
        self.reorder.close_order(ctx, order_id).await
    }

    /// Expiry sweep entry point for the background scheduler.
    pub async fn sweep_expired(&self, ctx: &OpContext, actor: &str) -> Result<Vec<StockMovement>> {
        self.movements.sweep_expired(ctx, actor).await
    }

    async fn publish(&self, event_type: EventType, aggregate_id: Uuid, data: serde_json::Value) {
        let event = DomainEvent::new(event_type, aggregate_id, data);
        if let Err(err) = self.events.publish(event).await {
            warn!(error = %err, event_type = event_type.as_str(), "event publish failed");
        }
    }
}
