//! Reorder engine: evaluates reorder needs, ranks suppliers, and turns
//! surviving recommendations into purchase orders.

use super::order::{OrderLine, OrderPriority, OrderStatus, PurchaseOrder};
use super::{
    economic_order_quantity, priority_for, urgency_score, RankedSupplier, ReorderCriteria,
    ReorderPriority, ReorderRecommendation,
};
use crate::forecast::DemandForecaster;
use crate::item::{InventoryItem, ReorderMethod};
use crate::ledger::{LedgerStore, SupplierOffer};
use crate::types::Money;
use chrono::{Duration, Utc};
use roastline_core::config::ReorderConfig;
use roastline_core::{DomainEvent, Error, EventSink, EventType, OpContext, Result};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Forecast-based recommendations add this safety margin on top of the
/// predicted demand.
const FORECAST_SAFETY_MARGIN: f64 = 1.2;
/// Lead time assumed when no supplier carries the SKU yet.
const DEFAULT_LEAD_TIME_DAYS: u32 = 7;

pub struct ReorderEngine {
    ledger: Arc<dyn LedgerStore>,
    forecaster: Arc<DemandForecaster>,
    events: Arc<dyn EventSink>,
    config: ReorderConfig,
}

impl ReorderEngine {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        forecaster: Arc<DemandForecaster>,
        events: Arc<dyn EventSink>,
        config: ReorderConfig,
    ) -> Self {
        Self { ledger, forecaster, events, config }
    }

    /// Compute reorder recommendations for items at or below their reorder
    /// point, applying the caller's criteria filters.
    #[instrument(skip(self, ctx, criteria))]
    pub async fn evaluate(
        &self,
        ctx: &OpContext,
        location_id: Option<Uuid>,
        criteria: &ReorderCriteria,
    ) -> Result<Vec<ReorderRecommendation>> {
        ctx.check("reorder.evaluate")?;
        let items = self.ledger.items_needing_reorder(location_id).await?;
        debug!(candidates = items.len(), "evaluating reorder candidates");

        let mut recommendations = Vec::new();
        for item in items {
            ctx.check("reorder.evaluate")?;
            if criteria.excluded_items.contains(&item.id) {
                continue;
            }
            if let Some(categories) = &criteria.categories {
                if !categories.contains(&item.category) {
                    continue;
                }
            }

            let pattern = self.forecaster.consumption_pattern(ctx, item.id).await?;
            let offers = self.ledger.suppliers_for_sku(&item.sku).await?;
            let quantity = self
                .recommended_quantity(ctx, &item, pattern.average_daily, &offers)
                .await?;
            let suppliers = rank_suppliers(&offers, quantity, criteria);

            let urgency = urgency_score(&item, pattern.average_daily);
            if let Some(min_urgency) = criteria.min_urgency {
                if urgency < min_urgency {
                    continue;
                }
            }

            let estimated_cost = suppliers
                .first()
                .map(|s| s.total_cost)
                .unwrap_or_else(|| item.unit_cost.amount * quantity);
            if let Some(max_value) = criteria.max_order_value {
                if estimated_cost > max_value {
                    continue;
                }
            }

            recommendations.push(ReorderRecommendation {
                item_id: item.id,
                sku: item.sku.clone(),
                name: item.name.clone(),
                location_id: item.location_id,
                category: item.category,
                current_stock: item.current_stock,
                available_stock: item.available_stock,
                reorder_point: item.reorder_point,
                recommended_quantity: quantity,
                method: item.reorder_rules.method,
                urgency_score: urgency,
                priority: priority_for(&item, urgency),
                suppliers,
                estimated_cost,
            });
        }

        recommendations.sort_by(|a, b| b.urgency_score.cmp(&a.urgency_score));
        Ok(recommendations)
    }

    async fn recommended_quantity(
        &self,
        ctx: &OpContext,
        item: &InventoryItem,
        average_daily: f64,
        offers: &[SupplierOffer],
    ) -> Result<Decimal> {
        let quantity = match item.reorder_rules.method {
            ReorderMethod::Fixed => item.reorder_quantity,
            ReorderMethod::EconomicOrderQuantity => {
                let annual_demand = if average_daily > 0.0 {
                    average_daily * 365.0
                } else {
                    // No history yet: size the year from the reorder quantity.
                    item.reorder_quantity.to_f64().unwrap_or(0.0) * 12.0
                };
                economic_order_quantity(
                    annual_demand,
                    item.reorder_rules.setup_cost,
                    item.reorder_rules.holding_rate,
                    item.unit_cost.amount,
                )
                .map(|eoq| eoq.max(item.reorder_quantity))
                .unwrap_or(item.reorder_quantity)
            }
            ReorderMethod::ForecastBased => {
                let lead_time = offers
                    .iter()
                    .map(|o| o.product.lead_time_days)
                    .min()
                    .unwrap_or(DEFAULT_LEAD_TIME_DAYS);
                let horizon = self.config.safety_stock_days + lead_time;
                let forecast = self.forecaster.forecast(ctx, item.id, horizon).await?;
                let available = item.available_stock.to_f64().unwrap_or(0.0);
                let needed = forecast.total_demand * FORECAST_SAFETY_MARGIN - available;
                Decimal::from_f64(needed.ceil())
                    .map(|q| q.max(item.reorder_quantity))
                    .unwrap_or(item.reorder_quantity)
            }
        };
        Ok(quantity.max(Decimal::ZERO))
    }

    /// Run a full reorder pass: evaluate, group by top-ranked supplier, and
    /// persist one purchase order per supplier.
    #[instrument(skip(self, ctx, criteria))]
    pub async fn process(
        &self,
        ctx: &OpContext,
        actor: &str,
        location_id: Option<Uuid>,
        criteria: &ReorderCriteria,
    ) -> Result<Vec<PurchaseOrder>> {
        let recommendations = self.evaluate(ctx, location_id, criteria).await?;

        let mut groups: HashMap<Uuid, Vec<ReorderRecommendation>> = HashMap::new();
        for recommendation in recommendations {
            match recommendation.top_supplier() {
                Some(top) => groups.entry(top.supplier_id).or_default().push(recommendation),
                None => warn!(
                    sku = %recommendation.sku,
                    "no active supplier carries this sku, skipping"
                ),
            }
        }

        let mut orders = Vec::with_capacity(groups.len());
        for (supplier_id, group) in groups {
            ctx.check("reorder.process")?;
            let supplier = self
                .ledger
                .supplier(supplier_id)
                .await?
                .ok_or_else(|| Error::not_found(format!("supplier {supplier_id}")))?;

            let order = self.build_order(actor, &supplier, &group)?;
            let mut tx = self.ledger.begin().await?;
            tx.insert_purchase_order(&order).await?;
            tx.commit().await?;

            self.publish(
                EventType::PurchaseOrderCreated,
                order.id,
                serde_json::json!({
                    "order_id": order.id,
                    "order_number": order.order_number,
                    "supplier_id": order.supplier_id,
                    "location_id": order.location_id,
                    "status": order.status,
                    "total": order.total,
                    "lines": order.lines.len(),
                }),
            )
            .await;
            info!(
                order_number = %order.order_number,
                supplier = %supplier.name,
                lines = order.lines.len(),
                status = ?order.status,
                "purchase order created"
            );
            orders.push(order);
        }
        Ok(orders)
    }

    fn build_order(
        &self,
        actor: &str,
        supplier: &crate::supplier::Supplier,
        group: &[ReorderRecommendation],
    ) -> Result<PurchaseOrder> {
        let first = group.first().ok_or_else(|| Error::internal("empty reorder group"))?;
        let top = first
            .top_supplier()
            .ok_or_else(|| Error::internal("grouped recommendation lost its supplier"))?;
        let currency = supplier.currency.clone();
        let now = Utc::now();

        let lines: Vec<OrderLine> = group
            .iter()
            .map(|rec| {
                let ranked = rec
                    .suppliers
                    .iter()
                    .find(|s| s.supplier_id == supplier.id)
                    .unwrap_or(top);
                OrderLine::new(
                    rec.sku.clone(),
                    rec.name.clone(),
                    rec.recommended_quantity,
                    ranked.unit_price,
                )
            })
            .collect();

        let lead_time = group
            .iter()
            .filter_map(|rec| {
                rec.suppliers
                    .iter()
                    .find(|s| s.supplier_id == supplier.id)
                    .map(|s| s.lead_time_days)
            })
            .max()
            .unwrap_or(DEFAULT_LEAD_TIME_DAYS);

        let priority = group
            .iter()
            .map(|r| r.priority)
            .max_by_key(|p| match p {
                ReorderPriority::Low => 0,
                ReorderPriority::Medium => 1,
                ReorderPriority::High => 2,
                ReorderPriority::Critical => 3,
            })
            .unwrap_or(ReorderPriority::Low);

        let mut order = PurchaseOrder {
            id: Uuid::new_v4(),
            order_number: PurchaseOrder::generate_number(),
            supplier_id: supplier.id,
            location_id: first.location_id,
            created_by: actor.to_string(),
            status: OrderStatus::Draft,
            priority: match priority {
                ReorderPriority::Critical => OrderPriority::Critical,
                ReorderPriority::High => OrderPriority::High,
                ReorderPriority::Medium => OrderPriority::Normal,
                ReorderPriority::Low => OrderPriority::Low,
            },
            subtotal: Money::zero(currency.clone()),
            tax: Money::zero(currency.clone()),
            shipping: Money::zero(currency.clone()),
            discount: Money::zero(currency.clone()),
            total: Money::zero(currency),
            payment_terms: supplier.payment_terms.clone(),
            delivery_terms: supplier.delivery_terms.clone(),
            requested_date: now,
            ordered_date: None,
            confirmed_date: None,
            promised_date: Some(now + Duration::days(lead_time as i64)),
            shipped_date: None,
            delivered_date: None,
            cancelled_date: None,
            lines,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        order.recompute_totals();
        order.submit()?;

        // Approval gate: large orders wait for a human, the rest
        // auto-approve.
        let threshold = Decimal::from_f64(self.config.approval_threshold)
            .unwrap_or(Decimal::ZERO);
        let needs_approval = self.config.require_approval && order.total.amount > threshold;
        if !needs_approval {
            order.approve()?;
        }
        Ok(order)
    }

    /// Apply one state-machine transition to a stored order.
    async fn modify_order<F>(&self, ctx: &OpContext, order_id: Uuid, apply: F) -> Result<PurchaseOrder>
    where
        F: FnOnce(&mut PurchaseOrder) -> Result<()>,
    {
        ctx.check("reorder.modify_order")?;
        let mut tx = self.ledger.begin().await?;
        let mut order = tx.purchase_order_for_update(order_id).await?;
        let previous = order.status;
        apply(&mut order)?;
        order.touch();
        tx.update_purchase_order(&order).await?;
        tx.commit().await?;

        self.publish(
            EventType::PurchaseOrderStatusChanged,
            order.id,
            serde_json::json!({
                "order_id": order.id,
                "order_number": order.order_number,
                "from": previous,
                "to": order.status,
            }),
        )
        .await;
        Ok(order)
    }

    pub async fn approve_order(&self, ctx: &OpContext, order_id: Uuid) -> Result<PurchaseOrder> {
        self.modify_order(ctx, order_id, |o| o.approve()).await
    }

    pub async fn reject_order(&self, ctx: &OpContext, order_id: Uuid) -> Result<PurchaseOrder> {
        self.modify_order(ctx, order_id, |o| o.reject()).await
    }

    pub async fn send_order(&self, ctx: &OpContext, order_id: Uuid) -> Result<PurchaseOrder> {
        self.modify_order(ctx, order_id, |o| o.send(Utc::now())).await
    }

    pub async fn confirm_order(
        &self,
        ctx: &OpContext,
        order_id: Uuid,
        promised_date: Option<chrono::DateTime<Utc>>,
    ) -> Result<PurchaseOrder> {
        self.modify_order(ctx, order_id, |o| o.confirm(Utc::now(), promised_date)).await
    }

    pub async fn cancel_order(&self, ctx: &OpContext, order_id: Uuid) -> Result<PurchaseOrder> {
        self.modify_order(ctx, order_id, |o| o.cancel(Utc::now())).await
    }

    pub async fn close_order(&self, ctx: &OpContext, order_id: Uuid) -> Result<PurchaseOrder> {
        self.modify_order(ctx, order_id, |o| o.close()).await
    }

    /// Record goods received against an order line. When the receipt
    /// completes the order, the supplier's delivery performance is folded
    /// in within the same transaction.
    pub async fn receive_order_line(
        &self,
        ctx: &OpContext,
        order_id: Uuid,
        sku: &str,
        quantity: Decimal,
    ) -> Result<PurchaseOrder> {
        ctx.check("reorder.receive_order_line")?;
        let now = Utc::now();
        let mut tx = self.ledger.begin().await?;
        let mut order = tx.purchase_order_for_update(order_id).await?;
        let previous = order.status;
        order.receive_line(sku, quantity, now)?;
        order.touch();
        tx.update_purchase_order(&order).await?;

        if order.status == OrderStatus::Received {
            if let Ok(mut supplier) = tx.supplier_for_update(order.supplier_id).await {
                let on_time = order.promised_date.is_none_or(|p| now <= p);
                let ordered: Decimal = order.lines.iter().map(|l| l.quantity_ordered).sum();
                let received: Decimal = order.lines.iter().map(|l| l.quantity_received).sum();
                let fulfillment = if ordered.is_zero() {
                    1.0
                } else {
                    (received / ordered).to_f64().unwrap_or(1.0)
                };
                supplier.record_delivery(on_time, fulfillment, now);
                supplier.updated_at = now;
                supplier.version += 1;
                tx.update_supplier(&supplier).await?;
            }
        }
        tx.commit().await?;

        self.publish(
            EventType::PurchaseOrderStatusChanged,
            order.id,
            serde_json::json!({
                "order_id": order.id,
                "order_number": order.order_number,
                "from": previous,
                "to": order.status,
                "completion_percent": order.completion_percent(),
            }),
        )
        .await;
        Ok(order)
    }

    async fn publish(&self, event_type: EventType, aggregate_id: Uuid, data: serde_json::Value) {
        let event = DomainEvent::new(event_type, aggregate_id, data);
        if let Err(err) = self.events.publish(event).await {
            warn!(error = %err, event_type = event_type.as_str(), "event publish failed");
        }
    }
}

/// Rank candidate suppliers: preferred flag first, then reliability, then
/// total cost at the recommended quantity. Criteria filters drop
/// candidates before ranking.
fn rank_suppliers(
    offers: &[SupplierOffer],
    quantity: Decimal,
    criteria: &ReorderCriteria,
) -> Vec<RankedSupplier> {
    let mut ranked: Vec<RankedSupplier> = offers
        .iter()
        .filter(|offer| {
            criteria
                .preferred_suppliers
                .as_ref()
                .is_none_or(|allowed| allowed.contains(&offer.supplier.id))
        })
        .filter(|offer| {
            criteria.max_lead_time_days.is_none_or(|max| offer.product.lead_time_days <= max)
        })
        .filter(|offer| criteria.min_quality_rating.is_none_or(|min| offer.supplier.rating >= min))
        .filter_map(|offer| {
            let effective_quantity = quantity.max(offer.product.minimum_order_quantity);
            let unit_price = offer.product.unit_price_at(effective_quantity)?;
            Some(RankedSupplier {
                supplier_id: offer.supplier.id,
                supplier_name: offer.supplier.name.clone(),
                is_preferred: offer.supplier.is_preferred,
                reliability: offer.supplier.reliability_score(),
                rating: offer.supplier.rating,
                unit_price,
                total_cost: unit_price * effective_quantity,
                lead_time_days: offer.product.lead_time_days,
                minimum_order_quantity: offer.product.minimum_order_quantity,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.is_preferred
            .cmp(&a.is_preferred)
            .then(b.reliability.partial_cmp(&a.reliability).unwrap_or(std::cmp::Ordering::Equal))
            .then(a.total_cost.cmp(&b.total_cost))
    });
    ranked
}
