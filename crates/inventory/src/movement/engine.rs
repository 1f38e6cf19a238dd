//! Stock movement engine.
//!
//! Each operation runs inside a single ledger transaction: validate, load
//! and version-pin the item, check preconditions, mutate, recompute derived
//! fields, journal the movement(s) as `Completed`, commit. Domain events
//! are dispatched only after the commit succeeds.

use super::{
    AdjustStockRequest, IssueStockRequest, MovementStatus, MovementType, NewBatch,
    ReceiveStockRequest, ReleaseStockRequest, ReserveStockRequest, StockMovement,
    TransferStockRequest,
};
use crate::item::{InventoryBatch, InventoryItem, ItemStatus, QualityStatus, EXPIRY_WARNING_DAYS};
use crate::ledger::{LedgerStore, LedgerTransaction};
use crate::types::Money;
use chrono::Utc;
use roastline_core::{DomainEvent, Error, ErrorKind, EventSink, EventType, OpContext, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

pub struct MovementEngine {
    ledger: Arc<dyn LedgerStore>,
    events: Arc<dyn EventSink>,
}

/// Item counters captured before and after a mutation, for event payloads.
#[derive(Debug, Clone, serde::Serialize)]
struct StockSnapshot {
    current: Decimal,
    reserved: Decimal,
    available: Decimal,
    status: ItemStatus,
}

impl StockSnapshot {
    fn of(item: &InventoryItem) -> Self {
        Self {
            current: item.current_stock,
            reserved: item.reserved_stock,
            available: item.available_stock,
            status: item.status,
        }
    }
}

impl MovementEngine {
    pub fn new(ledger: Arc<dyn LedgerStore>, events: Arc<dyn EventSink>) -> Self {
        Self { ledger, events }
    }

    /// Receive stock, appending a new batch. Perishable items must carry an
    /// expiration date on the batch.
    #[instrument(skip(self, ctx, request), fields(item_id = %request.item_id))]
    pub async fn receive(
        &self,
        ctx: &OpContext,
        actor: &str,
        request: ReceiveStockRequest,
    ) -> Result<StockMovement> {
        validate_request(&request)?;
        require_positive(request.quantity)?;
        if request.unit_cost.amount < Decimal::ZERO {
            return Err(Error::invalid_input("unit cost cannot be negative"));
        }
        ctx.check("movement.receive")?;

        let mut tx = self.ledger.begin().await?;
        let mut item = tx.item_for_update(request.item_id).await?;
        require_operational(&item)?;
        if item.average_cost.currency != request.unit_cost.currency {
            return Err(Error::invalid_input(format!(
                "currency mismatch: item uses {}, receipt is {}",
                item.average_cost.currency, request.unit_cost.currency
            )));
        }
        let batch_details = request.batch.unwrap_or(NewBatch {
            batch_number: None,
            expiration_date: None,
            manufacture_date: None,
            supplier_id: None,
        });
        if item.is_perishable && batch_details.expiration_date.is_none() {
            return Err(Error::invalid_input(
                "perishable items require an expiration date on receipt",
            ));
        }

        let pre = StockSnapshot::of(&item);
        let movement_number = StockMovement::generate_number(MovementType::Receipt);
        let batch_number = batch_details
            .batch_number
            .unwrap_or_else(|| format!("B-{movement_number}"));

        item.batches.push(InventoryBatch {
            id: Uuid::new_v4(),
            batch_number: batch_number.clone(),
            quantity: request.quantity,
            unit_cost: request.unit_cost.clone(),
            expiration_date: batch_details.expiration_date,
            manufacture_date: batch_details.manufacture_date,
            received_date: Utc::now(),
            supplier_id: batch_details.supplier_id,
            quality: QualityStatus::Approved,
            is_active: true,
        });
        item.current_stock += request.quantity;
        item.last_cost = request.unit_cost.clone();
        item.recompute_derived(Utc::now().date_naive());

        let movement = completed_movement(
            MovementType::Receipt,
            movement_number,
            &item,
            request.quantity,
            Some(request.unit_cost),
            None,
            Some(item.location_id),
            Some(batch_number),
            request.reason,
            actor,
        );

        self.commit_one(tx, &mut item, std::slice::from_ref(&movement)).await?;
        self.dispatch(&item, &pre, std::slice::from_ref(&movement)).await;
        Ok(movement)
    }

    /// Issue stock for consumption or sale, deducting batches FIFO by
    /// expiry. One completed movement is journaled per consumed batch.
    #[instrument(skip(self, ctx, request), fields(item_id = %request.item_id))]
    pub async fn issue(
        &self,
        ctx: &OpContext,
        actor: &str,
        request: IssueStockRequest,
    ) -> Result<Vec<StockMovement>> {
        validate_request(&request)?;
        require_positive(request.quantity)?;
        ctx.check("movement.issue")?;

        let mut tx = self.ledger.begin().await?;
        let mut item = tx.item_for_update(request.item_id).await?;
        require_operational(&item)?;
        require_available(&item, request.quantity)?;

        let pre = StockSnapshot::of(&item);
        let issue_cost = item.average_cost.clone();
        let consumed = consume_fifo(&mut item, request.quantity)?;
        item.current_stock -= request.quantity;
        item.recompute_derived(Utc::now().date_naive());

        let movements: Vec<StockMovement> = consumed
            .into_iter()
            .map(|(batch_number, quantity)| {
                completed_movement(
                    MovementType::Issue,
                    StockMovement::generate_number(MovementType::Issue),
                    &item,
                    quantity,
                    Some(issue_cost.clone()),
                    Some(item.location_id),
                    None,
                    Some(batch_number),
                    request.reason.clone(),
                    actor,
                )
            })
            .collect();

        self.commit_one(tx, &mut item, &movements).await?;
        self.dispatch(&item, &pre, &movements).await;
        Ok(movements)
    }

    /// Move stock between locations. The source item is resolved by id, the
    /// target by SKU at the destination; consumed batches carry their cost
    /// and expiry across.
    #[instrument(skip(self, ctx, request), fields(item_id = %request.item_id))]
    pub async fn transfer(
        &self,
        ctx: &OpContext,
        actor: &str,
        request: TransferStockRequest,
    ) -> Result<Vec<StockMovement>> {
        validate_request(&request)?;
        require_positive(request.quantity)?;
        if request.from_location_id == request.to_location_id {
            return Err(Error::new(
                ErrorKind::SameLocation,
                "transfer source and target locations are the same",
            ));
        }
        ctx.check("movement.transfer")?;

        let mut tx = self.ledger.begin().await?;
        let mut source = tx.item_for_update(request.item_id).await?;
        require_operational(&source)?;
        if source.location_id != request.from_location_id {
            return Err(Error::invalid_input(format!(
                "item {} is not stocked at location {}",
                source.sku, request.from_location_id
            )));
        }
        require_available(&source, request.quantity)?;

        let mut target = tx
            .item_by_sku_for_update(&source.sku, request.to_location_id)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!(
                    "sku {} at location {}",
                    source.sku, request.to_location_id
                ))
            })?;
        require_operational(&target)?;

        let pre_source = StockSnapshot::of(&source);
        let pre_target = StockSnapshot::of(&target);
        let today = Utc::now().date_naive();

        let consumed = consume_fifo_detailed(&mut source, request.quantity)?;
        source.current_stock -= request.quantity;
        source.recompute_derived(today);

        let mut movements = Vec::with_capacity(consumed.len());
        for chunk in &consumed {
            target.batches.push(InventoryBatch {
                id: Uuid::new_v4(),
                batch_number: chunk.batch_number.clone(),
                quantity: chunk.quantity,
                unit_cost: chunk.unit_cost.clone(),
                expiration_date: chunk.expiration_date,
                manufacture_date: chunk.manufacture_date,
                received_date: Utc::now(),
                supplier_id: chunk.supplier_id,
                quality: QualityStatus::Approved,
                is_active: true,
            });
            movements.push(completed_movement(
                MovementType::Transfer,
                StockMovement::generate_number(MovementType::Transfer),
                &source,
                chunk.quantity,
                Some(chunk.unit_cost.clone()),
                Some(request.from_location_id),
                Some(request.to_location_id),
                Some(chunk.batch_number.clone()),
                request.reason.clone(),
                actor,
            ));
        }
        target.current_stock += request.quantity;
        target.recompute_derived(today);

        source.touch();
        target.touch();
        ensure_invariants(&source)?;
        ensure_invariants(&target)?;
        tx.update_item(&source).await?;
        tx.update_item(&target).await?;
        for movement in &movements {
            tx.insert_movement(movement).await?;
        }
        tx.commit().await?;

        self.dispatch(&source, &pre_source, &movements).await;
        self.dispatch(&target, &pre_target, &[]).await;
        Ok(movements)
    }

    /// Apply a signed correction. Positive deltas append an adjustment
    /// batch at the current average cost; negative deltas consume FIFO.
    #[instrument(skip(self, ctx, request), fields(item_id = %request.item_id))]
    pub async fn adjust(
        &self,
        ctx: &OpContext,
        actor: &str,
        request: AdjustStockRequest,
    ) -> Result<StockMovement> {
        validate_request(&request)?;
        if request.delta.is_zero() {
            return Err(Error::invalid_input("adjustment delta cannot be zero"));
        }
        ctx.check("movement.adjust")?;

        let mut tx = self.ledger.begin().await?;
        let mut item = tx.item_for_update(request.item_id).await?;
        require_operational(&item)?;

        let new_current = item.current_stock + request.delta;
        if new_current < Decimal::ZERO {
            return Err(Error::new(
                ErrorKind::NegativeStock,
                format!(
                    "adjustment of {} would drive stock below zero (current {})",
                    request.delta, item.current_stock
                ),
            ));
        }
        if new_current < item.reserved_stock {
            return Err(Error::new(
                ErrorKind::InsufficientStock,
                format!(
                    "adjustment of {} would leave stock below the reserved {}",
                    request.delta, item.reserved_stock
                ),
            ));
        }

        let pre = StockSnapshot::of(&item);
        let movement_number = StockMovement::generate_number(MovementType::Adjustment);
        if request.delta > Decimal::ZERO {
            item.batches.push(InventoryBatch {
                id: Uuid::new_v4(),
                batch_number: format!("B-{movement_number}"),
                quantity: request.delta,
                unit_cost: item.average_cost.clone(),
                expiration_date: default_expiry(&item),
                manufacture_date: None,
                received_date: Utc::now(),
                supplier_id: None,
                quality: QualityStatus::Approved,
                is_active: true,
            });
        } else {
            consume_fifo(&mut item, -request.delta)?;
        }
        item.current_stock = new_current;
        item.recompute_derived(Utc::now().date_naive());

        let movement = completed_movement(
            MovementType::Adjustment,
            movement_number,
            &item,
            request.delta,
            Some(item.average_cost.clone()),
            None,
            None,
            None,
            request.reason,
            actor,
        );

        self.commit_one(tx, &mut item, std::slice::from_ref(&movement)).await?;
        self.dispatch(&item, &pre, std::slice::from_ref(&movement)).await;
        Ok(movement)
    }

    /// Earmark stock without shipping it: `reserved += q`.
    #[instrument(skip(self, ctx, request), fields(item_id = %request.item_id))]
    pub async fn reserve(
        &self,
        ctx: &OpContext,
        actor: &str,
        request: ReserveStockRequest,
    ) -> Result<StockMovement> {
        validate_request(&request)?;
        require_positive(request.quantity)?;
        ctx.check("movement.reserve")?;

        let mut tx = self.ledger.begin().await?;
        let mut item = tx.item_for_update(request.item_id).await?;
        require_operational(&item)?;
        require_available(&item, request.quantity)?;

        let pre = StockSnapshot::of(&item);
        item.reserved_stock += request.quantity;
        item.recompute_derived(Utc::now().date_naive());

        let movement = completed_movement(
            MovementType::Reservation,
            StockMovement::generate_number(MovementType::Reservation),
            &item,
            request.quantity,
            None,
            None,
            None,
            None,
            request.reason,
            actor,
        );

        self.commit_one(tx, &mut item, std::slice::from_ref(&movement)).await?;
        self.dispatch(&item, &pre, std::slice::from_ref(&movement)).await;
        Ok(movement)
    }

    /// Release a prior reservation: `reserved -= q`.
    #[instrument(skip(self, ctx, request), fields(item_id = %request.item_id))]
    pub async fn release(
        &self,
        ctx: &OpContext,
        actor: &str,
        request: ReleaseStockRequest,
    ) -> Result<StockMovement> {
        validate_request(&request)?;
        require_positive(request.quantity)?;
        ctx.check("movement.release")?;

        let mut tx = self.ledger.begin().await?;
        let mut item = tx.item_for_update(request.item_id).await?;
        if item.reserved_stock < request.quantity {
            return Err(Error::new(
                ErrorKind::InvalidReservation,
                format!(
                    "release of {} exceeds reserved {}",
                    request.quantity, item.reserved_stock
                ),
            ));
        }

        let pre = StockSnapshot::of(&item);
        item.reserved_stock -= request.quantity;
        item.recompute_derived(Utc::now().date_naive());

        let movement = completed_movement(
            MovementType::Release,
            StockMovement::generate_number(MovementType::Release),
            &item,
            request.quantity,
            None,
            None,
            None,
            None,
            request.reason,
            actor,
        );

        self.commit_one(tx, &mut item, std::slice::from_ref(&movement)).await?;
        self.dispatch(&item, &pre, std::slice::from_ref(&movement)).await;
        Ok(movement)
    }

    /// Write off batches that are past their expiration date and flag
    /// batches entering the warning window. Each affected item commits in
    /// its own transaction.
    #[instrument(skip(self, ctx))]
    pub async fn sweep_expired(&self, ctx: &OpContext, actor: &str) -> Result<Vec<StockMovement>> {
        ctx.check("movement.sweep_expired")?;
        let today = Utc::now().date_naive();
        let candidates = self.ledger.expiring_items(EXPIRY_WARNING_DAYS, None).await?;

        let mut written_off = Vec::new();
        for candidate in candidates {
            ctx.check("movement.sweep_expired")?;
            let expired_total: Decimal = candidate
                .active_batches()
                .filter(|b| b.is_expired(today))
                .map(|b| b.quantity)
                .sum();

            if expired_total.is_zero() {
                // Only in the warning window; raise the alert and move on.
                self.emit_expiring_batch(&candidate, today).await;
                continue;
            }
            if candidate.current_stock - expired_total < candidate.reserved_stock {
                warn!(
                    item_id = %candidate.id,
                    sku = %candidate.sku,
                    "expired stock still covered by reservations, skipping write-off"
                );
                continue;
            }

            let mut tx = self.ledger.begin().await?;
            let mut item = tx.item_for_update(candidate.id).await?;
            let pre = StockSnapshot::of(&item);
            let write_off_cost = item.average_cost.clone();

            let mut movements = Vec::new();
            for batch in item.batches.iter_mut().filter(|b| b.is_active && b.is_expired(today)) {
                batch.is_active = false;
                batch.quality = QualityStatus::Expired;
                movements.push((batch.batch_number.clone(), batch.quantity));
                batch.quantity = Decimal::ZERO;
            }
            let total: Decimal = movements.iter().map(|(_, q)| *q).sum();
            item.current_stock -= total;
            item.recompute_derived(today);

            let movements: Vec<StockMovement> = movements
                .into_iter()
                .map(|(batch_number, quantity)| {
                    completed_movement(
                        MovementType::Consumption,
                        StockMovement::generate_number(MovementType::Consumption),
                        &item,
                        quantity,
                        Some(write_off_cost.clone()),
                        Some(item.location_id),
                        None,
                        Some(batch_number),
                        "expired write-off".to_string(),
                        actor,
                    )
                })
                .collect();

            self.commit_one(tx, &mut item, &movements).await?;
            self.dispatch(&item, &pre, &movements).await;
            info!(item_id = %item.id, sku = %item.sku, quantity = %total, "expired stock written off");
            written_off.extend(movements);
        }
        Ok(written_off)
    }

    async fn commit_one(
        &self,
        mut tx: Box<dyn LedgerTransaction>,
        item: &mut InventoryItem,
        movements: &[StockMovement],
    ) -> Result<()> {
        item.touch();
        ensure_invariants(item)?;
        tx.update_item(item).await?;
        for movement in movements {
            tx.insert_movement(movement).await?;
        }
        tx.commit().await
    }

    /// Post-commit event dispatch: `StockMovementCompleted` per movement,
    /// plus threshold alerts when this mutation crossed them.
    async fn dispatch(&self, item: &InventoryItem, pre: &StockSnapshot, movements: &[StockMovement]) {
        let post = StockSnapshot::of(item);
        for movement in movements {
            self.publish(
                EventType::StockMovementCompleted,
                item.id,
                serde_json::json!({
                    "movement_id": movement.id,
                    "movement_number": movement.movement_number,
                    "movement_type": movement.movement_type,
                    "item_id": item.id,
                    "sku": item.sku,
                    "quantity": movement.quantity,
                    "pre": pre,
                    "post": post,
                    "completed_at": movement.completed_at,
                }),
            )
            .await;
        }

        let alert_payload = serde_json::json!({
            "item_id": item.id,
            "sku": item.sku,
            "location_id": item.location_id,
            "pre": pre,
            "post": post,
        });
        if post.current.is_zero() && !pre.current.is_zero() {
            self.publish(EventType::OutOfStockAlert, item.id, alert_payload.clone()).await;
        } else if post.status == ItemStatus::LowStock && pre.status != ItemStatus::LowStock {
            self.publish(EventType::LowStockAlert, item.id, alert_payload.clone()).await;
        }
        let was_needing = pre.current <= item.reorder_point;
        if item.needs_reorder() && !was_needing {
            self.publish(EventType::ReorderNeeded, item.id, alert_payload.clone()).await;
        }
        if post.status == ItemStatus::Expiring && pre.status != ItemStatus::Expiring {
            self.publish(EventType::ExpiringBatch, item.id, alert_payload).await;
        }
    }

    async fn emit_expiring_batch(&self, item: &InventoryItem, today: chrono::NaiveDate) {
        let batches: Vec<_> = item
            .active_batches()
            .filter(|b| b.expires_within(today, EXPIRY_WARNING_DAYS))
            .map(|b| {
                serde_json::json!({
                    "batch_number": b.batch_number,
                    "quantity": b.quantity,
                    "expiration_date": b.expiration_date,
                })
            })
            .collect();
        if batches.is_empty() {
            return;
        }
        self.publish(
            EventType::ExpiringBatch,
            item.id,
            serde_json::json!({
                "item_id": item.id,
                "sku": item.sku,
                "location_id": item.location_id,
                "batches": batches,
            }),
        )
        .await;
    }

    /// Event delivery is at-least-once; a sink failure is logged and the
    /// committed movement stands.
    async fn publish(&self, event_type: EventType, aggregate_id: Uuid, data: serde_json::Value) {
        let event = DomainEvent::new(event_type, aggregate_id, data);
        if let Err(err) = self.events.publish(event).await {
            warn!(error = %err, event_type = event_type.as_str(), "event publish failed");
        }
    }
}

fn validate_request<T: Validate>(request: &T) -> Result<()> {
    request.validate().map_err(|e| Error::invalid_input(e.to_string()))
}

fn require_positive(quantity: Decimal) -> Result<()> {
    if quantity <= Decimal::ZERO {
        return Err(Error::invalid_input(format!("quantity must be positive, got {quantity}")));
    }
    Ok(())
}

fn require_operational(item: &InventoryItem) -> Result<()> {
    if !item.is_operational() {
        return Err(Error::new(
            ErrorKind::ItemInactive,
            format!("item {} is discontinued", item.sku),
        ));
    }
    Ok(())
}

fn require_available(item: &InventoryItem, quantity: Decimal) -> Result<()> {
    if item.available_stock < quantity {
        return Err(Error::new(
            ErrorKind::InsufficientStock,
            format!(
                "requested {} but only {} available for {}",
                quantity, item.available_stock, item.sku
            ),
        )
        .with_resource(item.sku.clone()));
    }
    Ok(())
}

fn ensure_invariants(item: &InventoryItem) -> Result<()> {
    item.check_invariants().map_err(|violation| {
        Error::internal(format!("invariant violated for item {}: {violation}", item.sku))
    })
}

/// Adjustment batches on perishable items inherit the shelf life.
fn default_expiry(item: &InventoryItem) -> Option<chrono::NaiveDate> {
    if !item.is_perishable {
        return None;
    }
    item.shelf_life_days
        .map(|days| Utc::now().date_naive() + chrono::Duration::days(days as i64))
}

/// Consume `quantity` from active batches in FIFO-by-expiry order.
/// Returns `(batch_number, quantity)` per touched batch.
fn consume_fifo(item: &mut InventoryItem, quantity: Decimal) -> Result<Vec<(String, Decimal)>> {
    Ok(consume_fifo_detailed(item, quantity)?
        .into_iter()
        .map(|c| (c.batch_number, c.quantity))
        .collect())
}

struct ConsumedChunk {
    batch_number: String,
    quantity: Decimal,
    unit_cost: Money,
    expiration_date: Option<chrono::NaiveDate>,
    manufacture_date: Option<chrono::NaiveDate>,
    supplier_id: Option<Uuid>,
}

fn consume_fifo_detailed(item: &mut InventoryItem, quantity: Decimal) -> Result<Vec<ConsumedChunk>> {
    let order = item.fifo_batch_ids();
    let mut remaining = quantity;
    let mut consumed = Vec::new();
    for batch_id in order {
        if remaining.is_zero() {
            break;
        }
        let batch = item
            .batches
            .iter_mut()
            .find(|b| b.id == batch_id)
            .ok_or_else(|| Error::internal("fifo order referenced a missing batch"))?;
        let take = batch.quantity.min(remaining);
        batch.quantity -= take;
        if batch.quantity.is_zero() {
            batch.is_active = false;
        }
        remaining -= take;
        consumed.push(ConsumedChunk {
            batch_number: batch.batch_number.clone(),
            quantity: take,
            unit_cost: batch.unit_cost.clone(),
            expiration_date: batch.expiration_date,
            manufacture_date: batch.manufacture_date,
            supplier_id: batch.supplier_id,
        });
    }
    if !remaining.is_zero() {
        // Batches under-cover the counter; the invariant check would have
        // caught this before any prior commit.
        return Err(Error::internal(format!(
            "batch stock under-covers requested quantity by {remaining}"
        )));
    }
    Ok(consumed)
}

#[allow(clippy::too_many_arguments)]
fn completed_movement(
    movement_type: MovementType,
    movement_number: String,
    item: &InventoryItem,
    quantity: Decimal,
    unit_cost: Option<Money>,
    from_location_id: Option<Uuid>,
    to_location_id: Option<Uuid>,
    batch_number: Option<String>,
    reason: String,
    actor: &str,
) -> StockMovement {
    let now = Utc::now();
    StockMovement {
        id: Uuid::new_v4(),
        movement_number,
        movement_type,
        direction: movement_type.direction(),
        item_id: item.id,
        quantity,
        unit_cost,
        from_location_id,
        to_location_id,
        batch_number,
        reason,
        status: MovementStatus::Completed,
        processed_by: actor.to_string(),
        created_at: now,
        completed_at: Some(now),
    }
}
