//! Domain events and the outbound event sink port.
//!
//! Events are dispatched after the owning transaction commits. Delivery is
//! at-least-once and ordered per aggregate; consumers de-duplicate on
//! `event_id`.

use crate::error::{Error, ErrorKind, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Enumerated event types published by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    StockMovementCompleted,
    LowStockAlert,
    OutOfStockAlert,
    ReorderNeeded,
    ExpiringBatch,
    PurchaseOrderCreated,
    PurchaseOrderStatusChanged,
    InventoryItemCreated,
    InventoryItemUpdated,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::StockMovementCompleted => "stock_movement.completed",
            EventType::LowStockAlert => "inventory.low_stock",
            EventType::OutOfStockAlert => "inventory.out_of_stock",
            EventType::ReorderNeeded => "inventory.reorder_needed",
            EventType::ExpiringBatch => "inventory.expiring_batch",
            EventType::PurchaseOrderCreated => "purchase_order.created",
            EventType::PurchaseOrderStatusChanged => "purchase_order.status_changed",
            EventType::InventoryItemCreated => "inventory_item.created",
            EventType::InventoryItemUpdated => "inventory_item.updated",
        }
    }
}

/// A single domain event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    /// Aggregate the event belongs to (item id, order id).
    pub aggregate_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl DomainEvent {
    pub fn new(event_type: EventType, aggregate_id: Uuid, data: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            aggregate_id,
            occurred_at: Utc::now(),
            data,
        }
    }
}

/// Outbound port for the domain-event stream.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: DomainEvent) -> Result<()>;
}

/// Sink backed by a bounded channel; the consumer side drains into the
/// messaging transport. A full channel applies backpressure to publishers.
pub struct ChannelEventSink {
    tx: mpsc::Sender<DomainEvent>,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DomainEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        tracing::debug!(
            event_id = %event.event_id,
            event_type = event.event_type.as_str(),
            aggregate_id = %event.aggregate_id,
            "publishing domain event"
        );
        self.tx.send(event).await.map_err(|_| {
            Error::new(ErrorKind::MessagingUnavailable, "event channel closed")
                .with_component("event_sink")
        })
    }
}

/// Sink that records events in memory; used by tests and embedded tooling.
#[derive(Default, Clone)]
pub struct MemoryEventSink {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().await.clone()
    }

    pub async fn events_of_type(&self, event_type: EventType) -> Vec<DomainEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub async fn clear(&self) {
        self.events.lock().await.clear();
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}
