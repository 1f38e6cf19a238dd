//! Shared fixtures for the integration suites: an in-memory ledger wired
//! into the full service, plus seed helpers.
#![allow(dead_code)]

use chrono::{NaiveDate, Utc};
use roastline_core::config::ReorderConfig;
use roastline_core::{MemoryEventSink, OpContext, ResilienceManager};
use roastline_inventory::item::{ItemStatus, ReorderRules, StorageRequirements};
use roastline_inventory::ledger::LedgerStore;
use roastline_inventory::supplier::{
    PriceTier, Supplier, SupplierPerformance, SupplierProduct, SupplierStatus,
};
use roastline_inventory::{
    InventoryItem, InventoryService, ItemCategory, MemoryLedger, Money, UnitOfMeasure,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

pub const ACTOR: &str = "integration-test";

static TRACING: std::sync::Once = std::sync::Once::new();

/// Honors `RUST_LOG` when debugging a failing suite.
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub struct Harness {
    pub ledger: Arc<MemoryLedger>,
    pub events: Arc<MemoryEventSink>,
    pub service: InventoryService,
    pub ctx: OpContext,
}

pub fn harness() -> Harness {
    harness_with_config(ReorderConfig::default())
}

pub fn harness_with_config(config: ReorderConfig) -> Harness {
    init_tracing();
    let ledger = Arc::new(MemoryLedger::new());
    let events = Arc::new(MemoryEventSink::new());
    let service = InventoryService::new(
        ledger.clone(),
        events.clone(),
        Arc::new(ResilienceManager::new()),
        config,
    );
    Harness { ledger, events, service, ctx: OpContext::background() }
}

pub fn item_at(location_id: Uuid, sku: &str) -> InventoryItem {
    let now = Utc::now();
    InventoryItem {
        id: Uuid::new_v4(),
        sku: sku.to_string(),
        name: format!("Test item {sku}"),
        unit: UnitOfMeasure::Kilogram,
        category: ItemCategory::CoffeeBeans,
        location_id,
        current_stock: Decimal::ZERO,
        reserved_stock: Decimal::ZERO,
        available_stock: Decimal::ZERO,
        minimum_stock: Decimal::from(20),
        maximum_stock: Decimal::from(500),
        reorder_point: Decimal::from(30),
        reorder_quantity: Decimal::from(50),
        safety_stock: Decimal::from(10),
        unit_cost: Money::usd(Decimal::ZERO),
        last_cost: Money::usd(Decimal::ZERO),
        average_cost: Money::usd(Decimal::ZERO),
        total_value: Money::usd(Decimal::ZERO),
        is_perishable: false,
        shelf_life_days: None,
        storage: StorageRequirements::default(),
        batches: Vec::new(),
        reorder_rules: ReorderRules::default(),
        status: ItemStatus::Active,
        created_at: now,
        updated_at: now,
        version: 1,
    }
}

pub async fn seed_item(harness: &Harness, item: &InventoryItem) {
    let mut tx = harness.ledger.begin().await.unwrap();
    tx.insert_item(item).await.unwrap();
    tx.commit().await.unwrap();
}

pub fn supplier_named(name: &str, preferred: bool, on_time: f64, rating: f64) -> Supplier {
    let now = Utc::now();
    Supplier {
        id: Uuid::new_v4(),
        code: format!("SUP-{name}"),
        name: name.to_string(),
        status: SupplierStatus::Active,
        rating,
        is_preferred: preferred,
        payment_terms: "Net 30".to_string(),
        delivery_terms: "FOB".to_string(),
        currency: "USD".to_string(),
        performance: SupplierPerformance {
            on_time_delivery_rate: on_time,
            quality_reject_rate: 0.02,
            order_fulfillment_rate: 0.98,
            total_orders: 20,
            last_order_date: None,
        },
        created_at: now,
        updated_at: now,
        version: 1,
    }
}

pub async fn seed_supplier(
    harness: &Harness,
    supplier: &Supplier,
    sku: &str,
    unit_price_cents: i64,
    lead_time_days: u32,
) {
    let product = SupplierProduct {
        id: Uuid::new_v4(),
        supplier_id: supplier.id,
        sku: sku.to_string(),
        minimum_order_quantity: Decimal::from(10),
        lead_time_days,
        price_tiers: vec![PriceTier {
            min_quantity: Decimal::ZERO,
            unit_price: Decimal::new(unit_price_cents, 2),
        }],
    };
    let mut tx = harness.ledger.begin().await.unwrap();
    tx.insert_supplier(supplier).await.unwrap();
    tx.insert_supplier_product(&product).await.unwrap();
    tx.commit().await.unwrap();
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

impl Harness {
    pub async fn ledger_item(&self, id: Uuid) -> InventoryItem {
        self.ledger.item(id).await.unwrap().expect("item exists")
    }
}
