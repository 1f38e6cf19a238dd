//! End-to-end movement engine behavior over the in-memory ledger.

mod common;

use chrono::{Duration, Utc};
use common::{date, harness, item_at, seed_item, ACTOR};
use roastline_core::{ErrorKind, EventType};
use roastline_inventory::item::ItemStatus;
use roastline_inventory::ledger::{LedgerStore, MovementFilter};
use roastline_inventory::movement::{
    AdjustStockRequest, IssueStockRequest, MovementStatus, NewBatch, ReceiveStockRequest,
    ReleaseStockRequest, ReserveStockRequest, TransferStockRequest,
};
use roastline_inventory::types::Page;
use roastline_inventory::Money;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

fn receive(item_id: Uuid, quantity: i64, cost_cents: i64) -> ReceiveStockRequest {
    ReceiveStockRequest {
        item_id,
        quantity: Decimal::from(quantity),
        unit_cost: Money::usd(Decimal::new(cost_cents, 2)),
        batch: None,
        reason: "purchase receipt".to_string(),
    }
}

#[tokio::test]
async fn receive_then_issue_updates_costs_and_values() {
    let h = harness();
    let location = Uuid::new_v4();
    let item = item_at(location, "BEAN-ETH-001");
    let item_id = item.id;
    seed_item(&h, &item).await;

    let movement = h.service.receive_stock(&h.ctx, ACTOR, receive(item_id, 100, 200)).await.unwrap();
    assert_eq!(movement.status, MovementStatus::Completed);

    let stored = h.ledger_item(item_id).await;
    assert_eq!(stored.current_stock, Decimal::from(100));
    assert_eq!(stored.average_cost.amount, Decimal::new(200, 2));
    assert_eq!(stored.total_value.amount, Decimal::from(200));
    assert_eq!(stored.status, ItemStatus::Active);

    h.events.clear().await;
    let movements = h
        .service
        .issue_stock(
            &h.ctx,
            ACTOR,
            IssueStockRequest {
                item_id,
                quantity: Decimal::from(30),
                reason: "sale".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(movements.len(), 1);

    let stored = h.ledger_item(item_id).await;
    assert_eq!(stored.current_stock, Decimal::from(70));
    assert_eq!(stored.available_stock, Decimal::from(70));
    assert_eq!(stored.total_value.amount, Decimal::from(140));

    let completed = h.events.events_of_type(EventType::StockMovementCompleted).await;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].aggregate_id, item_id);
}

#[tokio::test]
async fn reserve_over_reserve_release_round_trip() {
    let h = harness();
    let item = item_at(Uuid::new_v4(), "MILK-OAT-001");
    let item_id = item.id;
    seed_item(&h, &item).await;
    h.service.receive_stock(&h.ctx, ACTOR, receive(item_id, 50, 100)).await.unwrap();

    h.service
        .reserve_stock(
            &h.ctx,
            ACTOR,
            ReserveStockRequest {
                item_id,
                quantity: Decimal::from(40),
                reason: "wholesale order".to_string(),
            },
        )
        .await
        .unwrap();
    let stored = h.ledger_item(item_id).await;
    assert_eq!(stored.reserved_stock, Decimal::from(40));
    assert_eq!(stored.available_stock, Decimal::from(10));

    let err = h
        .service
        .reserve_stock(
            &h.ctx,
            ACTOR,
            ReserveStockRequest {
                item_id,
                quantity: Decimal::from(20),
                reason: "second order".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InsufficientStock);

    // Failed precondition left no trace.
    let stored = h.ledger_item(item_id).await;
    assert_eq!(stored.reserved_stock, Decimal::from(40));
    assert_eq!(stored.available_stock, Decimal::from(10));

    h.service
        .release_stock(
            &h.ctx,
            ACTOR,
            ReleaseStockRequest {
                item_id,
                quantity: Decimal::from(40),
                reason: "order cancelled".to_string(),
            },
        )
        .await
        .unwrap();
    let stored = h.ledger_item(item_id).await;
    assert_eq!(stored.reserved_stock, Decimal::ZERO);
    assert_eq!(stored.available_stock, Decimal::from(50));
}

#[tokio::test]
async fn release_more_than_reserved_is_invalid() {
    let h = harness();
    let item = item_at(Uuid::new_v4(), "CUP-12OZ");
    let item_id = item.id;
    seed_item(&h, &item).await;
    h.service.receive_stock(&h.ctx, ACTOR, receive(item_id, 10, 50)).await.unwrap();

    let err = h
        .service
        .release_stock(
            &h.ctx,
            ACTOR,
            ReleaseStockRequest {
                item_id,
                quantity: Decimal::ONE,
                reason: "oops".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidReservation);
}

#[tokio::test]
async fn fifo_consumes_earliest_expiring_batches_first() {
    let h = harness();
    let mut item = item_at(Uuid::new_v4(), "PASTRY-CROIS");
    item.is_perishable = true;
    item.shelf_life_days = Some(60);
    let item_id = item.id;
    seed_item(&h, &item).await;

    let soon = Utc::now().date_naive() + Duration::days(30);
    let later = Utc::now().date_naive() + Duration::days(60);
    for (qty, expiry, number) in [(20, soon, "B1"), (30, later, "B2")] {
        h.service
            .receive_stock(
                &h.ctx,
                ACTOR,
                ReceiveStockRequest {
                    item_id,
                    quantity: Decimal::from(qty),
                    unit_cost: Money::usd(Decimal::new(100, 2)),
                    batch: Some(NewBatch {
                        batch_number: Some(number.to_string()),
                        expiration_date: Some(expiry),
                        manufacture_date: None,
                        supplier_id: None,
                    }),
                    reason: "bakery delivery".to_string(),
                },
            )
            .await
            .unwrap();
    }

    let movements = h
        .service
        .issue_stock(
            &h.ctx,
            ACTOR,
            IssueStockRequest {
                item_id,
                quantity: Decimal::from(25),
                reason: "cafe service".to_string(),
            },
        )
        .await
        .unwrap();

    // Two completed movements: all 20 of B1, then 5 of B2.
    assert_eq!(movements.len(), 2);
    assert_eq!(movements[0].batch_number.as_deref(), Some("B1"));
    assert_eq!(movements[0].quantity, Decimal::from(20));
    assert_eq!(movements[1].batch_number.as_deref(), Some("B2"));
    assert_eq!(movements[1].quantity, Decimal::from(5));

    let stored = h.ledger_item(item_id).await;
    assert_eq!(stored.current_stock, Decimal::from(25));
    let b1 = stored.batches.iter().find(|b| b.batch_number == "B1").unwrap();
    assert!(!b1.is_active);
    assert_eq!(stored.batch_quantity_sum(), Decimal::from(25));
}

#[tokio::test]
async fn transfer_moves_batches_between_locations() {
    let h = harness();
    let roastery = Uuid::new_v4();
    let cafe = Uuid::new_v4();
    let source = item_at(roastery, "BEAN-ETH-001");
    let target = item_at(cafe, "BEAN-ETH-001");
    let source_id = source.id;
    let target_id = target.id;
    seed_item(&h, &source).await;
    seed_item(&h, &target).await;
    h.service.receive_stock(&h.ctx, ACTOR, receive(source_id, 100, 250)).await.unwrap();

    let movements = h
        .service
        .transfer_stock(
            &h.ctx,
            ACTOR,
            TransferStockRequest {
                item_id: source_id,
                quantity: Decimal::from(40),
                from_location_id: roastery,
                to_location_id: cafe,
                reason: "weekly cafe restock".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(movements.len(), 1);

    let source = h.ledger_item(source_id).await;
    let target = h.ledger_item(target_id).await;
    assert_eq!(source.current_stock, Decimal::from(60));
    assert_eq!(target.current_stock, Decimal::from(40));
    assert_eq!(target.average_cost.amount, Decimal::new(250, 2));
    assert_eq!(target.batch_quantity_sum(), Decimal::from(40));
}

#[tokio::test]
async fn transfer_rejects_same_location_and_missing_target() {
    let h = harness();
    let location = Uuid::new_v4();
    let item = item_at(location, "LID-12OZ");
    let item_id = item.id;
    seed_item(&h, &item).await;
    h.service.receive_stock(&h.ctx, ACTOR, receive(item_id, 10, 10)).await.unwrap();

    let same = h
        .service
        .transfer_stock(
            &h.ctx,
            ACTOR,
            TransferStockRequest {
                item_id,
                quantity: Decimal::ONE,
                from_location_id: location,
                to_location_id: location,
                reason: "noop".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(same.kind, ErrorKind::SameLocation);

    let missing = h
        .service
        .transfer_stock(
            &h.ctx,
            ACTOR,
            TransferStockRequest {
                item_id,
                quantity: Decimal::ONE,
                from_location_id: location,
                to_location_id: Uuid::new_v4(),
                reason: "to nowhere".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(missing.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn adjustment_cannot_drive_stock_negative() {
    let h = harness();
    let item = item_at(Uuid::new_v4(), "SYR-CARAMEL");
    let item_id = item.id;
    seed_item(&h, &item).await;
    h.service.receive_stock(&h.ctx, ACTOR, receive(item_id, 5, 300)).await.unwrap();

    let err = h
        .service
        .adjust_stock(
            &h.ctx,
            ACTOR,
            AdjustStockRequest {
                item_id,
                delta: Decimal::from(-6),
                reason: "spillage".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NegativeStock);

    h.service
        .adjust_stock(
            &h.ctx,
            ACTOR,
            AdjustStockRequest {
                item_id,
                delta: Decimal::from(-5),
                reason: "spillage".to_string(),
            },
        )
        .await
        .unwrap();
    let stored = h.ledger_item(item_id).await;
    assert_eq!(stored.current_stock, Decimal::ZERO);
    assert_eq!(stored.status, ItemStatus::OutOfStock);
}

#[tokio::test]
async fn threshold_events_fire_on_crossings() {
    let h = harness();
    let item = item_at(Uuid::new_v4(), "TEA-EARLGREY");
    let item_id = item.id;
    seed_item(&h, &item).await;
    h.service.receive_stock(&h.ctx, ACTOR, receive(item_id, 100, 80)).await.unwrap();
    h.events.clear().await;

    // 100 -> 25: crosses the reorder point (30) but not the minimum (20).
    h.service
        .issue_stock(
            &h.ctx,
            ACTOR,
            IssueStockRequest {
                item_id,
                quantity: Decimal::from(75),
                reason: "sale".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(h.events.events_of_type(EventType::ReorderNeeded).await.len(), 1);
    assert!(h.events.events_of_type(EventType::LowStockAlert).await.is_empty());

    // 25 -> 15: crosses the minimum.
    h.service
        .issue_stock(
            &h.ctx,
            ACTOR,
            IssueStockRequest {
                item_id,
                quantity: Decimal::from(10),
                reason: "sale".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(h.events.events_of_type(EventType::LowStockAlert).await.len(), 1);

    // 15 -> 0: out of stock.
    h.service
        .issue_stock(
            &h.ctx,
            ACTOR,
            IssueStockRequest {
                item_id,
                quantity: Decimal::from(15),
                reason: "sale".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(h.events.events_of_type(EventType::OutOfStockAlert).await.len(), 1);
}

#[tokio::test]
async fn versions_increase_per_committed_mutation() {
    let h = harness();
    let item = item_at(Uuid::new_v4(), "BEAN-BRZ-003");
    let item_id = item.id;
    seed_item(&h, &item).await;
    assert_eq!(h.ledger_item(item_id).await.version, 1);

    h.service.receive_stock(&h.ctx, ACTOR, receive(item_id, 10, 100)).await.unwrap();
    assert_eq!(h.ledger_item(item_id).await.version, 2);

    h.service
        .issue_stock(
            &h.ctx,
            ACTOR,
            IssueStockRequest { item_id, quantity: Decimal::from(3), reason: "sale".to_string() },
        )
        .await
        .unwrap();
    assert_eq!(h.ledger_item(item_id).await.version, 3);
}

#[tokio::test]
async fn movements_journal_is_append_only_and_filterable() {
    let h = harness();
    let item = item_at(Uuid::new_v4(), "BEAN-KEN-004");
    let item_id = item.id;
    seed_item(&h, &item).await;
    h.service.receive_stock(&h.ctx, ACTOR, receive(item_id, 50, 90)).await.unwrap();
    h.service
        .issue_stock(
            &h.ctx,
            ACTOR,
            IssueStockRequest { item_id, quantity: Decimal::from(20), reason: "sale".to_string() },
        )
        .await
        .unwrap();

    let all = h
        .service
        .stock_movements(
            &h.ctx,
            roastline_inventory::GetStockMovementsQuery {
                filter: MovementFilter { item_id: Some(item_id), ..Default::default() },
                page: Page::default(),
            },
        )
        .await
        .unwrap();
    assert_eq!(all.data.len(), 2);
    assert!(all.data.iter().all(|m| m.status == MovementStatus::Completed));
    assert!(all.data.iter().all(|m| m.completed_at.is_some()));

    let outbound = h
        .service
        .stock_movements(
            &h.ctx,
            roastline_inventory::GetStockMovementsQuery {
                filter: MovementFilter {
                    item_id: Some(item_id),
                    direction: Some(
                        roastline_inventory::movement::MovementDirection::Out,
                    ),
                    ..Default::default()
                },
                page: Page::default(),
            },
        )
        .await
        .unwrap();
    assert_eq!(outbound.data.len(), 1);
}

#[tokio::test]
async fn expired_batches_are_written_off_by_the_sweep() {
    let h = harness();
    let mut item = item_at(Uuid::new_v4(), "MILK-WHOLE");
    item.is_perishable = true;
    item.shelf_life_days = Some(14);
    // Past-dated batch seeded directly; receipts reject expired dates only
    // at the business layer above.
    item.batches.push(roastline_inventory::InventoryBatch {
        id: Uuid::new_v4(),
        batch_number: "OLD-1".to_string(),
        quantity: Decimal::from(8),
        unit_cost: Money::usd(Decimal::new(150, 2)),
        expiration_date: Some(date(2024, 1, 10)),
        manufacture_date: None,
        received_date: Utc::now() - Duration::days(30),
        supplier_id: None,
        quality: roastline_inventory::item::QualityStatus::Approved,
        is_active: true,
    });
    item.current_stock = Decimal::from(8);
    item.recompute_derived(Utc::now().date_naive());
    let item_id = item.id;
    seed_item(&h, &item).await;

    let written_off = h.service.sweep_expired(&h.ctx, ACTOR).await.unwrap();
    assert_eq!(written_off.len(), 1);
    assert_eq!(written_off[0].quantity, Decimal::from(8));

    let stored = h.ledger_item(item_id).await;
    assert_eq!(stored.current_stock, Decimal::ZERO);
    assert_eq!(stored.status, ItemStatus::OutOfStock);
    assert!(stored.batches.iter().all(|b| !b.is_active));
}

#[tokio::test]
async fn concurrent_receipts_and_issues_conserve_stock() {
    let h = harness();
    let item = item_at(Uuid::new_v4(), "BEAN-GTM-005");
    let item_id = item.id;
    seed_item(&h, &item).await;
    // Seed enough stock that every issue can succeed.
    h.service.receive_stock(&h.ctx, ACTOR, receive(item_id, 1000, 100)).await.unwrap();

    let service = Arc::new(h.service);
    let mut handles = Vec::new();
    for i in 0..8u32 {
        let service = Arc::clone(&service);
        let ctx = h.ctx.clone();
        handles.push(tokio::spawn(async move {
            let quantity = Decimal::from(i + 1);
            service
                .receive_stock(
                    &ctx,
                    ACTOR,
                    ReceiveStockRequest {
                        item_id,
                        quantity,
                        unit_cost: Money::usd(Decimal::new(100, 2)),
                        batch: None,
                        reason: "concurrent receipt".to_string(),
                    },
                )
                .await
                .map(|_| quantity)
        }));
    }
    for i in 0..8u32 {
        let service = Arc::clone(&service);
        let ctx = h.ctx.clone();
        handles.push(tokio::spawn(async move {
            let quantity = Decimal::from((i % 4) + 1);
            service
                .issue_stock(
                    &ctx,
                    ACTOR,
                    IssueStockRequest {
                        item_id,
                        quantity,
                        reason: "concurrent issue".to_string(),
                    },
                )
                .await
                .map(|_| -quantity)
        }));
    }

    let mut delta = Decimal::ZERO;
    for handle in handles {
        delta += handle.await.unwrap().unwrap();
    }

    let stored = h.ledger.item(item_id).await.unwrap().unwrap();
    assert_eq!(stored.current_stock, Decimal::from(1000) + delta);
    assert_eq!(stored.available_stock, stored.current_stock - stored.reserved_stock);
    assert_eq!(stored.batch_quantity_sum(), stored.current_stock);
    assert!(stored.check_invariants().is_ok());
}
