//! Property tests for the universal stock invariants.

mod common;

use common::{harness, item_at, seed_item, ACTOR};
use proptest::prelude::*;
use roastline_inventory::item::ItemStatus;
use roastline_inventory::movement::{
    AdjustStockRequest, IssueStockRequest, ReceiveStockRequest, ReleaseStockRequest,
    ReserveStockRequest,
};
use roastline_inventory::Money;
use rust_decimal::Decimal;
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Op {
    Receive { quantity: u32, cost_cents: u32 },
    Issue { quantity: u32 },
    Reserve { quantity: u32 },
    Release { quantity: u32 },
    Adjust { delta: i32 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u32..100, 1u32..2000).prop_map(|(quantity, cost_cents)| Op::Receive {
            quantity,
            cost_cents
        }),
        (1u32..80).prop_map(|quantity| Op::Issue { quantity }),
        (1u32..50).prop_map(|quantity| Op::Reserve { quantity }),
        (1u32..50).prop_map(|quantity| Op::Release { quantity }),
        (-60i32..60).prop_map(|delta| Op::Adjust { delta }),
    ]
}

async fn apply(h: &common::Harness, item_id: Uuid, op: &Op) -> bool {
    let result = match op {
        Op::Receive { quantity, cost_cents } => h
            .service
            .receive_stock(
                &h.ctx,
                ACTOR,
                ReceiveStockRequest {
                    item_id,
                    quantity: Decimal::from(*quantity),
                    unit_cost: Money::usd(Decimal::new(*cost_cents as i64, 2)),
                    batch: None,
                    reason: "prop receive".to_string(),
                },
            )
            .await
            .map(|_| ()),
        Op::Issue { quantity } => h
            .service
            .issue_stock(
                &h.ctx,
                ACTOR,
                IssueStockRequest {
                    item_id,
                    quantity: Decimal::from(*quantity),
                    reason: "prop issue".to_string(),
                },
            )
            .await
            .map(|_| ()),
        Op::Reserve { quantity } => h
            .service
            .reserve_stock(
                &h.ctx,
                ACTOR,
                ReserveStockRequest {
                    item_id,
                    quantity: Decimal::from(*quantity),
                    reason: "prop reserve".to_string(),
                },
            )
            .await
            .map(|_| ()),
        Op::Release { quantity } => h
            .service
            .release_stock(
                &h.ctx,
                ACTOR,
                ReleaseStockRequest {
                    item_id,
                    quantity: Decimal::from(*quantity),
                    reason: "prop release".to_string(),
                },
            )
            .await
            .map(|_| ()),
        Op::Adjust { delta } => {
            if *delta == 0 {
                return false;
            }
            h.service
                .adjust_stock(
                    &h.ctx,
                    ACTOR,
                    AdjustStockRequest {
                        item_id,
                        delta: Decimal::from(*delta),
                        reason: "prop adjust".to_string(),
                    },
                )
                .await
                .map(|_| ())
        }
    };
    result.is_ok()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// After every committed operation the counters, batch sums, value and
    /// version obey the universal invariants; failed preconditions leave
    /// state untouched.
    #[test]
    fn invariants_hold_under_random_sequences(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let h = harness();
            let item = item_at(Uuid::new_v4(), "PROP-SKU-001");
            let item_id = item.id;
            seed_item(&h, &item).await;

            let mut last_version = 1i64;
            for op in &ops {
                let before = h.ledger_item(item_id).await;
                let committed = apply(&h, item_id, op).await;
                let after = h.ledger_item(item_id).await;

                prop_assert!(after.check_invariants().is_ok(),
                    "invariants violated after {:?}: {:?}", op, after.check_invariants());
                prop_assert!(after.current_stock >= Decimal::ZERO);
                prop_assert!(after.reserved_stock >= Decimal::ZERO);
                prop_assert!(after.reserved_stock <= after.current_stock);
                prop_assert_eq!(
                    after.available_stock,
                    after.current_stock - after.reserved_stock
                );

                if committed {
                    prop_assert_eq!(after.version, last_version + 1,
                        "version must increase exactly once per commit");
                    last_version = after.version;
                } else {
                    // Aborted transactions leave no residue.
                    prop_assert_eq!(after.version, before.version);
                    prop_assert_eq!(after.current_stock, before.current_stock);
                    prop_assert_eq!(after.reserved_stock, before.reserved_stock);
                    prop_assert_eq!(after.total_value.amount, before.total_value.amount);
                }
            }
            Ok(())
        })?;
    }

    /// A sequence of movements followed by its inverse restores the item's
    /// counters and value (version and timestamps excepted).
    #[test]
    fn inverse_movements_restore_state(
        receipts in prop::collection::vec((1u32..50, 1u32..1000), 1..6),
        reserve in 1u32..20,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let h = harness();
            let item = item_at(Uuid::new_v4(), "PROP-SKU-002");
            let item_id = item.id;
            seed_item(&h, &item).await;

            // Baseline stock so issues and reservations can succeed.
            apply(&h, item_id, &Op::Receive { quantity: 100, cost_cents: 500 }).await;
            let initial = h.ledger_item(item_id).await;

            // Forward: receipts then a reservation.
            for (quantity, cost_cents) in &receipts {
                let op = Op::Receive {
                    quantity: *quantity,
                    cost_cents: *cost_cents,
                };
                let ok = apply(&h, item_id, &op).await;
                prop_assert!(ok);
            }
            let reserve_op = Op::Reserve { quantity: reserve };
            let ok = apply(&h, item_id, &reserve_op).await;
            prop_assert!(ok);

            // Inverse, in reverse order.
            let release_op = Op::Release { quantity: reserve };
            let ok = apply(&h, item_id, &release_op).await;
            prop_assert!(ok);
            for (quantity, _) in receipts.iter().rev() {
                let issue_op = Op::Issue { quantity: *quantity };
                let ok = apply(&h, item_id, &issue_op).await;
                prop_assert!(ok);
            }

            let after = h.ledger_item(item_id).await;
            prop_assert_eq!(after.current_stock, initial.current_stock);
            prop_assert_eq!(after.reserved_stock, initial.reserved_stock);
            prop_assert_eq!(after.available_stock, initial.available_stock);
            prop_assert!(after.version > initial.version);
            prop_assert!(after.check_invariants().is_ok());
            Ok(())
        })?;
    }

    /// Status always reflects the counters after commit.
    #[test]
    fn status_tracks_stock_levels(issue_quantity in 1u32..100) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let h = harness();
            let item = item_at(Uuid::new_v4(), "PROP-SKU-003");
            let item_id = item.id;
            seed_item(&h, &item).await;
            apply(&h, item_id, &Op::Receive { quantity: 100, cost_cents: 100 }).await;

            let committed = apply(&h, item_id, &Op::Issue { quantity: issue_quantity }).await;
            prop_assert!(committed);

            let after = h.ledger_item(item_id).await;
            let expected = if after.current_stock.is_zero() {
                ItemStatus::OutOfStock
            } else if after.current_stock <= after.minimum_stock {
                ItemStatus::LowStock
            } else {
                ItemStatus::Active
            };
            prop_assert_eq!(after.status, expected);
            Ok(())
        })?;
    }
}
