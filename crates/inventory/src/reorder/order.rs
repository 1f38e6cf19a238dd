//! Purchase orders and their state machine.
//!
//! ```text
//! Draft ─submit→ Pending ─approve→ Approved ─send→ Sent ─confirm→ Confirmed
//!                   │                                                │
//!                reject                                      receive (partial)
//!                   ▼                                                ▼
//!                Rejected                                         Partial
//!                                                                    │
//!                                                             receive (full)
//!                                                                    ▼
//!                                                  Received ─close→ Closed
//! Any non-terminal ─cancel→ Cancelled
//! ```

use crate::types::Money;
use chrono::{DateTime, Utc};
use roastline_core::{Error, ErrorKind, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Sent,
    Confirmed,
    Partial,
    Received,
    Closed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Closed | OrderStatus::Cancelled | OrderStatus::Rejected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_priority", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// One ordered SKU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: String,
    pub description: String,
    pub quantity_ordered: Decimal,
    pub unit_price: Decimal,
    pub quantity_received: Decimal,
    pub quantity_remaining: Decimal,
}

impl OrderLine {
    pub fn new(sku: String, description: String, quantity: Decimal, unit_price: Decimal) -> Self {
        Self {
            sku,
            description,
            quantity_ordered: quantity,
            unit_price,
            quantity_received: Decimal::ZERO,
            quantity_remaining: quantity,
        }
    }

    pub fn line_total(&self) -> Decimal {
        self.quantity_ordered * self.unit_price
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: Uuid,
    pub order_number: String,
    pub supplier_id: Uuid,
    pub location_id: Uuid,
    pub created_by: String,
    pub status: OrderStatus,
    pub priority: OrderPriority,

    pub subtotal: Money,
    pub tax: Money,
    pub shipping: Money,
    pub discount: Money,
    pub total: Money,

    pub payment_terms: String,
    pub delivery_terms: String,

    pub requested_date: DateTime<Utc>,
    pub ordered_date: Option<DateTime<Utc>>,
    pub confirmed_date: Option<DateTime<Utc>>,
    pub promised_date: Option<DateTime<Utc>>,
    pub shipped_date: Option<DateTime<Utc>>,
    pub delivered_date: Option<DateTime<Utc>>,
    pub cancelled_date: Option<DateTime<Utc>>,

    pub lines: Vec<OrderLine>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl PurchaseOrder {
    pub fn generate_number() -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("PO-{}-{}", Utc::now().format("%Y%m%d"), &suffix[..8])
    }

    /// `subtotal + tax + shipping − discount = total`.
    pub fn recompute_totals(&mut self) {
        let currency = self.subtotal.currency.clone();
        let subtotal: Decimal = self.lines.iter().map(|l| l.line_total()).sum();
        self.subtotal = Money::new(subtotal, currency.clone()).rounded();
        self.total = Money::new(
            self.subtotal.amount + self.tax.amount + self.shipping.amount - self.discount.amount,
            currency,
        )
        .rounded();
    }

    /// `Σ received / Σ ordered`, in percent.
    pub fn completion_percent(&self) -> f64 {
        let ordered: Decimal = self.lines.iter().map(|l| l.quantity_ordered).sum();
        if ordered.is_zero() {
            return 0.0;
        }
        let received: Decimal = self.lines.iter().map(|l| l.quantity_received).sum();
        use rust_decimal::prelude::ToPrimitive;
        (received / ordered * Decimal::from(100)).to_f64().unwrap_or(0.0)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        match self.promised_date {
            Some(promised) => {
                promised < now
                    && !matches!(
                        self.status,
                        OrderStatus::Received | OrderStatus::Closed | OrderStatus::Cancelled
                    )
            }
            None => false,
        }
    }

    fn ensure(&self, expected: &[OrderStatus], attempted: OrderStatus) -> Result<()> {
        if expected.contains(&self.status) {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::OrderCannotTransition,
                format!(
                    "order {} cannot transition {:?} -> {:?}",
                    self.order_number, self.status, attempted
                ),
            )
            .with_resource(self.order_number.clone())
            .with_metadata("current", serde_json::json!(self.status))
            .with_metadata("attempted", serde_json::json!(attempted)))
        }
    }

    pub fn submit(&mut self) -> Result<()> {
        self.ensure(&[OrderStatus::Draft], OrderStatus::Pending)?;
        self.status = OrderStatus::Pending;
        Ok(())
    }

    pub fn approve(&mut self) -> Result<()> {
        self.ensure(&[OrderStatus::Pending], OrderStatus::Approved)?;
        self.status = OrderStatus::Approved;
        Ok(())
    }

    pub fn reject(&mut self) -> Result<()> {
        self.ensure(&[OrderStatus::Pending], OrderStatus::Rejected)?;
        self.status = OrderStatus::Rejected;
        Ok(())
    }

    pub fn send(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure(&[OrderStatus::Approved], OrderStatus::Sent)?;
        self.status = OrderStatus::Sent;
        self.ordered_date = Some(now);
        Ok(())
    }

    pub fn confirm(&mut self, now: DateTime<Utc>, promised_date: Option<DateTime<Utc>>) -> Result<()> {
        self.ensure(&[OrderStatus::Sent], OrderStatus::Confirmed)?;
        self.status = OrderStatus::Confirmed;
        self.confirmed_date = Some(now);
        if promised_date.is_some() {
            self.promised_date = promised_date;
        }
        Ok(())
    }

    /// Record goods received against one line. Advances to `Partial` on the
    /// first receipt and to `Received` once every line is complete.
    pub fn receive_line(&mut self, sku: &str, quantity: Decimal, now: DateTime<Utc>) -> Result<()> {
        self.ensure(&[OrderStatus::Confirmed, OrderStatus::Partial], OrderStatus::Partial)?;
        if quantity <= Decimal::ZERO {
            return Err(Error::invalid_input("received quantity must be positive"));
        }
        let line = self
            .lines
            .iter_mut()
            .find(|l| l.sku == sku)
            .ok_or_else(|| Error::not_found(format!("order line for sku {sku}")))?;
        if quantity > line.quantity_remaining {
            return Err(Error::new(
                ErrorKind::ValueOutOfRange,
                format!(
                    "received {} exceeds remaining {} for sku {}",
                    quantity, line.quantity_remaining, sku
                ),
            ));
        }
        line.quantity_received += quantity;
        line.quantity_remaining -= quantity;

        let fully_received = self.lines.iter().all(|l| l.quantity_remaining.is_zero());
        self.status = if fully_received { OrderStatus::Received } else { OrderStatus::Partial };
        if fully_received {
            self.delivered_date = Some(now);
        }
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.ensure(&[OrderStatus::Received], OrderStatus::Closed)?;
        self.status = OrderStatus::Closed;
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status.is_terminal() {
            return self.ensure(&[], OrderStatus::Cancelled);
        }
        self.status = OrderStatus::Cancelled;
        self.cancelled_date = Some(now);
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_with_lines() -> PurchaseOrder {
        let now = Utc::now();
        let mut order = PurchaseOrder {
            id: Uuid::new_v4(),
            order_number: PurchaseOrder::generate_number(),
            supplier_id: Uuid::new_v4(),
            location_id: Uuid::new_v4(),
            created_by: "reorder-engine".to_string(),
            status: OrderStatus::Draft,
            priority: OrderPriority::Normal,
            subtotal: Money::usd(Decimal::ZERO),
            tax: Money::usd(Decimal::ZERO),
            shipping: Money::usd(Decimal::ZERO),
            discount: Money::usd(Decimal::ZERO),
            total: Money::usd(Decimal::ZERO),
            payment_terms: "Net 30".to_string(),
            delivery_terms: "FOB".to_string(),
            requested_date: now,
            ordered_date: None,
            confirmed_date: None,
            promised_date: None,
            shipped_date: None,
            delivered_date: None,
            cancelled_date: None,
            lines: vec![
                OrderLine::new(
                    "BEAN-ETH-001".to_string(),
                    "Ethiopia Yirgacheffe".to_string(),
                    Decimal::from(100),
                    Decimal::new(1050, 2),
                ),
                OrderLine::new(
                    "MILK-OAT-001".to_string(),
                    "Oat milk 1L".to_string(),
                    Decimal::from(40),
                    Decimal::new(210, 2),
                ),
            ],
            created_at: now,
            updated_at: now,
            version: 1,
        };
        order.recompute_totals();
        order
    }

    fn to_confirmed(order: &mut PurchaseOrder) {
        order.submit().unwrap();
        order.approve().unwrap();
        order.send(Utc::now()).unwrap();
        order.confirm(Utc::now(), Some(Utc::now() + chrono::Duration::days(7))).unwrap();
    }

    #[test]
    fn totals_follow_lines() {
        let order = order_with_lines();
        // 100 * 10.50 + 40 * 2.10 = 1134.00
        assert_eq!(order.subtotal.amount, Decimal::new(113400, 2));
        assert_eq!(order.total.amount, Decimal::new(113400, 2));
    }

    #[test]
    fn happy_path_walks_the_machine() {
        let mut order = order_with_lines();
        to_confirmed(&mut order);
        assert_eq!(order.status, OrderStatus::Confirmed);

        order.receive_line("BEAN-ETH-001", Decimal::from(100), Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::Partial);
        assert!((order.completion_percent() - 100.0 * 100.0 / 140.0).abs() < 1e-9);

        order.receive_line("MILK-OAT-001", Decimal::from(40), Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::Received);
        assert!(order.delivered_date.is_some());

        order.close().unwrap();
        assert_eq!(order.status, OrderStatus::Closed);
    }

    #[test]
    fn illegal_transitions_are_rejected_with_context() {
        let mut order = order_with_lines();
        let err = order.approve().unwrap_err();
        assert_eq!(err.kind, ErrorKind::OrderCannotTransition);
        assert_eq!(err.context.metadata["current"], serde_json::json!(OrderStatus::Draft));

        assert!(order.close().is_err());
        assert!(order.receive_line("BEAN-ETH-001", Decimal::ONE, Utc::now()).is_err());
    }

    #[test]
    fn reject_only_from_pending() {
        let mut order = order_with_lines();
        assert!(order.reject().is_err());
        order.submit().unwrap();
        order.reject().unwrap();
        assert_eq!(order.status, OrderStatus::Rejected);
        assert!(order.approve().is_err());
    }

    #[test]
    fn cancel_from_any_non_terminal_only() {
        let mut order = order_with_lines();
        order.cancel(Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert!(order.cancel(Utc::now()).is_err());

        let mut closed = order_with_lines();
        to_confirmed(&mut closed);
        closed.receive_line("BEAN-ETH-001", Decimal::from(100), Utc::now()).unwrap();
        closed.receive_line("MILK-OAT-001", Decimal::from(40), Utc::now()).unwrap();
        closed.close().unwrap();
        assert!(closed.cancel(Utc::now()).is_err());
    }

    #[test]
    fn over_receipt_is_rejected() {
        let mut order = order_with_lines();
        to_confirmed(&mut order);
        let err = order.receive_line("BEAN-ETH-001", Decimal::from(101), Utc::now()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ValueOutOfRange);
    }

    #[test]
    fn overdue_depends_on_status_and_promise() {
        let mut order = order_with_lines();
        to_confirmed(&mut order);
        order.promised_date = Some(Utc::now() - chrono::Duration::days(1));
        assert!(order.is_overdue(Utc::now()));

        order.receive_line("BEAN-ETH-001", Decimal::from(100), Utc::now()).unwrap();
        order.receive_line("MILK-OAT-001", Decimal::from(40), Utc::now()).unwrap();
        assert!(!order.is_overdue(Utc::now()));
    }
}
