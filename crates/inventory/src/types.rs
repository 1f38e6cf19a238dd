//! Shared value types for the inventory domain.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Monetary scale used across the engine (two decimal places).
pub const MONEY_SCALE: u32 = 2;

/// An amount plus ISO-4217 currency code. Arithmetic never mixes
/// currencies; rounding is banker's (midpoint-nearest-even) at
/// [`MONEY_SCALE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Self {
        Self { amount, currency: currency.into() }
    }

    pub fn zero(currency: impl Into<String>) -> Self {
        Self { amount: Decimal::ZERO, currency: currency.into() }
    }

    pub fn usd(amount: Decimal) -> Self {
        Self::new(amount, "USD")
    }

    /// Banker's rounding at the monetary scale.
    pub fn rounded(&self) -> Self {
        Self {
            amount: self
                .amount
                .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointNearestEven),
            currency: self.currency.clone(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Scale by a quantity, keeping the currency.
    pub fn times(&self, quantity: Decimal) -> Self {
        Self { amount: self.amount * quantity, currency: self.currency.clone() }
    }
}

/// Units the coffee operation stocks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "unit_of_measure", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UnitOfMeasure {
    Kilogram,
    Gram,
    Liter,
    Milliliter,
    Piece,
    Pack,
    Box,
    Bag,
}

/// Item categories for a coffee retail/production chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "item_category", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ItemCategory {
    CoffeeBeans,
    GroundCoffee,
    Milk,
    Syrup,
    Tea,
    Pastry,
    Cup,
    Lid,
    Packaging,
    CleaningSupply,
    Equipment,
    Other,
}

/// Pagination parameters shared by every listing query.
/// Defaults: page 1, size 50; size is capped at 1000.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Page {
    #[validate(range(min = 1))]
    pub page: Option<u32>,
    #[validate(range(min = 1, max = 1000))]
    pub size: Option<u32>,
}

impl Default for Page {
    fn default() -> Self {
        Self { page: Some(1), size: Some(50) }
    }
}

impl Page {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn size(&self) -> u32 {
        self.size.unwrap_or(50).clamp(1, 1000)
    }

    pub fn offset(&self) -> u32 {
        (self.page() - 1) * self.size()
    }

    pub fn limit(&self) -> u32 {
        self.size()
    }
}

/// Paginated response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total_items: u64,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, page: &Page, total_items: u64) -> Self {
        Self { data, page: page.page(), size: page.size(), total_items }
    }

    pub fn total_pages(&self) -> u64 {
        if self.size == 0 {
            0
        } else {
            self.total_items.div_ceil(self.size as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bankers_rounding_is_midpoint_even() {
        // 2.125 -> 2.12 (even), 2.135 -> 2.14 (even), 2.134 -> 2.13
        assert_eq!(Money::usd(Decimal::new(2125, 3)).rounded().amount, Decimal::new(212, 2));
        assert_eq!(Money::usd(Decimal::new(2135, 3)).rounded().amount, Decimal::new(214, 2));
        assert_eq!(Money::usd(Decimal::new(2134, 3)).rounded().amount, Decimal::new(213, 2));
    }

    #[test]
    fn times_preserves_currency() {
        let total = Money::new(Decimal::new(250, 2), "EUR").times(Decimal::from(4));
        assert_eq!(total.amount, Decimal::new(1000, 2));
        assert_eq!(total.currency, "EUR");
    }

    #[test]
    fn page_defaults_and_caps() {
        let page = Page::default();
        assert_eq!(page.page(), 1);
        assert_eq!(page.size(), 50);
        assert_eq!(page.offset(), 0);

        let oversized = Page { page: Some(3), size: Some(9999) };
        assert_eq!(oversized.size(), 1000);
        assert_eq!(oversized.offset(), 2000);
    }

    #[test]
    fn paginated_total_pages() {
        let page = Page { page: Some(1), size: Some(50) };
        let result: Paginated<u32> = Paginated::new(vec![], &page, 101);
        assert_eq!(result.total_pages(), 3);
    }
}
