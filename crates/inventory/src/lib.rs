//! Inventory management and automated replenishment engine for a
//! multi-location coffee retail/production chain.
//!
//! The crate is organized around five cooperating components: the ledger
//! store ([`ledger`]), the stock movement engine ([`movement`]), the demand
//! forecaster ([`forecast`]), the reorder decision engine ([`reorder`]),
//! and the typed command/query surface ([`commands`], [`queries`],
//! [`service`]). Cross-cutting infrastructure (errors, events, resilience,
//! configuration) comes from `roastline-core`.

pub mod commands;
pub mod forecast;
pub mod item;
pub mod ledger;
pub mod location;
pub mod movement;
pub mod queries;
pub mod reorder;
pub mod scheduler;
pub mod service;
pub mod supplier;
pub mod types;

pub use commands::{
    BulkUpdateStockCommand, CreateInventoryItemCommand, ProcessAutomaticReordersCommand,
    UpdateInventoryItemCommand,
};
pub use forecast::{
    ConsumptionPattern, DemandForecast, DemandForecaster, DemandPredictor, StockoutPrediction,
};
pub use item::{InventoryBatch, InventoryItem, ItemStatus, ReorderMethod, ReorderRules};
pub use ledger::{
    ItemFilter, ItemSortKey, LedgerStore, LedgerTransaction, MemoryLedger, MovementFilter,
    OrderFilter, PostgresLedger, SupplierOffer,
};
pub use location::{Location, LocationKind, StorageZone};
pub use movement::{MovementEngine, MovementType, StockMovement};
pub use queries::{
    GetDemandForecastQuery, GetInventoryOverviewQuery, GetReorderRecommendationsQuery,
    GetStockMovementsQuery, InventoryOverview, ListInventoryItemsQuery,
};
pub use reorder::{
    OrderStatus, PurchaseOrder, ReorderCriteria, ReorderEngine, ReorderRecommendation,
};
pub use scheduler::EngineScheduler;
pub use service::InventoryService;
pub use supplier::{Supplier, SupplierProduct};
pub use types::{ItemCategory, Money, Page, Paginated, UnitOfMeasure};
