//! Handlers for the operations each role performs.
//!
//! Handlers check the acting user first, then drive the state machines and
//! publish a change event for every committed write.

pub mod delivery;
pub mod inventory;
pub mod order;
pub mod profile;
pub mod query;

pub use delivery::DeliveryHandler;
pub use inventory::InventoryHandler;
pub use order::OrderHandler;
pub use profile::ProfileHandler;
pub use query::QueryHandler;
