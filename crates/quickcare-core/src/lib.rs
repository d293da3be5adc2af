//! Core engine for the QuickCare order lifecycle.
//!
//! This crate owns the rules of the system: the order and delivery state
//! machines, the role checks that gate every operation, the claim protocol
//! that assigns an order to exactly one delivery partner, and the change feed
//! that keeps client views current. All state lives behind the storage
//! service; the engine itself holds no mutable state between calls.

pub mod access;
pub mod builder;
pub mod earnings;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod state;
pub mod subscription;
pub mod views;

#[cfg(test)]
pub(crate) mod testing;

pub use access::AccessPolicy;
pub use builder::{BuilderError, EngineFactories, QuickCareBuilder};
pub use engine::{EngineError, QuickCareEngine};
pub use error::LifecycleError;
pub use state::OrderAction;
pub use subscription::{Subscription, SubscriptionFilter, SubscriptionUpdate};
pub use views::{LiveOrderList, OrderView};
