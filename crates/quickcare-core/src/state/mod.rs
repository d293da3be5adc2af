//! State machines for orders and deliveries.
//!
//! Both machines apply changes through conditional updates on the store so
//! that concurrent callers never overwrite each other's transitions.

pub mod delivery;
pub mod order;

pub use delivery::{Credit, DeliveryStateMachine};
pub use order::{apply_action, next_status, OrderAction, OrderStateMachine};
