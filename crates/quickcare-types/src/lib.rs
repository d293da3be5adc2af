//! Common types module for the QuickCare order lifecycle system.
//!
//! This module defines the records, status enums and shared vocabulary used
//! throughout the workspace. Keeping them in one crate lets the storage,
//! configuration and core crates agree on the persisted shape of every row.

/// Actor context, roles and user profiles.
pub mod actor;
/// Delivery records and earnings reporting types.
pub mod delivery;
/// Change notification types published after every successful write.
pub mod events;
/// Catalog and inventory records.
pub mod medicine;
/// Orders, line items and their status enums.
pub mod order;
/// Self-registration trait for pluggable implementations.
pub mod registry;
/// Storage tables for the persisted collections.
pub mod storage;
/// Small helpers shared by several crates.
pub mod utils;
/// Configuration validation types for implementation-specific settings.
pub mod validation;

pub use actor::*;
pub use delivery::*;
pub use events::*;
pub use medicine::*;
pub use order::*;
pub use registry::ImplementationRegistry;
pub use storage::*;
pub use utils::{new_id, truncate_id};
pub use validation::*;
