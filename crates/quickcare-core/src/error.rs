//! Error type returned by every lifecycle operation.

use crate::state::OrderAction;
use quickcare_storage::StorageError;
use quickcare_types::OrderStatus;
use thiserror::Error;

/// Errors surfaced to callers of the engine.
///
/// Role and state checks run before anything is written, so every variant
/// except `StoreUnavailable` means the call changed nothing.
#[derive(Debug, Error)]
pub enum LifecycleError {
	#[error("Forbidden: {0}")]
	Forbidden(String),
	#[error("Cannot {action} an order that is {from}")]
	InvalidTransition { from: OrderStatus, action: OrderAction },
	#[error("Precondition not met: {0}")]
	PreconditionNotMet(String),
	#[error("Order {0} is already assigned to a delivery partner")]
	AlreadyAssigned(String),
	#[error("Order {0} is not available for claiming")]
	NotClaimable(String),
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Store unavailable: {0}")]
	StoreUnavailable(String),
	#[error("Validation error: {0}")]
	Validation(String),
}

impl LifecycleError {
	/// Maps a storage failure on a specific record.
	pub fn storage(err: StorageError, kind: &str, id: &str) -> Self {
		match err {
			StorageError::NotFound => LifecycleError::NotFound(format!("{} {}", kind, id)),
			other => LifecycleError::StoreUnavailable(other.to_string()),
		}
	}
}

impl From<StorageError> for LifecycleError {
	fn from(err: StorageError) -> Self {
		match err {
			StorageError::NotFound => LifecycleError::NotFound("record".into()),
			other => LifecycleError::StoreUnavailable(other.to_string()),
		}
	}
}
