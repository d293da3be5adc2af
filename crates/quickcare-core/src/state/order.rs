//! Order state machine implementation.
//!
//! Every status change is expressed as an [`OrderAction`]. The static
//! transition table maps each action to the statuses it may start from and
//! the status it leads to; anything outside the table is rejected with
//! `InvalidTransition`. Transitions are applied inside one conditional update
//! of the order record, so a concurrent writer forces the later call to be
//! re-evaluated against fresh state instead of overwriting it.

use crate::LifecycleError;
use chrono::Utc;
use once_cell::sync::Lazy;
use quickcare_storage::StorageService;
use quickcare_types::{Order, OrderStatus, StorageTable};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Operations that act on an order's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderAction {
	Confirm,
	StartPreparing,
	MarkReady,
	Dispatch,
	PickUp,
	StartTransit,
	Deliver,
	Cancel,
	VerifyPrescription,
	AttachPrescription,
}

impl OrderAction {
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderAction::Confirm => "confirm",
			OrderAction::StartPreparing => "start_preparing",
			OrderAction::MarkReady => "mark_ready",
			OrderAction::Dispatch => "dispatch",
			OrderAction::PickUp => "pick_up",
			OrderAction::StartTransit => "start_transit",
			OrderAction::Deliver => "deliver",
			OrderAction::Cancel => "cancel",
			OrderAction::VerifyPrescription => "verify_prescription",
			OrderAction::AttachPrescription => "attach_prescription",
		}
	}

	/// Timeline message recorded when the action changes the status.
	pub fn history_message(&self) -> &'static str {
		match self {
			OrderAction::Confirm => "Order confirmed by pharmacy",
			OrderAction::StartPreparing => "Pharmacy is preparing your order",
			OrderAction::MarkReady => "Order ready for pickup",
			OrderAction::Dispatch => "Order handed over to delivery partner",
			OrderAction::PickUp => "Order picked up by delivery partner",
			OrderAction::StartTransit => "Out for delivery",
			OrderAction::Deliver => "Order delivered successfully",
			OrderAction::Cancel => "Order cancelled",
			OrderAction::VerifyPrescription => "Prescription verified",
			OrderAction::AttachPrescription => "Prescription uploaded",
		}
	}
}

impl fmt::Display for OrderAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Origin statuses and resulting status for one action.
/// `to == None` means the action edits the order without moving it.
struct Edge {
	from: HashSet<OrderStatus>,
	to: Option<OrderStatus>,
}

static TRANSITIONS: Lazy<HashMap<OrderAction, Edge>> = Lazy::new(|| {
	use OrderStatus::*;

	let before_ready = HashSet::from([Pending, Confirmed, Preparing]);
	let mut m = HashMap::new();
	m.insert(
		OrderAction::Confirm,
		Edge {
			from: HashSet::from([Pending]),
			to: Some(Confirmed),
		},
	);
	m.insert(
		OrderAction::StartPreparing,
		Edge {
			from: HashSet::from([Confirmed]),
			to: Some(Preparing),
		},
	);
	m.insert(
		OrderAction::MarkReady,
		Edge {
			from: HashSet::from([Preparing]),
			to: Some(ReadyForPickup),
		},
	);
	m.insert(
		OrderAction::Dispatch,
		Edge {
			from: HashSet::from([ReadyForPickup]),
			to: Some(PickedUp),
		},
	);
	m.insert(
		OrderAction::PickUp,
		Edge {
			from: HashSet::from([ReadyForPickup]),
			to: Some(PickedUp),
		},
	);
	m.insert(
		OrderAction::StartTransit,
		Edge {
			from: HashSet::from([PickedUp]),
			to: Some(InTransit),
		},
	);
	m.insert(
		OrderAction::Deliver,
		Edge {
			from: HashSet::from([InTransit]),
			to: Some(Delivered),
		},
	);
	m.insert(
		OrderAction::Cancel,
		Edge {
			from: HashSet::from([Pending, Confirmed]),
			to: Some(Cancelled),
		},
	);
	m.insert(
		OrderAction::VerifyPrescription,
		Edge {
			from: before_ready.clone(),
			to: None,
		},
	);
	m.insert(
		OrderAction::AttachPrescription,
		Edge {
			from: before_ready,
			to: None,
		},
	);
	m
});

/// Resolves `(status, action)` to the resulting status.
///
/// `Ok(None)` means the action is allowed and leaves the status unchanged.
pub fn next_status(
	from: OrderStatus,
	action: OrderAction,
) -> Result<Option<OrderStatus>, LifecycleError> {
	match TRANSITIONS.get(&action) {
		Some(edge) if edge.from.contains(&from) => Ok(edge.to),
		_ => Err(LifecycleError::InvalidTransition { from, action }),
	}
}

/// Applies an action to an in-memory order.
///
/// The transition is checked first, then `guard` may reject or edit the
/// order, and finally the status and timeline are updated.
pub fn apply_action<F>(order: &mut Order, action: OrderAction, guard: F) -> Result<(), LifecycleError>
where
	F: FnOnce(&mut Order) -> Result<(), LifecycleError>,
{
	let next = next_status(order.status, action)?;
	guard(order)?;
	match next {
		Some(status) => order.push_status(status, action.history_message()),
		None => order.updated_at = Utc::now(),
	}
	Ok(())
}

/// Persists orders and applies lifecycle actions to them.
pub struct OrderStateMachine {
	storage: Arc<StorageService>,
}

impl OrderStateMachine {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	pub async fn get_order(&self, order_id: &str) -> Result<Order, LifecycleError> {
		self.storage
			.retrieve(StorageTable::Orders.as_str(), order_id)
			.await
			.map_err(|e| LifecycleError::storage(e, "order", order_id))
	}

	pub async fn all_orders(&self) -> Result<Vec<Order>, LifecycleError> {
		Ok(self
			.storage
			.retrieve_all(StorageTable::Orders.as_str())
			.await?)
	}

	pub async fn query_orders<F>(&self, filter: F) -> Result<Vec<Order>, LifecycleError>
	where
		F: Fn(&Order) -> bool + Send,
	{
		Ok(self
			.storage
			.query(StorageTable::Orders.as_str(), filter)
			.await?)
	}

	/// Stores a newly placed order. Ids are fresh, so a collision is a bug in
	/// the caller and is reported as a failed precondition.
	pub async fn insert_order(&self, order: &Order) -> Result<(), LifecycleError> {
		let inserted = self
			.storage
			.insert(StorageTable::Orders.as_str(), &order.id, order)
			.await?;
		if !inserted {
			return Err(LifecycleError::PreconditionNotMet(format!(
				"order {} already exists",
				order.id
			)));
		}
		Ok(())
	}

	/// Applies `action` to the stored order in one conditional update.
	///
	/// `guard` runs on a fresh copy of the order on every attempt, after the
	/// transition itself has been found legal. Its error aborts the update and
	/// is returned unchanged.
	pub async fn transition<F>(
		&self,
		order_id: &str,
		action: OrderAction,
		mut guard: F,
	) -> Result<Order, LifecycleError>
	where
		F: FnMut(&mut Order) -> Result<(), LifecycleError> + Send,
	{
		self.update(order_id, |order| apply_action(order, action, &mut guard))
			.await
	}

	/// Conditionally edits an order without consulting the transition table.
	///
	/// Used for bookkeeping that is not a lifecycle step (claiming, reverting
	/// a claim, recording payment).
	pub async fn update<F>(&self, order_id: &str, mut edit: F) -> Result<Order, LifecycleError>
	where
		F: FnMut(&mut Order) -> Result<(), LifecycleError> + Send,
	{
		let mut rejection = None;
		let updated = self
			.storage
			.update_if(StorageTable::Orders.as_str(), order_id, |order: &mut Order| {
				match edit(order) {
					Ok(()) => true,
					Err(e) => {
						rejection = Some(e);
						false
					},
				}
			})
			.await
			.map_err(|e| LifecycleError::storage(e, "order", order_id))?;

		match updated {
			Some(order) => Ok(order),
			None => Err(rejection.unwrap_or_else(|| {
				LifecycleError::StoreUnavailable(format!("update of order {} was dropped", order_id))
			})),
		}
	}
}
