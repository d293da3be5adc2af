//! Role-based access rules.
//!
//! Every engine operation checks the acting user here before any state
//! machine logic runs; a rule violation is always `Forbidden`.

use crate::LifecycleError;
use quickcare_config::VisibilityScope;
use quickcare_types::{Actor, Order, Role};

#[derive(Debug, Clone, Copy)]
pub struct AccessPolicy {
	store_manager_scope: VisibilityScope,
}

impl AccessPolicy {
	pub fn new(store_manager_scope: VisibilityScope) -> Self {
		Self {
			store_manager_scope,
		}
	}

	pub fn store_manager_scope(&self) -> VisibilityScope {
		self.store_manager_scope
	}

	/// Fails unless the actor holds `role`. `what` completes "may not ...".
	pub fn require_role(&self, actor: &Actor, role: Role, what: &str) -> Result<(), LifecycleError> {
		if actor.role != role {
			return Err(LifecycleError::Forbidden(format!(
				"{} may not {}",
				actor.role, what
			)));
		}
		Ok(())
	}

	/// True if a store manager's scope covers the order.
	pub fn manages(&self, actor: &Actor, order: &Order) -> bool {
		actor.is(Role::StoreManager)
			&& match self.store_manager_scope {
				VisibilityScope::Global => true,
				VisibilityScope::Store => order.involves_store_manager(&actor.id),
			}
	}

	/// Read visibility of a single order.
	///
	/// Delivery partners see orders assigned to them and orders currently
	/// open for claiming.
	pub fn can_view_order(&self, actor: &Actor, order: &Order) -> bool {
		match actor.role {
			Role::Customer => order.customer_id == actor.id,
			Role::StoreManager => self.manages(actor, order),
			Role::DeliveryPartner => {
				order.delivery_partner_id.as_deref() == Some(actor.id.as_str())
					|| is_claimable(order)
			},
		}
	}

	pub fn ensure_can_view(&self, actor: &Actor, order: &Order) -> Result<(), LifecycleError> {
		if !self.can_view_order(actor, order) {
			return Err(LifecycleError::Forbidden(format!(
				"{} may not access order {}",
				actor, order.id
			)));
		}
		Ok(())
	}

	pub fn ensure_customer_owns(&self, actor: &Actor, order: &Order) -> Result<(), LifecycleError> {
		self.require_role(actor, Role::Customer, "act on orders as a customer")?;
		if order.customer_id != actor.id {
			return Err(LifecycleError::Forbidden(format!(
				"order {} belongs to another customer",
				order.id
			)));
		}
		Ok(())
	}

	pub fn ensure_manages(&self, actor: &Actor, order: &Order) -> Result<(), LifecycleError> {
		self.require_role(actor, Role::StoreManager, "manage orders")?;
		if !self.manages(actor, order) {
			return Err(LifecycleError::Forbidden(format!(
				"order {} is outside the store's scope",
				order.id
			)));
		}
		Ok(())
	}
}

/// An order a delivery partner may claim right now.
pub fn is_claimable(order: &Order) -> bool {
	order.status == quickcare_types::OrderStatus::ReadyForPickup
		&& order.delivery_partner_id.is_none()
		&& order.prescription_gate_open()
}
