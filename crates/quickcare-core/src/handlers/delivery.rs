//! Delivery handler for claiming and moving orders to the customer.
//!
//! A claim is a single conditional update of the order record: the first
//! partner to write wins and every later claim sees the partner already set.
//! Only the winner creates the delivery record. Afterwards each delivery step
//! writes the delivery first and then mirrors the status onto the order,
//! undoing the delivery write if the order write is refused.

use crate::access::AccessPolicy;
use crate::engine::event_bus::EventBus;
use crate::state::{next_status, Credit, DeliveryStateMachine, OrderAction, OrderStateMachine};
use crate::LifecycleError;
use chrono::{Duration, Utc};
use quickcare_config::DeliveryConfig;
use quickcare_types::{
	truncate_id, Actor, ChangeEvent, ChangeRecord, Delivery, DeliveryStatus, Order, OrderStatus,
	Role,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::instrument;

pub struct DeliveryHandler {
	orders: Arc<OrderStateMachine>,
	deliveries: Arc<DeliveryStateMachine>,
	policy: AccessPolicy,
	event_bus: EventBus,
	delivery_config: DeliveryConfig,
}

impl DeliveryHandler {
	pub fn new(
		orders: Arc<OrderStateMachine>,
		deliveries: Arc<DeliveryStateMachine>,
		policy: AccessPolicy,
		event_bus: EventBus,
		delivery_config: DeliveryConfig,
	) -> Self {
		Self {
			orders,
			deliveries,
			policy,
			event_bus,
			delivery_config,
		}
	}

	/// Assigns a ready order to the calling partner.
	///
	/// Losing a race yields `AlreadyAssigned`; an order that is not (or no
	/// longer) waiting at the counter yields `NotClaimable`.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id), actor = %actor))]
	pub async fn claim(&self, actor: &Actor, order_id: &str) -> Result<Delivery, LifecycleError> {
		self.policy
			.require_role(actor, Role::DeliveryPartner, "claim orders")?;

		let order = self
			.orders
			.update(order_id, |order| {
				if order.delivery_partner_id.is_some() {
					return Err(LifecycleError::AlreadyAssigned(order.id.clone()));
				}
				if order.status != OrderStatus::ReadyForPickup || !order.prescription_gate_open() {
					return Err(LifecycleError::NotClaimable(order.id.clone()));
				}
				order.delivery_partner_id = Some(actor.id.clone());
				order.updated_at = Utc::now();
				Ok(())
			})
			.await?;

		let now = Utc::now();
		let minutes = self.delivery_config.minutes_for(order.priority);
		let delivery = Delivery {
			order_id: order.id.clone(),
			delivery_partner_id: actor.id.clone(),
			status: DeliveryStatus::Assigned,
			earnings: order.delivery_fee,
			tip: Decimal::ZERO,
			bonus: Decimal::ZERO,
			estimated_delivery_at: i64::try_from(minutes)
				.ok()
				.map(|m| now + Duration::minutes(m)),
			assigned_at: now,
			updated_at: now,
			delivered_at: None,
		};

		match self.deliveries.insert_delivery(&delivery).await {
			Ok(true) => {},
			Ok(false) => {
				self.release_claim(actor, order_id).await;
				return Err(LifecycleError::AlreadyAssigned(order_id.to_string()));
			},
			Err(e) => {
				self.release_claim(actor, order_id).await;
				return Err(e);
			},
		}

		tracing::info!(earnings = %delivery.earnings, "Order claimed");
		self.event_bus
			.publish(ChangeEvent::updated(ChangeRecord::Order(order)))
			.ok();
		self.event_bus
			.publish(ChangeEvent::inserted(ChangeRecord::Delivery(delivery.clone())))
			.ok();
		Ok(delivery)
	}

	/// Moves the caller's delivery one step forward and mirrors the step on
	/// the order.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id), target = %target))]
	pub async fn advance(
		&self,
		actor: &Actor,
		order_id: &str,
		target: DeliveryStatus,
	) -> Result<Delivery, LifecycleError> {
		self.policy
			.require_role(actor, Role::DeliveryPartner, "update deliveries")?;
		let (from, action) = match target {
			DeliveryStatus::Assigned => {
				return Err(LifecycleError::Validation(
					"a delivery cannot be moved back to assigned".into(),
				))
			},
			DeliveryStatus::PickedUp => (DeliveryStatus::Assigned, OrderAction::PickUp),
			DeliveryStatus::InTransit => (DeliveryStatus::PickedUp, OrderAction::StartTransit),
			DeliveryStatus::Delivered => (DeliveryStatus::InTransit, OrderAction::Deliver),
		};

		let order = self.orders.get_order(order_id).await?;
		ensure_assigned_to(actor, &order)?;
		next_status(order.status, action)?;

		let delivery = self
			.deliveries
			.step(order_id, Some(&actor.id), from, target)
			.await?;

		let order = match self
			.orders
			.transition(order_id, action, |order| ensure_assigned_to(actor, order))
			.await
		{
			Ok(order) => order,
			Err(e) => {
				tracing::warn!(error = %e, "Order refused the delivery step, reverting");
				self.deliveries.revert(order_id, target, from).await;
				return Err(e);
			},
		};

		tracing::info!(status = %order.status, "Delivery advanced");
		self.publish_pair(order, delivery.clone());
		Ok(delivery)
	}

	/// Store-side hand-off of a claimed order to its partner.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn dispatch(&self, actor: &Actor, order_id: &str) -> Result<Order, LifecycleError> {
		self.policy
			.require_role(actor, Role::StoreManager, "dispatch orders")?;
		let order = self.orders.get_order(order_id).await?;
		self.policy.ensure_manages(actor, &order)?;
		next_status(order.status, OrderAction::Dispatch)?;
		if order.delivery_partner_id.is_none() {
			return Err(LifecycleError::PreconditionNotMet(
				"no delivery partner has claimed the order".into(),
			));
		}

		let delivery = self
			.deliveries
			.step(
				order_id,
				None,
				DeliveryStatus::Assigned,
				DeliveryStatus::PickedUp,
			)
			.await?;

		let order = match self
			.orders
			.transition(order_id, OrderAction::Dispatch, |order| {
				match &order.delivery_partner_id {
					Some(partner) if *partner == delivery.delivery_partner_id => Ok(()),
					_ => Err(LifecycleError::PreconditionNotMet(
						"the order's delivery partner changed".into(),
					)),
				}
			})
			.await
		{
			Ok(order) => order,
			Err(e) => {
				self.deliveries
					.revert(order_id, DeliveryStatus::PickedUp, DeliveryStatus::Assigned)
					.await;
				return Err(e);
			},
		};

		tracing::info!("Order dispatched");
		self.publish_pair(order.clone(), delivery);
		Ok(order)
	}

	/// Adds a customer tip to a delivered order.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id), amount = %amount))]
	pub async fn add_tip(
		&self,
		actor: &Actor,
		order_id: &str,
		amount: Decimal,
	) -> Result<Delivery, LifecycleError> {
		self.policy.require_role(actor, Role::Customer, "tip")?;
		if amount <= Decimal::ZERO {
			return Err(LifecycleError::Validation("tip must be positive".into()));
		}
		let order = self.orders.get_order(order_id).await?;
		self.policy.ensure_customer_owns(actor, &order)?;
		if order.status != OrderStatus::Delivered {
			return Err(LifecycleError::PreconditionNotMet(
				"tips can only be added to delivered orders".into(),
			));
		}

		let delivery = self.deliveries.credit(order_id, Credit::Tip, amount).await?;
		self.event_bus
			.publish(ChangeEvent::updated(ChangeRecord::Delivery(delivery.clone())))
			.ok();
		Ok(delivery)
	}

	/// Awards a performance bonus on a delivered order the store manages.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id), amount = %amount))]
	pub async fn award_bonus(
		&self,
		actor: &Actor,
		order_id: &str,
		amount: Decimal,
	) -> Result<Delivery, LifecycleError> {
		self.policy
			.require_role(actor, Role::StoreManager, "award bonuses")?;
		if amount <= Decimal::ZERO {
			return Err(LifecycleError::Validation("bonus must be positive".into()));
		}
		let order = self.orders.get_order(order_id).await?;
		self.policy.ensure_manages(actor, &order)?;

		let delivery = self
			.deliveries
			.credit(order_id, Credit::Bonus, amount)
			.await?;
		tracing::info!(partner = %delivery.delivery_partner_id, "Bonus awarded");
		self.event_bus
			.publish(ChangeEvent::updated(ChangeRecord::Delivery(delivery.clone())))
			.ok();
		Ok(delivery)
	}

	/// Clears the partner from an order whose delivery record could not be
	/// written. Only undoes our own claim.
	async fn release_claim(&self, actor: &Actor, order_id: &str) {
		let result = self
			.orders
			.update(order_id, |order| {
				if order.delivery_partner_id.as_deref() != Some(actor.id.as_str())
					|| order.status != OrderStatus::ReadyForPickup
				{
					return Err(LifecycleError::PreconditionNotMet(
						"claim is no longer ours".into(),
					));
				}
				order.delivery_partner_id = None;
				order.updated_at = Utc::now();
				Ok(())
			})
			.await;
		if let Err(e) = result {
			tracing::error!(error = %e, "Failed to release claim");
		}
	}

	fn publish_pair(&self, order: Order, delivery: Delivery) {
		self.event_bus
			.publish(ChangeEvent::updated(ChangeRecord::Delivery(delivery)))
			.ok();
		self.event_bus
			.publish(ChangeEvent::updated(ChangeRecord::Order(order)))
			.ok();
	}
}

fn ensure_assigned_to(actor: &Actor, order: &Order) -> Result<(), LifecycleError> {
	if order.delivery_partner_id.as_deref() != Some(actor.id.as_str()) {
		return Err(LifecycleError::Forbidden(format!(
			"order {} is not assigned to {}",
			order.id, actor
		)));
	}
	Ok(())
}
