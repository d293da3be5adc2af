//! Order handler for checkout and pharmacy-side processing.
//!
//! Customers place orders, attach prescriptions and cancel; store managers
//! confirm, prepare, verify prescriptions and mark orders ready. Each call
//! checks the actor against the stored order before the state machine runs.

use crate::access::AccessPolicy;
use crate::engine::event_bus::EventBus;
use crate::handlers::InventoryHandler;
use crate::state::{next_status, OrderAction, OrderStateMachine};
use crate::LifecycleError;
use chrono::Utc;
use quickcare_config::FeesConfig;
use quickcare_types::{
	new_id, truncate_id, Actor, ChangeEvent, ChangeRecord, Medicine, Order, OrderLineItem,
	OrderStatus, PaymentStatus, PlaceOrderRequest, Role,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

pub struct OrderHandler {
	orders: Arc<OrderStateMachine>,
	inventory: Arc<InventoryHandler>,
	policy: AccessPolicy,
	event_bus: EventBus,
	fees: FeesConfig,
}

impl OrderHandler {
	pub fn new(
		orders: Arc<OrderStateMachine>,
		inventory: Arc<InventoryHandler>,
		policy: AccessPolicy,
		event_bus: EventBus,
		fees: FeesConfig,
	) -> Self {
		Self {
			orders,
			inventory,
			policy,
			event_bus,
			fees,
		}
	}

	/// Places an order at catalog prices.
	///
	/// Line items are snapshotted so later price edits do not change the
	/// order. Stock is checked here but only taken at confirmation.
	#[instrument(skip_all, fields(actor = %actor))]
	pub async fn place_order(
		&self,
		actor: &Actor,
		request: PlaceOrderRequest,
	) -> Result<Order, LifecycleError> {
		self.policy
			.require_role(actor, Role::Customer, "place orders")?;
		validate_request(&request)?;

		let mut requested: HashMap<&str, u32> = HashMap::new();
		let mut items = Vec::with_capacity(request.items.len());
		for line in &request.items {
			let medicine = self.inventory.get_medicine(&line.medicine_id).await?;
			let total = requested.entry(line.medicine_id.as_str()).or_insert(0);
			*total += line.quantity;
			ensure_available(&medicine, *total)?;
			items.push(OrderLineItem {
				medicine_id: medicine.id,
				medicine_name: medicine.name,
				quantity: line.quantity,
				unit_price: medicine.price,
				prescription_required: medicine.prescription_required,
				store_manager_id: medicine.store_manager_id,
			});
		}

		let subtotal: Decimal = items.iter().map(OrderLineItem::subtotal).sum();
		let delivery_fee = self.fees.fee_for(request.priority);
		let now = Utc::now();
		let mut order = Order {
			id: new_id(),
			customer_id: actor.id.clone(),
			items,
			subtotal,
			delivery_fee,
			total_amount: subtotal + delivery_fee,
			delivery_address: request.delivery_address.trim().to_string(),
			delivery_phone: request.delivery_phone.trim().to_string(),
			notes: request.notes.filter(|n| !n.trim().is_empty()),
			priority: request.priority,
			status: OrderStatus::Pending,
			payment_status: request.payment_status,
			prescription_url: request.prescription_url.filter(|u| !u.trim().is_empty()),
			prescription_verified: false,
			stock_reserved: false,
			delivery_partner_id: None,
			history: Vec::new(),
			created_at: now,
			updated_at: now,
		};
		order.push_status(OrderStatus::Pending, "Order placed successfully");

		self.orders.insert_order(&order).await?;
		tracing::info!(
			order_id = %truncate_id(&order.id),
			items = order.items.len(),
			total = %order.total_amount,
			"Order placed"
		);
		self.publish(ChangeEvent::inserted(ChangeRecord::Order(order.clone())));
		Ok(order)
	}

	/// Attaches a prescription image reference. A new upload needs a new
	/// verification.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn attach_prescription(
		&self,
		actor: &Actor,
		order_id: &str,
		url: &str,
	) -> Result<Order, LifecycleError> {
		self.policy
			.require_role(actor, Role::Customer, "upload prescriptions")?;
		if url.trim().is_empty() {
			return Err(LifecycleError::Validation("prescription url is required".into()));
		}
		let order = self.orders.get_order(order_id).await?;
		self.policy.ensure_customer_owns(actor, &order)?;

		let order = self
			.orders
			.transition(order_id, OrderAction::AttachPrescription, |order| {
				order.prescription_url = Some(url.trim().to_string());
				order.prescription_verified = false;
				Ok(())
			})
			.await?;
		self.publish(ChangeEvent::updated(ChangeRecord::Order(order.clone())));
		Ok(order)
	}

	/// Cancels an order on behalf of its customer or a store manager.
	///
	/// Only unassigned orders that are pending or confirmed may be cancelled.
	/// Stock taken at confirmation goes back to the shelf.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn cancel(&self, actor: &Actor, order_id: &str) -> Result<Order, LifecycleError> {
		if actor.is(Role::DeliveryPartner) {
			return Err(LifecycleError::Forbidden(format!(
				"{} may not cancel orders",
				actor.role
			)));
		}
		let order = self.orders.get_order(order_id).await?;
		match actor.role {
			Role::Customer => self.policy.ensure_customer_owns(actor, &order)?,
			_ => self.policy.ensure_manages(actor, &order)?,
		}

		let mut release = false;
		let order = self
			.orders
			.transition(order_id, OrderAction::Cancel, |order| {
				if order.delivery_partner_id.is_some() {
					return Err(LifecycleError::InvalidTransition {
						from: order.status,
						action: OrderAction::Cancel,
					});
				}
				release = order.stock_reserved;
				order.stock_reserved = false;
				Ok(())
			})
			.await?;

		if release {
			self.inventory.release_stock(&order.items).await;
		}
		tracing::info!(by = %actor.role, stock_released = release, "Order cancelled");
		self.publish(ChangeEvent::updated(ChangeRecord::Order(order.clone())));
		Ok(order)
	}

	/// Accepts a pending order and takes its stock.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn confirm(&self, actor: &Actor, order_id: &str) -> Result<Order, LifecycleError> {
		let order = self.managed_order(actor, order_id).await?;
		next_status(order.status, OrderAction::Confirm)?;
		ensure_payment_ok(&order)?;

		self.inventory.reserve_stock(&order.items).await?;

		let result = self
			.orders
			.transition(order_id, OrderAction::Confirm, |order| {
				ensure_payment_ok(order)?;
				order.stock_reserved = true;
				Ok(())
			})
			.await;

		match result {
			Ok(order) => {
				tracing::info!("Order confirmed");
				self.publish(ChangeEvent::updated(ChangeRecord::Order(order.clone())));
				Ok(order)
			},
			Err(e) => {
				// Someone else moved the order first; the stock is not ours.
				self.inventory.release_stock(&order.items).await;
				Err(e)
			},
		}
	}

	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn start_preparing(&self, actor: &Actor, order_id: &str) -> Result<Order, LifecycleError> {
		self.managed_order(actor, order_id).await?;
		let order = self
			.orders
			.transition(order_id, OrderAction::StartPreparing, |_| Ok(()))
			.await?;
		self.publish(ChangeEvent::updated(ChangeRecord::Order(order.clone())));
		Ok(order)
	}

	/// Moves a prepared order to the pickup counter. Orders holding
	/// prescription-only medicines need a verified prescription first.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn mark_ready(&self, actor: &Actor, order_id: &str) -> Result<Order, LifecycleError> {
		self.managed_order(actor, order_id).await?;
		let order = self
			.orders
			.transition(order_id, OrderAction::MarkReady, |order| {
				if !order.prescription_gate_open() {
					return Err(LifecycleError::PreconditionNotMet(
						"prescription must be verified before the order is ready".into(),
					));
				}
				Ok(())
			})
			.await?;
		tracing::info!("Order ready for pickup");
		self.publish(ChangeEvent::updated(ChangeRecord::Order(order.clone())));
		Ok(order)
	}

	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn verify_prescription(
		&self,
		actor: &Actor,
		order_id: &str,
	) -> Result<Order, LifecycleError> {
		self.managed_order(actor, order_id).await?;
		let order = self
			.orders
			.transition(order_id, OrderAction::VerifyPrescription, |order| {
				if order.prescription_url.is_none() {
					return Err(LifecycleError::PreconditionNotMet(
						"no prescription has been uploaded".into(),
					));
				}
				order.prescription_verified = true;
				Ok(())
			})
			.await?;
		self.publish(ChangeEvent::updated(ChangeRecord::Order(order.clone())));
		Ok(order)
	}

	/// Records the outcome reported by the payment provider.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id), payment = ?payment_status))]
	pub async fn record_payment(
		&self,
		actor: &Actor,
		order_id: &str,
		payment_status: PaymentStatus,
	) -> Result<Order, LifecycleError> {
		self.managed_order(actor, order_id).await?;
		let order = self
			.orders
			.update(order_id, |order| {
				if order.status == OrderStatus::Cancelled {
					return Err(LifecycleError::PreconditionNotMet(
						"order is cancelled".into(),
					));
				}
				order.payment_status = payment_status;
				order.updated_at = Utc::now();
				Ok(())
			})
			.await?;
		self.publish(ChangeEvent::updated(ChangeRecord::Order(order.clone())));
		Ok(order)
	}

	async fn managed_order(&self, actor: &Actor, order_id: &str) -> Result<Order, LifecycleError> {
		self.policy
			.require_role(actor, Role::StoreManager, "manage orders")?;
		let order = self.orders.get_order(order_id).await?;
		self.policy.ensure_manages(actor, &order)?;
		Ok(order)
	}

	fn publish(&self, event: ChangeEvent) {
		self.event_bus.publish(event).ok();
	}
}

fn validate_request(request: &PlaceOrderRequest) -> Result<(), LifecycleError> {
	if request.items.is_empty() {
		return Err(LifecycleError::Validation("order has no items".into()));
	}
	if let Some(line) = request.items.iter().find(|line| line.quantity == 0) {
		return Err(LifecycleError::Validation(format!(
			"quantity for medicine {} must be at least 1",
			line.medicine_id
		)));
	}
	if request.delivery_address.trim().is_empty() {
		return Err(LifecycleError::Validation("delivery address is required".into()));
	}
	if request.delivery_phone.trim().is_empty() {
		return Err(LifecycleError::Validation("delivery phone is required".into()));
	}
	Ok(())
}

fn ensure_available(medicine: &Medicine, quantity: u32) -> Result<(), LifecycleError> {
	if medicine.stock < quantity {
		return Err(LifecycleError::PreconditionNotMet(format!(
			"insufficient stock for {}: {} requested, {} available",
			medicine.name, quantity, medicine.stock
		)));
	}
	Ok(())
}

fn ensure_payment_ok(order: &Order) -> Result<(), LifecycleError> {
	if order.payment_status == PaymentStatus::Failed {
		return Err(LifecycleError::PreconditionNotMet(
			"payment for the order failed".into(),
		));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use crate::testing::{self, customer, manager, partner};
	use crate::LifecycleError;
	use quickcare_types::{
		Actor, DeliveryPriority, OrderLineRequest, OrderStatus, PaymentStatus, PlaceOrderRequest,
	};
	use rust_decimal::Decimal;

	#[tokio::test]
	async fn test_place_order_totals_survive_reload() {
		let engine = testing::engine();
		let mgr = manager();
		let cust = customer();
		let a = testing::medicine(&engine, &mgr, "Paracetamol", 25, 10, false).await;
		let b = testing::medicine(&engine, &mgr, "Cetirizine", 85, 10, false).await;

		let placed = engine
			.place_order(&cust, testing::request(&[(&a.id, 2), (&b.id, 1)]))
			.await
			.unwrap();
		assert_eq!(placed.subtotal, Decimal::from(135));
		assert_eq!(placed.delivery_fee, Decimal::from(25));
		assert_eq!(placed.total_amount, Decimal::from(160));
		assert_eq!(placed.status, OrderStatus::Pending);
		assert_eq!(placed.history.len(), 1);
		assert_eq!(placed.history[0].message, "Order placed successfully");

		let reloaded = engine.get_order(&cust, &placed.id).await.unwrap();
		assert_eq!(reloaded.items, placed.items);
		assert_eq!(reloaded.subtotal, placed.subtotal);
		assert_eq!(reloaded.total_amount, placed.total_amount);
		assert!(reloaded.totals_consistent());
	}

	#[tokio::test]
	async fn test_priority_sets_fee() {
		let engine = testing::engine();
		let med = testing::medicine(&engine, &manager(), "Paracetamol", 25, 10, false).await;
		let mut request = testing::request(&[(&med.id, 1)]);
		request.priority = DeliveryPriority::Emergency;
		let order = engine.place_order(&customer(), request).await.unwrap();
		assert_eq!(order.delivery_fee, Decimal::from(50));
		assert_eq!(order.total_amount, Decimal::from(75));
	}

	#[tokio::test]
	async fn test_place_order_validation() {
		let engine = testing::engine();
		let med = testing::medicine(&engine, &manager(), "Paracetamol", 25, 1, false).await;
		let cust = customer();

		let empty = PlaceOrderRequest {
			items: vec![],
			..testing::request(&[])
		};
		assert!(matches!(
			engine.place_order(&cust, empty).await,
			Err(LifecycleError::Validation(_))
		));

		let zero = testing::request(&[(&med.id, 0)]);
		assert!(matches!(
			engine.place_order(&cust, zero).await,
			Err(LifecycleError::Validation(_))
		));

		let mut no_address = testing::request(&[(&med.id, 1)]);
		no_address.delivery_address = "  ".into();
		assert!(matches!(
			engine.place_order(&cust, no_address).await,
			Err(LifecycleError::Validation(_))
		));

		let too_many = testing::request(&[(&med.id, 1), (&med.id, 1)]);
		assert!(matches!(
			engine.place_order(&cust, too_many).await,
			Err(LifecycleError::PreconditionNotMet(_))
		));

		let unknown = PlaceOrderRequest {
			items: vec![OrderLineRequest {
				medicine_id: "nope".into(),
				quantity: 1,
			}],
			..testing::request(&[])
		};
		assert!(matches!(
			engine.place_order(&cust, unknown).await,
			Err(LifecycleError::NotFound(_))
		));

		assert!(matches!(
			engine.place_order(&partner(), testing::request(&[(&med.id, 1)])).await,
			Err(LifecycleError::Forbidden(_))
		));
		assert!(engine.list_orders(&manager()).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_cancel_rules() {
		let engine = testing::engine();
		let mgr = manager();
		let cust = customer();
		let med = testing::medicine(&engine, &mgr, "Paracetamol", 25, 10, false).await;

		let pending = engine
			.place_order(&cust, testing::request(&[(&med.id, 1)]))
			.await
			.unwrap();
		let cancelled = engine.cancel_order(&cust, &pending.id).await.unwrap();
		assert_eq!(cancelled.status, OrderStatus::Cancelled);
		assert!(matches!(
			engine.cancel_order(&cust, &pending.id).await,
			Err(LifecycleError::InvalidTransition {
				from: OrderStatus::Cancelled,
				..
			})
		));

		let preparing = engine
			.place_order(&cust, testing::request(&[(&med.id, 1)]))
			.await
			.unwrap();
		engine.confirm_order(&mgr, &preparing.id).await.unwrap();
		engine.start_preparing(&mgr, &preparing.id).await.unwrap();
		assert!(matches!(
			engine.cancel_order(&mgr, &preparing.id).await,
			Err(LifecycleError::InvalidTransition {
				from: OrderStatus::Preparing,
				..
			})
		));
	}

	#[tokio::test]
	async fn test_cancel_after_claim_is_rejected() {
		let engine = testing::engine();
		let order = testing::ready_order(&engine, false).await;
		engine.claim_order(&partner(), &order.id).await.unwrap();

		assert!(matches!(
			engine.cancel_order(&manager(), &order.id).await,
			Err(LifecycleError::InvalidTransition { .. })
		));
	}

	#[tokio::test]
	async fn test_other_customer_is_forbidden() {
		let engine = testing::engine();
		let med = testing::medicine(&engine, &manager(), "Paracetamol", 25, 10, false).await;
		let order = engine
			.place_order(&customer(), testing::request(&[(&med.id, 1)]))
			.await
			.unwrap();
		let intruder = Actor::customer("cust-2");

		assert!(matches!(
			engine.get_order(&intruder, &order.id).await,
			Err(LifecycleError::Forbidden(_))
		));
		assert!(matches!(
			engine.cancel_order(&intruder, &order.id).await,
			Err(LifecycleError::Forbidden(_))
		));
		assert!(matches!(
			engine
				.attach_prescription(&intruder, &order.id, "https://img/rx.png")
				.await,
			Err(LifecycleError::Forbidden(_))
		));
		assert_eq!(
			engine.get_order(&customer(), &order.id).await.unwrap().status,
			OrderStatus::Pending
		);
	}

	#[tokio::test]
	async fn test_confirm_takes_stock_and_cancel_returns_it() {
		let engine = testing::engine();
		let mgr = manager();
		let cust = customer();
		let a = testing::medicine(&engine, &mgr, "Paracetamol", 25, 5, false).await;
		let b = testing::medicine(&engine, &mgr, "Cetirizine", 85, 3, false).await;

		let order = engine
			.place_order(&cust, testing::request(&[(&a.id, 2), (&b.id, 1)]))
			.await
			.unwrap();
		let confirmed = engine.confirm_order(&mgr, &order.id).await.unwrap();
		assert!(confirmed.stock_reserved);
		assert_eq!(engine.medicine(&a.id).await.unwrap().stock, 3);
		assert_eq!(engine.medicine(&b.id).await.unwrap().stock, 2);

		engine.cancel_order(&cust, &order.id).await.unwrap();
		assert_eq!(engine.medicine(&a.id).await.unwrap().stock, 5);
		assert_eq!(engine.medicine(&b.id).await.unwrap().stock, 3);
	}

	#[tokio::test]
	async fn test_confirm_with_insufficient_stock_touches_nothing() {
		let engine = testing::engine();
		let mgr = manager();
		let cust = customer();
		let a = testing::medicine(&engine, &mgr, "Aspirin", 10, 5, false).await;
		let b = testing::medicine(&engine, &mgr, "Zinc", 20, 1, false).await;

		let order = engine
			.place_order(&cust, testing::request(&[(&a.id, 2), (&b.id, 1)]))
			.await
			.unwrap();
		// Stock runs out between checkout and confirmation.
		engine.restock(&mgr, &b.id, -1).await.unwrap();

		let err = engine.confirm_order(&mgr, &order.id).await.unwrap_err();
		assert!(matches!(err, LifecycleError::PreconditionNotMet(_)));
		assert_eq!(engine.medicine(&a.id).await.unwrap().stock, 5);
		assert_eq!(engine.medicine(&b.id).await.unwrap().stock, 0);

		let stored = engine.get_order(&cust, &order.id).await.unwrap();
		assert_eq!(stored.status, OrderStatus::Pending);
		assert!(!stored.stock_reserved);
	}

	#[tokio::test]
	async fn test_failed_payment_blocks_confirmation() {
		let engine = testing::engine();
		let mgr = manager();
		let med = testing::medicine(&engine, &mgr, "Aspirin", 10, 5, false).await;
		let order = engine
			.place_order(&customer(), testing::request(&[(&med.id, 1)]))
			.await
			.unwrap();
		engine
			.record_payment(&mgr, &order.id, PaymentStatus::Failed)
			.await
			.unwrap();

		assert!(matches!(
			engine.confirm_order(&mgr, &order.id).await,
			Err(LifecycleError::PreconditionNotMet(_))
		));
		assert_eq!(engine.medicine(&med.id).await.unwrap().stock, 5);
	}

	#[tokio::test]
	async fn test_prescription_gate() {
		let engine = testing::engine();
		let mgr = manager();
		let cust = customer();
		let rx = testing::medicine(&engine, &mgr, "Amoxicillin", 120, 10, true).await;
		let order = engine
			.place_order(&cust, testing::request(&[(&rx.id, 1)]))
			.await
			.unwrap();
		engine.confirm_order(&mgr, &order.id).await.unwrap();
		engine.start_preparing(&mgr, &order.id).await.unwrap();

		assert!(matches!(
			engine.mark_ready(&mgr, &order.id).await,
			Err(LifecycleError::PreconditionNotMet(_))
		));
		// Verification needs something to verify.
		assert!(matches!(
			engine.verify_prescription(&mgr, &order.id).await,
			Err(LifecycleError::PreconditionNotMet(_))
		));

		engine
			.attach_prescription(&cust, &order.id, "https://img/rx.png")
			.await
			.unwrap();
		let verified = engine.verify_prescription(&mgr, &order.id).await.unwrap();
		assert!(verified.prescription_verified);
		assert_eq!(verified.status, OrderStatus::Preparing);

		let ready = engine.mark_ready(&mgr, &order.id).await.unwrap();
		assert_eq!(ready.status, OrderStatus::ReadyForPickup);
		let statuses: Vec<_> = ready.history.iter().map(|h| h.status).collect();
		assert_eq!(
			statuses,
			vec![
				OrderStatus::Pending,
				OrderStatus::Confirmed,
				OrderStatus::Preparing,
				OrderStatus::ReadyForPickup
			]
		);
	}

	#[tokio::test]
	async fn test_verify_after_ready_is_invalid() {
		let engine = testing::engine();
		let order = testing::ready_order(&engine, false).await;
		assert!(matches!(
			engine.verify_prescription(&manager(), &order.id).await,
			Err(LifecycleError::InvalidTransition {
				from: OrderStatus::ReadyForPickup,
				..
			})
		));
	}

	#[tokio::test]
	async fn test_store_scope_limits_managers() {
		let engine = testing::engine_with(testing::config("[visibility]\nstore_manager_scope = \"store\"\n"));
		let owner = manager();
		let med = testing::medicine(&engine, &owner, "Aspirin", 10, 5, false).await;
		let order = engine
			.place_order(&customer(), testing::request(&[(&med.id, 1)]))
			.await
			.unwrap();

		let stranger = Actor::store_manager("mgr-2");
		assert!(matches!(
			engine.confirm_order(&stranger, &order.id).await,
			Err(LifecycleError::Forbidden(_))
		));
		assert!(engine.list_orders(&stranger).await.unwrap().is_empty());
		assert!(engine.confirm_order(&owner, &order.id).await.is_ok());
	}
}
