//! The QuickCare engine.
//!
//! [`QuickCareEngine`] is the single entry point for every operation. It is
//! cheap to clone and safe to share: all state lives in the storage service,
//! and every clone publishes to the same event bus.

pub mod event_bus;
pub mod lifecycle;

use crate::access::AccessPolicy;
use crate::handlers::{
	DeliveryHandler, InventoryHandler, OrderHandler, ProfileHandler, QueryHandler,
};
use crate::state::{DeliveryStateMachine, OrderStateMachine};
use crate::subscription::{Audience, Subscription, SubscriptionFilter};
use crate::LifecycleError;
use quickcare_config::{Config, VisibilityScope};
use quickcare_storage::StorageService;
use quickcare_types::{
	truncate_id, Actor, Delivery, DeliveryStatus, EarningsPeriod, EarningsSummary, Medicine,
	MedicineDraft, MedicineUpdate, Order, PaymentStatus, PlaceOrderRequest, Profile,
	ProfileUpdate, Role, StorageTable,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;

/// Errors that stop the engine itself, as opposed to a single operation.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Service error: {0}")]
	Service(String),
}

#[derive(Clone)]
pub struct QuickCareEngine {
	pub(crate) config: Config,
	pub(crate) storage: Arc<StorageService>,
	pub(crate) event_bus: event_bus::EventBus,
	pub(crate) policy: AccessPolicy,
	pub(crate) orders: Arc<OrderStateMachine>,
	pub(crate) order_handler: Arc<OrderHandler>,
	pub(crate) delivery_handler: Arc<DeliveryHandler>,
	pub(crate) inventory_handler: Arc<InventoryHandler>,
	pub(crate) profile_handler: Arc<ProfileHandler>,
	pub(crate) query_handler: Arc<QueryHandler>,
}

impl QuickCareEngine {
	pub fn new(config: Config, storage: Arc<StorageService>) -> Self {
		let event_bus = event_bus::EventBus::new(config.notifications.channel_capacity);
		let policy = AccessPolicy::new(config.visibility.store_manager_scope);
		let orders = Arc::new(OrderStateMachine::new(storage.clone()));
		let deliveries = Arc::new(DeliveryStateMachine::new(storage.clone()));

		let inventory_handler = Arc::new(InventoryHandler::new(
			storage.clone(),
			policy,
			event_bus.clone(),
		));
		let order_handler = Arc::new(OrderHandler::new(
			orders.clone(),
			inventory_handler.clone(),
			policy,
			event_bus.clone(),
			config.fees.clone(),
		));
		let delivery_handler = Arc::new(DeliveryHandler::new(
			orders.clone(),
			deliveries.clone(),
			policy,
			event_bus.clone(),
			config.delivery.clone(),
		));
		let profile_handler = Arc::new(ProfileHandler::new(storage.clone(), event_bus.clone()));
		let query_handler = Arc::new(QueryHandler::new(orders.clone(), deliveries, policy));

		Self {
			config,
			storage,
			event_bus,
			policy,
			orders,
			order_handler,
			delivery_handler,
			inventory_handler,
			profile_handler,
			query_handler,
		}
	}

	/// Logs every committed change until Ctrl-C.
	///
	/// Operations are served by direct calls on the engine; this loop only
	/// keeps a record of what happened.
	pub async fn run(&self) -> Result<(), EngineError> {
		let mut events = self.event_bus.subscribe();
		tracing::info!(store = %self.config.store.name, "Engine running");

		loop {
			tokio::select! {
				received = events.recv() => match received {
					Ok(event) => {
						tracing::info!(
							table = %event.table(),
							kind = ?event.kind,
							key = %truncate_id(event.record.key()),
							"Change committed"
						);
					}
					Err(RecvError::Lagged(missed)) => {
						tracing::warn!(missed, "Change log fell behind");
					}
					Err(RecvError::Closed) => break,
				},

				_ = tokio::signal::ctrl_c() => {
					break;
				}
			}
		}

		Ok(())
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	pub fn policy(&self) -> &AccessPolicy {
		&self.policy
	}

	/// Opens a filtered change feed, checked against the same rules as reads.
	pub async fn subscribe(
		&self,
		actor: &Actor,
		filter: SubscriptionFilter,
	) -> Result<Subscription, LifecycleError> {
		let global_manager = actor.is(Role::StoreManager)
			&& self.policy.store_manager_scope() == VisibilityScope::Global;
		let allowed = match &filter {
			SubscriptionFilter::Order(order_id) => {
				let order = self.orders.get_order(order_id).await?;
				self.policy.can_view_order(actor, &order)
			},
			SubscriptionFilter::Customer(id) => {
				(actor.is(Role::Customer) && actor.id == *id) || global_manager
			},
			SubscriptionFilter::DeliveryPartner(id) => {
				(actor.is(Role::DeliveryPartner) && actor.id == *id) || global_manager
			},
			SubscriptionFilter::AvailableOrders => {
				actor.is(Role::DeliveryPartner) || actor.is(Role::StoreManager)
			},
			SubscriptionFilter::Table(StorageTable::Medicines) => true,
			SubscriptionFilter::Table(_) => global_manager,
		};
		if !allowed {
			return Err(LifecycleError::Forbidden(format!(
				"{} may not subscribe to {:?}",
				actor, filter
			)));
		}

		tracing::debug!(actor = %actor, filter = ?filter, "Subscription opened");
		Ok(Subscription::new(
			filter,
			self.audience(actor),
			self.event_bus.subscribe(),
		))
	}

	/// Order feed narrowed to the orders `actor` may read, for store managers
	/// whose scope does not cover the whole table.
	pub(crate) fn scoped_order_feed(&self, actor: &Actor) -> Subscription {
		Subscription::new(
			SubscriptionFilter::Table(StorageTable::Orders),
			self.audience(actor),
			self.event_bus.subscribe(),
		)
	}

	fn audience(&self, actor: &Actor) -> Audience {
		Audience::new(actor.clone(), self.policy, self.orders.clone())
	}

	// Customer operations

	pub async fn place_order(
		&self,
		actor: &Actor,
		request: PlaceOrderRequest,
	) -> Result<Order, LifecycleError> {
		self.order_handler.place_order(actor, request).await
	}

	pub async fn attach_prescription(
		&self,
		actor: &Actor,
		order_id: &str,
		url: &str,
	) -> Result<Order, LifecycleError> {
		self.order_handler
			.attach_prescription(actor, order_id, url)
			.await
	}

	pub async fn cancel_order(&self, actor: &Actor, order_id: &str) -> Result<Order, LifecycleError> {
		self.order_handler.cancel(actor, order_id).await
	}

	pub async fn add_tip(
		&self,
		actor: &Actor,
		order_id: &str,
		amount: Decimal,
	) -> Result<Delivery, LifecycleError> {
		self.delivery_handler.add_tip(actor, order_id, amount).await
	}

	// Store manager operations

	pub async fn confirm_order(&self, actor: &Actor, order_id: &str) -> Result<Order, LifecycleError> {
		self.order_handler.confirm(actor, order_id).await
	}

	pub async fn start_preparing(
		&self,
		actor: &Actor,
		order_id: &str,
	) -> Result<Order, LifecycleError> {
		self.order_handler.start_preparing(actor, order_id).await
	}

	pub async fn mark_ready(&self, actor: &Actor, order_id: &str) -> Result<Order, LifecycleError> {
		self.order_handler.mark_ready(actor, order_id).await
	}

	pub async fn verify_prescription(
		&self,
		actor: &Actor,
		order_id: &str,
	) -> Result<Order, LifecycleError> {
		self.order_handler.verify_prescription(actor, order_id).await
	}

	pub async fn record_payment(
		&self,
		actor: &Actor,
		order_id: &str,
		payment_status: PaymentStatus,
	) -> Result<Order, LifecycleError> {
		self.order_handler
			.record_payment(actor, order_id, payment_status)
			.await
	}

	pub async fn dispatch_order(&self, actor: &Actor, order_id: &str) -> Result<Order, LifecycleError> {
		self.delivery_handler.dispatch(actor, order_id).await
	}

	pub async fn award_bonus(
		&self,
		actor: &Actor,
		order_id: &str,
		amount: Decimal,
	) -> Result<Delivery, LifecycleError> {
		self.delivery_handler
			.award_bonus(actor, order_id, amount)
			.await
	}

	pub async fn create_medicine(
		&self,
		actor: &Actor,
		draft: MedicineDraft,
	) -> Result<Medicine, LifecycleError> {
		self.inventory_handler.create_medicine(actor, draft).await
	}

	pub async fn update_medicine(
		&self,
		actor: &Actor,
		medicine_id: &str,
		update: MedicineUpdate,
	) -> Result<Medicine, LifecycleError> {
		self.inventory_handler
			.update_medicine(actor, medicine_id, update)
			.await
	}

	pub async fn restock(
		&self,
		actor: &Actor,
		medicine_id: &str,
		delta: i64,
	) -> Result<Medicine, LifecycleError> {
		self.inventory_handler
			.restock(actor, medicine_id, delta)
			.await
	}

	pub async fn delete_medicine(&self, actor: &Actor, medicine_id: &str) -> Result<(), LifecycleError> {
		self.inventory_handler
			.delete_medicine(actor, medicine_id)
			.await
	}

	pub async fn my_medicines(&self, actor: &Actor) -> Result<Vec<Medicine>, LifecycleError> {
		self.inventory_handler.my_medicines(actor).await
	}

	pub async fn low_stock(&self, actor: &Actor) -> Result<Vec<Medicine>, LifecycleError> {
		self.inventory_handler.low_stock(actor).await
	}

	// Delivery partner operations

	pub async fn claim_order(&self, actor: &Actor, order_id: &str) -> Result<Delivery, LifecycleError> {
		self.delivery_handler.claim(actor, order_id).await
	}

	pub async fn advance_delivery(
		&self,
		actor: &Actor,
		order_id: &str,
		target: DeliveryStatus,
	) -> Result<Delivery, LifecycleError> {
		self.delivery_handler.advance(actor, order_id, target).await
	}

	pub async fn earnings_summary(
		&self,
		actor: &Actor,
		period: EarningsPeriod,
	) -> Result<EarningsSummary, LifecycleError> {
		self.query_handler.earnings_summary(actor, period).await
	}

	// Reads

	pub async fn get_order(&self, actor: &Actor, order_id: &str) -> Result<Order, LifecycleError> {
		self.query_handler.get_order(actor, order_id).await
	}

	pub async fn list_orders(&self, actor: &Actor) -> Result<Vec<Order>, LifecycleError> {
		self.query_handler.list_orders(actor).await
	}

	pub async fn available_orders(&self, actor: &Actor) -> Result<Vec<Order>, LifecycleError> {
		self.query_handler.available_orders(actor).await
	}

	pub async fn current_deliveries(&self, actor: &Actor) -> Result<Vec<Order>, LifecycleError> {
		self.query_handler.current_deliveries(actor).await
	}

	pub async fn delivery_for_order(
		&self,
		actor: &Actor,
		order_id: &str,
	) -> Result<Option<Delivery>, LifecycleError> {
		self.query_handler.delivery_for_order(actor, order_id).await
	}

	/// In-stock medicines, open to every role.
	pub async fn catalog(&self, category: Option<&str>) -> Result<Vec<Medicine>, LifecycleError> {
		self.inventory_handler.catalog(category).await
	}

	pub async fn medicine(&self, medicine_id: &str) -> Result<Medicine, LifecycleError> {
		self.inventory_handler.get_medicine(medicine_id).await
	}

	// Profiles

	pub async fn register_profile(
		&self,
		actor: &Actor,
		full_name: &str,
		phone: Option<String>,
	) -> Result<Profile, LifecycleError> {
		self.profile_handler.register(actor, full_name, phone).await
	}

	pub async fn profile(&self, actor: &Actor, profile_id: &str) -> Result<Profile, LifecycleError> {
		self.profile_handler.profile(actor, profile_id).await
	}

	pub async fn update_profile(
		&self,
		actor: &Actor,
		update: ProfileUpdate,
	) -> Result<Profile, LifecycleError> {
		self.profile_handler.update(actor, update).await
	}
}
