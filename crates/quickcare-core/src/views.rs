//! Live order lists for client screens.
//!
//! A [`LiveOrderList`] subscribes first and loads second, so no change can
//! slip between the two. After that the list only changes when a committed
//! change event arrives; it never guesses at the outcome of an operation.
//! When the subscription reports lag the list reloads from storage.

use crate::access::is_claimable;
use crate::subscription::{Subscription, SubscriptionFilter, SubscriptionUpdate};
use crate::{LifecycleError, QuickCareEngine};
use quickcare_types::{Actor, ChangeEvent, ChangeKind, ChangeRecord, Order, Role};

/// Which orders a list shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderView {
	/// The actor's own orders: placed by a customer, in scope for a store
	/// manager, assigned to a delivery partner.
	Mine,
	/// Orders open for claiming.
	Available,
}

pub struct LiveOrderList {
	engine: QuickCareEngine,
	actor: Actor,
	view: OrderView,
	subscription: Subscription,
	orders: Vec<Order>,
}

impl LiveOrderList {
	pub async fn open(
		engine: QuickCareEngine,
		actor: Actor,
		view: OrderView,
	) -> Result<Self, LifecycleError> {
		let filter = match (view, actor.role) {
			(OrderView::Available, _) => SubscriptionFilter::AvailableOrders,
			(OrderView::Mine, Role::Customer) => SubscriptionFilter::Customer(actor.id.clone()),
			(OrderView::Mine, Role::DeliveryPartner) => {
				SubscriptionFilter::DeliveryPartner(actor.id.clone())
			},
			(OrderView::Mine, Role::StoreManager) => {
				SubscriptionFilter::Table(quickcare_types::StorageTable::Orders)
			},
		};
		// Store-scoped managers may not subscribe to the whole order table;
		// they get a feed narrowed to the orders they manage.
		let subscription = match engine.subscribe(&actor, filter).await {
			Ok(subscription) => subscription,
			Err(LifecycleError::Forbidden(_))
				if view == OrderView::Mine && actor.is(Role::StoreManager) =>
			{
				engine.scoped_order_feed(&actor)
			},
			Err(e) => return Err(e),
		};

		let mut list = Self {
			engine,
			actor,
			view,
			subscription,
			orders: Vec::new(),
		};
		list.reload().await?;
		Ok(list)
	}

	pub fn orders(&self) -> &[Order] {
		&self.orders
	}

	pub fn view(&self) -> OrderView {
		self.view
	}

	/// Waits for the next relevant change and applies it.
	///
	/// Returns `Ok(false)` once the engine has shut down.
	pub async fn next_change(&mut self) -> Result<bool, LifecycleError> {
		match self.subscription.next().await {
			Some(SubscriptionUpdate::Change(event)) => {
				self.apply(&event);
				Ok(true)
			},
			Some(SubscriptionUpdate::Withdrawn { order_id }) => {
				self.orders.retain(|o| o.id != order_id);
				Ok(true)
			},
			Some(SubscriptionUpdate::Resync { missed }) => {
				tracing::debug!(missed, "Reloading order list");
				self.reload().await?;
				Ok(true)
			},
			None => Ok(false),
		}
	}

	/// Replaces the list with fresh rows from storage.
	pub async fn reload(&mut self) -> Result<(), LifecycleError> {
		self.orders = match self.view {
			OrderView::Mine => self.engine.list_orders(&self.actor).await?,
			OrderView::Available => self.engine.available_orders(&self.actor).await?,
		};
		self.sort();
		Ok(())
	}

	fn apply(&mut self, event: &ChangeEvent) {
		let ChangeRecord::Order(order) = &event.record else {
			return;
		};
		let position = self.orders.iter().position(|o| o.id == order.id);
		let keep = event.kind != ChangeKind::Delete && self.admits(order);

		match (position, keep) {
			(Some(i), true) => self.orders[i] = order.clone(),
			(None, true) => self.orders.push(order.clone()),
			(Some(i), false) => {
				self.orders.remove(i);
			},
			(None, false) => {},
		}
		self.sort();
	}

	fn admits(&self, order: &Order) -> bool {
		match self.view {
			OrderView::Available => is_claimable(order),
			OrderView::Mine => match self.actor.role {
				Role::Customer => order.customer_id == self.actor.id,
				Role::StoreManager => self.engine.policy().manages(&self.actor, order),
				Role::DeliveryPartner => {
					order.delivery_partner_id.as_deref() == Some(self.actor.id.as_str())
				},
			},
		}
	}

	fn sort(&mut self) {
		match self.view {
			OrderView::Mine => self.orders.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
			OrderView::Available => self.orders.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
		}
	}
}
