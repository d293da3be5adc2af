//! Filtered change feeds.
//!
//! A [`Subscription`] wraps one receiver on the engine's event bus and yields
//! only the events matching its filter. Each record is checked against the
//! subscriber's read rules as it arrives, so a feed stops carrying an order
//! as soon as the subscriber could no longer read it. When the receiver falls
//! behind, the missed events cannot be recovered, so the subscription reports
//! [`SubscriptionUpdate::Resync`] and the consumer reloads from storage.
//! Dropping the subscription releases the receiver.

use crate::access::AccessPolicy;
use crate::state::OrderStateMachine;
use quickcare_config::VisibilityScope;
use quickcare_types::{
	truncate_id, Actor, ChangeEvent, ChangeRecord, OrderStatus, Role, StorageTable,
};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

/// What a subscription listens for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionFilter {
	/// One order and its delivery record.
	Order(String),
	/// Orders placed by one customer.
	Customer(String),
	/// Orders and deliveries assigned to one partner.
	DeliveryPartner(String),
	/// Orders entering or leaving the claimable pool.
	AvailableOrders,
	/// Every change to one table.
	Table(StorageTable),
}

impl SubscriptionFilter {
	pub fn matches(&self, event: &ChangeEvent) -> bool {
		match self {
			SubscriptionFilter::Order(id) => event.order_id() == Some(id.as_str()),
			SubscriptionFilter::Customer(id) => {
				matches!(&event.record, ChangeRecord::Order(order) if &order.customer_id == id)
			},
			SubscriptionFilter::DeliveryPartner(id) => match &event.record {
				ChangeRecord::Order(order) => order.delivery_partner_id.as_ref() == Some(id),
				ChangeRecord::Delivery(delivery) => &delivery.delivery_partner_id == id,
				_ => false,
			},
			// A claimed order is still ready_for_pickup; matching it lets
			// consumers drop it from their pool.
			SubscriptionFilter::AvailableOrders => matches!(
				&event.record,
				ChangeRecord::Order(order) if order.status == OrderStatus::ReadyForPickup
			),
			SubscriptionFilter::Table(table) => event.table() == *table,
		}
	}
}

/// One item from a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionUpdate {
	Change(ChangeEvent),
	/// An order left the claimable pool for someone else. Only its id is
	/// disclosed.
	Withdrawn { order_id: String },
	/// Events were dropped; local state must be reloaded.
	Resync { missed: u64 },
}

/// The reader a subscription delivers to.
#[derive(Clone)]
pub(crate) struct Audience {
	actor: Actor,
	policy: AccessPolicy,
	orders: Arc<OrderStateMachine>,
}

impl Audience {
	pub(crate) fn new(actor: Actor, policy: AccessPolicy, orders: Arc<OrderStateMachine>) -> Self {
		Self {
			actor,
			policy,
			orders,
		}
	}

	/// Applies the read rules to one changed record.
	async fn may_see(&self, record: &ChangeRecord) -> bool {
		let actor = &self.actor;
		match record {
			ChangeRecord::Order(order) => self.policy.can_view_order(actor, order),
			ChangeRecord::Delivery(delivery) => {
				if actor.is(Role::DeliveryPartner) {
					return delivery.delivery_partner_id == actor.id;
				}
				if actor.is(Role::StoreManager)
					&& self.policy.store_manager_scope() == VisibilityScope::Global
				{
					return true;
				}
				match self.orders.get_order(&delivery.order_id).await {
					Ok(order) => self.policy.can_view_order(actor, &order),
					Err(e) => {
						tracing::debug!(
							order_id = %truncate_id(&delivery.order_id),
							error = %e,
							"Dropping delivery change"
						);
						false
					},
				}
			},
			ChangeRecord::Medicine(_) => true,
			ChangeRecord::Profile(profile) => {
				profile.id == actor.id || actor.is(Role::StoreManager)
			},
		}
	}
}

pub struct Subscription {
	filter: SubscriptionFilter,
	audience: Audience,
	receiver: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
	pub(crate) fn new(
		filter: SubscriptionFilter,
		audience: Audience,
		receiver: broadcast::Receiver<ChangeEvent>,
	) -> Self {
		Self {
			filter,
			audience,
			receiver,
		}
	}

	pub fn filter(&self) -> &SubscriptionFilter {
		&self.filter
	}

	/// Waits for the next matching change.
	///
	/// Returns `None` once the engine has shut down.
	pub async fn next(&mut self) -> Option<SubscriptionUpdate> {
		loop {
			match self.receiver.recv().await {
				Ok(event) if self.filter.matches(&event) => {
					if let Some(update) = self.screen(event).await {
						return Some(update);
					}
				},
				Ok(_) => continue,
				Err(RecvError::Lagged(missed)) => {
					tracing::debug!(missed, filter = ?self.filter, "Subscription lagged");
					return Some(SubscriptionUpdate::Resync { missed });
				},
				Err(RecvError::Closed) => return None,
			}
		}
	}

	/// Passes a matching event through the audience's read rules.
	async fn screen(&self, event: ChangeEvent) -> Option<SubscriptionUpdate> {
		if self.audience.may_see(&event.record).await {
			return Some(SubscriptionUpdate::Change(event));
		}
		match (&self.filter, &event.record) {
			(SubscriptionFilter::AvailableOrders, ChangeRecord::Order(order)) => {
				Some(SubscriptionUpdate::Withdrawn {
					order_id: order.id.clone(),
				})
			},
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::event_bus::EventBus;
	use chrono::Utc;
	use quickcare_storage::{implementations::memory::MemoryStorage, StorageService};
	use quickcare_types::{Delivery, DeliveryStatus, Order, OrderLineItem, PaymentStatus};
	use rust_decimal::Decimal;

	fn audience(actor: Actor) -> Audience {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		Audience::new(
			actor,
			AccessPolicy::new(VisibilityScope::Global),
			Arc::new(OrderStateMachine::new(storage)),
		)
	}

	fn order(id: &str, customer: &str, status: OrderStatus, partner: Option<&str>) -> Order {
		let now = Utc::now();
		Order {
			id: id.into(),
			customer_id: customer.into(),
			items: vec![OrderLineItem {
				medicine_id: "m".into(),
				medicine_name: "M".into(),
				quantity: 1,
				unit_price: Decimal::ONE,
				prescription_required: false,
				store_manager_id: "mgr".into(),
			}],
			subtotal: Decimal::ONE,
			delivery_fee: Decimal::ZERO,
			total_amount: Decimal::ONE,
			delivery_address: "addr".into(),
			delivery_phone: "phone".into(),
			notes: None,
			priority: Default::default(),
			status,
			payment_status: PaymentStatus::Paid,
			prescription_url: None,
			prescription_verified: false,
			stock_reserved: false,
			delivery_partner_id: partner.map(str::to_string),
			history: vec![],
			created_at: now,
			updated_at: now,
		}
	}

	fn delivery(order_id: &str, partner: &str) -> Delivery {
		let now = Utc::now();
		Delivery {
			order_id: order_id.into(),
			delivery_partner_id: partner.into(),
			status: DeliveryStatus::Assigned,
			earnings: Decimal::ZERO,
			tip: Decimal::ZERO,
			bonus: Decimal::ZERO,
			estimated_delivery_at: None,
			assigned_at: now,
			updated_at: now,
			delivered_at: None,
		}
	}

	#[test]
	fn test_filters() {
		let placed = ChangeEvent::inserted(ChangeRecord::Order(order(
			"o1",
			"c1",
			OrderStatus::Pending,
			None,
		)));
		let claimed = ChangeEvent::updated(ChangeRecord::Order(order(
			"o2",
			"c2",
			OrderStatus::ReadyForPickup,
			Some("r1"),
		)));
		let assigned = ChangeEvent::inserted(ChangeRecord::Delivery(delivery("o2", "r1")));

		assert!(SubscriptionFilter::Order("o1".into()).matches(&placed));
		assert!(!SubscriptionFilter::Order("o1".into()).matches(&claimed));
		assert!(SubscriptionFilter::Order("o2".into()).matches(&assigned));

		assert!(SubscriptionFilter::Customer("c1".into()).matches(&placed));
		assert!(!SubscriptionFilter::Customer("c1".into()).matches(&claimed));

		assert!(SubscriptionFilter::DeliveryPartner("r1".into()).matches(&claimed));
		assert!(SubscriptionFilter::DeliveryPartner("r1".into()).matches(&assigned));
		assert!(!SubscriptionFilter::DeliveryPartner("r2".into()).matches(&assigned));

		assert!(!SubscriptionFilter::AvailableOrders.matches(&placed));
		assert!(SubscriptionFilter::AvailableOrders.matches(&claimed));

		assert!(SubscriptionFilter::Table(StorageTable::Deliveries).matches(&assigned));
		assert!(!SubscriptionFilter::Table(StorageTable::Medicines).matches(&assigned));
	}

	#[tokio::test]
	async fn test_only_matching_events_are_delivered() {
		let bus = EventBus::new(16);
		let mut sub = Subscription::new(
			SubscriptionFilter::Customer("c1".into()),
			audience(Actor::customer("c1")),
			bus.subscribe(),
		);

		bus.publish(ChangeEvent::inserted(ChangeRecord::Order(order(
			"o-other",
			"c2",
			OrderStatus::Pending,
			None,
		))))
		.ok();
		bus.publish(ChangeEvent::inserted(ChangeRecord::Order(order(
			"o-mine",
			"c1",
			OrderStatus::Pending,
			None,
		))))
		.ok();

		match sub.next().await {
			Some(SubscriptionUpdate::Change(event)) => assert_eq!(event.order_id(), Some("o-mine")),
			other => panic!("unexpected update: {other:?}"),
		}
	}

	#[tokio::test]
	async fn test_lag_reports_resync() {
		let bus = EventBus::new(2);
		let mut sub = Subscription::new(
			SubscriptionFilter::Table(StorageTable::Orders),
			audience(Actor::store_manager("mgr")),
			bus.subscribe(),
		);

		for i in 0..5 {
			bus.publish(ChangeEvent::inserted(ChangeRecord::Order(order(
				&format!("o{i}"),
				"c1",
				OrderStatus::Pending,
				None,
			))))
			.ok();
		}

		assert_eq!(sub.next().await, Some(SubscriptionUpdate::Resync { missed: 3 }));
		// After the resync notice the newest events are still delivered.
		assert!(matches!(sub.next().await, Some(SubscriptionUpdate::Change(_))));
	}

	#[tokio::test]
	async fn test_closed_bus_ends_subscription() {
		let bus = EventBus::new(4);
		let mut sub = Subscription::new(
			SubscriptionFilter::AvailableOrders,
			audience(Actor::delivery_partner("r1")),
			bus.subscribe(),
		);
		drop(bus);
		assert_eq!(sub.next().await, None);
	}

	#[tokio::test]
	async fn test_claimed_order_is_withdrawn_from_other_partners() {
		let bus = EventBus::new(8);
		let mut mine = Subscription::new(
			SubscriptionFilter::AvailableOrders,
			audience(Actor::delivery_partner("r1")),
			bus.subscribe(),
		);
		let mut theirs = Subscription::new(
			SubscriptionFilter::AvailableOrders,
			audience(Actor::delivery_partner("r2")),
			bus.subscribe(),
		);

		bus.publish(ChangeEvent::updated(ChangeRecord::Order(order(
			"o1",
			"c1",
			OrderStatus::ReadyForPickup,
			Some("r1"),
		))))
		.ok();

		assert!(matches!(mine.next().await, Some(SubscriptionUpdate::Change(_))));
		assert_eq!(
			theirs.next().await,
			Some(SubscriptionUpdate::Withdrawn {
				order_id: "o1".into()
			})
		);
	}

	#[tokio::test]
	async fn test_unreadable_records_are_skipped() {
		let bus = EventBus::new(8);
		let mut sub = Subscription::new(
			SubscriptionFilter::Table(StorageTable::Deliveries),
			audience(Actor::delivery_partner("r2")),
			bus.subscribe(),
		);

		bus.publish(ChangeEvent::inserted(ChangeRecord::Delivery(delivery("o1", "r1"))))
			.ok();
		bus.publish(ChangeEvent::inserted(ChangeRecord::Delivery(delivery("o2", "r2"))))
			.ok();
		drop(bus);

		match sub.next().await {
			Some(SubscriptionUpdate::Change(event)) => assert_eq!(event.order_id(), Some("o2")),
			other => panic!("unexpected update: {other:?}"),
		}
		assert_eq!(sub.next().await, None);
	}
}
