//! Role-scoped reads.
//!
//! Each query returns only what the acting user may see: customers their own
//! orders, store managers the orders in their visibility scope, delivery
//! partners the open pool and their own assignments.

use crate::access::{is_claimable, AccessPolicy};
use crate::earnings;
use crate::state::{DeliveryStateMachine, OrderStateMachine};
use crate::LifecycleError;
use chrono::Utc;
use quickcare_types::{
	Actor, Delivery, DeliveryStatus, EarningsPeriod, EarningsSummary, Order, Role,
};
use std::sync::Arc;

pub struct QueryHandler {
	orders: Arc<OrderStateMachine>,
	deliveries: Arc<DeliveryStateMachine>,
	policy: AccessPolicy,
}

impl QueryHandler {
	pub fn new(
		orders: Arc<OrderStateMachine>,
		deliveries: Arc<DeliveryStateMachine>,
		policy: AccessPolicy,
	) -> Self {
		Self {
			orders,
			deliveries,
			policy,
		}
	}

	pub async fn get_order(&self, actor: &Actor, order_id: &str) -> Result<Order, LifecycleError> {
		let order = self.orders.get_order(order_id).await?;
		self.policy.ensure_can_view(actor, &order)?;
		Ok(order)
	}

	/// Orders belonging to the actor, newest first.
	///
	/// For delivery partners this is every order they were assigned,
	/// delivered ones included.
	pub async fn list_orders(&self, actor: &Actor) -> Result<Vec<Order>, LifecycleError> {
		let policy = self.policy;
		let mut orders = self
			.orders
			.query_orders(|order| match actor.role {
				Role::Customer => order.customer_id == actor.id,
				Role::StoreManager => policy.manages(actor, order),
				Role::DeliveryPartner => {
					order.delivery_partner_id.as_deref() == Some(actor.id.as_str())
				},
			})
			.await?;
		orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
		Ok(orders)
	}

	/// Orders waiting for a partner, oldest first.
	pub async fn available_orders(&self, actor: &Actor) -> Result<Vec<Order>, LifecycleError> {
		self.policy
			.require_role(actor, Role::DeliveryPartner, "browse available orders")?;
		let mut orders = self.orders.query_orders(is_claimable).await?;
		orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
		Ok(orders)
	}

	/// The partner's assignments that have not been delivered yet.
	pub async fn current_deliveries(&self, actor: &Actor) -> Result<Vec<Order>, LifecycleError> {
		self.policy
			.require_role(actor, Role::DeliveryPartner, "list deliveries")?;
		let mut orders = self
			.orders
			.query_orders(|order| {
				order.delivery_partner_id.as_deref() == Some(actor.id.as_str())
					&& !order.status.is_terminal()
			})
			.await?;
		orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
		Ok(orders)
	}

	pub async fn delivery_for_order(
		&self,
		actor: &Actor,
		order_id: &str,
	) -> Result<Option<Delivery>, LifecycleError> {
		self.get_order(actor, order_id).await?;
		self.deliveries.find_delivery(order_id).await
	}

	pub async fn earnings_summary(
		&self,
		actor: &Actor,
		period: EarningsPeriod,
	) -> Result<EarningsSummary, LifecycleError> {
		self.policy
			.require_role(actor, Role::DeliveryPartner, "read earnings")?;
		let deliveries = self
			.deliveries
			.query_deliveries(|d| {
				d.delivery_partner_id == actor.id && d.status == DeliveryStatus::Delivered
			})
			.await?;
		Ok(earnings::summarize(&deliveries, period, Utc::now()))
	}
}

#[cfg(test)]
mod tests {
	use crate::testing::{self, customer, manager, partner};
	use crate::LifecycleError;
	use quickcare_types::{Actor, EarningsPeriod};
	use rust_decimal::Decimal;

	#[tokio::test]
	async fn test_partner_views() {
		let engine = testing::engine();
		let rider = partner();
		let open = testing::ready_order(&engine, false).await;
		let claimed = testing::ready_order(&engine, false).await;
		engine.claim_order(&rider, &claimed.id).await.unwrap();

		let available = engine.available_orders(&rider).await.unwrap();
		assert_eq!(available.len(), 1);
		assert_eq!(available[0].id, open.id);

		let current = engine.current_deliveries(&rider).await.unwrap();
		assert_eq!(current.len(), 1);
		assert_eq!(current[0].id, claimed.id);

		// Another partner sees the open order but not the claimed one.
		let other = Actor::delivery_partner("rider-2");
		assert!(engine.get_order(&other, &open.id).await.is_ok());
		assert!(matches!(
			engine.get_order(&other, &claimed.id).await,
			Err(LifecycleError::Forbidden(_))
		));
		assert!(matches!(
			engine.available_orders(&customer()).await,
			Err(LifecycleError::Forbidden(_))
		));
	}

	#[tokio::test]
	async fn test_verified_prescription_orders_are_available() {
		let engine = testing::engine();
		let order = testing::ready_order(&engine, true).await;
		assert!(order.prescription_verified);
		assert_eq!(engine.available_orders(&partner()).await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_customer_lists_only_own_orders() {
		let engine = testing::engine();
		let med = testing::medicine(&engine, &manager(), "Aspirin", 10, 10, false).await;
		let mine = engine
			.place_order(&customer(), testing::request(&[(&med.id, 1)]))
			.await
			.unwrap();
		engine
			.place_order(&Actor::customer("cust-2"), testing::request(&[(&med.id, 1)]))
			.await
			.unwrap();

		let listed = engine.list_orders(&customer()).await.unwrap();
		assert_eq!(listed.len(), 1);
		assert_eq!(listed[0].id, mine.id);
		assert_eq!(engine.list_orders(&manager()).await.unwrap().len(), 2);
	}

	#[tokio::test]
	async fn test_earnings_after_deliveries() {
		let engine = testing::engine();
		let rider = partner();
		for _ in 0..2 {
			let order = testing::ready_order(&engine, false).await;
			engine.claim_order(&rider, &order.id).await.unwrap();
			testing::deliver(&engine, &rider, &order.id).await;
			engine
				.add_tip(&customer(), &order.id, Decimal::from(10))
				.await
				.unwrap();
		}

		let summary = engine
			.earnings_summary(&rider, EarningsPeriod::Week)
			.await
			.unwrap();
		assert_eq!(summary.deliveries, 2);
		assert_eq!(summary.base_earnings, Decimal::from(50));
		assert_eq!(summary.tips, Decimal::from(20));
		assert_eq!(summary.total, Decimal::from(70));
		assert_eq!(summary.average_per_delivery, Decimal::from(35));
	}
}
