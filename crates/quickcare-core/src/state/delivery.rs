//! Delivery record state machine.
//!
//! A delivery walks `assigned -> picked_up -> in_transit -> delivered`, one
//! step at a time, and only for the partner who owns it.

use crate::LifecycleError;
use chrono::Utc;
use quickcare_storage::StorageService;
use quickcare_types::{Delivery, DeliveryStatus, StorageTable};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;

pub struct DeliveryStateMachine {
	storage: Arc<StorageService>,
}

impl DeliveryStateMachine {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	pub async fn get_delivery(&self, order_id: &str) -> Result<Delivery, LifecycleError> {
		self.storage
			.retrieve(StorageTable::Deliveries.as_str(), order_id)
			.await
			.map_err(|e| LifecycleError::storage(e, "delivery for order", order_id))
	}

	pub async fn find_delivery(&self, order_id: &str) -> Result<Option<Delivery>, LifecycleError> {
		Ok(self
			.storage
			.find(StorageTable::Deliveries.as_str(), order_id)
			.await?)
	}

	pub async fn query_deliveries<F>(&self, filter: F) -> Result<Vec<Delivery>, LifecycleError>
	where
		F: Fn(&Delivery) -> bool + Send,
	{
		Ok(self
			.storage
			.query(StorageTable::Deliveries.as_str(), filter)
			.await?)
	}

	/// Creates the delivery record for a freshly claimed order.
	///
	/// Returns `Ok(false)` if a record already exists for the order.
	pub async fn insert_delivery(&self, delivery: &Delivery) -> Result<bool, LifecycleError> {
		Ok(self
			.storage
			.insert(
				StorageTable::Deliveries.as_str(),
				&delivery.order_id,
				delivery,
			)
			.await?)
	}

	/// Moves the delivery from `from` to `to`, provided it still is in `from`
	/// and, when `partner_id` is given, still belongs to that partner.
	pub async fn step(
		&self,
		order_id: &str,
		partner_id: Option<&str>,
		from: DeliveryStatus,
		to: DeliveryStatus,
	) -> Result<Delivery, LifecycleError> {
		let mut rejection = None;
		let updated = self
			.storage
			.update_if(
				StorageTable::Deliveries.as_str(),
				order_id,
				|delivery: &mut Delivery| match check_step(delivery, partner_id, from, to) {
					Ok(()) => {
						let now = Utc::now();
						delivery.status = to;
						delivery.updated_at = now;
						delivery.delivered_at = (to == DeliveryStatus::Delivered).then_some(now);
						true
					},
					Err(e) => {
						rejection = Some(e);
						false
					},
				},
			)
			.await
			.map_err(|e| LifecycleError::storage(e, "delivery for order", order_id))?;

		match updated {
			Some(delivery) => Ok(delivery),
			None => Err(rejection.unwrap_or_else(|| {
				LifecycleError::StoreUnavailable(format!(
					"update of delivery {} was dropped",
					order_id
				))
			})),
		}
	}

	/// Puts a delivery back to `previous` after the paired order write failed.
	pub async fn revert(&self, order_id: &str, current: DeliveryStatus, previous: DeliveryStatus) {
		let result = self
			.storage
			.update_if(
				StorageTable::Deliveries.as_str(),
				order_id,
				|delivery: &mut Delivery| {
					if delivery.status != current {
						return false;
					}
					delivery.status = previous;
					delivery.updated_at = Utc::now();
					delivery.delivered_at = None;
					true
				},
			)
			.await;
		if let Err(e) = result {
			tracing::error!(
				order_id = %quickcare_types::truncate_id(order_id),
				error = %e,
				"Failed to revert delivery status"
			);
		}
	}

	/// Adds an extra payout to a completed delivery.
	pub async fn credit(
		&self,
		order_id: &str,
		kind: Credit,
		amount: Decimal,
	) -> Result<Delivery, LifecycleError> {
		let mut rejection = None;
		let updated = self
			.storage
			.update_if(
				StorageTable::Deliveries.as_str(),
				order_id,
				|delivery: &mut Delivery| {
					if delivery.status != DeliveryStatus::Delivered {
						rejection = Some(LifecycleError::PreconditionNotMet(format!(
							"a {} can only be added to a delivered order",
							kind
						)));
						return false;
					}
					match kind {
						Credit::Tip => delivery.tip += amount,
						Credit::Bonus => delivery.bonus += amount,
					}
					delivery.updated_at = Utc::now();
					true
				},
			)
			.await
			.map_err(|e| LifecycleError::storage(e, "delivery for order", order_id))?;

		updated.ok_or_else(|| {
			rejection.unwrap_or_else(|| {
				LifecycleError::StoreUnavailable(format!("{} on {} was dropped", kind, order_id))
			})
		})
	}
}

/// Payout added on top of the delivery fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credit {
	/// From the customer.
	Tip,
	/// Performance bonus from the store.
	Bonus,
}

impl fmt::Display for Credit {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Credit::Tip => "tip",
			Credit::Bonus => "bonus",
		})
	}
}

fn check_step(
	delivery: &Delivery,
	partner_id: Option<&str>,
	from: DeliveryStatus,
	to: DeliveryStatus,
) -> Result<(), LifecycleError> {
	if let Some(partner_id) = partner_id {
		if delivery.delivery_partner_id != partner_id {
			return Err(LifecycleError::Forbidden(
				"delivery is assigned to another partner".into(),
			));
		}
	}
	if delivery.status != from || from.next() != Some(to) {
		return Err(LifecycleError::PreconditionNotMet(format!(
			"delivery is {}, cannot move to {}",
			delivery.status, to
		)));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use quickcare_storage::implementations::memory::MemoryStorage;

	fn machine() -> DeliveryStateMachine {
		DeliveryStateMachine::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))))
	}

	fn delivery(order_id: &str) -> Delivery {
		let now = Utc::now();
		Delivery {
			order_id: order_id.into(),
			delivery_partner_id: "rider-1".into(),
			status: DeliveryStatus::Assigned,
			earnings: Decimal::from(25),
			tip: Decimal::ZERO,
			bonus: Decimal::ZERO,
			estimated_delivery_at: None,
			assigned_at: now,
			updated_at: now,
			delivered_at: None,
		}
	}

	#[tokio::test]
	async fn test_single_record_per_order() {
		let machine = machine();
		assert!(machine.insert_delivery(&delivery("o1")).await.unwrap());
		assert!(!machine.insert_delivery(&delivery("o1")).await.unwrap());
	}

	#[tokio::test]
	async fn test_step_checks_owner_and_order() {
		let machine = machine();
		machine.insert_delivery(&delivery("o1")).await.unwrap();

		let wrong_partner = machine
			.step(
				"o1",
				Some("rider-2"),
				DeliveryStatus::Assigned,
				DeliveryStatus::PickedUp,
			)
			.await;
		assert!(matches!(wrong_partner, Err(LifecycleError::Forbidden(_))));

		let skipped = machine
			.step(
				"o1",
				Some("rider-1"),
				DeliveryStatus::Assigned,
				DeliveryStatus::InTransit,
			)
			.await;
		assert!(matches!(skipped, Err(LifecycleError::PreconditionNotMet(_))));

		let picked = machine
			.step(
				"o1",
				Some("rider-1"),
				DeliveryStatus::Assigned,
				DeliveryStatus::PickedUp,
			)
			.await
			.unwrap();
		assert_eq!(picked.status, DeliveryStatus::PickedUp);

		machine
			.revert("o1", DeliveryStatus::PickedUp, DeliveryStatus::Assigned)
			.await;
		assert_eq!(
			machine.get_delivery("o1").await.unwrap().status,
			DeliveryStatus::Assigned
		);
	}

	#[tokio::test]
	async fn test_credit_requires_delivered() {
		let machine = machine();
		machine.insert_delivery(&delivery("o1")).await.unwrap();
		let early = machine.credit("o1", Credit::Tip, Decimal::from(10)).await;
		assert!(matches!(early, Err(LifecycleError::PreconditionNotMet(_))));

		let missing = machine.credit("nope", Credit::Bonus, Decimal::from(10)).await;
		assert!(matches!(missing, Err(LifecycleError::NotFound(_))));
	}

	#[tokio::test]
	async fn test_tip_and_bonus_accumulate_separately() {
		let machine = machine();
		let mut record = delivery("o1");
		record.status = DeliveryStatus::Delivered;
		record.delivered_at = Some(Utc::now());
		machine.insert_delivery(&record).await.unwrap();

		machine.credit("o1", Credit::Tip, Decimal::from(10)).await.unwrap();
		machine.credit("o1", Credit::Tip, Decimal::from(5)).await.unwrap();
		let credited = machine.credit("o1", Credit::Bonus, Decimal::from(15)).await.unwrap();
		assert_eq!(credited.tip, Decimal::from(15));
		assert_eq!(credited.bonus, Decimal::from(15));
		assert_eq!(credited.total_payout(), Decimal::from(55));
	}
}
