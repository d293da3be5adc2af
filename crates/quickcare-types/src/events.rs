//! Change notification types.
//!
//! Every successful write in the core publishes a [`ChangeEvent`] carrying
//! the table, the kind of change and the record as it looks after the
//! change (or as it looked before, for deletions). Subscribers filter these
//! events and re-read state from storage when they fall behind.

use crate::{Delivery, Medicine, Order, Profile, StorageTable};
use serde::{Deserialize, Serialize};

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
	Insert,
	Update,
	Delete,
}

/// The record affected by a change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "row", rename_all = "snake_case")]
pub enum ChangeRecord {
	Order(Order),
	Delivery(Delivery),
	Medicine(Medicine),
	Profile(Profile),
}

impl ChangeRecord {
	pub fn table(&self) -> StorageTable {
		match self {
			ChangeRecord::Order(_) => StorageTable::Orders,
			ChangeRecord::Delivery(_) => StorageTable::Deliveries,
			ChangeRecord::Medicine(_) => StorageTable::Medicines,
			ChangeRecord::Profile(_) => StorageTable::Profiles,
		}
	}

	/// Primary key of the affected row. Deliveries are keyed by their order.
	pub fn key(&self) -> &str {
		match self {
			ChangeRecord::Order(order) => &order.id,
			ChangeRecord::Delivery(delivery) => &delivery.order_id,
			ChangeRecord::Medicine(medicine) => &medicine.id,
			ChangeRecord::Profile(profile) => &profile.id,
		}
	}
}

/// A committed change, published after the write that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
	pub kind: ChangeKind,
	pub record: ChangeRecord,
}

impl ChangeEvent {
	pub fn inserted(record: ChangeRecord) -> Self {
		Self {
			kind: ChangeKind::Insert,
			record,
		}
	}

	pub fn updated(record: ChangeRecord) -> Self {
		Self {
			kind: ChangeKind::Update,
			record,
		}
	}

	pub fn deleted(record: ChangeRecord) -> Self {
		Self {
			kind: ChangeKind::Delete,
			record,
		}
	}

	pub fn table(&self) -> StorageTable {
		self.record.table()
	}

	/// The order this change concerns, if any.
	pub fn order_id(&self) -> Option<&str> {
		match &self.record {
			ChangeRecord::Order(order) => Some(&order.id),
			ChangeRecord::Delivery(delivery) => Some(&delivery.order_id),
			_ => None,
		}
	}
}
