//! Order processing types for the QuickCare system.
//!
//! This module defines the order record, its line items and the canonical
//! status vocabulary. Older status spellings seen in stored data
//! (`placed`, `ready`, `dispatched`, `out_for_delivery`) are accepted on
//! deserialization and folded into the canonical variants.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of an order.
///
/// The happy path is strictly ordered:
/// `Pending -> Confirmed -> Preparing -> ReadyForPickup -> PickedUp -> InTransit -> Delivered`.
/// `Cancelled` is a terminal side branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
	#[serde(alias = "placed")]
	Pending,
	Confirmed,
	Preparing,
	#[serde(alias = "ready")]
	ReadyForPickup,
	PickedUp,
	#[serde(alias = "dispatched", alias = "out_for_delivery")]
	InTransit,
	Delivered,
	Cancelled,
}

impl OrderStatus {
	/// Returns the persisted string form of the status.
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderStatus::Pending => "pending",
			OrderStatus::Confirmed => "confirmed",
			OrderStatus::Preparing => "preparing",
			OrderStatus::ReadyForPickup => "ready_for_pickup",
			OrderStatus::PickedUp => "picked_up",
			OrderStatus::InTransit => "in_transit",
			OrderStatus::Delivered => "delivered",
			OrderStatus::Cancelled => "cancelled",
		}
	}

	/// Position on the happy path; `None` for `Cancelled`.
	pub fn rank(&self) -> Option<u8> {
		match self {
			OrderStatus::Pending => Some(0),
			OrderStatus::Confirmed => Some(1),
			OrderStatus::Preparing => Some(2),
			OrderStatus::ReadyForPickup => Some(3),
			OrderStatus::PickedUp => Some(4),
			OrderStatus::InTransit => Some(5),
			OrderStatus::Delivered => Some(6),
			OrderStatus::Cancelled => None,
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
	}

	/// Statuses an order may hold while no delivery partner is assigned.
	pub fn allows_unassigned(&self) -> bool {
		matches!(
			self,
			OrderStatus::Pending
				| OrderStatus::Confirmed
				| OrderStatus::Preparing
				| OrderStatus::ReadyForPickup
				| OrderStatus::Cancelled
		)
	}

	/// True before the order has been handed to the pharmacy counter.
	pub fn is_before_ready(&self) -> bool {
		matches!(
			self,
			OrderStatus::Pending | OrderStatus::Confirmed | OrderStatus::Preparing
		)
	}

	/// Every status, in happy-path order followed by `Cancelled`.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			OrderStatus::Pending,
			OrderStatus::Confirmed,
			OrderStatus::Preparing,
			OrderStatus::ReadyForPickup,
			OrderStatus::PickedUp,
			OrderStatus::InTransit,
			OrderStatus::Delivered,
			OrderStatus::Cancelled,
		]
		.into_iter()
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for OrderStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"pending" | "placed" => Ok(OrderStatus::Pending),
			"confirmed" => Ok(OrderStatus::Confirmed),
			"preparing" => Ok(OrderStatus::Preparing),
			"ready_for_pickup" | "ready" => Ok(OrderStatus::ReadyForPickup),
			"picked_up" => Ok(OrderStatus::PickedUp),
			"in_transit" | "dispatched" | "out_for_delivery" => Ok(OrderStatus::InTransit),
			"delivered" => Ok(OrderStatus::Delivered),
			"cancelled" => Ok(OrderStatus::Cancelled),
			other => Err(format!("unknown order status '{}'", other)),
		}
	}
}

/// Payment state reported by the payment collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
	#[default]
	Pending,
	Paid,
	Failed,
}

/// Delivery urgency chosen at checkout; drives the delivery fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPriority {
	#[default]
	Standard,
	Express,
	Emergency,
}

/// One medicine within an order, priced at the time the order was placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLineItem {
	pub medicine_id: String,
	/// Catalog name at order time.
	pub medicine_name: String,
	pub quantity: u32,
	/// Unit price snapshot; never re-linked to the live catalog price.
	pub unit_price: Decimal,
	pub prescription_required: bool,
	/// Store manager owning the medicine when the order was placed.
	pub store_manager_id: String,
}

impl OrderLineItem {
	pub fn subtotal(&self) -> Decimal {
		self.unit_price * Decimal::from(self.quantity)
	}
}

/// One entry in an order's tracking timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
	pub status: OrderStatus,
	pub at: DateTime<Utc>,
	pub message: String,
}

/// A customer's request for one or more medicines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
	pub id: String,
	pub customer_id: String,
	pub items: Vec<OrderLineItem>,
	pub subtotal: Decimal,
	pub delivery_fee: Decimal,
	pub total_amount: Decimal,
	pub delivery_address: String,
	pub delivery_phone: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub notes: Option<String>,
	#[serde(default)]
	pub priority: DeliveryPriority,
	pub status: OrderStatus,
	#[serde(default)]
	pub payment_status: PaymentStatus,
	/// Opaque reference to an uploaded prescription image.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub prescription_url: Option<String>,
	#[serde(default)]
	pub prescription_verified: bool,
	/// Set while stock for the line items is held against this order.
	#[serde(default)]
	pub stock_reserved: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub delivery_partner_id: Option<String>,
	#[serde(default)]
	pub history: Vec<StatusChange>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Order {
	/// True when any line item needs a verified prescription before dispatch.
	pub fn requires_prescription(&self) -> bool {
		self.items.iter().any(|item| item.prescription_required)
	}

	/// True when nothing blocks the order on prescription grounds.
	pub fn prescription_gate_open(&self) -> bool {
		!self.requires_prescription() || self.prescription_verified
	}

	/// Sum of line subtotals.
	pub fn items_total(&self) -> Decimal {
		self.items.iter().map(OrderLineItem::subtotal).sum()
	}

	/// Checks `total_amount == Σ line subtotals + delivery_fee`.
	pub fn totals_consistent(&self) -> bool {
		let items_total = self.items_total();
		self.subtotal == items_total && self.total_amount == items_total + self.delivery_fee
	}

	/// True if the order has at least one line owned by the given manager.
	pub fn involves_store_manager(&self, manager_id: &str) -> bool {
		self.items
			.iter()
			.any(|item| item.store_manager_id == manager_id)
	}

	/// Records a status change and stamps the update time.
	pub fn push_status(&mut self, status: OrderStatus, message: impl Into<String>) {
		let now = Utc::now();
		self.status = status;
		self.updated_at = now;
		self.history.push(StatusChange {
			status,
			at: now,
			message: message.into(),
		});
	}
}

/// Line requested by a customer at checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLineRequest {
	pub medicine_id: String,
	pub quantity: u32,
}

/// Checkout payload submitted by a customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
	pub items: Vec<OrderLineRequest>,
	pub delivery_address: String,
	pub delivery_phone: String,
	#[serde(default)]
	pub notes: Option<String>,
	#[serde(default)]
	pub priority: DeliveryPriority,
	#[serde(default)]
	pub payment_status: PaymentStatus,
	#[serde(default)]
	pub prescription_url: Option<String>,
}
