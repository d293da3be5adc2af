//! Delivery records and earnings reporting types.

use crate::OrderStatus;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a delivery record.
///
/// Advances strictly `Assigned -> PickedUp -> InTransit -> Delivered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
	#[serde(alias = "accepted")]
	Assigned,
	PickedUp,
	InTransit,
	Delivered,
}

impl DeliveryStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			DeliveryStatus::Assigned => "assigned",
			DeliveryStatus::PickedUp => "picked_up",
			DeliveryStatus::InTransit => "in_transit",
			DeliveryStatus::Delivered => "delivered",
		}
	}

	/// The order status that mirrors this delivery status.
	pub fn order_status(&self) -> OrderStatus {
		match self {
			DeliveryStatus::Assigned => OrderStatus::ReadyForPickup,
			DeliveryStatus::PickedUp => OrderStatus::PickedUp,
			DeliveryStatus::InTransit => OrderStatus::InTransit,
			DeliveryStatus::Delivered => OrderStatus::Delivered,
		}
	}

	/// The only status reachable from this one, if any.
	pub fn next(&self) -> Option<DeliveryStatus> {
		match self {
			DeliveryStatus::Assigned => Some(DeliveryStatus::PickedUp),
			DeliveryStatus::PickedUp => Some(DeliveryStatus::InTransit),
			DeliveryStatus::InTransit => Some(DeliveryStatus::Delivered),
			DeliveryStatus::Delivered => None,
		}
	}

	pub fn is_active(&self) -> bool {
		!matches!(self, DeliveryStatus::Delivered)
	}
}

impl fmt::Display for DeliveryStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for DeliveryStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"assigned" | "accepted" => Ok(DeliveryStatus::Assigned),
			"picked_up" => Ok(DeliveryStatus::PickedUp),
			"in_transit" => Ok(DeliveryStatus::InTransit),
			"delivered" => Ok(DeliveryStatus::Delivered),
			other => Err(format!("unknown delivery status '{}'", other)),
		}
	}
}

/// Fulfillment record for one order, owned by the partner who claimed it.
///
/// Stored under the order id, which makes "at most one delivery per order"
/// a property of the key space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
	pub order_id: String,
	pub delivery_partner_id: String,
	pub status: DeliveryStatus,
	pub earnings: Decimal,
	#[serde(default)]
	pub tip: Decimal,
	#[serde(default)]
	pub bonus: Decimal,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub estimated_delivery_at: Option<DateTime<Utc>>,
	pub assigned_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub delivered_at: Option<DateTime<Utc>>,
}

impl Delivery {
	/// Fee plus any tip and bonus.
	pub fn total_payout(&self) -> Decimal {
		self.earnings + self.tip + self.bonus
	}
}

/// Reporting window for the earnings summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarningsPeriod {
	Today,
	Week,
	Month,
	#[default]
	All,
}

impl EarningsPeriod {
	/// Earliest completion time included in the window, relative to `now`.
	pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
		match self {
			EarningsPeriod::Today => now
				.date_naive()
				.and_hms_opt(0, 0, 0)
				.map(|midnight| midnight.and_utc()),
			EarningsPeriod::Week => Some(now - Duration::days(7)),
			EarningsPeriod::Month => Some(now - Duration::days(30)),
			EarningsPeriod::All => None,
		}
	}
}

/// Aggregated payout for a delivery partner over a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarningsSummary {
	pub period: EarningsPeriod,
	pub deliveries: usize,
	pub base_earnings: Decimal,
	pub tips: Decimal,
	pub bonuses: Decimal,
	pub total: Decimal,
	pub average_per_delivery: Decimal,
}
