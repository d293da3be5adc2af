//! Catalog and inventory records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A medicine listed by a store manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medicine {
	pub id: String,
	pub name: String,
	#[serde(default)]
	pub description: String,
	pub category: String,
	pub price: Decimal,
	/// Units on hand; never negative.
	pub stock: u32,
	/// Threshold at or below which the item is reported as low stock.
	#[serde(default)]
	pub min_stock: u32,
	pub prescription_required: bool,
	pub store_manager_id: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub image_url: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Medicine {
	pub fn in_stock(&self) -> bool {
		self.stock > 0
	}

	pub fn is_low_stock(&self) -> bool {
		self.stock <= self.min_stock
	}
}

/// Fields supplied when a store manager lists a new medicine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicineDraft {
	pub name: String,
	#[serde(default)]
	pub description: String,
	pub category: String,
	pub price: Decimal,
	pub stock: u32,
	#[serde(default)]
	pub min_stock: u32,
	pub prescription_required: bool,
	#[serde(default)]
	pub image_url: Option<String>,
}

/// Partial edit of a medicine; stock moves only through restocking.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MedicineUpdate {
	pub name: Option<String>,
	pub description: Option<String>,
	pub category: Option<String>,
	pub price: Option<Decimal>,
	pub min_stock: Option<u32>,
	pub prescription_required: Option<bool>,
	pub image_url: Option<String>,
}
