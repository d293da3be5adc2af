//! Storage tables for the persisted collections.

use std::fmt;
use std::str::FromStr;

/// Named collections in the backing store.
///
/// Rows are stored under `"<table>:<id>"` keys; this enum keeps the table
/// names in one place instead of scattering string literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageTable {
	Orders,
	/// Keyed by order id.
	Deliveries,
	Medicines,
	Profiles,
}

impl StorageTable {
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageTable::Orders => "orders",
			StorageTable::Deliveries => "deliveries",
			StorageTable::Medicines => "medicines",
			StorageTable::Profiles => "profiles",
		}
	}

	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Orders,
			Self::Deliveries,
			Self::Medicines,
			Self::Profiles,
		]
		.into_iter()
	}
}

impl fmt::Display for StorageTable {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for StorageTable {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::all()
			.find(|table| table.as_str() == s)
			.ok_or_else(|| format!("unknown storage table '{}'", s))
	}
}

impl From<StorageTable> for &'static str {
	fn from(table: StorageTable) -> Self {
		table.as_str()
	}
}
