//! Actor context and profile types.
//!
//! Every core operation receives the acting user explicitly as an [`Actor`];
//! nothing inside the core reads the current user from ambient state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role tag attached to every account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	Customer,
	StoreManager,
	DeliveryPartner,
}

impl Role {
	/// Returns the persisted string form of the role.
	pub fn as_str(&self) -> &'static str {
		match self {
			Role::Customer => "customer",
			Role::StoreManager => "store_manager",
			Role::DeliveryPartner => "delivery_partner",
		}
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Role {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"customer" => Ok(Role::Customer),
			"store_manager" => Ok(Role::StoreManager),
			"delivery_partner" | "delivery_boy" => Ok(Role::DeliveryPartner),
			other => Err(format!("unknown role '{}'", other)),
		}
	}
}

/// The identity performing an operation, as supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
	/// Identifier shared with the authentication identity.
	pub id: String,
	/// Role of the account.
	pub role: Role,
}

impl Actor {
	pub fn new(id: impl Into<String>, role: Role) -> Self {
		Self {
			id: id.into(),
			role,
		}
	}

	pub fn customer(id: impl Into<String>) -> Self {
		Self::new(id, Role::Customer)
	}

	pub fn store_manager(id: impl Into<String>) -> Self {
		Self::new(id, Role::StoreManager)
	}

	pub fn delivery_partner(id: impl Into<String>) -> Self {
		Self::new(id, Role::DeliveryPartner)
	}

	pub fn is(&self, role: Role) -> bool {
		self.role == role
	}
}

impl fmt::Display for Actor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.role, self.id)
	}
}

/// Role identity record created at signup.
///
/// The role is fixed once the profile exists; updates may only touch the
/// display name and phone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
	pub id: String,
	pub full_name: String,
	pub phone: Option<String>,
	pub role: Role,
	pub created_at: DateTime<Utc>,
}

impl Profile {
	/// Returns the actor context for this profile.
	pub fn actor(&self) -> Actor {
		Actor::new(self.id.clone(), self.role)
	}
}

/// Editable subset of a profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
	pub full_name: Option<String>,
	pub phone: Option<String>,
}
