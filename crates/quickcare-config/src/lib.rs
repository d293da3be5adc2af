//! Configuration module for the QuickCare order lifecycle system.
//!
//! Configuration is read from TOML. String values may reference environment
//! variables as `${VAR}` or `${VAR:-default}`, and a file may pull in other
//! files with `include = ["a.toml", "b.toml"]`. Each top-level section must be
//! defined in exactly one file.

mod loader;

pub use loader::ConfigLoader;

use quickcare_types::DeliveryPriority;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Configuration error: {0}")]
	Parse(String),
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message, drop the echoed input.
		ConfigError::Parse(err.message().to_string())
	}
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	pub store: StoreConfig,
	pub storage: StorageConfig,
	#[serde(default)]
	pub fees: FeesConfig,
	#[serde(default)]
	pub delivery: DeliveryConfig,
	#[serde(default)]
	pub visibility: VisibilityConfig,
	#[serde(default)]
	pub notifications: NotificationsConfig,
}

/// Identity of the storefront instance, used in logs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
	pub id: String,
	#[serde(default = "default_store_name")]
	pub name: String,
}

fn default_store_name() -> String {
	"QuickCare".to_string()
}

/// Storage backend selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Implementation name to its raw settings.
	pub implementations: HashMap<String, toml::Value>,
}

/// Delivery fee charged per priority, in rupees.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeesConfig {
	#[serde(default = "default_standard_fee")]
	pub standard: Decimal,
	#[serde(default = "default_express_fee")]
	pub express: Decimal,
	#[serde(default = "default_emergency_fee")]
	pub emergency: Decimal,
}

impl FeesConfig {
	pub fn fee_for(&self, priority: DeliveryPriority) -> Decimal {
		match priority {
			DeliveryPriority::Standard => self.standard,
			DeliveryPriority::Express => self.express,
			DeliveryPriority::Emergency => self.emergency,
		}
	}
}

impl Default for FeesConfig {
	fn default() -> Self {
		Self {
			standard: default_standard_fee(),
			express: default_express_fee(),
			emergency: default_emergency_fee(),
		}
	}
}

fn default_standard_fee() -> Decimal {
	Decimal::from(25)
}

fn default_express_fee() -> Decimal {
	Decimal::from(35)
}

fn default_emergency_fee() -> Decimal {
	Decimal::from(50)
}

/// Estimated delivery time, in minutes from claim, per priority.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
	#[serde(default = "default_standard_minutes")]
	pub standard_minutes: u64,
	#[serde(default = "default_express_minutes")]
	pub express_minutes: u64,
	#[serde(default = "default_emergency_minutes")]
	pub emergency_minutes: u64,
}

impl DeliveryConfig {
	pub fn minutes_for(&self, priority: DeliveryPriority) -> u64 {
		match priority {
			DeliveryPriority::Standard => self.standard_minutes,
			DeliveryPriority::Express => self.express_minutes,
			DeliveryPriority::Emergency => self.emergency_minutes,
		}
	}
}

impl Default for DeliveryConfig {
	fn default() -> Self {
		Self {
			standard_minutes: default_standard_minutes(),
			express_minutes: default_express_minutes(),
			emergency_minutes: default_emergency_minutes(),
		}
	}
}

fn default_standard_minutes() -> u64 {
	60
}

fn default_express_minutes() -> u64 {
	30
}

fn default_emergency_minutes() -> u64 {
	15
}

/// Which orders a store manager may see and act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityScope {
	/// Every order.
	#[default]
	Global,
	/// Orders with at least one line item owned by the manager.
	Store,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VisibilityConfig {
	#[serde(default)]
	pub store_manager_scope: VisibilityScope,
}

/// Change-notification settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationsConfig {
	/// Events buffered per subscriber before it is reported as lagging.
	#[serde(default = "default_channel_capacity")]
	pub channel_capacity: usize,
}

impl Default for NotificationsConfig {
	fn default() -> Self {
		Self {
			channel_capacity: default_channel_capacity(),
		}
	}
}

fn default_channel_capacity() -> usize {
	1000
}

/// Replaces `${VAR}` and `${VAR:-default}` with environment values.
///
/// Input is capped at 1MB to bound regex work.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last = 0;
	for cap in re.captures_iter(input) {
		let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match (std::env::var(name.as_str()), cap.get(2)) {
			(Ok(value), _) => value,
			(Err(_), Some(default)) => default.as_str().to_string(),
			(Err(_), None) => {
				return Err(ConfigError::Validation(format!(
					"Environment variable '{}' not found",
					name.as_str()
				)))
			},
		};
		result.push_str(&input[last..whole.start()]);
		result.push_str(&value);
		last = whole.end();
	}
	result.push_str(&input[last..]);

	Ok(result)
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.store.id.trim().is_empty() {
			return Err(ConfigError::Validation("Store ID cannot be empty".into()));
		}

		if self.storage.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one storage implementation must be configured".into(),
			));
		}
		if self.storage.primary.is_empty() {
			return Err(ConfigError::Validation(
				"Storage primary implementation cannot be empty".into(),
			));
		}
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}

		for (name, fee) in [
			("standard", self.fees.standard),
			("express", self.fees.express),
			("emergency", self.fees.emergency),
		] {
			if fee.is_sign_negative() {
				return Err(ConfigError::Validation(format!(
					"Delivery fee '{}' cannot be negative",
					name
				)));
			}
		}

		for (name, minutes) in [
			("standard_minutes", self.delivery.standard_minutes),
			("express_minutes", self.delivery.express_minutes),
			("emergency_minutes", self.delivery.emergency_minutes),
		] {
			if minutes == 0 || minutes > 24 * 60 {
				return Err(ConfigError::Validation(format!(
					"delivery.{} must be between 1 and 1440",
					name
				)));
			}
		}

		if self.notifications.channel_capacity == 0 {
			return Err(ConfigError::Validation(
				"notifications.channel_capacity must be at least 1".into(),
			));
		}

		Ok(())
	}
}

/// Parses TOML, resolving environment variables and validating the result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
