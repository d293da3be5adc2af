//! Storage module for the QuickCare order lifecycle system.
//!
//! This module provides the key-value abstraction every record is persisted
//! through, plus a typed [`StorageService`] that layers JSON serialization and
//! optimistic conditional updates on top of any backend. Concurrency control
//! for status transitions and delivery claims is built on the backend's
//! compare-and-swap primitive.

use async_trait::async_trait;
use quickcare_types::{ConfigSchema, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Upper bound on compare-and-swap retries for a single conditional update.
const MAX_CAS_ATTEMPTS: usize = 64;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("Not found")]
	NotFound,
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Backend error: {0}")]
	Backend(String),
}

/// Low-level interface implemented by storage backends.
///
/// Keys have the form `"<table>:<id>"`. Values are opaque bytes.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

	/// Deletes the key. Deleting a missing key is not an error.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Atomically replaces the value at `key` with `value` if the current
	/// value equals `expected`. `None` means the key must be absent.
	///
	/// Returns `Ok(false)` when the current value did not match.
	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		value: Vec<u8>,
	) -> Result<bool, StorageError>;

	/// Lists every key starting with `prefix`, in no particular order.
	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

/// Factory signature every storage implementation provides.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Returns `(name, factory)` for every built-in storage implementation.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

fn make_key(namespace: &str, id: &str) -> String {
	format!("{}:{}", namespace, id)
}

fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
	serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
	serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Typed storage operations over a backend.
///
/// The namespace and id are combined into the backend key and values are
/// stored as JSON.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Creates or overwrites a value.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes = encode(data)?;
		self.backend.set_bytes(&make_key(namespace, id), bytes).await
	}

	/// Stores a value only if nothing exists under the key yet.
	///
	/// Returns `Ok(false)` if the key was already taken.
	pub async fn insert<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<bool, StorageError> {
		let bytes = encode(data)?;
		self.backend
			.compare_and_swap(&make_key(namespace, id), None, bytes)
			.await
	}

	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&make_key(namespace, id)).await?;
		decode(&bytes)
	}

	/// Like [`retrieve`](Self::retrieve) but maps a missing key to `None`.
	pub async fn find<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		match self.retrieve(namespace, id).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&make_key(namespace, id)).await
	}

	/// Overwrites an existing value; fails with `NotFound` if the key is absent.
	pub async fn update<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let key = make_key(namespace, id);
		if !self.backend.exists(&key).await? {
			return Err(StorageError::NotFound);
		}
		let bytes = encode(data)?;
		self.backend.set_bytes(&key, bytes).await
	}

	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&make_key(namespace, id)).await
	}

	/// Applies `mutate` to the stored value and writes the result back only
	/// if the value did not change underneath.
	///
	/// `mutate` receives a fresh copy on every attempt and returns whether the
	/// change should go ahead. When it returns `false` nothing is written and
	/// `Ok(None)` is returned. On success the written value is returned.
	pub async fn update_if<T, F>(
		&self,
		namespace: &str,
		id: &str,
		mut mutate: F,
	) -> Result<Option<T>, StorageError>
	where
		T: Serialize + DeserializeOwned + Send,
		F: FnMut(&mut T) -> bool + Send,
	{
		let key = make_key(namespace, id);
		for attempt in 1..=MAX_CAS_ATTEMPTS {
			let current = self.backend.get_bytes(&key).await?;
			let mut value: T = decode(&current)?;
			if !mutate(&mut value) {
				return Ok(None);
			}
			let next = encode(&value)?;
			if self
				.backend
				.compare_and_swap(&key, Some(&current), next)
				.await?
			{
				return Ok(Some(value));
			}
			tracing::debug!(key = %key, attempt, "Conditional update lost a race, retrying");
		}
		Err(StorageError::Backend(format!(
			"Conditional update of '{}' did not settle after {} attempts",
			key, MAX_CAS_ATTEMPTS
		)))
	}

	/// Returns every value in a namespace.
	///
	/// Rows deleted between listing and reading are skipped.
	pub async fn retrieve_all<T: DeserializeOwned + Send>(
		&self,
		namespace: &str,
	) -> Result<Vec<T>, StorageError> {
		let prefix = make_key(namespace, "");
		let mut keys = self.backend.list_keys(&prefix).await?;
		keys.sort();

		let mut values = Vec::with_capacity(keys.len());
		for key in keys {
			match self.backend.get_bytes(&key).await {
				Ok(bytes) => values.push(decode(&bytes)?),
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			}
		}
		Ok(values)
	}

	/// Returns the values in a namespace matching `filter`.
	pub async fn query<T, F>(&self, namespace: &str, filter: F) -> Result<Vec<T>, StorageError>
	where
		T: DeserializeOwned + Send,
		F: Fn(&T) -> bool + Send,
	{
		let all: Vec<T> = self.retrieve_all(namespace).await?;
		Ok(all.into_iter().filter(|value| filter(value)).collect())
	}
}
