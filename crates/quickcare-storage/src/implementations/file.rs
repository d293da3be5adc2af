//! File-backed storage.
//!
//! Each row lives in `<storage_path>/<table>/<id>.json`. Writes go to a
//! temporary file that is renamed over the target, so readers never observe a
//! partial row. Compare-and-swap holds an exclusive `fs2` lock on
//! `<storage_path>/.lock` for the read-compare-write sequence, which also
//! serializes writers from other processes sharing the directory.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use fs2::FileExt;
use quickcare_types::{ConfigSchema, Field, FieldType, Schema, ValidationError};
use std::fs::{self as stdfs, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

const DEFAULT_STORAGE_PATH: &str = "./data/storage";
const LOCK_FILE: &str = ".lock";

fn backend_err(e: impl std::fmt::Display) -> StorageError {
	StorageError::Backend(e.to_string())
}

/// Maps `"<table>:<id>"` to its file path.
///
/// The id becomes the file name as is, so ids that cannot round-trip through
/// a file name are refused rather than rewritten.
fn path_for(base: &Path, key: &str) -> Result<PathBuf, StorageError> {
	let (table, id) = key
		.split_once(':')
		.ok_or_else(|| StorageError::Backend(format!("Malformed storage key '{}'", key)))?;
	for part in [table, id] {
		if part.is_empty() || part.contains(['/', '\\', ':']) || part.starts_with('.') {
			return Err(StorageError::Backend(format!(
				"Storage key '{}' cannot be mapped to a file",
				key
			)));
		}
	}
	Ok(base.join(table).join(format!("{}.json", id)))
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
	match stdfs::read(path) {
		Ok(data) => Ok(Some(data)),
		Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
		Err(e) => Err(backend_err(e)),
	}
}

fn write_atomic(path: &Path, value: &[u8]) -> Result<(), StorageError> {
	if let Some(parent) = path.parent() {
		stdfs::create_dir_all(parent).map_err(backend_err)?;
	}
	let temp_path = path.with_extension("tmp");
	stdfs::write(&temp_path, value).map_err(backend_err)?;
	stdfs::rename(&temp_path, path).map_err(backend_err)
}

pub struct FileStorage {
	base_path: PathBuf,
}

impl FileStorage {
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	/// Runs `f` on a blocking thread while holding the directory lock.
	async fn with_lock<T, F>(&self, f: F) -> Result<T, StorageError>
	where
		T: Send + 'static,
		F: FnOnce() -> Result<T, StorageError> + Send + 'static,
	{
		let base = self.base_path.clone();
		tokio::task::spawn_blocking(move || {
			stdfs::create_dir_all(&base).map_err(backend_err)?;
			let lock = OpenOptions::new()
				.create(true)
				.truncate(false)
				.write(true)
				.open(base.join(LOCK_FILE))
				.map_err(backend_err)?;
			lock.lock_exclusive().map_err(backend_err)?;
			let result = f();
			if let Err(e) = FileExt::unlock(&lock) {
				tracing::warn!("Failed to release storage lock: {}", e);
			}
			result
		})
		.await
		.map_err(backend_err)?
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let path = path_for(&self.base_path, key)?;
		match fs::read(&path).await {
			Ok(data) => Ok(data),
			Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound),
			Err(e) => Err(backend_err(e)),
		}
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let path = path_for(&self.base_path, key)?;
		self.with_lock(move || write_atomic(&path, &value)).await
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = path_for(&self.base_path, key)?;
		self.with_lock(move || match stdfs::remove_file(&path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(backend_err(e)),
		})
		.await
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		fs::try_exists(path_for(&self.base_path, key)?)
			.await
			.map_err(backend_err)
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		value: Vec<u8>,
	) -> Result<bool, StorageError> {
		let path = path_for(&self.base_path, key)?;
		let expected = expected.map(<[u8]>::to_vec);
		self.with_lock(move || {
			if read_optional(&path)? != expected {
				return Ok(false);
			}
			write_atomic(&path, &value)?;
			Ok(true)
		})
		.await
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let mut keys = Vec::new();
		let mut tables = match fs::read_dir(&self.base_path).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(keys),
			Err(e) => return Err(backend_err(e)),
		};

		while let Some(table) = tables.next_entry().await.map_err(backend_err)? {
			if !table.file_type().await.map_err(backend_err)?.is_dir() {
				continue;
			}
			let table_name = table.file_name().to_string_lossy().into_owned();
			let mut rows = fs::read_dir(table.path()).await.map_err(backend_err)?;
			while let Some(row) = rows.next_entry().await.map_err(backend_err)? {
				let path = row.path();
				if path.extension() != Some(std::ffi::OsStr::new("json")) {
					continue;
				}
				let Some(id) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
					continue;
				};
				let key = format!("{}:{}", table_name, id);
				if key.starts_with(prefix) {
					keys.push(key);
				}
			}
		}
		Ok(keys)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}
}

pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("storage_path", FieldType::String).with_validator(|value| {
					match value.as_str() {
						Some(path) if path.trim().is_empty() => {
							Err("storage_path must not be empty".to_string())
						},
						_ => Ok(()),
					}
				}),
			],
		);
		schema.validate(config)
	}
}

/// Creates a file backend.
///
/// Configuration parameters:
/// - `storage_path`: base directory (default: "./data/storage")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or(DEFAULT_STORAGE_PATH);

	tracing::debug!(path = %storage_path, "Using file storage");
	Ok(Box::new(FileStorage::new(PathBuf::from(storage_path))))
}

pub struct Registry;

impl quickcare_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = crate::StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl crate::StorageRegistry for Registry {}
