//! Startup and shutdown for the engine.

use super::{EngineError, QuickCareEngine};
use quickcare_storage::StorageError;
use quickcare_types::StorageTable;

impl QuickCareEngine {
	/// Checks that storage is reachable and every stored record decodes.
	pub async fn initialize(&self) -> Result<(), EngineError> {
		tracing::info!(
			store_id = %self.config.store.id,
			scope = ?self.policy.store_manager_scope(),
			"Initializing engine"
		);

		for table in StorageTable::all() {
			let rows = self.count_rows(table).await.map_err(|e| {
				EngineError::Service(format!("Failed to read table '{}': {}", table, e))
			})?;
			tracing::info!(table = %table, rows, "Loaded");
		}
		Ok(())
	}

	pub async fn shutdown(&self) -> Result<(), EngineError> {
		tracing::info!(
			subscribers = self.event_bus.subscriber_count(),
			"Shutting down engine"
		);
		Ok(())
	}

	async fn count_rows(&self, table: StorageTable) -> Result<usize, StorageError> {
		let namespace = table.as_str();
		Ok(match table {
			StorageTable::Orders => self
				.storage
				.retrieve_all::<quickcare_types::Order>(namespace)
				.await?
				.len(),
			StorageTable::Deliveries => self
				.storage
				.retrieve_all::<quickcare_types::Delivery>(namespace)
				.await?
				.len(),
			StorageTable::Medicines => self
				.storage
				.retrieve_all::<quickcare_types::Medicine>(namespace)
				.await?
				.len(),
			StorageTable::Profiles => self
				.storage
				.retrieve_all::<quickcare_types::Profile>(namespace)
				.await?
				.len(),
		})
	}
}
