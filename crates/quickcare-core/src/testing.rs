//! Shared fixtures for the engine tests.

use crate::QuickCareEngine;
use async_trait::async_trait;
use quickcare_config::Config;
use quickcare_storage::{
	implementations::memory::MemoryStorage, StorageError, StorageInterface, StorageService,
};
use quickcare_types::{
	Actor, ConfigSchema, DeliveryStatus, Medicine, MedicineDraft, Order, OrderLineRequest,
	PlaceOrderRequest, StorageTable,
};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};

const BASE_CONFIG: &str = r#"
[store]
id = "test-store"

[storage]
primary = "memory"

[storage.implementations.memory]
"#;

pub(crate) fn config(extra: &str) -> Config {
	format!("{}\n{}", BASE_CONFIG, extra).parse().unwrap()
}

pub(crate) fn engine() -> QuickCareEngine {
	engine_with(config(""))
}

pub(crate) fn engine_with(config: Config) -> QuickCareEngine {
	let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
	QuickCareEngine::new(config, storage)
}

/// Switch for the writes a [`FaultyStorage`] refuses.
#[derive(Clone, Default)]
pub(crate) struct Faults(Arc<Mutex<Option<StorageTable>>>);

impl Faults {
	pub(crate) fn fail_writes_to(&self, table: StorageTable) {
		*self.0.lock().unwrap() = Some(table);
	}

	pub(crate) fn clear(&self) {
		*self.0.lock().unwrap() = None;
	}

	fn check(&self, key: &str) -> Result<(), StorageError> {
		match *self.0.lock().unwrap() {
			Some(table) if key.starts_with(&format!("{}:", table)) => {
				Err(StorageError::Backend(format!("write to {} refused", key)))
			},
			_ => Ok(()),
		}
	}
}

/// Memory backend whose writes to one table can be made to fail. Reads
/// always succeed.
pub(crate) struct FaultyStorage {
	inner: MemoryStorage,
	faults: Faults,
}

#[async_trait]
impl StorageInterface for FaultyStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.inner.get_bytes(key).await
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		self.faults.check(key)?;
		self.inner.set_bytes(key, value).await
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.faults.check(key)?;
		self.inner.delete(key).await
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		self.inner.exists(key).await
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		value: Vec<u8>,
	) -> Result<bool, StorageError> {
		self.faults.check(key)?;
		self.inner.compare_and_swap(key, expected, value).await
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		self.inner.list_keys(prefix).await
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		self.inner.config_schema()
	}
}

/// An engine over [`FaultyStorage`], plus the switch controlling it.
pub(crate) fn faulty_engine() -> (QuickCareEngine, Faults) {
	let faults = Faults::default();
	let backend = FaultyStorage {
		inner: MemoryStorage::new(),
		faults: faults.clone(),
	};
	let storage = Arc::new(StorageService::new(Box::new(backend)));
	(QuickCareEngine::new(config(""), storage), faults)
}

pub(crate) fn customer() -> Actor {
	Actor::customer("cust-1")
}

pub(crate) fn manager() -> Actor {
	Actor::store_manager("mgr-1")
}

pub(crate) fn partner() -> Actor {
	Actor::delivery_partner("rider-1")
}

pub(crate) fn draft(name: &str, price: i64, stock: u32, prescription_required: bool) -> MedicineDraft {
	MedicineDraft {
		name: name.into(),
		description: String::new(),
		category: "General".into(),
		price: Decimal::from(price),
		stock,
		min_stock: 0,
		prescription_required,
		image_url: None,
	}
}

pub(crate) async fn medicine(
	engine: &QuickCareEngine,
	manager: &Actor,
	name: &str,
	price: i64,
	stock: u32,
	prescription_required: bool,
) -> Medicine {
	engine
		.create_medicine(manager, draft(name, price, stock, prescription_required))
		.await
		.unwrap()
}

pub(crate) fn request(lines: &[(&str, u32)]) -> PlaceOrderRequest {
	PlaceOrderRequest {
		items: lines
			.iter()
			.map(|(medicine_id, quantity)| OrderLineRequest {
				medicine_id: medicine_id.to_string(),
				quantity: *quantity,
			})
			.collect(),
		delivery_address: "12 MG Road, Bengaluru".into(),
		delivery_phone: "9876543210".into(),
		notes: None,
		priority: Default::default(),
		payment_status: Default::default(),
		prescription_url: None,
	}
}

/// Places an order for `customer()` and walks it to `ready_for_pickup`.
pub(crate) async fn ready_order(engine: &QuickCareEngine, prescription: bool) -> Order {
	let mgr = manager();
	let med = medicine(engine, &mgr, "Paracetamol", 25, 100, prescription).await;
	let mut req = request(&[(&med.id, 1)]);
	if prescription {
		req.prescription_url = Some("https://img/rx.png".into());
	}
	let order = engine.place_order(&customer(), req).await.unwrap();
	engine.confirm_order(&mgr, &order.id).await.unwrap();
	engine.start_preparing(&mgr, &order.id).await.unwrap();
	if prescription {
		engine.verify_prescription(&mgr, &order.id).await.unwrap();
	}
	engine.mark_ready(&mgr, &order.id).await.unwrap()
}

/// Walks a claimed order through to delivered.
pub(crate) async fn deliver(engine: &QuickCareEngine, rider: &Actor, order_id: &str) {
	for target in [
		DeliveryStatus::PickedUp,
		DeliveryStatus::InTransit,
		DeliveryStatus::Delivered,
	] {
		engine
			.advance_delivery(rider, order_id, target)
			.await
			.unwrap();
	}
}
