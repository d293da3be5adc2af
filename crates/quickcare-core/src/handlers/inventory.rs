//! Medicine catalog and stock handling.
//!
//! Store managers own the medicines they list. Stock is only ever changed
//! through conditional updates, so concurrent confirmations and restocks of
//! the same medicine never lose a decrement.

use crate::access::AccessPolicy;
use crate::engine::event_bus::EventBus;
use crate::LifecycleError;
use chrono::Utc;
use quickcare_storage::StorageService;
use quickcare_types::{
	new_id, truncate_id, Actor, ChangeEvent, ChangeRecord, Medicine, MedicineDraft,
	MedicineUpdate, OrderLineItem, Role, StorageTable,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

pub struct InventoryHandler {
	storage: Arc<StorageService>,
	policy: AccessPolicy,
	event_bus: EventBus,
}

impl InventoryHandler {
	pub fn new(storage: Arc<StorageService>, policy: AccessPolicy, event_bus: EventBus) -> Self {
		Self {
			storage,
			policy,
			event_bus,
		}
	}

	pub async fn get_medicine(&self, medicine_id: &str) -> Result<Medicine, LifecycleError> {
		self.storage
			.retrieve(StorageTable::Medicines.as_str(), medicine_id)
			.await
			.map_err(|e| LifecycleError::storage(e, "medicine", medicine_id))
	}

	#[instrument(skip_all, fields(actor = %actor))]
	pub async fn create_medicine(
		&self,
		actor: &Actor,
		draft: MedicineDraft,
	) -> Result<Medicine, LifecycleError> {
		self.policy
			.require_role(actor, Role::StoreManager, "list medicines")?;
		if draft.name.trim().is_empty() {
			return Err(LifecycleError::Validation("medicine name is required".into()));
		}
		validate_price(draft.price)?;

		let now = Utc::now();
		let medicine = Medicine {
			id: new_id(),
			name: draft.name.trim().to_string(),
			description: draft.description,
			category: draft.category,
			price: draft.price,
			stock: draft.stock,
			min_stock: draft.min_stock,
			prescription_required: draft.prescription_required,
			store_manager_id: actor.id.clone(),
			image_url: draft.image_url,
			created_at: now,
			updated_at: now,
		};

		let inserted = self
			.storage
			.insert(StorageTable::Medicines.as_str(), &medicine.id, &medicine)
			.await?;
		if !inserted {
			return Err(LifecycleError::PreconditionNotMet(format!(
				"medicine {} already exists",
				medicine.id
			)));
		}

		tracing::info!(medicine_id = %truncate_id(&medicine.id), name = %medicine.name, "Medicine listed");
		self.event_bus
			.publish(ChangeEvent::inserted(ChangeRecord::Medicine(medicine.clone())))
			.ok();
		Ok(medicine)
	}

	#[instrument(skip_all, fields(medicine_id = %truncate_id(medicine_id)))]
	pub async fn update_medicine(
		&self,
		actor: &Actor,
		medicine_id: &str,
		update: MedicineUpdate,
	) -> Result<Medicine, LifecycleError> {
		self.policy
			.require_role(actor, Role::StoreManager, "edit medicines")?;
		if let Some(price) = update.price {
			validate_price(price)?;
		}
		if matches!(&update.name, Some(name) if name.trim().is_empty()) {
			return Err(LifecycleError::Validation("medicine name is required".into()));
		}

		let medicine = self
			.edit(medicine_id, |medicine| {
				ensure_owner(actor, medicine)?;
				let update = update.clone();
				if let Some(name) = update.name {
					medicine.name = name.trim().to_string();
				}
				if let Some(description) = update.description {
					medicine.description = description;
				}
				if let Some(category) = update.category {
					medicine.category = category;
				}
				if let Some(price) = update.price {
					medicine.price = price;
				}
				if let Some(min_stock) = update.min_stock {
					medicine.min_stock = min_stock;
				}
				if let Some(prescription_required) = update.prescription_required {
					medicine.prescription_required = prescription_required;
				}
				if let Some(image_url) = update.image_url {
					medicine.image_url = Some(image_url);
				}
				Ok(())
			})
			.await?;

		self.event_bus
			.publish(ChangeEvent::updated(ChangeRecord::Medicine(medicine.clone())))
			.ok();
		Ok(medicine)
	}

	/// Adjusts stock by `delta`; the result may not go below zero.
	#[instrument(skip_all, fields(medicine_id = %truncate_id(medicine_id), delta))]
	pub async fn restock(
		&self,
		actor: &Actor,
		medicine_id: &str,
		delta: i64,
	) -> Result<Medicine, LifecycleError> {
		self.policy
			.require_role(actor, Role::StoreManager, "restock medicines")?;

		let medicine = self
			.edit(medicine_id, |medicine| {
				ensure_owner(actor, medicine)?;
				let next = i64::from(medicine.stock) + delta;
				medicine.stock = u32::try_from(next).map_err(|_| {
					LifecycleError::PreconditionNotMet(format!(
						"cannot adjust stock of {} by {}: {} in stock",
						medicine.name, delta, medicine.stock
					))
				})?;
				Ok(())
			})
			.await?;

		if medicine.is_low_stock() {
			tracing::warn!(name = %medicine.name, stock = medicine.stock, "Medicine is low on stock");
		}
		self.event_bus
			.publish(ChangeEvent::updated(ChangeRecord::Medicine(medicine.clone())))
			.ok();
		Ok(medicine)
	}

	#[instrument(skip_all, fields(medicine_id = %truncate_id(medicine_id)))]
	pub async fn delete_medicine(&self, actor: &Actor, medicine_id: &str) -> Result<(), LifecycleError> {
		self.policy
			.require_role(actor, Role::StoreManager, "delete medicines")?;
		let medicine = self.get_medicine(medicine_id).await?;
		ensure_owner(actor, &medicine)?;

		self.storage
			.remove(StorageTable::Medicines.as_str(), medicine_id)
			.await?;
		tracing::info!(name = %medicine.name, "Medicine removed");
		self.event_bus
			.publish(ChangeEvent::deleted(ChangeRecord::Medicine(medicine)))
			.ok();
		Ok(())
	}

	/// In-stock medicines, optionally limited to one category, sorted by name.
	pub async fn catalog(&self, category: Option<&str>) -> Result<Vec<Medicine>, LifecycleError> {
		let mut medicines = self
			.storage
			.query(StorageTable::Medicines.as_str(), |m: &Medicine| {
				m.in_stock() && category.is_none_or(|c| m.category.eq_ignore_ascii_case(c))
			})
			.await?;
		medicines.sort_by(|a, b| a.name.cmp(&b.name));
		Ok(medicines)
	}

	/// Medicines owned by the manager, sorted by name.
	pub async fn my_medicines(&self, actor: &Actor) -> Result<Vec<Medicine>, LifecycleError> {
		self.policy
			.require_role(actor, Role::StoreManager, "list store medicines")?;
		let mut medicines = self
			.storage
			.query(StorageTable::Medicines.as_str(), |m: &Medicine| {
				m.store_manager_id == actor.id
			})
			.await?;
		medicines.sort_by(|a, b| a.name.cmp(&b.name));
		Ok(medicines)
	}

	/// The manager's medicines at or below their minimum stock, lowest first.
	pub async fn low_stock(&self, actor: &Actor) -> Result<Vec<Medicine>, LifecycleError> {
		self.policy
			.require_role(actor, Role::StoreManager, "read stock reports")?;
		let mut medicines = self
			.storage
			.query(StorageTable::Medicines.as_str(), |m: &Medicine| {
				m.store_manager_id == actor.id && m.is_low_stock()
			})
			.await?;
		medicines.sort_by(|a, b| a.stock.cmp(&b.stock).then_with(|| a.name.cmp(&b.name)));
		Ok(medicines)
	}

	/// Takes the quantities of `items` out of stock.
	///
	/// Either every medicine is decremented or none is: when one line cannot
	/// be covered, the lines already taken are put back before returning.
	pub(crate) async fn reserve_stock(&self, items: &[OrderLineItem]) -> Result<(), LifecycleError> {
		let wanted = aggregate(items);
		let mut taken: Vec<(&str, u32)> = Vec::with_capacity(wanted.len());

		for (&medicine_id, &quantity) in &wanted {
			let result = self
				.edit(medicine_id, |medicine| {
					if medicine.stock < quantity {
						return Err(LifecycleError::PreconditionNotMet(format!(
							"insufficient stock for {}: {} requested, {} available",
							medicine.name, quantity, medicine.stock
						)));
					}
					medicine.stock -= quantity;
					Ok(())
				})
				.await;

			match result {
				Ok(medicine) => {
					taken.push((medicine_id, quantity));
					self.publish_stock_change(medicine);
				},
				Err(e) => {
					for (id, quantity) in taken {
						self.put_back(id, quantity).await;
					}
					return Err(match e {
						LifecycleError::NotFound(_) => LifecycleError::PreconditionNotMet(format!(
							"medicine {} is no longer listed",
							medicine_id
						)),
						other => other,
					});
				},
			}
		}
		Ok(())
	}

	/// Returns the quantities of `items` to stock.
	pub(crate) async fn release_stock(&self, items: &[OrderLineItem]) {
		for (medicine_id, quantity) in aggregate(items) {
			self.put_back(medicine_id, quantity).await;
		}
	}

	async fn put_back(&self, medicine_id: &str, quantity: u32) {
		let result = self
			.edit(medicine_id, |medicine| {
				medicine.stock = medicine.stock.saturating_add(quantity);
				Ok(())
			})
			.await;
		match result {
			Ok(medicine) => self.publish_stock_change(medicine),
			Err(e) => tracing::error!(
				medicine_id = %truncate_id(medicine_id),
				quantity,
				error = %e,
				"Failed to return stock"
			),
		}
	}

	fn publish_stock_change(&self, medicine: Medicine) {
		tracing::debug!(name = %medicine.name, stock = medicine.stock, "Stock changed");
		self.event_bus
			.publish(ChangeEvent::updated(ChangeRecord::Medicine(medicine)))
			.ok();
	}

	async fn edit<F>(&self, medicine_id: &str, mut edit: F) -> Result<Medicine, LifecycleError>
	where
		F: FnMut(&mut Medicine) -> Result<(), LifecycleError> + Send,
	{
		let mut rejection = None;
		let updated = self
			.storage
			.update_if(
				StorageTable::Medicines.as_str(),
				medicine_id,
				|medicine: &mut Medicine| match edit(medicine) {
					Ok(()) => {
						medicine.updated_at = Utc::now();
						true
					},
					Err(e) => {
						rejection = Some(e);
						false
					},
				},
			)
			.await
			.map_err(|e| LifecycleError::storage(e, "medicine", medicine_id))?;

		updated.ok_or_else(|| {
			rejection.unwrap_or_else(|| {
				LifecycleError::StoreUnavailable(format!("update of medicine {} was dropped", medicine_id))
			})
		})
	}
}

fn ensure_owner(actor: &Actor, medicine: &Medicine) -> Result<(), LifecycleError> {
	if medicine.store_manager_id != actor.id {
		return Err(LifecycleError::Forbidden(format!(
			"medicine {} belongs to another store",
			medicine.id
		)));
	}
	Ok(())
}

fn validate_price(price: Decimal) -> Result<(), LifecycleError> {
	if price <= Decimal::ZERO {
		return Err(LifecycleError::Validation("price must be positive".into()));
	}
	Ok(())
}

/// Total quantity per medicine, in a stable order.
fn aggregate(items: &[OrderLineItem]) -> BTreeMap<&str, u32> {
	let mut wanted = BTreeMap::new();
	for item in items {
		*wanted.entry(item.medicine_id.as_str()).or_insert(0u32) += item.quantity;
	}
	wanted
}
