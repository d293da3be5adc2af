//! Profile records for authenticated users.

use crate::engine::event_bus::EventBus;
use crate::LifecycleError;
use chrono::Utc;
use quickcare_storage::StorageService;
use quickcare_types::{
	Actor, ChangeEvent, ChangeRecord, Profile, ProfileUpdate, Role, StorageTable,
};
use std::sync::Arc;
use tracing::instrument;

pub struct ProfileHandler {
	storage: Arc<StorageService>,
	event_bus: EventBus,
}

impl ProfileHandler {
	pub fn new(storage: Arc<StorageService>, event_bus: EventBus) -> Self {
		Self { storage, event_bus }
	}

	/// Creates the profile for an actor right after signup. The role is taken
	/// from the actor and cannot change afterwards.
	#[instrument(skip_all, fields(actor = %actor))]
	pub async fn register(
		&self,
		actor: &Actor,
		full_name: &str,
		phone: Option<String>,
	) -> Result<Profile, LifecycleError> {
		if full_name.trim().is_empty() {
			return Err(LifecycleError::Validation("full name is required".into()));
		}
		let profile = Profile {
			id: actor.id.clone(),
			full_name: full_name.trim().to_string(),
			phone,
			role: actor.role,
			created_at: Utc::now(),
		};

		let inserted = self
			.storage
			.insert(StorageTable::Profiles.as_str(), &profile.id, &profile)
			.await?;
		if !inserted {
			return Err(LifecycleError::PreconditionNotMet(format!(
				"profile {} already exists",
				actor.id
			)));
		}

		tracing::info!(role = %profile.role, "Profile registered");
		self.event_bus
			.publish(ChangeEvent::inserted(ChangeRecord::Profile(profile.clone())))
			.ok();
		Ok(profile)
	}

	/// Users read their own profile; store managers may read any.
	pub async fn profile(&self, actor: &Actor, profile_id: &str) -> Result<Profile, LifecycleError> {
		if actor.id != profile_id && !actor.is(Role::StoreManager) {
			return Err(LifecycleError::Forbidden(format!(
				"{} may not read profile {}",
				actor, profile_id
			)));
		}
		self.storage
			.retrieve(StorageTable::Profiles.as_str(), profile_id)
			.await
			.map_err(|e| LifecycleError::storage(e, "profile", profile_id))
	}

	#[instrument(skip_all, fields(actor = %actor))]
	pub async fn update(&self, actor: &Actor, update: ProfileUpdate) -> Result<Profile, LifecycleError> {
		if matches!(&update.full_name, Some(name) if name.trim().is_empty()) {
			return Err(LifecycleError::Validation("full name is required".into()));
		}

		let updated = self
			.storage
			.update_if(
				StorageTable::Profiles.as_str(),
				&actor.id,
				|profile: &mut Profile| {
					if let Some(name) = &update.full_name {
						profile.full_name = name.trim().to_string();
					}
					if let Some(phone) = &update.phone {
						profile.phone = Some(phone.clone());
					}
					true
				},
			)
			.await
			.map_err(|e| LifecycleError::storage(e, "profile", &actor.id))?
			.ok_or_else(|| {
				LifecycleError::StoreUnavailable(format!("update of profile {} was dropped", actor.id))
			})?;

		self.event_bus
			.publish(ChangeEvent::updated(ChangeRecord::Profile(updated.clone())))
			.ok();
		Ok(updated)
	}
}
