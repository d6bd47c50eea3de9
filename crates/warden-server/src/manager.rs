// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Store facade for key lifecycle operations.
//!
//! The manager owns the rules that the raw [`KeyDb`] does not: key ID
//! validation, the version state machine, ACL merging, and hash upkeep. Every
//! successful mutation leaves the stored `version_hash` consistent with the
//! version list.
//!
//! Concurrency contract: mutations are serialized per key ID through a keyed
//! mutex; reads never take a lock. Cross-key operations need no global lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::instrument;

use warden_core::{
	Access, CoreError, Key, KeyVersion, Result, VersionStatus,
};

use crate::db::KeyDb;

/// Facade over a [`KeyDb`] implementing the key lifecycle operations.
pub struct KeyManager {
	db: Arc<dyn KeyDb>,
	key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyManager {
	pub fn new(db: Arc<dyn KeyDb>) -> Self {
		Self {
			db,
			key_locks: Mutex::new(HashMap::new()),
		}
	}

	/// The mutex serializing mutations for one key ID.
	async fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
		let mut locks = self.key_locks.lock().await;
		locks
			.entry(id.to_string())
			.or_insert_with(|| Arc::new(Mutex::new(())))
			.clone()
	}

	pub async fn get_all_key_ids(&self) -> Result<Vec<String>> {
		let keys = self.db.get_all().await?;
		Ok(keys.into_iter().map(|k| k.id).collect())
	}

	/// Returns the IDs whose stored hash differs from the supplied one.
	///
	/// An empty supplied hash never matches a stored hash, so callers that
	/// send `id -> ""` get the ID back whenever it exists. Unknown IDs are
	/// silently dropped.
	pub async fn get_updated_key_ids(&self, hashes: &HashMap<String, String>) -> Result<Vec<String>> {
		let mut updated = Vec::new();
		for (id, hash) in hashes {
			match self.db.get(id).await {
				Ok(key) => {
					if &key.version_hash != hash {
						updated.push(id.clone());
					}
				}
				Err(CoreError::KeyNotFound) => {}
				Err(e) => return Err(e),
			}
		}
		Ok(updated)
	}

	/// Fetches a key with only the versions at or above `min_status` visible.
	/// The returned hash always covers the full version list.
	pub async fn get_key(&self, id: &str, min_status: VersionStatus) -> Result<Key> {
		let key = self.db.get(id).await?;
		Ok(key.filtered(min_status))
	}

	#[instrument(skip(self, key), fields(key_id = %key.id))]
	pub async fn add_new_key(&self, key: &Key) -> Result<()> {
		key.validate(&[])?;
		let lock = self.lock_for(&key.id).await;
		let _guard = lock.lock().await;
		self.db.add(key).await
	}

	#[instrument(skip(self))]
	pub async fn delete_key(&self, id: &str) -> Result<()> {
		let lock = self.lock_for(id).await;
		let _guard = lock.lock().await;
		self.db.remove(id).await
	}

	/// Applies each rule by `(type, id)` identity; an access type of `None`
	/// removes the rule. The resulting ACL must still validate.
	#[instrument(skip(self, rules))]
	pub async fn update_access(&self, id: &str, rules: &[Access]) -> Result<()> {
		let lock = self.lock_for(id).await;
		let _guard = lock.lock().await;
		let mut key = self.db.get(id).await?;
		for rule in rules {
			key.acl.set(rule.clone());
		}
		key.acl.validate(&[])?;
		key.recompute_hash();
		self.db.update(&key).await
	}

	/// Adds a version to an existing key and returns its stored ID.
	#[instrument(skip(self, version))]
	pub async fn add_version(&self, id: &str, version: KeyVersion) -> Result<u64> {
		let lock = self.lock_for(id).await;
		let _guard = lock.lock().await;
		let mut key = self.db.get(id).await?;
		let version_id = key.version_list.add(version);
		key.recompute_hash();
		self.db.update(&key).await?;
		Ok(version_id)
	}

	/// Moves a version to `status`. Promotion to Primary demotes the current
	/// Primary to Active in the same write.
	#[instrument(skip(self))]
	pub async fn update_version(&self, id: &str, version_id: u64, status: VersionStatus) -> Result<()> {
		let lock = self.lock_for(id).await;
		let _guard = lock.lock().await;
		let mut key = self.db.get(id).await?;
		key.version_list.update(version_id, status)?;
		key.recompute_hash();
		self.db.update(&key).await
	}
}
