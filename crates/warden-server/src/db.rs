// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pluggable key persistence.
//!
//! The server only ever talks to a [`KeyDb`]; deployments bring their own
//! durable implementation. [`TempDb`] keeps everything in memory and backs
//! tests and single-node development servers.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use warden_core::{CoreError, Key, Result};

/// CRUD repository for whole keys.
///
/// Implementations must be safe for concurrent readers; the
/// [`crate::manager::KeyManager`] serializes mutations per key ID on top.
#[async_trait]
pub trait KeyDb: Send + Sync + 'static {
	async fn get_all(&self) -> Result<Vec<Key>>;
	async fn get(&self, id: &str) -> Result<Key>;
	async fn add(&self, key: &Key) -> Result<()>;
	async fn update(&self, key: &Key) -> Result<()>;
	async fn remove(&self, id: &str) -> Result<()>;
}

/// In-memory key store for tests and ephemeral deployments.
#[derive(Default)]
pub struct TempDb {
	keys: RwLock<HashMap<String, Key>>,
}

impl TempDb {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl KeyDb for TempDb {
	async fn get_all(&self) -> Result<Vec<Key>> {
		let keys = self.keys.read().await;
		Ok(keys.values().cloned().collect())
	}

	async fn get(&self, id: &str) -> Result<Key> {
		let keys = self.keys.read().await;
		keys.get(id).cloned().ok_or(CoreError::KeyNotFound)
	}

	async fn add(&self, key: &Key) -> Result<()> {
		let mut keys = self.keys.write().await;
		if keys.contains_key(&key.id) {
			return Err(CoreError::KeyExists);
		}
		keys.insert(key.id.clone(), key.clone());
		Ok(())
	}

	async fn update(&self, key: &Key) -> Result<()> {
		let mut keys = self.keys.write().await;
		if !keys.contains_key(&key.id) {
			return Err(CoreError::KeyNotFound);
		}
		keys.insert(key.id.clone(), key.clone());
		Ok(())
	}

	async fn remove(&self, id: &str) -> Result<()> {
		let mut keys = self.keys.write().await;
		keys.remove(id);
		Ok(())
	}
}
