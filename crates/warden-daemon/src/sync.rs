// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The reconcile loop keeping the on-disk key cache in sync with the server.
//!
//! Each [`Daemon::update`] pass runs entirely under the register-file lock:
//! it reads the subscribed IDs, sweeps cache files that are no longer
//! subscribed, asks the server which of the remaining keys changed (sending
//! the cached version hashes so unchanged keys are skipped), and rewrites the
//! changed ones. Key files are replaced atomically via a temp file in the
//! base directory renamed into place; a failed write never leaves a partial
//! file at the canonical path.
//!
//! Per-key failures are logged and counted, never fatal: one bad key must not
//! stop the rest of the host's cache from converging.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use notify::{RecursiveMode, Watcher};
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use warden_client::{ApiClient, ClientError};
use warden_core::{ErrorCode, Key, KeyVersionList};

use crate::lock::LockError;
use crate::register::{RegisterFile, RegisterGuard};

/// Key IDs with this prefix carry a packaged keyset in their cache entry.
pub const TINK_PREFIX: &str = "tink:";

/// Name of the register file inside the base directory.
pub const REGISTER_FILE: &str = ".registered";

/// Cache subdirectory for key files, mirroring the API path.
pub const KEYS_SUBDIR: &str = "v0/keys";

/// Default reconcile period.
pub const DEFAULT_REFRESH: Duration = Duration::from_secs(600);

const DIR_MODE: u32 = 0o777;
const FILE_MODE: u32 = 0o666;

/// Result type alias for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;

#[derive(Error, Debug)]
pub enum DaemonError {
	#[error("{0}")]
	Init(String),

	#[error(transparent)]
	Lock(#[from] LockError),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error("error getting key {0}: {1}")]
	GetKey(String, ClientError),

	#[error(transparent)]
	Client(#[from] ClientError),

	#[error("invalid key content returned for {0}")]
	InvalidContent(String),

	#[error("no keyset packager configured for tink key {0}")]
	NoPackager(String),

	#[error("error packaging keyset for {0}: {1}")]
	Package(String, String),

	#[error("error serializing key {0}: {1}")]
	Serialize(String, serde_json::Error),

	#[error("error parsing cached key {0}: {1}")]
	Parse(String, serde_json::Error),
}

/// Packages a key's version list into the external keyset wire format
/// attached to `tink:`-prefixed cache entries.
pub trait KeysetPackager: Send + Sync {
	fn package(&self, versions: &KeyVersionList) -> std::result::Result<Vec<u8>, String>;
}

/// Counter snapshot emitted to the metrics sink on each refresh tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonMetrics {
	pub update_errors: u64,
	pub get_key_errors: u64,
	pub successes: u64,
}

/// Deployment-specific metrics delivery.
pub type MetricsSink = Box<dyn Fn(&DaemonMetrics) + Send + Sync>;

/// The host synchronization daemon.
pub struct Daemon {
	dir: PathBuf,
	client: Arc<dyn ApiClient>,
	register: RegisterFile,
	packager: Option<Arc<dyn KeysetPackager>>,
	metrics_sink: Option<MetricsSink>,
	refresh: Duration,
	update_err_count: u64,
	get_key_err_count: u64,
	success_count: u64,
}

impl Daemon {
	pub fn new(dir: impl Into<PathBuf>, client: Arc<dyn ApiClient>) -> Self {
		let dir = dir.into();
		let register = RegisterFile::new(dir.join(REGISTER_FILE));
		Self {
			dir,
			client,
			register,
			packager: None,
			metrics_sink: None,
			refresh: DEFAULT_REFRESH,
			update_err_count: 0,
			get_key_err_count: 0,
			success_count: 0,
		}
	}

	pub fn with_packager(mut self, packager: Arc<dyn KeysetPackager>) -> Self {
		self.packager = Some(packager);
		self
	}

	pub fn with_metrics_sink(mut self, sink: MetricsSink) -> Self {
		self.metrics_sink = Some(sink);
		self
	}

	pub fn with_refresh(mut self, refresh: Duration) -> Self {
		self.refresh = refresh;
		self
	}

	pub fn register_file(&self) -> &RegisterFile {
		&self.register
	}

	pub fn metrics(&self) -> DaemonMetrics {
		DaemonMetrics {
			update_errors: self.update_err_count,
			get_key_errors: self.get_key_err_count,
			successes: self.success_count,
		}
	}

	fn keys_dir(&self) -> PathBuf {
		self.dir.join(KEYS_SUBDIR)
	}

	fn key_file(&self, key_id: &str) -> PathBuf {
		self.keys_dir().join(key_id)
	}

	/// Creates the cache layout and register file.
	///
	/// Directories are opened up to 0777 and files to 0666 with explicit
	/// chmods: hosts with a restrictive umask would otherwise create them
	/// unreadable for the applications consuming the cache.
	pub fn initialize(&self) -> Result<()> {
		let open_dir = |path: &Path| -> Result<()> {
			std::fs::create_dir_all(path).map_err(|e| {
				DaemonError::Init(format!(
					"failed to initialize {} (run 'sudo mkdir {}'?): {e}",
					path.display(),
					path.display()
				))
			})?;
			std::fs::set_permissions(path, std::fs::Permissions::from_mode(DIR_MODE)).map_err(|e| {
				DaemonError::Init(format!(
					"failed to open up permissions on {}: {e}",
					path.display()
				))
			})
		};
		open_dir(&self.dir)?;
		open_dir(&self.keys_dir())?;

		let register_path = self.register.path();
		if !register_path.exists() {
			std::fs::write(register_path, b"").map_err(|e| {
				DaemonError::Init(format!("failed to initialize registered key file: {e}"))
			})?;
		}
		std::fs::set_permissions(register_path, std::fs::Permissions::from_mode(FILE_MODE))
			.map_err(|e| {
				DaemonError::Init(format!("failed to open up register file permissions: {e}"))
			})?;
		Ok(())
	}

	/// One reconcile pass. Runs under the register-file lock; per-key
	/// failures are counted and logged without aborting the pass.
	#[instrument(skip(self))]
	pub async fn update(&mut self) -> Result<()> {
		let guard = self.register.lock().await?;
		let registered = guard.get()?;
		debug!(?registered, "requested keys");

		// Hash map sent to the server: cached hash when the file parses,
		// empty string (always stale) otherwise.
		let mut request: HashMap<String, String> = registered
			.iter()
			.map(|id| (id.clone(), String::new()))
			.collect();
		// Tracks which registered IDs were found on disk or on the server.
		let mut seen: HashMap<String, bool> =
			registered.iter().map(|id| (id.clone(), false)).collect();

		let cached = self.cached_key_ids()?;
		debug!(?cached, "current keys on disk");
		for key_id in cached {
			seen.insert(key_id.clone(), true);
			if request.contains_key(&key_id) {
				match self.read_cached_key(&key_id) {
					Ok(key) => {
						request.insert(key_id, key.version_hash);
					}
					Err(e) => {
						// A cache file in a stale or foreign format is
						// evicted; the empty hash makes the server resend it.
						warn!(key_id = %key_id, "evicting unreadable cache file: {e}");
						if let Err(remove_err) = self.delete_cached_key(&key_id) {
							warn!(key_id = %key_id, "unable to remove cache file: {remove_err}");
						}
					}
				}
			} else if let Err(e) = self.delete_cached_key(&key_id) {
				warn!(key_id = %key_id, "unable to remove unsubscribed cache file: {e}");
			}
		}

		if !request.is_empty() {
			let updated = self.client.get_updated_key_ids(&request).await?;
			info!(?updated, "updated keys received from server");
			for key_id in updated {
				seen.insert(key_id.clone(), true);
				if let Err(e) = self.process_key(&guard, &key_id).await {
					// Keep going in spite of failure.
					self.get_key_err_count += 1;
					warn!(key_id = %key_id, "error processing key: {e}");
				}
			}
		}

		// Registered IDs that are neither cached nor known to the server;
		// the log line is the operator's signal for dead register entries.
		let not_found: Vec<&String> = seen
			.iter()
			.filter_map(|(id, &found)| (!found).then_some(id))
			.collect();
		if !not_found.is_empty() {
			info!(?not_found, "keys not found on server");
		}
		Ok(())
	}

	/// Fetches one key and atomically replaces its cache file.
	async fn process_key(&self, guard: &RegisterGuard, key_id: &str) -> Result<()> {
		let mut key = match self.client.network_get_key(key_id).await {
			Ok(key) => key,
			Err(e) => {
				// Self-healing: IDs the server no longer serves us are
				// dropped from the register so they stop erroring forever.
				if e.is_api_code(ErrorCode::Unauthorized)
					|| e.is_api_code(ErrorCode::KeyIdentifierDoesNotExist)
				{
					if let Err(remove_err) = guard.remove(&[key_id.to_string()]) {
						warn!(key_id = %key_id, "unable to unregister key: {remove_err}");
					}
				}
				return Err(DaemonError::GetKey(key_id.to_string(), e));
			}
		};

		// Never cache a key the server returned incomplete. Read responses
		// carry the ACL blanked to `[]`, which is fine; a response with no
		// acl value at all already fails decoding in the client.
		if key.id.is_empty()
			|| key.acl.validate(&[]).is_err()
			|| key.version_list.is_empty()
			|| key.version_hash.is_empty()
		{
			return Err(DaemonError::InvalidContent(key_id.to_string()));
		}

		if key_id.starts_with(TINK_PREFIX) {
			let packager = self
				.packager
				.as_ref()
				.ok_or_else(|| DaemonError::NoPackager(key_id.to_string()))?;
			let keyset = packager
				.package(&key.version_list)
				.map_err(|e| DaemonError::Package(key_id.to_string(), e))?;
			key.tink_keyset = Some(BASE64.encode(keyset));
		}

		let bytes = serde_json::to_vec(&key)
			.map_err(|e| DaemonError::Serialize(key_id.to_string(), e))?;

		// Write to a temp file in the base dir, then rename into place; the
		// temp file is removed on any failure before the rename.
		let tmp = self
			.dir
			.join(format!(".{:08x}.{}.tmp", rand::random::<u32>(), key_id));
		if let Err(e) = std::fs::write(&tmp, &bytes) {
			let _ = std::fs::remove_file(&tmp);
			return Err(e.into());
		}
		let dest = self.key_file(key_id);
		if let Err(e) = std::fs::rename(&tmp, &dest) {
			let _ = std::fs::remove_file(&tmp);
			return Err(e.into());
		}
		std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(FILE_MODE))?;
		Ok(())
	}

	fn cached_key_ids(&self) -> Result<Vec<String>> {
		let mut ids = Vec::new();
		for entry in std::fs::read_dir(self.keys_dir())? {
			ids.push(entry?.file_name().to_string_lossy().into_owned());
		}
		Ok(ids)
	}

	fn read_cached_key(&self, key_id: &str) -> Result<Key> {
		let bytes = std::fs::read(self.key_file(key_id))?;
		serde_json::from_slice(&bytes).map_err(|e| DaemonError::Parse(key_id.to_string(), e))
	}

	fn delete_cached_key(&self, key_id: &str) -> std::io::Result<()> {
		std::fs::remove_file(self.key_file(key_id))
	}

	fn report_metrics(&self) {
		let snapshot = self.metrics();
		match &self.metrics_sink {
			Some(sink) => sink(&snapshot),
			None => info!(
				err = snapshot.update_errors,
				get_err = snapshot.get_key_errors,
				success = snapshot.successes,
				"daemon counters"
			),
		}
	}

	/// Runs the reconcile loop until process termination.
	///
	/// An update runs immediately, then on every refresh tick and on every
	/// register-file event. The tick path sleeps up to 10 ms of random
	/// jitter before emitting metrics so hosts sharing a schedule do not
	/// report in lockstep.
	pub async fn run(mut self) -> Result<()> {
		let (tx, mut rx) = tokio::sync::mpsc::channel::<notify::Result<notify::Event>>(16);
		let mut watcher = notify::recommended_watcher(move |event| {
			let _ = tx.blocking_send(event);
		})
		.map_err(|e| DaemonError::Init(format!("unable to watch files: {e}")))?;
		watcher
			.watch(self.register.path(), RecursiveMode::NonRecursive)
			.map_err(|e| DaemonError::Init(format!("unable to watch register file: {e}")))?;

		let start = tokio::time::Instant::now() + self.refresh;
		let mut ticker = tokio::time::interval_at(start, self.refresh);

		loop {
			info!("daemon updating all registered keys");
			let began = std::time::Instant::now();
			match self.update().await {
				Ok(()) => self.success_count += 1,
				Err(e) => {
					self.update_err_count += 1;
					warn!("failed to update keys: {e}");
				}
			}
			info!(
				elapsed_ms = began.elapsed().as_millis() as u64,
				"update of keys completed"
			);

			tokio::select! {
				event = rx.recv() => {
					if let Some(Ok(event)) = event {
						debug!(kind = ?event.kind, "register file event");
					}
				}
				_ = ticker.tick() => {
					let jitter = rand::thread_rng().gen_range(0..10);
					tokio::time::sleep(Duration::from_millis(jitter)).await;
					self.report_metrics();
				}
			}
		}
	}
}
