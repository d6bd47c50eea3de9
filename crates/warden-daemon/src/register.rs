// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The register file: the host-local list of subscribed key IDs.
//!
//! On disk this is UTF-8 text with one key ID per line and a terminating
//! newline. The file is the shared register between the administrative
//! register/unregister commands and the daemon, so every access goes through
//! the advisory lock; [`RegisterFile::lock`] hands out a guard whose methods
//! are the only way to read or write the list.

use std::collections::BTreeSet;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::lock::{FileLock, LockError};

const REGISTER_MODE: u32 = 0o666;

/// Handle on the register file path.
pub struct RegisterFile {
	path: PathBuf,
}

impl RegisterFile {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Takes the exclusive lock and returns a guard for list operations.
	pub async fn lock(&self) -> Result<RegisterGuard, LockError> {
		let lock = FileLock::acquire(&self.path).await?;
		Ok(RegisterGuard { lock })
	}

	/// Lock variant with a caller-chosen deadline.
	pub async fn lock_with_timeout(&self, timeout: Duration) -> Result<RegisterGuard, LockError> {
		let lock = FileLock::acquire_with_timeout(&self.path, timeout).await?;
		Ok(RegisterGuard { lock })
	}
}

/// Locked access to the registered key ID list. Dropping the guard releases
/// the lock.
pub struct RegisterGuard {
	lock: FileLock,
}

impl RegisterGuard {
	/// The registered IDs, split on whitespace, in file order.
	pub fn get(&self) -> io::Result<Vec<String>> {
		let content = std::fs::read_to_string(self.lock.path())?;
		Ok(content.split_whitespace().map(str::to_string).collect())
	}

	fn current_set(&self) -> io::Result<BTreeSet<String>> {
		match self.get() {
			Ok(ids) => Ok(ids.into_iter().collect()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeSet::new()),
			Err(e) => Err(e),
		}
	}

	/// Unions `ids` into the list. Skips the write when nothing changes.
	pub fn add(&self, ids: &[String]) -> io::Result<()> {
		let old = self.current_set()?;
		let mut merged = old.clone();
		merged.extend(ids.iter().cloned());
		if merged == old {
			return Ok(());
		}
		self.write_set(&merged)
	}

	/// Removes `ids` from the list. Always rewrites the file.
	pub fn remove(&self, ids: &[String]) -> io::Result<()> {
		let mut set = self.current_set()?;
		for id in ids {
			set.remove(id);
		}
		self.write_set(&set)
	}

	/// Replaces the list with the deduplicated `ids`.
	pub fn overwrite(&self, ids: &[String]) -> io::Result<()> {
		let set: BTreeSet<String> = ids.iter().cloned().collect();
		self.write_set(&set)
	}

	fn write_set(&self, ids: &BTreeSet<String>) -> io::Result<()> {
		let mut content = String::new();
		for id in ids {
			content.push_str(id);
			content.push('\n');
		}
		std::fs::write(self.lock.path(), content)?;
		std::fs::set_permissions(self.lock.path(), std::fs::Permissions::from_mode(REGISTER_MODE))
	}
}
