// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Advisory exclusive file locking with bounded-retry acquisition.
//!
//! The register file is shared between the daemon and the register and
//! unregister commands, possibly in different processes, so mutual exclusion
//! comes from the host OS's per-file advisory lock. Acquisition polls the
//! non-blocking lock until a deadline; holding past the deadline is unusual
//! enough that on Linux the probable holders are logged via `lsof` before
//! the timeout is surfaced.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use thiserror::Error;
use tracing::warn;

/// How long to keep retrying before giving up on the lock.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between lock attempts.
pub const LOCK_RETRY: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum LockError {
	#[error("timed out obtaining lock on file '{0}'")]
	Timeout(PathBuf),

	#[error("unable to obtain lock on file '{path}': {source}")]
	Io {
		path: PathBuf,
		source: std::io::Error,
	},
}

/// An exclusive advisory lock on a file, released on drop.
pub struct FileLock {
	file: File,
	path: PathBuf,
}

impl FileLock {
	/// Acquires the lock, creating the file if needed, with the default
	/// deadline.
	pub async fn acquire(path: &Path) -> Result<FileLock, LockError> {
		Self::acquire_with_timeout(path, LOCK_TIMEOUT).await
	}

	/// Acquires the lock, polling every [`LOCK_RETRY`] until `timeout`.
	pub async fn acquire_with_timeout(path: &Path, timeout: Duration) -> Result<FileLock, LockError> {
		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.truncate(false)
			.open(path)
			.map_err(|source| LockError::Io {
				path: path.to_path_buf(),
				source,
			})?;

		let deadline = Instant::now() + timeout;
		loop {
			match file.try_lock_exclusive() {
				Ok(()) => {
					return Ok(FileLock {
						file,
						path: path.to_path_buf(),
					});
				}
				Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
					if Instant::now() >= deadline {
						log_lock_holders(path);
						return Err(LockError::Timeout(path.to_path_buf()));
					}
					tokio::time::sleep(LOCK_RETRY).await;
				}
				Err(source) => {
					return Err(LockError::Io {
						path: path.to_path_buf(),
						source,
					});
				}
			}
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

impl Drop for FileLock {
	fn drop(&mut self) {
		if let Err(e) = fs2::FileExt::unlock(&self.file) {
			warn!(path = %self.path.display(), "unable to release lock: {e}");
		}
	}
}

/// Timeout means someone else is sitting on our lock. Collect extra
/// debugging information about who before reporting the failure.
#[cfg(target_os = "linux")]
fn log_lock_holders(path: &Path) {
	match std::process::Command::new("lsof").arg(path).output() {
		Ok(output) => {
			warn!(
				path = %path.display(),
				holders = %String::from_utf8_lossy(&output.stdout),
				"hit lock timeout, probable lock holders"
			);
		}
		Err(e) => warn!(path = %path.display(), "unable to identify lock holders: {e}"),
	}
}

#[cfg(not(target_os = "linux"))]
fn log_lock_holders(_path: &Path) {}
