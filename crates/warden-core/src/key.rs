// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Keys, key versions and the version lifecycle state machine.
//!
//! A [`Key`] is a named secret with an ACL and an ordered list of
//! [`KeyVersion`]s, newest first. Exactly one version is Primary at any time.
//! The canonical [`KeyVersionList::hash`] digest acts as an ETag: the sync
//! daemon sends it back to the server to skip unchanged keys, so its
//! computation must stay stable across releases.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

use crate::access::Acl;
use crate::error::{CoreError, Result};

/// Lifecycle status of a key version.
///
/// Visibility filtering ranks `Primary > Active > Inactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionStatus {
	Primary,
	Active,
	Inactive,
}

impl VersionStatus {
	/// Rank for minimum-status filtering; higher is more visible.
	pub fn rank(&self) -> u8 {
		match self {
			VersionStatus::Inactive => 0,
			VersionStatus::Active => 1,
			VersionStatus::Primary => 2,
		}
	}

	fn hash_tag(&self) -> u8 {
		match self {
			VersionStatus::Primary => 1,
			VersionStatus::Active => 2,
			VersionStatus::Inactive => 3,
		}
	}
}

mod base64_bytes {
	//! Key material crosses the wire and the disk cache as standard base64.

	use base64::engine::general_purpose::STANDARD as BASE64;
	use base64::Engine as _;
	use serde::{Deserialize, Deserializer, Serialize, Serializer};

	pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
		BASE64.encode(data).serialize(serializer)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
		let encoded = String::deserialize(deserializer)?;
		BASE64.decode(encoded).map_err(serde::de::Error::custom)
	}
}

/// One version of a key's secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVersion {
	pub id: u64,
	#[serde(with = "base64_bytes")]
	pub data: Vec<u8>,
	pub status: VersionStatus,
	pub creation_time: i64,
}

impl KeyVersion {
	/// Creates a version with a fresh random identifier and the current
	/// epoch-millisecond timestamp.
	pub fn new(data: Vec<u8>, status: VersionStatus) -> Self {
		Self {
			id: random_version_id(),
			data,
			status,
			creation_time: chrono::Utc::now().timestamp_millis(),
		}
	}
}

fn random_version_id() -> u64 {
	loop {
		let id: u64 = rand::random();
		if id != 0 {
			return id;
		}
	}
}

/// Ordered list of key versions, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVersionList(pub Vec<KeyVersion>);

impl KeyVersionList {
	/// Canonical digest over the version list.
	///
	/// Versions are hashed sorted by ID so the digest is independent of list
	/// order: for each version, the big-endian ID bytes, a status tag byte
	/// and the raw data feed a SHA-256 whose digest is rendered as standard
	/// base64.
	pub fn hash(&self) -> String {
		let mut sorted: Vec<&KeyVersion> = self.0.iter().collect();
		sorted.sort_by_key(|v| v.id);
		let mut hasher = Sha256::new();
		for version in sorted {
			hasher.update(version.id.to_be_bytes());
			hasher.update([version.status.hash_tag()]);
			hasher.update(&version.data);
		}
		BASE64.encode(hasher.finalize())
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> std::slice::Iter<'_, KeyVersion> {
		self.0.iter()
	}

	/// Prepends a version, re-drawing its random identifier on the (highly
	/// unlikely) collision with an existing one. Returns the stored ID.
	pub fn add(&mut self, mut version: KeyVersion) -> u64 {
		while self.0.iter().any(|v| v.id == version.id) {
			version.id = random_version_id();
		}
		let id = version.id;
		self.0.insert(0, version);
		id
	}

	/// Moves a version to `new_status`, enforcing the lifecycle state
	/// machine. Promotion to Primary atomically demotes the current Primary
	/// to Active. Setting a version to its current status is a no-op.
	pub fn update(&mut self, version_id: u64, new_status: VersionStatus) -> Result<()> {
		let index = self
			.0
			.iter()
			.position(|v| v.id == version_id)
			.ok_or(CoreError::VersionNotFound)?;
		let current = self.0[index].status;
		match (current, new_status) {
			(a, b) if a == b => Ok(()),
			(VersionStatus::Primary, VersionStatus::Active) => Err(CoreError::PrimaryToActive),
			(VersionStatus::Primary, VersionStatus::Inactive) => Err(CoreError::PrimaryToInactive),
			(VersionStatus::Inactive, VersionStatus::Primary) => Err(CoreError::InactiveToPrimary),
			(VersionStatus::Active, VersionStatus::Primary) => {
				for v in self.0.iter_mut() {
					if v.status == VersionStatus::Primary {
						v.status = VersionStatus::Active;
					}
				}
				self.0[index].status = VersionStatus::Primary;
				Ok(())
			}
			(VersionStatus::Active, VersionStatus::Inactive)
			| (VersionStatus::Inactive, VersionStatus::Active) => {
				self.0[index].status = new_status;
				Ok(())
			}
			// Unreachable: all nine combinations are covered above.
			_ => Err(CoreError::VersionNotFound),
		}
	}

	/// Returns the versions visible at or above the given status floor.
	pub fn filter(&self, min_status: VersionStatus) -> KeyVersionList {
		KeyVersionList(
			self.0
				.iter()
				.filter(|v| v.status.rank() >= min_status.rank())
				.cloned()
				.collect(),
		)
	}
}

fn key_id_regex() -> &'static regex::Regex {
	static RE: OnceLock<regex::Regex> = OnceLock::new();
	RE.get_or_init(|| regex::Regex::new(r"^[a-zA-Z0-9:_.-]+$").unwrap())
}

/// Whether a key identifier uses only the supported character set.
pub fn valid_key_id(id: &str) -> bool {
	key_id_regex().is_match(id)
}

/// A named, versioned secret with an ACL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
	pub id: String,
	/// Required on the wire even when blanked: read responses carry `[]`,
	/// and a response with no ACL value at all must fail decoding.
	pub acl: Acl,
	#[serde(rename = "versions")]
	pub version_list: KeyVersionList,
	#[serde(rename = "hash")]
	pub version_hash: String,
	/// Packaged keyset attached by the sync daemon for `tink:`-prefixed
	/// keys; empty everywhere else.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tink_keyset: Option<String>,
}

impl Key {
	/// Builds a key with one original Primary version holding `data` and an
	/// ACL guaranteed to grant the creator Admin.
	pub fn new(id: impl Into<String>, mut acl: Acl, data: Vec<u8>, creator_id: &str) -> Self {
		acl.add_creator(creator_id);
		let version_list = KeyVersionList(vec![KeyVersion::new(data, VersionStatus::Primary)]);
		let version_hash = version_list.hash();
		Self {
			id: id.into(),
			acl,
			version_list,
			version_hash,
			tink_keyset: None,
		}
	}

	/// Recomputes the stored hash from the current version list.
	pub fn recompute_hash(&mut self) {
		self.version_hash = self.version_list.hash();
	}

	/// Returns a copy with only the versions visible at the given floor. The
	/// stored hash is kept as-is: it always covers the full version list.
	pub fn filtered(&self, min_status: VersionStatus) -> Key {
		Key {
			id: self.id.clone(),
			acl: self.acl.clone(),
			version_list: self.version_list.filter(min_status),
			version_hash: self.version_hash.clone(),
			tink_keyset: self.tink_keyset.clone(),
		}
	}

	/// Checks every invariant a loaded key must hold.
	pub fn validate(&self, extra_validators: &[crate::access::PrincipalValidator]) -> Result<()> {
		if !valid_key_id(&self.id) {
			return Err(CoreError::InvalidKeyId);
		}
		if self.version_list.is_empty() {
			return Err(CoreError::InvalidKey("no versions".to_string()));
		}
		let primaries = self
			.version_list
			.iter()
			.filter(|v| v.status == VersionStatus::Primary)
			.count();
		if primaries != 1 {
			return Err(CoreError::InvalidKey(format!(
				"expected exactly one primary version, found {primaries}"
			)));
		}
		for (i, version) in self.version_list.iter().enumerate() {
			if self.version_list.iter().take(i).any(|v| v.id == version.id) {
				return Err(CoreError::InvalidKey(format!(
					"duplicate version id {}",
					version.id
				)));
			}
		}
		if self.version_hash != self.version_list.hash() {
			return Err(CoreError::InvalidKey("version hash mismatch".to_string()));
		}
		self.acl.validate(extra_validators)
	}
}
