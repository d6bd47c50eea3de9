// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authorization mediation for handlers.
//!
//! The primary decision is the pure ACL check. Deployments can install one
//! process-wide [`AccessCallback`] consulted when the ACL denies; it runs
//! behind a panic boundary so a faulty policy hook can never take the server
//! down, and any fault leaves the decision at deny.
//!
//! Both the callback and the extra principal-ID validators are write-once
//! configuration slots, set before serving begins and read-only afterwards.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::OnceLock;

use tracing::error;

use warden_core::{AccessType, Key, Principal, PrincipalSet, PrincipalValidator};

/// Input handed to the deployment-specific access callback.
#[derive(Debug, Clone)]
pub struct AccessCallbackInput {
	pub key: Key,
	pub principals: Vec<Principal>,
	pub access_type: AccessType,
}

/// Deployment policy hook consulted after an ACL deny.
pub type AccessCallback =
	Box<dyn Fn(AccessCallbackInput) -> std::result::Result<bool, String> + Send + Sync>;

static ACCESS_CALLBACK: OnceLock<AccessCallback> = OnceLock::new();

static EXTRA_VALIDATORS: OnceLock<Vec<PrincipalValidator>> = OnceLock::new();

/// Installs the process-wide access callback. Returns false if one was
/// already installed.
pub fn set_access_callback(callback: AccessCallback) -> bool {
	ACCESS_CALLBACK.set(callback).is_ok()
}

/// Installs the embedder-supplied principal-ID validators. Returns false if
/// they were already installed.
pub fn set_extra_principal_validators(validators: Vec<PrincipalValidator>) -> bool {
	EXTRA_VALIDATORS.set(validators).is_ok()
}

/// The extra validators applied to ACL updates, empty until installed.
pub fn extra_principal_validators() -> &'static [PrincipalValidator] {
	EXTRA_VALIDATORS.get().map(Vec::as_slice).unwrap_or(&[])
}

/// Decides whether `principal` may perform `access` on `key`.
///
/// Returns the decision plus an optional mediation error. A mediation error
/// means the callback faulted; callers surface it as an internal error while
/// the decision itself stays deny.
pub fn authorize_request(
	key: &Key,
	principal: &PrincipalSet,
	access: AccessType,
) -> (bool, Option<String>) {
	if principal.can_access(&key.acl, access) {
		return (true, None);
	}

	let Some(callback) = ACCESS_CALLBACK.get() else {
		return (false, None);
	};

	let input = AccessCallbackInput {
		key: key.clone(),
		principals: principal.raw().to_vec(),
		access_type: access,
	};
	match catch_unwind(AssertUnwindSafe(|| callback(input))) {
		Ok(Ok(allow)) => (allow, None),
		Ok(Err(e)) => (false, Some(e)),
		Err(panic) => {
			let reason = panic
				.downcast_ref::<&str>()
				.map(|s| s.to_string())
				.or_else(|| panic.downcast_ref::<String>().cloned())
				.unwrap_or_else(|| "unknown panic".to_string());
			error!(reason = %reason, "access callback panicked");
			(false, Some(format!("access callback panicked: {reason}")))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use warden_core::{Access, Acl, PrincipalType};

	// The callback slot is process-wide, so its behaviors are covered by the
	// dedicated integration test binaries; here we only exercise the pure
	// ACL path.

	#[test]
	fn acl_grant_allows_without_callback() {
		let acl = Acl::new(vec![Access::new(PrincipalType::User, "alice", AccessType::Read)]);
		let key = Key::new("k", acl, b"x".to_vec(), "alice");
		let principal = PrincipalSet::single(Principal::user("alice", vec![]));
		let (allow, err) = authorize_request(&key, &principal, AccessType::Read);
		assert!(allow);
		assert!(err.is_none());
	}

	#[test]
	fn validators_default_to_empty() {
		assert!(extra_principal_validators().is_empty());
	}
}
