// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Request handlers for the `/v0/` key API.
//!
//! Handlers are transport-independent: they receive the key manager, the
//! authenticated principal and a flat string parameter map, and return either
//! a JSON value or a typed [`HttpError`]. The route layer owns parameter
//! extraction and the response envelope.

use std::collections::HashMap;

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64_URL};
use base64::Engine as _;
use serde_json::Value;

use warden_core::{
	Access, AccessType, Acl, CoreError, ErrorCode, Key, KeyVersion, PrincipalSet, VersionStatus,
};

use crate::authz::{authorize_request, extra_principal_validators};
use crate::error::HttpError;
use crate::manager::KeyManager;

/// Decoded request parameters, keyed by parameter name.
pub type Params = HashMap<String, String>;

pub type HandlerResult = std::result::Result<Value, HttpError>;

fn fetch_key(
	result: std::result::Result<Key, CoreError>,
	key_id: &str,
) -> std::result::Result<Key, HttpError> {
	result.map_err(|e| match e {
		CoreError::KeyNotFound => HttpError::new(
			ErrorCode::KeyIdentifierDoesNotExist,
			format!("No such key {key_id}"),
		),
		other => HttpError::internal(other.to_string()),
	})
}

fn authorize(
	key: &Key,
	principal: &PrincipalSet,
	access: AccessType,
	verb: &str,
) -> std::result::Result<(), HttpError> {
	let (allow, err) = authorize_request(key, principal, access);
	if let Some(e) = err {
		return Err(HttpError::internal(e));
	}
	if !allow {
		return Err(HttpError::unauthorized(format!(
			"Principal {} not authorized to {verb} {}",
			principal.id(),
			key.id
		)));
	}
	Ok(())
}

/// Lists key IDs, or just the ones that changed.
///
/// With an empty query string every key ID is returned. Otherwise the query
/// encodes `id=versionHash` pairs and only IDs whose stored hash differs come
/// back. Repeated parameters collapse to the last value. No authorization on
/// this route.
pub async fn get_keys(
	manager: &KeyManager,
	_principal: &PrincipalSet,
	params: &Params,
) -> HandlerResult {
	let query = params.get("queryString").map(String::as_str).unwrap_or("");

	let mut hashes: HashMap<String, String> = HashMap::new();
	for (id, hash) in url::form_urlencoded::parse(query.as_bytes()) {
		hashes.insert(id.into_owned(), hash.into_owned());
	}

	let ids = if hashes.is_empty() {
		manager.get_all_key_ids().await
	} else {
		manager.get_updated_key_ids(&hashes).await
	};
	let ids = ids.map_err(|e| HttpError::internal(e.to_string()))?;
	Ok(serde_json::json!(ids))
}

/// Creates a key from `id`, base64 `data` and an optional JSON `acl`, and
/// returns the ID of the original Primary version. Only user principals may
/// create keys.
pub async fn post_keys(
	manager: &KeyManager,
	principal: &PrincipalSet,
	params: &Params,
) -> HandlerResult {
	if !principal.is_user() {
		return Err(HttpError::unauthorized(format!(
			"Must be a user to create keys, principal is {}",
			principal.id()
		)));
	}

	let key_id = params
		.get("id")
		.ok_or_else(|| HttpError::new(ErrorCode::NoKeyId, "Missing parameter 'id'"))?;
	let data = params
		.get("data")
		.ok_or_else(|| HttpError::new(ErrorCode::NoKeyData, "Missing parameter 'data'"))?;
	if data.is_empty() {
		return Err(HttpError::new(ErrorCode::NoKeyData, "Parameter 'data' is empty"));
	}

	let acl = match params.get("acl") {
		Some(raw) => serde_json::from_str::<Acl>(raw)
			.map_err(|e| HttpError::bad_request(e.to_string()))?,
		None => Acl::default(),
	};

	let decoded = BASE64
		.decode(data)
		.map_err(|e| HttpError::bad_request(e.to_string()))?;
	if decoded.is_empty() {
		return Err(HttpError::bad_request("Parameter 'data' decoded to zero bytes"));
	}

	let creator = principal
		.user_id()
		.ok_or_else(|| HttpError::unauthorized("No user principal present"))?;
	let key = Key::new(key_id.clone(), acl, decoded, creator);
	match manager.add_new_key(&key).await {
		Ok(()) => Ok(serde_json::json!(key.version_list.0[0].id)),
		Err(CoreError::KeyExists) => Err(HttpError::new(
			ErrorCode::KeyIdentifierExists,
			format!("Key {key_id} already exists"),
		)),
		Err(CoreError::InvalidKeyId) => Err(HttpError::new(
			ErrorCode::BadKeyFormat,
			format!("KeyID includes unsupported characters {key_id}"),
		)),
		Err(CoreError::InvalidPrincipal(msg)) => {
			Err(HttpError::new(ErrorCode::BadPrincipalIdentifier, msg))
		}
		Err(CoreError::InvalidAcl(msg)) => Err(HttpError::bad_request(msg)),
		Err(e) => Err(HttpError::internal(e.to_string())),
	}
}

/// Fetches a key. The optional `status` parameter is a JSON-encoded minimum
/// visible status, defaulting to Active. Requires Read access. The ACL is
/// blanked in the response so shared caches do not vary on ACL changes.
pub async fn get_key(
	manager: &KeyManager,
	principal: &PrincipalSet,
	params: &Params,
) -> HandlerResult {
	let key_id = params.get("keyID").map(String::as_str).unwrap_or("");

	let mut status = VersionStatus::Active;
	if let Some(raw) = params.get("status") {
		status = serde_json::from_str(raw).map_err(|e| HttpError::bad_request(e.to_string()))?;
	}

	let mut key = fetch_key(manager.get_key(key_id, status).await, key_id)?;
	authorize(&key, principal, AccessType::Read, "read")?;

	key.acl = Acl::default();
	Ok(serde_json::to_value(key).map_err(|e| HttpError::internal(e.to_string()))?)
}

/// Deletes a key. Requires Admin access.
pub async fn delete_key(
	manager: &KeyManager,
	principal: &PrincipalSet,
	params: &Params,
) -> HandlerResult {
	let key_id = params.get("keyID").map(String::as_str).unwrap_or("");

	let key = fetch_key(manager.get_key(key_id, VersionStatus::Primary).await, key_id)?;
	authorize(&key, principal, AccessType::Admin, "delete")?;

	manager
		.delete_key(key_id)
		.await
		.map_err(|e| HttpError::internal(e.to_string()))?;
	Ok(Value::Null)
}

/// Returns a key's ACL.
///
/// No authorization on purpose: unauthorized callers can discover who holds
/// Admin in order to ask for a grant.
pub async fn get_access(
	manager: &KeyManager,
	_principal: &PrincipalSet,
	params: &Params,
) -> HandlerResult {
	let key_id = params.get("keyID").map(String::as_str).unwrap_or("");

	let key = fetch_key(manager.get_key(key_id, VersionStatus::Primary).await, key_id)?;
	Ok(serde_json::to_value(&key.acl).map_err(|e| HttpError::internal(e.to_string()))?)
}

/// Adds or updates ACL rules. Exactly one of `access` (single rule) or `acl`
/// (rule list) must be present; `access` accepts raw JSON or, for older
/// callers, base64url-encoded JSON. Requires Admin access. Every rule that is
/// not a removal has its principal ID validated for its type.
pub async fn put_access(
	manager: &KeyManager,
	principal: &PrincipalSet,
	params: &Params,
) -> HandlerResult {
	let key_id = params.get("keyID").map(String::as_str).unwrap_or("");

	let rules: Vec<Access> = if let Some(raw) = params.get("access") {
		let rule = match serde_json::from_str::<Access>(raw) {
			Ok(rule) => rule,
			Err(_) => {
				let decoded = BASE64_URL
					.decode(raw)
					.map_err(|e| HttpError::bad_request(e.to_string()))?;
				serde_json::from_slice::<Access>(&decoded)
					.map_err(|e| HttpError::bad_request(e.to_string()))?
			}
		};
		vec![rule]
	} else if let Some(raw) = params.get("acl") {
		serde_json::from_str(raw).map_err(|e| HttpError::bad_request(e.to_string()))?
	} else {
		return Err(HttpError::bad_request("Missing acl and access parameters"));
	};

	let key = fetch_key(manager.get_key(key_id, VersionStatus::Primary).await, key_id)?;
	authorize(&key, principal, AccessType::Admin, "update access for")?;

	// Removals skip validation; everything else must carry a well-formed
	// identifier for its principal type.
	for rule in &rules {
		if rule.access_type != AccessType::None {
			rule.principal_type
				.is_valid_principal(&rule.id, extra_principal_validators())
				.map_err(|e| HttpError::new(ErrorCode::BadPrincipalIdentifier, e.to_string()))?;
		}
	}

	manager
		.update_access(key_id, &rules)
		.await
		.map_err(|e| HttpError::internal(e.to_string()))?;
	Ok(Value::Null)
}

/// Adds a new key version from base64 `data`; the version enters as Active.
/// Requires Write access. The key is fetched with an Inactive floor so that
/// writers can be authorized against keys with no Active versions.
pub async fn post_version(
	manager: &KeyManager,
	principal: &PrincipalSet,
	params: &Params,
) -> HandlerResult {
	let key_id = params.get("keyID").map(String::as_str).unwrap_or("");

	let data = params
		.get("data")
		.ok_or_else(|| HttpError::bad_request("Missing parameter 'data'"))?;
	if data.is_empty() {
		return Err(HttpError::bad_request("Parameter 'data' is empty"));
	}
	let decoded = BASE64
		.decode(data)
		.map_err(|e| HttpError::bad_request(e.to_string()))?;
	if decoded.is_empty() {
		return Err(HttpError::bad_request("Parameter 'data' decoded to zero bytes"));
	}

	let key = fetch_key(manager.get_key(key_id, VersionStatus::Inactive).await, key_id)?;
	authorize(&key, principal, AccessType::Write, "write")?;

	let version = KeyVersion::new(decoded, VersionStatus::Active);
	let version_id = manager
		.add_version(key_id, version)
		.await
		.map_err(|e| HttpError::internal(e.to_string()))?;
	Ok(serde_json::json!(version_id))
}

/// Rotates a key by changing one version's status.
///
/// An Inactive version can become Active; an Active version can become
/// Inactive or Primary (demoting the current Primary to Active); a Primary
/// version cannot change, promote another version instead. Requires Write
/// access.
pub async fn put_version(
	manager: &KeyManager,
	principal: &PrincipalSet,
	params: &Params,
) -> HandlerResult {
	let key_id = params.get("keyID").map(String::as_str).unwrap_or("");

	let status_raw = params
		.get("status")
		.ok_or_else(|| HttpError::bad_request("Missing parameter 'status'"))?;
	let status: VersionStatus =
		serde_json::from_str(status_raw).map_err(|e| HttpError::bad_request(e.to_string()))?;

	let version_id: u64 = params
		.get("versionID")
		.map(String::as_str)
		.unwrap_or("")
		.parse()
		.map_err(|e: std::num::ParseIntError| HttpError::bad_request(e.to_string()))?;

	let key = fetch_key(manager.get_key(key_id, VersionStatus::Inactive).await, key_id)?;
	authorize(&key, principal, AccessType::Write, "write")?;

	match manager.update_version(key_id, version_id, status).await {
		Ok(()) => Ok(Value::Null),
		Err(CoreError::VersionNotFound) => Err(HttpError::new(
			ErrorCode::KeyVersionDoesNotExist,
			CoreError::VersionNotFound.to_string(),
		)),
		Err(
			e @ (CoreError::PrimaryToActive | CoreError::PrimaryToInactive | CoreError::InactiveToPrimary),
		) => Err(HttpError::bad_request(e.to_string())),
		Err(e) => Err(HttpError::internal(e.to_string())),
	}
}
