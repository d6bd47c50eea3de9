// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end handler tests against the in-memory store.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64_URL};
use base64::Engine as _;

use warden_core::{ErrorCode, Principal, PrincipalSet, VersionStatus};
use warden_server::handlers::{self, Params};
use warden_server::{KeyManager, TempDb};

fn manager() -> KeyManager {
	KeyManager::new(Arc::new(TempDb::new()))
}

fn user(id: &str) -> PrincipalSet {
	PrincipalSet::single(Principal::user(id, Vec::new()))
}

fn machine(id: &str) -> PrincipalSet {
	PrincipalSet::single(Principal::machine(id))
}

fn params(pairs: &[(&str, &str)]) -> Params {
	pairs
		.iter()
		.map(|(k, v)| (k.to_string(), v.to_string()))
		.collect()
}

async fn create_key(m: &KeyManager, id: &str, data: &[u8], creator: &str) -> u64 {
	let encoded = BASE64.encode(data);
	let result = handlers::post_keys(
		m,
		&user(creator),
		&params(&[("id", id), ("data", &encoded)]),
	)
	.await
	.unwrap();
	result.as_u64().unwrap()
}

#[tokio::test]
async fn create_and_fetch_round_trip() {
	let m = manager();
	let v1 = create_key(&m, "svc.db.password", b"hunter2", "alice").await;

	let fetched = handlers::get_key(&m, &user("alice"), &params(&[("keyID", "svc.db.password")]))
		.await
		.unwrap();
	let versions = fetched["versions"].as_array().unwrap();
	assert_eq!(versions.len(), 1);
	assert_eq!(versions[0]["id"].as_u64().unwrap(), v1);
	assert_eq!(versions[0]["data"], serde_json::json!("aHVudGVyMg=="));
	assert_eq!(versions[0]["status"], serde_json::json!("Primary"));
	// ACL is blanked so shared caches do not vary on ACL changes.
	assert_eq!(fetched["acl"], serde_json::json!([]));
}

#[tokio::test]
async fn read_requires_a_grant() {
	let m = manager();
	create_key(&m, "svc.db.password", b"hunter2", "alice").await;

	let err = handlers::get_key(&m, &user("mallory"), &params(&[("keyID", "svc.db.password")]))
		.await
		.unwrap_err();
	assert_eq!(err.code, ErrorCode::Unauthorized);
	assert_eq!(err.http_status(), 401);
}

#[tokio::test]
async fn rotation_promotes_and_demotes_atomically() {
	let m = manager();
	let v1 = create_key(&m, "svc.db.password", b"hunter2", "alice").await;

	let encoded = BASE64.encode(b"hunter3");
	let v2 = handlers::post_version(
		&m,
		&user("alice"),
		&params(&[("keyID", "svc.db.password"), ("data", &encoded)]),
	)
	.await
	.unwrap()
	.as_u64()
	.unwrap();

	handlers::put_version(
		&m,
		&user("alice"),
		&params(&[
			("keyID", "svc.db.password"),
			("versionID", &v2.to_string()),
			("status", "\"Primary\""),
		]),
	)
	.await
	.unwrap();

	let fetched = handlers::get_key(&m, &user("alice"), &params(&[("keyID", "svc.db.password")]))
		.await
		.unwrap();
	let status_of = |id: u64| {
		fetched["versions"]
			.as_array()
			.unwrap()
			.iter()
			.find(|v| v["id"].as_u64() == Some(id))
			.map(|v| v["status"].clone())
	};
	assert_eq!(status_of(v2), Some(serde_json::json!("Primary")));
	assert_eq!(status_of(v1), Some(serde_json::json!("Active")));
}

#[tokio::test]
async fn primary_cannot_be_demoted() {
	let m = manager();
	let v1 = create_key(&m, "svc.db.password", b"hunter2", "alice").await;

	for target in ["\"Active\"", "\"Inactive\""] {
		let err = handlers::put_version(
			&m,
			&user("alice"),
			&params(&[
				("keyID", "svc.db.password"),
				("versionID", &v1.to_string()),
				("status", target),
			]),
		)
		.await
		.unwrap_err();
		assert_eq!(err.code, ErrorCode::BadRequestData);
	}
}

#[tokio::test]
async fn inactive_cannot_jump_to_primary() {
	let m = manager();
	create_key(&m, "k", b"x", "alice").await;
	let encoded = BASE64.encode(b"y");
	let v2 = handlers::post_version(&m, &user("alice"), &params(&[("keyID", "k"), ("data", &encoded)]))
		.await
		.unwrap()
		.as_u64()
		.unwrap();
	handlers::put_version(
		&m,
		&user("alice"),
		&params(&[("keyID", "k"), ("versionID", &v2.to_string()), ("status", "\"Inactive\"")]),
	)
	.await
	.unwrap();

	let err = handlers::put_version(
		&m,
		&user("alice"),
		&params(&[("keyID", "k"), ("versionID", &v2.to_string()), ("status", "\"Primary\"")]),
	)
	.await
	.unwrap_err();
	assert_eq!(err.code, ErrorCode::BadRequestData);
}

#[tokio::test]
async fn new_version_enters_as_active_and_needs_inactive_floor_to_hide() {
	let m = manager();
	create_key(&m, "k", b"x", "alice").await;
	let encoded = BASE64.encode(b"y");
	let v2 = handlers::post_version(&m, &user("alice"), &params(&[("keyID", "k"), ("data", &encoded)]))
		.await
		.unwrap()
		.as_u64()
		.unwrap();

	let fetched = handlers::get_key(
		&m,
		&user("alice"),
		&params(&[("keyID", "k"), ("status", "\"Inactive\"")]),
	)
	.await
	.unwrap();
	let version = fetched["versions"]
		.as_array()
		.unwrap()
		.iter()
		.find(|v| v["id"].as_u64() == Some(v2))
		.unwrap();
	assert_eq!(version["status"], serde_json::json!("Active"));
}

#[tokio::test]
async fn acl_rule_removal_via_none() {
	let m = manager();
	create_key(&m, "k", b"x", "alice").await;

	handlers::put_access(
		&m,
		&user("alice"),
		&params(&[("keyID", "k"), ("access", r#"{"type":"User","id":"bob","access":"Read"}"#)]),
	)
	.await
	.unwrap();

	let acl = handlers::get_access(&m, &user("nobody"), &params(&[("keyID", "k")]))
		.await
		.unwrap();
	assert!(acl.as_array().unwrap().iter().any(|r| r["id"] == "bob"));

	handlers::put_access(
		&m,
		&user("alice"),
		&params(&[("keyID", "k"), ("access", r#"{"type":"User","id":"bob","access":"None"}"#)]),
	)
	.await
	.unwrap();

	let acl = handlers::get_access(&m, &user("nobody"), &params(&[("keyID", "k")]))
		.await
		.unwrap();
	assert!(!acl.as_array().unwrap().iter().any(|r| r["id"] == "bob"));
}

#[tokio::test]
async fn access_param_accepts_base64url_json() {
	let m = manager();
	create_key(&m, "k", b"x", "alice").await;

	let encoded = BASE64_URL.encode(r#"{"type":"User","id":"bob","access":"Write"}"#);
	handlers::put_access(&m, &user("alice"), &params(&[("keyID", "k"), ("access", &encoded)]))
		.await
		.unwrap();

	let acl = handlers::get_access(&m, &user("nobody"), &params(&[("keyID", "k")]))
		.await
		.unwrap();
	assert!(acl
		.as_array()
		.unwrap()
		.iter()
		.any(|r| r["id"] == "bob" && r["access"] == "Write"));
}

#[tokio::test]
async fn acl_param_applies_a_rule_list() {
	let m = manager();
	create_key(&m, "k", b"x", "alice").await;

	handlers::put_access(
		&m,
		&user("alice"),
		&params(&[(
			"keyID",
			"k",
		), (
			"acl",
			r#"[{"type":"User","id":"bob","access":"Read"},{"type":"MachinePrefix","id":"cache","access":"Read"}]"#,
		)]),
	)
	.await
	.unwrap();

	let fetched = handlers::get_key(&m, &machine("cache001"), &params(&[("keyID", "k")]))
		.await
		.unwrap();
	assert_eq!(fetched["id"], serde_json::json!("k"));
}

#[tokio::test]
async fn create_with_initial_acl_grants_immediately() {
	let m = manager();
	let encoded = BASE64.encode(b"x");
	handlers::post_keys(
		&m,
		&user("alice"),
		&params(&[
			("id", "k"),
			("data", &encoded),
			("acl", r#"[{"type":"User","id":"bob","access":"Read"}]"#),
		]),
	)
	.await
	.unwrap();

	handlers::get_key(&m, &user("bob"), &params(&[("keyID", "k")]))
		.await
		.unwrap();
	// The creator still lands in the ACL with Admin.
	handlers::delete_key(&m, &user("alice"), &params(&[("keyID", "k")]))
		.await
		.unwrap();
}

#[tokio::test]
async fn access_param_that_is_neither_json_nor_base64url_is_rejected() {
	let m = manager();
	create_key(&m, "k", b"x", "alice").await;

	let err = handlers::put_access(
		&m,
		&user("alice"),
		&params(&[("keyID", "k"), ("access", "!!! not json !!!")]),
	)
	.await
	.unwrap_err();
	assert_eq!(err.code, ErrorCode::BadRequestData);
}

#[tokio::test]
async fn put_access_requires_exactly_one_of_access_and_acl() {
	let m = manager();
	create_key(&m, "k", b"x", "alice").await;

	let err = handlers::put_access(&m, &user("alice"), &params(&[("keyID", "k")]))
		.await
		.unwrap_err();
	assert_eq!(err.code, ErrorCode::BadRequestData);
}

#[tokio::test]
async fn put_access_validates_principal_identifiers() {
	let m = manager();
	create_key(&m, "k", b"x", "alice").await;

	let err = handlers::put_access(
		&m,
		&user("alice"),
		&params(&[("keyID", "k"), ("access", r#"{"type":"User","id":"Bad!!","access":"Read"}"#)]),
	)
	.await
	.unwrap_err();
	assert_eq!(err.code, ErrorCode::BadPrincipalIdentifier);

	// Removals skip identifier validation.
	handlers::put_access(
		&m,
		&user("alice"),
		&params(&[("keyID", "k"), ("access", r#"{"type":"User","id":"Bad!!","access":"None"}"#)]),
	)
	.await
	.unwrap();
}

#[tokio::test]
async fn get_access_needs_no_grant() {
	let m = manager();
	create_key(&m, "k", b"x", "alice").await;

	let acl = handlers::get_access(&m, &machine("stranger"), &params(&[("keyID", "k")]))
		.await
		.unwrap();
	assert!(acl.as_array().unwrap().iter().any(|r| r["id"] == "alice"));
}

#[tokio::test]
async fn delete_requires_admin() {
	let m = manager();
	create_key(&m, "k", b"x", "alice").await;
	handlers::put_access(
		&m,
		&user("alice"),
		&params(&[("keyID", "k"), ("access", r#"{"type":"User","id":"bob","access":"Write"}"#)]),
	)
	.await
	.unwrap();

	let err = handlers::delete_key(&m, &user("bob"), &params(&[("keyID", "k")]))
		.await
		.unwrap_err();
	assert_eq!(err.code, ErrorCode::Unauthorized);

	handlers::delete_key(&m, &user("alice"), &params(&[("keyID", "k")]))
		.await
		.unwrap();
	let err = handlers::get_key(&m, &user("alice"), &params(&[("keyID", "k")]))
		.await
		.unwrap_err();
	assert_eq!(err.code, ErrorCode::KeyIdentifierDoesNotExist);
	assert_eq!(err.http_status(), 404);
}

#[tokio::test]
async fn only_users_may_create_keys() {
	let m = manager();
	let encoded = BASE64.encode(b"x");
	let err = handlers::post_keys(&m, &machine("cache001"), &params(&[("id", "k"), ("data", &encoded)]))
		.await
		.unwrap_err();
	assert_eq!(err.code, ErrorCode::Unauthorized);
}

#[tokio::test]
async fn create_rejects_bad_key_identifiers() {
	let m = manager();
	let encoded = BASE64.encode(b"x");
	let err = handlers::post_keys(
		&m,
		&user("alice"),
		&params(&[("id", "bad key/id"), ("data", &encoded)]),
	)
	.await
	.unwrap_err();
	assert_eq!(err.code, ErrorCode::BadKeyFormat);
}

#[tokio::test]
async fn create_rejects_duplicate_identifiers() {
	let m = manager();
	create_key(&m, "k", b"x", "alice").await;
	let encoded = BASE64.encode(b"x");
	let err = handlers::post_keys(&m, &user("alice"), &params(&[("id", "k"), ("data", &encoded)]))
		.await
		.unwrap_err();
	assert_eq!(err.code, ErrorCode::KeyIdentifierExists);
}

#[tokio::test]
async fn create_validates_inputs() {
	let m = manager();
	let encoded = BASE64.encode(b"x");

	let err = handlers::post_keys(&m, &user("alice"), &params(&[("data", &encoded)]))
		.await
		.unwrap_err();
	assert_eq!(err.code, ErrorCode::NoKeyId);

	let err = handlers::post_keys(&m, &user("alice"), &params(&[("id", "k")]))
		.await
		.unwrap_err();
	assert_eq!(err.code, ErrorCode::NoKeyData);

	let err = handlers::post_keys(&m, &user("alice"), &params(&[("id", "k"), ("data", "")]))
		.await
		.unwrap_err();
	assert_eq!(err.code, ErrorCode::NoKeyData);

	let err = handlers::post_keys(
		&m,
		&user("alice"),
		&params(&[("id", "k"), ("data", "not-base64!!")]),
	)
	.await
	.unwrap_err();
	assert_eq!(err.code, ErrorCode::BadRequestData);

	let err = handlers::post_keys(
		&m,
		&user("alice"),
		&params(&[("id", "k"), ("data", &encoded), ("acl", "{broken")]),
	)
	.await
	.unwrap_err();
	assert_eq!(err.code, ErrorCode::BadRequestData);

	let err = handlers::post_keys(
		&m,
		&user("alice"),
		&params(&[
			("id", "k"),
			("data", &encoded),
			("acl", r#"[{"type":"User","id":"Bad!!","access":"Read"}]"#),
		]),
	)
	.await
	.unwrap_err();
	assert_eq!(err.code, ErrorCode::BadPrincipalIdentifier);
}

#[tokio::test]
async fn put_version_validates_inputs() {
	let m = manager();
	create_key(&m, "k", b"x", "alice").await;

	let err = handlers::put_version(
		&m,
		&user("alice"),
		&params(&[("keyID", "k"), ("versionID", "1")]),
	)
	.await
	.unwrap_err();
	assert_eq!(err.code, ErrorCode::BadRequestData);

	let err = handlers::put_version(
		&m,
		&user("alice"),
		&params(&[("keyID", "k"), ("versionID", "1"), ("status", "\"Retired\"")]),
	)
	.await
	.unwrap_err();
	assert_eq!(err.code, ErrorCode::BadRequestData);

	let err = handlers::put_version(
		&m,
		&user("alice"),
		&params(&[("keyID", "k"), ("versionID", "not-a-number"), ("status", "\"Active\"")]),
	)
	.await
	.unwrap_err();
	assert_eq!(err.code, ErrorCode::BadRequestData);

	let err = handlers::put_version(
		&m,
		&user("alice"),
		&params(&[("keyID", "k"), ("versionID", "42"), ("status", "\"Active\"")]),
	)
	.await
	.unwrap_err();
	assert_eq!(err.code, ErrorCode::KeyVersionDoesNotExist);
}

#[tokio::test]
async fn get_keys_lists_and_diffs() {
	let m = manager();
	create_key(&m, "a", b"x", "alice").await;
	create_key(&m, "b", b"y", "alice").await;

	let all = handlers::get_keys(&m, &machine("anyone"), &params(&[("queryString", "")]))
		.await
		.unwrap();
	let mut ids: Vec<String> = all
		.as_array()
		.unwrap()
		.iter()
		.map(|v| v.as_str().unwrap().to_string())
		.collect();
	ids.sort();
	assert_eq!(ids, vec!["a", "b"]);

	let stored = m.get_key("a", VersionStatus::Primary).await.unwrap();
	let current = url::form_urlencoded::Serializer::new(String::new())
		.append_pair("a", &stored.version_hash)
		.finish();
	let updated = handlers::get_keys(&m, &machine("anyone"), &params(&[("queryString", &current)]))
		.await
		.unwrap();
	assert!(updated.as_array().unwrap().is_empty());

	let stale = url::form_urlencoded::Serializer::new(String::new())
		.append_pair("a", "stale")
		.append_pair("missing", "")
		.finish();
	let updated = handlers::get_keys(&m, &machine("anyone"), &params(&[("queryString", &stale)]))
		.await
		.unwrap();
	assert_eq!(updated, serde_json::json!(["a"]));
}

#[tokio::test]
async fn get_keys_collapses_repeated_params_to_the_last_value() {
	let m = manager();
	create_key(&m, "a", b"x", "alice").await;
	let stored = m.get_key("a", VersionStatus::Primary).await.unwrap();

	let query = format!(
		"a=stale&{}",
		url::form_urlencoded::Serializer::new(String::new())
			.append_pair("a", &stored.version_hash)
			.finish()
	);
	let updated = handlers::get_keys(&m, &machine("anyone"), &params(&[("queryString", &query)]))
		.await
		.unwrap();
	assert!(updated.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn get_key_status_floor_controls_visibility() {
	let m = manager();
	create_key(&m, "k", b"x", "alice").await;
	let encoded = BASE64.encode(b"y");
	let v2 = handlers::post_version(&m, &user("alice"), &params(&[("keyID", "k"), ("data", &encoded)]))
		.await
		.unwrap()
		.as_u64()
		.unwrap();
	handlers::put_version(
		&m,
		&user("alice"),
		&params(&[("keyID", "k"), ("versionID", &v2.to_string()), ("status", "\"Inactive\"")]),
	)
	.await
	.unwrap();

	let default_view = handlers::get_key(&m, &user("alice"), &params(&[("keyID", "k")]))
		.await
		.unwrap();
	assert_eq!(default_view["versions"].as_array().unwrap().len(), 1);

	let full_view = handlers::get_key(
		&m,
		&user("alice"),
		&params(&[("keyID", "k"), ("status", "\"Inactive\"")]),
	)
	.await
	.unwrap();
	assert_eq!(full_view["versions"].as_array().unwrap().len(), 2);

	let err = handlers::get_key(
		&m,
		&user("alice"),
		&params(&[("keyID", "k"), ("status", "\"Broken\"")]),
	)
	.await
	.unwrap_err();
	assert_eq!(err.code, ErrorCode::BadRequestData);
}
