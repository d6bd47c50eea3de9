// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Axum bindings for the `/v0/` key API.
//!
//! This layer only moves bytes: it flattens path, query and form fields into
//! the handler parameter map, resolves the caller through the pluggable
//! [`Authenticator`], and wraps results in the wire envelope. All semantics
//! live in [`crate::handlers`].

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Form, Json, Router};
use tower_http::trace::TraceLayer;

use warden_core::{ErrorCode, Principal, PrincipalSet, WireResponse};

use crate::handlers::{self, HandlerResult, Params};
use crate::manager::KeyManager;

/// Resolves request credentials into an authenticated principal set.
///
/// The production authentication layer (mTLS, SSO, …) lives outside this
/// crate; anything that can turn headers into principals plugs in here.
pub trait Authenticator: Send + Sync {
	fn authenticate(&self, headers: &HeaderMap) -> std::result::Result<PrincipalSet, String>;
}

/// Development authenticator using the `Authorization` header schemes
/// `0u<user>`, `0m<machine>` and `0s<service>`.
#[derive(Default)]
pub struct SchemeAuthenticator;

impl Authenticator for SchemeAuthenticator {
	fn authenticate(&self, headers: &HeaderMap) -> std::result::Result<PrincipalSet, String> {
		let raw = headers
			.get(axum::http::header::AUTHORIZATION)
			.and_then(|v| v.to_str().ok())
			.ok_or_else(|| "missing Authorization header".to_string())?;
		let (scheme, id) = raw.split_at(raw.len().min(2));
		if id.is_empty() {
			return Err("empty principal identifier".to_string());
		}
		let principal = match scheme {
			"0u" => Principal::user(id, Vec::new()),
			"0m" => Principal::machine(id),
			"0s" => Principal::service(id),
			other => return Err(format!("unknown authentication scheme {other}")),
		};
		Ok(PrincipalSet::single(principal))
	}
}

/// Application state shared across route handlers.
#[derive(Clone)]
pub struct AppState {
	pub manager: Arc<KeyManager>,
	pub authenticator: Arc<dyn Authenticator>,
}

/// Builds the `/v0/` router.
pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/v0/keys/", get(route_get_keys).post(route_post_keys))
		.route("/v0/keys/{key_id}/", get(route_get_key).delete(route_delete_key))
		.route(
			"/v0/keys/{key_id}/access/",
			get(route_get_access).put(route_put_access),
		)
		.route("/v0/keys/{key_id}/versions/", post(route_post_version))
		.route(
			"/v0/keys/{key_id}/versions/{version_id}/",
			put(route_put_version),
		)
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

fn respond(result: HandlerResult) -> Response {
	match result {
		Ok(data) => (StatusCode::OK, Json(WireResponse::ok(data))).into_response(),
		Err(e) => {
			let status =
				StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
			(status, Json(WireResponse::error(e.code, e.message))).into_response()
		}
	}
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> std::result::Result<PrincipalSet, Response> {
	state.authenticator.authenticate(headers).map_err(|e| {
		(
			StatusCode::UNAUTHORIZED,
			Json(WireResponse::error(ErrorCode::Unauthorized, e)),
		)
			.into_response()
	})
}

async fn route_get_keys(
	State(state): State<AppState>,
	headers: HeaderMap,
	RawQuery(query): RawQuery,
) -> Response {
	let principal = match authenticate(&state, &headers) {
		Ok(p) => p,
		Err(resp) => return resp,
	};
	let mut params = Params::new();
	params.insert("queryString".to_string(), query.unwrap_or_default());
	respond(handlers::get_keys(&state.manager, &principal, &params).await)
}

async fn route_post_keys(
	State(state): State<AppState>,
	headers: HeaderMap,
	Form(body): Form<HashMap<String, String>>,
) -> Response {
	let principal = match authenticate(&state, &headers) {
		Ok(p) => p,
		Err(resp) => return resp,
	};
	respond(handlers::post_keys(&state.manager, &principal, &body).await)
}

async fn route_get_key(
	State(state): State<AppState>,
	Path(key_id): Path<String>,
	headers: HeaderMap,
	axum::extract::Query(query): axum::extract::Query<HashMap<String, String>>,
) -> Response {
	let principal = match authenticate(&state, &headers) {
		Ok(p) => p,
		Err(resp) => return resp,
	};
	let mut params = query;
	params.insert("keyID".to_string(), key_id);
	respond(handlers::get_key(&state.manager, &principal, &params).await)
}

async fn route_delete_key(
	State(state): State<AppState>,
	Path(key_id): Path<String>,
	headers: HeaderMap,
) -> Response {
	let principal = match authenticate(&state, &headers) {
		Ok(p) => p,
		Err(resp) => return resp,
	};
	let mut params = Params::new();
	params.insert("keyID".to_string(), key_id);
	respond(handlers::delete_key(&state.manager, &principal, &params).await)
}

async fn route_get_access(
	State(state): State<AppState>,
	Path(key_id): Path<String>,
	headers: HeaderMap,
) -> Response {
	let principal = match authenticate(&state, &headers) {
		Ok(p) => p,
		Err(resp) => return resp,
	};
	let mut params = Params::new();
	params.insert("keyID".to_string(), key_id);
	respond(handlers::get_access(&state.manager, &principal, &params).await)
}

async fn route_put_access(
	State(state): State<AppState>,
	Path(key_id): Path<String>,
	headers: HeaderMap,
	Form(body): Form<HashMap<String, String>>,
) -> Response {
	let principal = match authenticate(&state, &headers) {
		Ok(p) => p,
		Err(resp) => return resp,
	};
	let mut params = body;
	params.insert("keyID".to_string(), key_id);
	respond(handlers::put_access(&state.manager, &principal, &params).await)
}

async fn route_post_version(
	State(state): State<AppState>,
	Path(key_id): Path<String>,
	headers: HeaderMap,
	Form(body): Form<HashMap<String, String>>,
) -> Response {
	let principal = match authenticate(&state, &headers) {
		Ok(p) => p,
		Err(resp) => return resp,
	};
	let mut params = body;
	params.insert("keyID".to_string(), key_id);
	respond(handlers::post_version(&state.manager, &principal, &params).await)
}

async fn route_put_version(
	State(state): State<AppState>,
	Path((key_id, version_id)): Path<(String, String)>,
	headers: HeaderMap,
	Form(body): Form<HashMap<String, String>>,
) -> Response {
	let principal = match authenticate(&state, &headers) {
		Ok(p) => p,
		Err(resp) => return resp,
	};
	let mut params = body;
	params.insert("keyID".to_string(), key_id);
	params.insert("versionID".to_string(), version_id);
	respond(handlers::put_version(&state.manager, &principal, &params).await)
}
