// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! API client for the warden key service.
//!
//! The sync daemon and tooling talk to the server through the [`ApiClient`]
//! trait; [`HttpApiClient`] is the HTTP implementation. API failures carry
//! the server's stable numeric code so callers can react to specific
//! conditions without matching message text.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use thiserror::Error;
use tracing::instrument;

use warden_core::{ErrorCode, Key, WireResponse};

/// Default per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors raised by the API client.
#[derive(Error, Debug)]
pub enum ClientError {
	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("API error {code:?}: {message}")]
	Api { code: ErrorCode, message: String },

	#[error("invalid response: {0}")]
	InvalidResponse(String),
}

impl ClientError {
	/// Whether this is an API failure with the given code.
	pub fn is_api_code(&self, wanted: ErrorCode) -> bool {
		matches!(self, ClientError::Api { code, .. } if *code == wanted)
	}
}

/// Server access as the sync daemon needs it.
#[async_trait]
pub trait ApiClient: Send + Sync {
	/// All key IDs known to the server.
	async fn get_key_ids(&self) -> Result<Vec<String>>;

	/// The subset of `hashes` whose server-side version hash differs from
	/// the supplied value. An empty supplied hash matches nothing, so it
	/// selects every ID that exists.
	async fn get_updated_key_ids(&self, hashes: &HashMap<String, String>) -> Result<Vec<String>>;

	/// Fetches the full key from the server.
	async fn network_get_key(&self, key_id: &str) -> Result<Key>;
}

/// HTTP implementation of [`ApiClient`] authenticating as a machine.
pub struct HttpApiClient {
	base_url: String,
	auth_header: String,
	http: Client,
}

impl HttpApiClient {
	/// Builds a client for `base_url` presenting `machine_identity` through
	/// the machine authentication scheme.
	pub fn new(base_url: impl Into<String>, machine_identity: &str) -> Result<Self> {
		let http = Client::builder()
			.timeout(REQUEST_TIMEOUT)
			.build()
			.map_err(ClientError::Http)?;
		Ok(Self {
			base_url: base_url.into().trim_end_matches('/').to_string(),
			auth_header: format!("0m{machine_identity}"),
			http,
		})
	}

	async fn call(&self, url: String) -> Result<serde_json::Value> {
		let response = self
			.http
			.get(&url)
			.header(AUTHORIZATION, &self.auth_header)
			.send()
			.await?;
		let status = response.status();
		let body: WireResponse = response
			.json()
			.await
			.map_err(|e| ClientError::InvalidResponse(format!("HTTP {status}: {e}")))?;
		if body.is_ok() {
			Ok(body.data.unwrap_or(serde_json::Value::Null))
		} else {
			let code = ErrorCode::try_from(body.code).map_err(|c| {
				ClientError::InvalidResponse(format!("unknown error code {c} in response"))
			})?;
			Err(ClientError::Api {
				code,
				message: body.message,
			})
		}
	}

	fn keys_url(&self, query: &str) -> String {
		if query.is_empty() {
			format!("{}/v0/keys/", self.base_url)
		} else {
			format!("{}/v0/keys/?{}", self.base_url, query)
		}
	}
}

#[async_trait]
impl ApiClient for HttpApiClient {
	#[instrument(skip(self))]
	async fn get_key_ids(&self) -> Result<Vec<String>> {
		let data = self.call(self.keys_url("")).await?;
		serde_json::from_value(data).map_err(|e| ClientError::InvalidResponse(e.to_string()))
	}

	#[instrument(skip(self, hashes), fields(keys = hashes.len()))]
	async fn get_updated_key_ids(&self, hashes: &HashMap<String, String>) -> Result<Vec<String>> {
		let query = {
			let mut serializer = url::form_urlencoded::Serializer::new(String::new());
			for (id, hash) in hashes {
				serializer.append_pair(id, hash);
			}
			serializer.finish()
		};
		let data = self.call(self.keys_url(&query)).await?;
		serde_json::from_value(data).map_err(|e| ClientError::InvalidResponse(e.to_string()))
	}

	#[instrument(skip(self))]
	async fn network_get_key(&self, key_id: &str) -> Result<Key> {
		let data = self
			.call(format!("{}/v0/keys/{}/", self.base_url, key_id))
			.await?;
		serde_json::from_value(data).map_err(|e| ClientError::InvalidResponse(e.to_string()))
	}
}
