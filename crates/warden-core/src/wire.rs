// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The HTTP wire envelope shared by the server and the API client.
//!
//! Every response carries `{status, code, message, data}`. Numeric codes are
//! stable across releases; clients match on them instead of message text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable numeric error codes carried in wire responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
	Ok = 0,
	InternalServerError = 1,
	KeyIdentifierExists = 2,
	KeyVersionDoesNotExist = 3,
	BadRequestData = 4,
	BadKeyFormat = 5,
	Unauthorized = 6,
	KeyIdentifierDoesNotExist = 7,
	BadPrincipalIdentifier = 8,
	NoKeyId = 9,
	NoKeyData = 10,
}

impl ErrorCode {
	/// The HTTP status each code maps to.
	pub fn http_status(&self) -> u16 {
		match self {
			ErrorCode::Ok => 200,
			ErrorCode::InternalServerError => 500,
			ErrorCode::Unauthorized => 401,
			ErrorCode::KeyIdentifierDoesNotExist | ErrorCode::KeyVersionDoesNotExist => 404,
			ErrorCode::KeyIdentifierExists
			| ErrorCode::BadRequestData
			| ErrorCode::BadKeyFormat
			| ErrorCode::BadPrincipalIdentifier
			| ErrorCode::NoKeyId
			| ErrorCode::NoKeyData => 400,
		}
	}
}

impl TryFrom<u32> for ErrorCode {
	type Error = u32;

	fn try_from(code: u32) -> std::result::Result<Self, u32> {
		Ok(match code {
			0 => ErrorCode::Ok,
			1 => ErrorCode::InternalServerError,
			2 => ErrorCode::KeyIdentifierExists,
			3 => ErrorCode::KeyVersionDoesNotExist,
			4 => ErrorCode::BadRequestData,
			5 => ErrorCode::BadKeyFormat,
			6 => ErrorCode::Unauthorized,
			7 => ErrorCode::KeyIdentifierDoesNotExist,
			8 => ErrorCode::BadPrincipalIdentifier,
			9 => ErrorCode::NoKeyId,
			10 => ErrorCode::NoKeyData,
			other => return Err(other),
		})
	}
}

/// Response envelope for every `/v0/` route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
	pub status: String,
	pub code: u32,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

impl WireResponse {
	pub fn ok(data: Value) -> Self {
		Self {
			status: "ok".to_string(),
			code: ErrorCode::Ok as u32,
			message: String::new(),
			data: Some(data),
		}
	}

	pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			status: "error".to_string(),
			code: code as u32,
			message: message.into(),
			data: None,
		}
	}

	pub fn is_ok(&self) -> bool {
		self.code == ErrorCode::Ok as u32
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ok_envelope_shape() {
		let resp = WireResponse::ok(serde_json::json!(["a", "b"]));
		let json = serde_json::to_value(&resp).unwrap();
		assert_eq!(
			json,
			serde_json::json!({"status": "ok", "code": 0, "data": ["a", "b"]})
		);
	}

	#[test]
	fn error_envelope_shape() {
		let resp = WireResponse::error(ErrorCode::Unauthorized, "denied");
		let json = serde_json::to_value(&resp).unwrap();
		assert_eq!(
			json,
			serde_json::json!({"status": "error", "code": 6, "message": "denied"})
		);
	}

	#[test]
	fn codes_round_trip_through_u32() {
		for code in [
			ErrorCode::Ok,
			ErrorCode::InternalServerError,
			ErrorCode::KeyIdentifierExists,
			ErrorCode::KeyVersionDoesNotExist,
			ErrorCode::BadRequestData,
			ErrorCode::BadKeyFormat,
			ErrorCode::Unauthorized,
			ErrorCode::KeyIdentifierDoesNotExist,
			ErrorCode::BadPrincipalIdentifier,
			ErrorCode::NoKeyId,
			ErrorCode::NoKeyData,
		] {
			assert_eq!(ErrorCode::try_from(code as u32), Ok(code));
		}
		assert!(ErrorCode::try_from(99).is_err());
	}

	#[test]
	fn status_mapping_matches_error_classes() {
		assert_eq!(ErrorCode::Unauthorized.http_status(), 401);
		assert_eq!(ErrorCode::KeyIdentifierDoesNotExist.http_status(), 404);
		assert_eq!(ErrorCode::BadRequestData.http_status(), 400);
		assert_eq!(ErrorCode::InternalServerError.http_status(), 500);
	}
}
