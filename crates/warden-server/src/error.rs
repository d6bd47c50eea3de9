// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

use warden_core::ErrorCode;

/// A typed handler failure: one stable wire code plus a human message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code:?}: {message}")]
pub struct HttpError {
	pub code: ErrorCode,
	pub message: String,
}

impl HttpError {
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
		}
	}

	pub fn internal(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::InternalServerError, message)
	}

	pub fn unauthorized(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::Unauthorized, message)
	}

	pub fn bad_request(message: impl Into<String>) -> Self {
		Self::new(ErrorCode::BadRequestData, message)
	}

	pub fn http_status(&self) -> u16 {
		self.code.http_status()
	}
}
