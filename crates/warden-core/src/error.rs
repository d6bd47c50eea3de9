// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Result type alias for core model operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by the key model and by key stores.
///
/// Handlers translate each of these into exactly one wire [`ErrorCode`]
/// (`crate::wire::ErrorCode`); anything they do not recognize becomes an
/// internal server error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
	#[error("key identifier already exists")]
	KeyExists,

	#[error("key identifier does not exist")]
	KeyNotFound,

	#[error("key identifier includes unsupported characters")]
	InvalidKeyId,

	#[error("key version does not exist")]
	VersionNotFound,

	#[error("a primary version cannot be demoted to active; promote another version instead")]
	PrimaryToActive,

	#[error("a primary version cannot be deactivated; promote another version first")]
	PrimaryToInactive,

	#[error("an inactive version cannot be promoted to primary; activate it first")]
	InactiveToPrimary,

	#[error("invalid acl: {0}")]
	InvalidAcl(String),

	#[error("invalid principal identifier: {0}")]
	InvalidPrincipal(String),

	#[error("invalid key: {0}")]
	InvalidKey(String),

	#[error("storage error: {0}")]
	Storage(String),
}
