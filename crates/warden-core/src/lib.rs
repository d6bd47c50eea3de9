// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core data model for the warden key management service.
//!
//! This crate defines the types shared between the server, the API client and
//! the host sync daemon:
//!
//! - [`Principal`] / [`PrincipalSet`]: authenticated identities
//! - [`Access`] / [`Acl`] / [`AccessType`]: the grant model and its evaluator
//! - [`Key`] / [`KeyVersion`] / [`VersionStatus`]: versioned secrets and the
//!   version lifecycle state machine
//! - [`ErrorCode`] / [`WireResponse`]: the HTTP wire envelope
//!
//! All policy decisions here are pure functions over fully loaded values; no
//! storage or network access happens in this crate.

pub mod access;
pub mod error;
pub mod key;
pub mod wire;

pub use access::{
	Access, AccessType, Acl, Principal, PrincipalSet, PrincipalType, PrincipalValidator,
};
pub use error::{CoreError, Result};
pub use key::{Key, KeyVersion, KeyVersionList, VersionStatus};
pub use wire::{ErrorCode, WireResponse};
