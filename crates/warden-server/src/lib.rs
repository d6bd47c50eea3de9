// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The warden key management server.
//!
//! Request flow: the transport decodes a request into a flat parameter map
//! and an authenticated [`warden_core::PrincipalSet`]; a handler fetches any
//! referenced key through the [`manager::KeyManager`], asks the
//! [`authz`] mediator for a decision, performs the mutation and returns
//! either a JSON value or a typed [`error::HttpError`].
//!
//! Persistence is pluggable behind [`db::KeyDb`]; the in-memory
//! [`db::TempDb`] backs tests and single-node development servers.

pub mod authz;
pub mod db;
pub mod error;
pub mod handlers;
pub mod manager;
pub mod routes;

pub use authz::{authorize_request, set_access_callback, AccessCallback, AccessCallbackInput};
pub use db::{KeyDb, TempDb};
pub use error::HttpError;
pub use manager::KeyManager;
pub use routes::{router, AppState, Authenticator, SchemeAuthenticator};
