// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Principals, access rules and the ACL evaluator.
//!
//! Access decisions are pure functions over pre-loaded values: a caller's
//! [`PrincipalSet`] is matched against a key's [`Acl`], and a rule grants the
//! request when its predicate matches one of the caller's raw principals with
//! an [`AccessType`] at or above the requested level.
//!
//! Each [`PrincipalType`] carries both its match predicate and its identifier
//! validation rule, so the evaluator stays decoupled from identity schemes.
//! Embedders can extend validation through [`PrincipalValidator`] callbacks.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Permission level attached to an access rule, ordered so that a higher
/// level implies every lower one: `None < Read < Write < Admin`.
///
/// `None` only exists in transit: updating an ACL with `None` removes the
/// rule, and a persisted ACL never contains it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccessType {
	None,
	Read,
	Write,
	Admin,
}

impl fmt::Display for AccessType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			AccessType::None => "None",
			AccessType::Read => "Read",
			AccessType::Write => "Write",
			AccessType::Admin => "Admin",
		};
		f.write_str(s)
	}
}

/// Extra identifier validation supplied by the embedder at startup.
///
/// Built-in per-type rules always run first; extra validators can only
/// tighten them further.
pub type PrincipalValidator = fn(PrincipalType, &str) -> std::result::Result<(), String>;

/// The kind of identity an access rule applies to.
///
/// Prefix variants match any principal of the base kind whose identifier
/// starts with the rule's identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrincipalType {
	User,
	UserGroup,
	Machine,
	MachinePrefix,
	Service,
	ServicePrefix,
}

fn user_regex() -> &'static Regex {
	static RE: OnceLock<Regex> = OnceLock::new();
	RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9._-]*$").unwrap())
}

fn machine_regex() -> &'static Regex {
	static RE: OnceLock<Regex> = OnceLock::new();
	RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9.-]*$").unwrap())
}

fn service_regex() -> &'static Regex {
	static RE: OnceLock<Regex> = OnceLock::new();
	RE.get_or_init(|| Regex::new(r"^spiffe://[a-z0-9._-]+/[a-zA-Z0-9._/-]+$").unwrap())
}

fn service_prefix_regex() -> &'static Regex {
	static RE: OnceLock<Regex> = OnceLock::new();
	RE.get_or_init(|| Regex::new(r"^spiffe://[a-z0-9._-]+/[a-zA-Z0-9._/-]*$").unwrap())
}

impl PrincipalType {
	/// Validates a rule identifier against this type's built-in rule and any
	/// embedder-supplied extra validators.
	pub fn is_valid_principal(
		&self,
		id: &str,
		extra_validators: &[PrincipalValidator],
	) -> Result<()> {
		if id.is_empty() {
			return Err(CoreError::InvalidPrincipal(format!(
				"{self:?} identifier must not be empty"
			)));
		}
		let ok = match self {
			PrincipalType::User | PrincipalType::UserGroup => user_regex().is_match(id),
			PrincipalType::Machine | PrincipalType::MachinePrefix => machine_regex().is_match(id),
			PrincipalType::Service => service_regex().is_match(id),
			PrincipalType::ServicePrefix => service_prefix_regex().is_match(id),
		};
		if !ok {
			return Err(CoreError::InvalidPrincipal(format!(
				"{id} is not a valid {self:?} identifier"
			)));
		}
		for validator in extra_validators {
			validator(*self, id).map_err(CoreError::InvalidPrincipal)?;
		}
		Ok(())
	}
}

/// A single grant: principals matched by `(principal_type, id)` hold
/// `access_type` on the key the rule is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
	#[serde(rename = "type")]
	pub principal_type: PrincipalType,
	pub id: String,
	#[serde(rename = "access")]
	pub access_type: AccessType,
}

impl Access {
	pub fn new(principal_type: PrincipalType, id: impl Into<String>, access_type: AccessType) -> Self {
		Self {
			principal_type,
			id: id.into(),
			access_type,
		}
	}

	/// Whether this rule's predicate matches the given principal.
	fn matches(&self, principal: &Principal) -> bool {
		match (self.principal_type, principal) {
			(PrincipalType::User, Principal::User { id, .. }) => id == &self.id,
			(PrincipalType::UserGroup, Principal::User { groups, .. }) => {
				groups.iter().any(|g| g == &self.id)
			}
			(PrincipalType::Machine, Principal::Machine { id }) => id == &self.id,
			(PrincipalType::MachinePrefix, Principal::Machine { id }) => id.starts_with(&self.id),
			(PrincipalType::Service, Principal::Service { id }) => id == &self.id,
			(PrincipalType::ServicePrefix, Principal::Service { id }) => id.starts_with(&self.id),
			_ => false,
		}
	}
}

/// Ordered list of access rules attached to a key.
///
/// Rule identity is `(principal_type, id)`; the access type of an existing
/// rule is mutable through [`Acl::set`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl(pub Vec<Access>);

impl Acl {
	pub fn new(rules: Vec<Access>) -> Self {
		Self(rules)
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> std::slice::Iter<'_, Access> {
		self.0.iter()
	}

	/// Applies one rule by identity: `None` removes a matching rule, any
	/// other access type replaces it or appends a new rule.
	pub fn set(&mut self, rule: Access) {
		let position = self
			.0
			.iter()
			.position(|r| r.principal_type == rule.principal_type && r.id == rule.id);
		match (position, rule.access_type) {
			(Some(i), AccessType::None) => {
				self.0.remove(i);
			}
			(Some(i), _) => self.0[i] = rule,
			(None, AccessType::None) => {}
			(None, _) => self.0.push(rule),
		}
	}

	/// Ensures the creating user holds Admin, appending a rule when the ACL
	/// does not already grant it.
	pub fn add_creator(&mut self, creator_id: &str) {
		let already_admin = self.0.iter().any(|r| {
			r.principal_type == PrincipalType::User
				&& r.id == creator_id
				&& r.access_type == AccessType::Admin
		});
		if !already_admin {
			self.set(Access::new(PrincipalType::User, creator_id, AccessType::Admin));
		}
	}

	/// Checks that the ACL can be persisted: no duplicate rule identities, no
	/// transient `None` entries, and every identifier valid for its type.
	pub fn validate(&self, extra_validators: &[PrincipalValidator]) -> Result<()> {
		for (i, rule) in self.0.iter().enumerate() {
			if rule.access_type == AccessType::None {
				return Err(CoreError::InvalidAcl(format!(
					"rule for {} has access type None",
					rule.id
				)));
			}
			rule.principal_type.is_valid_principal(&rule.id, extra_validators)?;
			let duplicate = self.0[..i]
				.iter()
				.any(|r| r.principal_type == rule.principal_type && r.id == rule.id);
			if duplicate {
				return Err(CoreError::InvalidAcl(format!(
					"duplicate rule for {:?} {}",
					rule.principal_type, rule.id
				)));
			}
		}
		Ok(())
	}
}

/// An authenticated identity presented with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
	User { id: String, groups: Vec<String> },
	Machine { id: String },
	Service { id: String },
}

impl Principal {
	pub fn user(id: impl Into<String>, groups: Vec<String>) -> Self {
		Principal::User {
			id: id.into(),
			groups,
		}
	}

	pub fn machine(id: impl Into<String>) -> Self {
		Principal::Machine { id: id.into() }
	}

	pub fn service(id: impl Into<String>) -> Self {
		Principal::Service { id: id.into() }
	}

	pub fn id(&self) -> &str {
		match self {
			Principal::User { id, .. } => id,
			Principal::Machine { id } => id,
			Principal::Service { id } => id,
		}
	}

	/// Whether at least one rule matching this principal grants `wanted`.
	pub fn can_access(&self, acl: &Acl, wanted: AccessType) -> bool {
		acl.iter()
			.any(|rule| rule.access_type >= wanted && rule.matches(self))
	}
}

/// The raw list of principals behind a request.
///
/// A request is usually backed by a single principal, but group expansion and
/// delegated credentials can put several identities behind one call; access
/// is granted when any of them passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalSet(Vec<Principal>);

impl PrincipalSet {
	pub fn new(principals: Vec<Principal>) -> Self {
		Self(principals)
	}

	pub fn single(principal: Principal) -> Self {
		Self(vec![principal])
	}

	/// The underlying principal list.
	pub fn raw(&self) -> &[Principal] {
		&self.0
	}

	/// Display identifier, joining all raw principals.
	pub fn id(&self) -> String {
		self.0
			.iter()
			.map(Principal::id)
			.collect::<Vec<_>>()
			.join(",")
	}

	/// Whether any raw principal is a user. Key creation is restricted to
	/// user principals.
	pub fn is_user(&self) -> bool {
		self.0.iter().any(|p| matches!(p, Principal::User { .. }))
	}

	/// The identifier of the first user principal, if any.
	pub fn user_id(&self) -> Option<&str> {
		self.0.iter().find_map(|p| match p {
			Principal::User { id, .. } => Some(id.as_str()),
			_ => None,
		})
	}

	pub fn can_access(&self, acl: &Acl, wanted: AccessType) -> bool {
		self.0.iter().any(|p| p.can_access(acl, wanted))
	}
}
