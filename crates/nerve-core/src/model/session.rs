// crates/nerve-core/src/model/session.rs
// ============================================================================
// Module: Context Nerve Sessions
// Description: Requestors, grants, scopes, and session records.
// Purpose: Model the authorization context a request is evaluated against.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A session binds a requestor to a set of grants. A grant pairs a
//! [`CapabilityPattern`] with a [`Scope`] that constrains request parameters,
//! plus an optional expiry. Elevated grants are the only way to authorize
//! irreversible capabilities and must always expire.
//!
//! Path scopes compare normalized path components, so `/home/u/docs` never
//! matches `/home/u/docs-private`, and `..` escapes are rejected outright.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::model::capability::CapabilityPattern;
use crate::model::identifiers::CapabilityName;
use crate::model::identifiers::RequestorId;
use crate::model::identifiers::SessionId;
use crate::model::timestamp::Timestamp;

// ============================================================================
// SECTION: Requestors
// ============================================================================

/// Requestor class; selects policy-table rules and disclosure level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestorClass {
    /// Host-internal component.
    System,
    /// Interactive user.
    User,
    /// Unauthenticated or low-trust user.
    Guest,
    /// External agent connected through a bridge.
    External,
}

impl RequestorClass {
    /// Stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Guest => "guest",
            Self::External => "external",
        }
    }
}

/// Entity on whose behalf requests are made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requestor {
    /// Requestor identity.
    pub id: RequestorId,
    /// Requestor class.
    pub class: RequestorClass,
}

impl Requestor {
    /// Creates a requestor.
    #[must_use]
    pub fn new(id: impl Into<RequestorId>, class: RequestorClass) -> Self {
        Self {
            id: id.into(),
            class,
        }
    }
}

// ============================================================================
// SECTION: Scopes
// ============================================================================

/// Constraint on request parameters attached to a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Scope {
    /// No parameter constraint.
    Unrestricted,
    /// String parameter must be an absolute path under `prefix`.
    PathPrefix {
        /// Parameter name holding the path.
        param: String,
        /// Absolute path prefix.
        prefix: String,
    },
    /// Parameter must equal a fixed value.
    ParamEquals {
        /// Parameter name.
        param: String,
        /// Required value.
        value: Value,
    },
    /// Parameter must equal one of a set of values.
    ParamOneOf {
        /// Parameter name.
        param: String,
        /// Allowed values.
        values: Vec<Value>,
    },
}

impl Scope {
    /// Returns true when `params` satisfy the scope.
    #[must_use]
    pub fn permits(&self, params: &Value) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::PathPrefix {
                param,
                prefix,
            } => {
                let Some(Value::String(path)) = params.get(param) else {
                    return false;
                };
                match (normalize_path(prefix), normalize_path(path)) {
                    (Some(prefix), Some(path)) => path.starts_with(&prefix),
                    _ => false,
                }
            }
            Self::ParamEquals {
                param,
                value,
            } => params.get(param) == Some(value),
            Self::ParamOneOf {
                param,
                values,
            } => params.get(param).is_some_and(|actual| values.contains(actual)),
        }
    }

    /// Returns true when the scope is structurally valid.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::PathPrefix {
                param,
                prefix,
            } => !param.is_empty() && normalize_path(prefix).is_some(),
            Self::ParamEquals {
                param, ..
            } => !param.is_empty(),
            Self::ParamOneOf {
                param,
                values,
            } => !param.is_empty() && !values.is_empty(),
        }
    }
}

/// Lexically normalizes an absolute path into components.
///
/// Returns `None` for relative paths, NUL bytes, or `..` that climbs above root.
#[must_use]
pub fn normalize_path(raw: &str) -> Option<Vec<&str>> {
    if !raw.starts_with('/') || raw.contains('\0') {
        return None;
    }
    let mut parts: Vec<&str> = Vec::new();
    for component in raw.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts)
}

// ============================================================================
// SECTION: Grants
// ============================================================================

/// Permission attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Capabilities selected by this grant.
    pub pattern: CapabilityPattern,
    /// Parameter scope.
    pub scope: Scope,
    /// Expiry; `None` means the grant lives as long as the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
    /// Whether the grant authorizes irreversible capabilities.
    #[serde(default)]
    pub elevated: bool,
}

impl Grant {
    /// Creates a non-elevated grant without expiry.
    #[must_use]
    pub const fn new(pattern: CapabilityPattern, scope: Scope) -> Self {
        Self {
            pattern,
            scope,
            expires_at: None,
            elevated: false,
        }
    }

    /// Creates an elevated grant that expires at `expires_at`.
    #[must_use]
    pub const fn elevated(pattern: CapabilityPattern, scope: Scope, expires_at: Timestamp) -> Self {
        Self {
            pattern,
            scope,
            expires_at: Some(expires_at),
            elevated: true,
        }
    }

    /// Sets an expiry.
    #[must_use]
    pub const fn with_expiry(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns true when the grant has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|expiry| now >= expiry)
    }
}

// ============================================================================
// SECTION: Sessions
// ============================================================================

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Accepting requests.
    Open,
    /// Closed explicitly or by expiry.
    Closed,
}

/// Session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier.
    pub session_id: SessionId,
    /// Bound requestor.
    pub requestor: Requestor,
    /// Active grants; at most one ordinary and one elevated grant per pattern.
    pub grants: Vec<Grant>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last request or grant change.
    pub last_activity: Timestamp,
    /// Idle timeout applied to this session.
    pub idle_timeout_ms: u64,
    /// Incremented on every grant or revoke; tokens bind to it.
    pub grant_epoch: u64,
    /// Current state.
    pub state: SessionState,
}

impl Session {
    /// Returns true when the session has idled past its timeout at `now`.
    #[must_use]
    pub fn is_idle_expired(&self, now: Timestamp) -> bool {
        now.millis_since(self.last_activity) >= self.idle_timeout_ms
    }

    /// Returns unexpired grants whose pattern selects `capability`.
    pub fn matching_grants<'a>(
        &'a self,
        capability: &'a CapabilityName,
        now: Timestamp,
    ) -> impl Iterator<Item = &'a Grant> + 'a {
        self.grants
            .iter()
            .filter(move |grant| !grant.is_expired(now) && grant.pattern.matches(capability))
    }

    /// Inserts a grant, replacing the existing grant of the same pattern and kind.
    ///
    /// Ordinary and elevated grants on one pattern coexist.
    pub fn upsert_grant(&mut self, grant: Grant) {
        if let Some(existing) = self
            .grants
            .iter_mut()
            .find(|g| g.pattern == grant.pattern && g.elevated == grant.elevated)
        {
            *existing = grant;
        } else {
            self.grants.push(grant);
        }
        self.grant_epoch += 1;
    }

    /// Removes every grant, ordinary or elevated, whose pattern equals `pattern`.
    ///
    /// Returns true when one was removed.
    pub fn remove_grant(&mut self, pattern: &CapabilityPattern) -> bool {
        let before = self.grants.len();
        self.grants.retain(|grant| &grant.pattern != pattern);
        let removed = self.grants.len() != before;
        if removed {
            self.grant_epoch += 1;
        }
        removed
    }
}
