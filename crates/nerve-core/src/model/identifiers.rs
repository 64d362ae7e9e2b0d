// crates/nerve-core/src/model/identifiers.rs
// ============================================================================
// Module: Context Nerve Identifiers
// Description: Opaque identifiers for sessions, requests, providers, and plans.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Identifiers are opaque strings on the wire. Capability names are the one
//! exception: they are validated dotted names (`read.file`, `action.fs.move`)
//! because routing, grants, and policy rules all match against their
//! segments.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum length of a capability name in bytes.
pub const MAX_CAPABILITY_NAME_LEN: usize = 128;

// ============================================================================
// SECTION: Opaque Identifiers
// ============================================================================

/// Declares an opaque string identifier with the shared accessor set.
macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

opaque_id!(
    /// Session identifier issued by the session manager.
    SessionId
);

opaque_id!(
    /// Request identifier; unique per dispatched request.
    RequestId
);

opaque_id!(
    /// Provider identifier issued by the registry at registration time.
    ProviderId
);

opaque_id!(
    /// Intent plan identifier.
    PlanId
);

opaque_id!(
    /// Step identifier, unique within a plan.
    StepId
);

opaque_id!(
    /// Identity of the entity that opened a session.
    RequestorId
);

// ============================================================================
// SECTION: Capability Names
// ============================================================================

/// Errors raised when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// Capability name was empty.
    #[error("capability name is empty")]
    Empty,
    /// Capability name exceeded the length limit.
    #[error("capability name exceeds {max} bytes")]
    TooLong {
        /// Maximum permitted length.
        max: usize,
    },
    /// Capability name contained an empty or malformed segment.
    #[error("capability name has invalid segment: {0}")]
    InvalidSegment(String),
}

/// Validated, dotted capability name such as `read.file`.
///
/// # Invariants
/// - Non-empty and at most [`MAX_CAPABILITY_NAME_LEN`] bytes.
/// - Segments are separated by `.` and contain only `[a-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CapabilityName(String);

impl CapabilityName {
    /// Parses and validates a capability name.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the name is empty, too long, or has a
    /// malformed segment.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        if raw.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if raw.len() > MAX_CAPABILITY_NAME_LEN {
            return Err(IdentifierError::TooLong {
                max: MAX_CAPABILITY_NAME_LEN,
            });
        }
        for segment in raw.split('.') {
            if !is_valid_segment(segment) {
                return Err(IdentifierError::InvalidSegment(segment.to_string()));
            }
        }
        Ok(Self(raw.to_string()))
    }

    /// Returns the capability name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for CapabilityName {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for CapabilityName {
    type Error = IdentifierError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<CapabilityName> for String {
    fn from(value: CapabilityName) -> Self {
        value.0
    }
}

/// Returns true when a name segment is non-empty and uses the allowed alphabet.
pub(crate) fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}
