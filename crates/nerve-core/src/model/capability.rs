// crates/nerve-core/src/model/capability.rs
// ============================================================================
// Module: Context Nerve Capabilities
// Description: Capability descriptors, side-effect classes, and name patterns.
// Purpose: Describe what a provider can do and how grants and rules select it.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! A capability is a named, versioned operation. Reads never change state.
//! Actions declare whether their effect can be undone (`reversible`) or not
//! (`irreversible`). The side-effect class drives retries, compensation, and
//! the elevated-grant requirement.
//!
//! [`CapabilityPattern`] selects capabilities by exact name, by dotted prefix
//! (`read.*`), or universally (`*`).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::model::identifiers::CapabilityName;
use crate::model::identifiers::is_valid_segment;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Capability kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Returns context; no state changes.
    Read,
    /// Changes state.
    Action,
}

/// Side-effect class of a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    /// No state change.
    None,
    /// State change with a known compensating action.
    Reversible,
    /// State change that cannot be undone.
    Irreversible,
}

impl SideEffect {
    /// Stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Reversible => "reversible",
            Self::Irreversible => "irreversible",
        }
    }
}

/// JSON Schema describing a capability input or output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataShape {
    /// Shape identifier used in diagnostics.
    pub id: String,
    /// JSON Schema document.
    pub schema: Value,
}

/// Capability descriptor declared by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Capability name.
    pub name: CapabilityName,
    /// Descriptor version; starts at 1.
    pub version: u32,
    /// Read or action.
    pub kind: CapabilityKind,
    /// Side-effect class.
    pub side_effect: SideEffect,
    /// Optional input shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_shape: Option<DataShape>,
    /// Optional output shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_shape: Option<DataShape>,
    /// Optional human description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Capability {
    /// Creates a read capability at version 1.
    #[must_use]
    pub const fn read(name: CapabilityName) -> Self {
        Self {
            name,
            version: 1,
            kind: CapabilityKind::Read,
            side_effect: SideEffect::None,
            input_shape: None,
            output_shape: None,
            description: None,
        }
    }

    /// Creates an action capability at version 1.
    #[must_use]
    pub const fn action(name: CapabilityName, side_effect: SideEffect) -> Self {
        Self {
            name,
            version: 1,
            kind: CapabilityKind::Action,
            side_effect,
            input_shape: None,
            output_shape: None,
            description: None,
        }
    }

    /// Sets the descriptor version.
    #[must_use]
    pub const fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Sets the input shape.
    #[must_use]
    pub fn with_input_shape(mut self, shape: DataShape) -> Self {
        self.input_shape = Some(shape);
        self
    }

    /// Sets the output shape.
    #[must_use]
    pub fn with_output_shape(mut self, shape: DataShape) -> Self {
        self.output_shape = Some(shape);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns true when the capability cannot be undone.
    #[must_use]
    pub fn is_irreversible(&self) -> bool {
        self.side_effect == SideEffect::Irreversible
    }

    /// Returns true when the capability is a reversible action.
    #[must_use]
    pub fn is_reversible(&self) -> bool {
        self.side_effect == SideEffect::Reversible
    }

    /// Validates descriptor invariants.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError`] when the descriptor is inconsistent.
    pub fn validate(&self) -> Result<(), CapabilityError> {
        if self.version == 0 {
            return Err(CapabilityError::ZeroVersion(self.name.clone()));
        }
        match (self.kind, self.side_effect) {
            (CapabilityKind::Read, SideEffect::None)
            | (CapabilityKind::Action, SideEffect::Reversible | SideEffect::Irreversible) => {}
            (CapabilityKind::Read, _) => {
                return Err(CapabilityError::ReadWithSideEffect(self.name.clone()));
            }
            (CapabilityKind::Action, SideEffect::None) => {
                return Err(CapabilityError::ActionWithoutSideEffect(self.name.clone()));
            }
        }
        for shape in [&self.input_shape, &self.output_shape].into_iter().flatten() {
            if shape.id.trim().is_empty() {
                return Err(CapabilityError::EmptyShapeId(self.name.clone()));
            }
        }
        Ok(())
    }
}

/// Capability descriptor validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// Version must be at least 1.
    #[error("capability {0} has version 0")]
    ZeroVersion(CapabilityName),
    /// Reads must not declare a side effect.
    #[error("read capability {0} declares a side effect")]
    ReadWithSideEffect(CapabilityName),
    /// Actions must declare reversible or irreversible.
    #[error("action capability {0} declares no side effect")]
    ActionWithoutSideEffect(CapabilityName),
    /// Data shape identifiers must be non-empty.
    #[error("capability {0} has a data shape with an empty id")]
    EmptyShapeId(CapabilityName),
}

// ============================================================================
// SECTION: Capability Patterns
// ============================================================================

/// Selects capabilities by name.
///
/// Wire form is a string: `read.file` (exact), `read.*` (prefix), or `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CapabilityPattern {
    /// Matches every capability.
    Any,
    /// Matches names under a dotted prefix; stored without the trailing `.*`.
    Prefix(String),
    /// Matches one capability name.
    Exact(CapabilityName),
}

impl CapabilityPattern {
    /// Parses a pattern string.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] when the pattern is malformed.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        if raw == "*" {
            return Ok(Self::Any);
        }
        if let Some(prefix) = raw.strip_suffix(".*") {
            if prefix.is_empty() || !prefix.split('.').all(is_valid_segment) {
                return Err(PatternError(raw.to_string()));
            }
            return Ok(Self::Prefix(prefix.to_string()));
        }
        CapabilityName::parse(raw).map(Self::Exact).map_err(|_| PatternError(raw.to_string()))
    }

    /// Returns true when the pattern selects `name`.
    #[must_use]
    pub fn matches(&self, name: &CapabilityName) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(exact) => exact == name,
            Self::Prefix(prefix) => name
                .as_str()
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.starts_with('.')),
        }
    }

    /// Returns true for exact-name patterns.
    #[must_use]
    pub const fn is_exact(&self) -> bool {
        matches!(self, Self::Exact(_))
    }

    /// Ranks how specific the pattern is; higher is more specific.
    #[must_use]
    pub fn specificity(&self) -> usize {
        match self {
            Self::Any => 0,
            Self::Prefix(prefix) => 1 + prefix.split('.').count(),
            Self::Exact(_) => usize::MAX,
        }
    }
}

impl fmt::Display for CapabilityPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Prefix(prefix) => write!(f, "{prefix}.*"),
            Self::Exact(name) => name.fmt(f),
        }
    }
}

impl TryFrom<String> for CapabilityPattern {
    type Error = PatternError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CapabilityPattern> for String {
    fn from(value: CapabilityPattern) -> Self {
        value.to_string()
    }
}

impl From<CapabilityName> for CapabilityPattern {
    fn from(value: CapabilityName) -> Self {
        Self::Exact(value)
    }
}

/// Malformed capability pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid capability pattern: {0}")]
pub struct PatternError(pub String);
