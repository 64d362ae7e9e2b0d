// crates/nerve-config/src/policy.rs
// ============================================================================
// Module: Policy Table
// Description: Versioned (requestor class, capability) policy table and store.
// Purpose: Provide deterministic fallback decisions and atomic reloads.
// Dependencies: nerve-core, serde
// ============================================================================

//! ## Overview
//! The policy table maps a requestor class and capability name to a default
//! effect. Exact-name rules take precedence over pattern rules; among rules
//! of equal precedence the first declared wins. When nothing matches, the
//! table default applies.
//!
//! A validated table becomes an immutable [`PolicySnapshot`]. The
//! [`PolicyStore`] swaps whole snapshots and refuses versions that do not
//! strictly increase, so a reader holding a snapshot never observes a
//! partially applied reload.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use nerve_core::CapabilityName;
use nerve_core::CapabilityPattern;
use nerve_core::RequestorClass;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum number of rules in one policy table.
pub const MAX_POLICY_RULES: usize = 1024;
/// Maximum length of a rule identifier.
pub const MAX_RULE_ID_LENGTH: usize = 128;
/// Rule id reported when the table default decides.
pub const DEFAULT_RULE_ID: &str = "policy.default";

// ============================================================================
// SECTION: Policy Model
// ============================================================================

/// Effect of a policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEffect {
    /// Permit the request.
    Allow,
    /// Deny the request.
    #[default]
    Deny,
}

/// One policy rule as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyRuleConfig {
    /// Stable rule identifier.
    pub id: String,
    /// Requestor class; absent means every class.
    #[serde(default)]
    pub requestor_class: Option<RequestorClass>,
    /// Capability name or pattern.
    pub capability: CapabilityPattern,
    /// Effect when the rule matches.
    pub effect: PolicyEffect,
}

impl PolicyRuleConfig {
    /// Returns true when the rule applies to `class` and `capability`.
    #[must_use]
    pub fn matches(&self, class: RequestorClass, capability: &CapabilityName) -> bool {
        self.requestor_class.is_none_or(|rule_class| rule_class == class)
            && self.capability.matches(capability)
    }
}

/// Policy table as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyTableConfig {
    /// Table version; reloads must strictly increase it.
    #[serde(default = "default_policy_version")]
    pub version: u64,
    /// Effect when no rule matches.
    #[serde(default)]
    pub default: PolicyEffect,
    /// Ordered rules.
    #[serde(default)]
    pub rules: Vec<PolicyRuleConfig>,
}

impl Default for PolicyTableConfig {
    fn default() -> Self {
        Self {
            version: default_policy_version(),
            default: PolicyEffect::Deny,
            rules: Vec::new(),
        }
    }
}

impl PolicyTableConfig {
    /// Validates the table.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version == 0 {
            return Err(ConfigError::Invalid("policy.version must be at least 1".to_string()));
        }
        if self.rules.len() > MAX_POLICY_RULES {
            return Err(ConfigError::Invalid(format!(
                "policy.rules exceeds {MAX_POLICY_RULES} entries"
            )));
        }
        let mut seen = BTreeSet::new();
        for (idx, rule) in self.rules.iter().enumerate() {
            let id = rule.id.trim();
            if id.is_empty() {
                return Err(ConfigError::Invalid(format!("policy.rules[{idx}].id must be set")));
            }
            if id.len() > MAX_RULE_ID_LENGTH {
                return Err(ConfigError::Invalid(format!("policy.rules[{idx}].id too long")));
            }
            if id == DEFAULT_RULE_ID {
                return Err(ConfigError::Invalid(format!(
                    "policy.rules[{idx}].id is reserved: {DEFAULT_RULE_ID}"
                )));
            }
            if !seen.insert(id) {
                return Err(ConfigError::Invalid(format!(
                    "policy.rules[{idx}].id duplicates {id}"
                )));
            }
        }
        Ok(())
    }
}

/// Default policy table version.
const fn default_policy_version() -> u64 {
    1
}

// ============================================================================
// SECTION: Snapshots
// ============================================================================

/// Result of consulting the policy table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyMatch {
    /// Rule that decided, or [`DEFAULT_RULE_ID`].
    pub rule_id: String,
    /// Effect.
    pub effect: PolicyEffect,
    /// True when an explicit rule matched; false for the table default.
    pub explicit: bool,
}

/// Immutable, validated policy table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySnapshot {
    /// Snapshot version.
    version: u64,
    /// Default effect.
    default: PolicyEffect,
    /// Ordered rules.
    rules: Vec<PolicyRuleConfig>,
}

impl PolicySnapshot {
    /// Builds a snapshot from a validated table.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the table is invalid.
    pub fn from_config(table: &PolicyTableConfig) -> Result<Self, ConfigError> {
        table.validate()?;
        Ok(Self {
            version: table.version,
            default: table.default,
            rules: table.rules.clone(),
        })
    }

    /// Returns a version-1 snapshot that denies everything.
    #[must_use]
    pub const fn deny_all() -> Self {
        Self {
            version: 1,
            default: PolicyEffect::Deny,
            rules: Vec::new(),
        }
    }

    /// Snapshot version.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Ordered rules.
    #[must_use]
    pub fn rules(&self) -> &[PolicyRuleConfig] {
        &self.rules
    }

    /// Returns the explicit rule for `class` and `capability`, if any.
    ///
    /// Exact rules beat pattern rules; declaration order breaks ties.
    #[must_use]
    pub fn explicit_rule(
        &self,
        class: RequestorClass,
        capability: &CapabilityName,
    ) -> Option<&PolicyRuleConfig> {
        let mut matching = self.rules.iter().filter(|rule| rule.matches(class, capability));
        let first = matching.next()?;
        if first.capability.is_exact() {
            return Some(first);
        }
        Some(matching.find(|rule| rule.capability.is_exact()).unwrap_or(first))
    }

    /// Evaluates the table for `class` and `capability`.
    #[must_use]
    pub fn evaluate(&self, class: RequestorClass, capability: &CapabilityName) -> PolicyMatch {
        self.explicit_rule(class, capability).map_or_else(
            || PolicyMatch {
                rule_id: DEFAULT_RULE_ID.to_string(),
                effect: self.default,
                explicit: false,
            },
            |rule| PolicyMatch {
                rule_id: rule.id.clone(),
                effect: rule.effect,
                explicit: true,
            },
        )
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Errors raised when reloading policy.
#[derive(Debug, Error)]
pub enum PolicyReloadError {
    /// New table failed validation.
    #[error(transparent)]
    Invalid(#[from] ConfigError),
    /// New version does not exceed the current one.
    #[error("policy version {offered} does not exceed current version {current}")]
    StaleVersion {
        /// Version currently in force.
        current: u64,
        /// Version offered by the reload.
        offered: u64,
    },
}

impl PolicyReloadError {
    /// Stable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Invalid(err) => err.code(),
            Self::StaleVersion {
                ..
            } => "policy_version_stale",
        }
    }
}

/// Atomically swappable holder of the current policy snapshot.
#[derive(Debug)]
pub struct PolicyStore {
    /// Current snapshot.
    current: RwLock<Arc<PolicySnapshot>>,
}

impl PolicyStore {
    /// Creates a store holding `snapshot`.
    #[must_use]
    pub fn new(snapshot: PolicySnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replaces the snapshot with one built from `table`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyReloadError`] when the table is invalid or its version
    /// does not strictly increase.
    pub fn reload(&self, table: &PolicyTableConfig) -> Result<u64, PolicyReloadError> {
        let next = PolicySnapshot::from_config(table)?;
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let current = guard.version();
        if next.version() <= current {
            return Err(PolicyReloadError::StaleVersion {
                current,
                offered: next.version(),
            });
        }
        let version = next.version();
        *guard = Arc::new(next);
        drop(guard);
        Ok(version)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
