//! Loading tests for nerve-config.
// crates/nerve-config/tests/config_loading.rs
// =============================================================================
// Module: Config Loading Tests
// Description: File resolution, size limits, and TOML parsing.
// Purpose: Ensure nerve.toml loads from disk and rejects malformed input.
// =============================================================================

#![allow(clippy::use_debug, reason = "Test failure messages include debug output.")]

use std::fs;

use nerve_config::NerveConfig;
use nerve_config::PolicyEffect;
use nerve_config::PolicySnapshot;
use nerve_core::CapabilityName;
use nerve_core::RequestorClass;

mod common;

use common::TestResult;

const SAMPLE: &str = r#"
[router]
default_deadline_ms = 2000
attempt_timeout_ms = 1500

[sessions]
idle_timeout_ms = 60000

[audit]
retention = 500
stderr = true

[providers]
filesystem_root = "/var/app"
system_info = false

[policy]
version = 4
default = "deny"

[[policy.rules]]
id = "user-reads"
requestor_class = "user"
capability = "read.*"
effect = "allow"

[[policy.rules]]
id = "guest-nothing"
requestor_class = "guest"
capability = "*"
effect = "deny"
"#;

#[test]
fn loads_sample_file_from_disk() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let path = dir.path().join("nerve.toml");
    fs::write(&path, SAMPLE).map_err(|err| err.to_string())?;
    let config = NerveConfig::load(Some(&path)).map_err(|err| err.to_string())?;
    if config.router.default_deadline_ms != 2_000 || config.audit.retention != 500 {
        return Err("router or audit values not applied".to_string());
    }
    if config.providers.filesystem_root.as_deref() != Some("/var/app")
        || config.providers.system_info
    {
        return Err("provider values not applied".to_string());
    }
    let snapshot = PolicySnapshot::from_config(&config.policy).map_err(|err| err.to_string())?;
    let read = CapabilityName::parse("read.file").map_err(|err| err.to_string())?;
    let decision = snapshot.evaluate(RequestorClass::User, &read);
    if decision.rule_id != "user-reads" || decision.effect != PolicyEffect::Allow {
        return Err(format!("unexpected decision {}", decision.rule_id));
    }
    if snapshot.version() != 4 {
        return Err("policy version not applied".to_string());
    }
    Ok(())
}

#[test]
fn unknown_fields_are_rejected() -> TestResult {
    match NerveConfig::from_toml_str("[router]\nbogus = 1\n") {
        Err(err) if err.code() == "config_parse" => Ok(()),
        Err(err) => Err(format!("unexpected error {err}")),
        Ok(_) => Err("unknown field accepted".to_string()),
    }
}

#[test]
fn malformed_policy_pattern_is_a_parse_error() -> TestResult {
    let text = "[[policy.rules]]\nid = \"x\"\ncapability = \"read.*.*\"\neffect = \"allow\"\n";
    match NerveConfig::from_toml_str(text) {
        Err(err) if err.code() == "config_parse" => Ok(()),
        other => Err(format!("expected parse error, got {:?}", other.map(|_| ()))),
    }
}

#[test]
fn oversized_file_is_rejected() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let path = dir.path().join("big.toml");
    let filler = format!("# {}\n", "x".repeat(1024 * 1024));
    fs::write(&path, filler).map_err(|err| err.to_string())?;
    match NerveConfig::load(Some(&path)) {
        Err(err) if err.to_string().contains("size limit") => Ok(()),
        other => Err(format!("expected size error, got {:?}", other.map(|_| ()))),
    }
}

#[test]
fn missing_file_is_an_io_error() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    match NerveConfig::load(Some(&dir.path().join("absent.toml"))) {
        Err(err) if err.code() == "config_io" => Ok(()),
        other => Err(format!("expected io error, got {:?}", other.map(|_| ()))),
    }
}
