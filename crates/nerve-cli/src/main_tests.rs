// crates/nerve-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Main Helpers Tests
// Description: Unit tests for argument parsing, key handling, and snippets.
// Purpose: Keep administrator tooling consistent with what the host accepts.
// Dependencies: nerve-cli main helpers, tempfile
// ============================================================================

//! ## Overview
//! Signed allowlist snippets are parsed back through the config loader and
//! verified against the generated public key, so the tooling and the bridge
//! cannot drift apart silently.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;

use clap::CommandFactory;
use ed25519_dalek::Signature;
use ed25519_dalek::Verifier;
use nerve_config::DEFAULT_RULE_ID;

use super::*;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn fixed_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; SIGNING_KEY_LEN])
}

// ============================================================================
// SECTION: Arguments
// ============================================================================

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn policy_check_arguments_parse() {
    let cli = Cli::try_parse_from([
        "nerve",
        "--log-json",
        "policy",
        "check",
        "--class",
        "guest",
        "--capability",
        "read.fs.file",
    ])
    .expect("parse");

    assert!(cli.log_json);
    match cli.command {
        Commands::Policy {
            command: PolicyCommand::Check(command),
        } => {
            assert!(matches!(command.class, ClassArg::Guest));
            assert_eq!(command.capability, "read.fs.file");
            assert!(command.config.is_none());
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn serve_defaults_to_client_mode() {
    let cli = Cli::try_parse_from(["nerve", "serve"]).expect("parse");
    match cli.command {
        Commands::Serve(command) => assert!(!command.admin),
        other => panic!("unexpected command: {other:?}"),
    }

    let cli = Cli::try_parse_from(["nerve", "serve", "--admin"]).expect("parse");
    match cli.command {
        Commands::Serve(command) => assert!(command.admin),
        other => panic!("unexpected command: {other:?}"),
    }
}

// ============================================================================
// SECTION: Policy
// ============================================================================

#[test]
fn policy_check_reports_deciding_rule() {
    let config = NerveConfig::from_toml_str(
        r#"
[policy]
version = 4
default = "deny"

[[policy.rules]]
id = "guest-read"
requestor_class = "guest"
capability = "read.*"
effect = "allow"
"#,
    )
    .expect("config");

    let report = policy_check(&config, RequestorClass::Guest, "read.fs.file").expect("report");
    assert_eq!(report.rule_id, "guest-read");
    assert_eq!(report.effect, PolicyEffect::Allow);
    assert!(report.explicit);
    assert_eq!(report.policy_version, 4);

    let report = policy_check(&config, RequestorClass::User, "read.fs.file").expect("report");
    assert_eq!(report.rule_id, DEFAULT_RULE_ID);
    assert_eq!(report.effect, PolicyEffect::Deny);
    assert!(!report.explicit);

    let err = policy_check(&config, RequestorClass::Guest, "Not A Name").unwrap_err();
    assert!(err.to_string().contains("invalid capability"));
}

// ============================================================================
// SECTION: Keys and Snippets
// ============================================================================

#[test]
fn signing_key_loads_from_raw_and_base64() {
    let dir = tempfile::tempdir().expect("tempdir");
    let key = fixed_key();
    let raw = dir.path().join("raw.key");
    let text = dir.path().join("text.key");
    fs::write(&raw, key.to_bytes()).expect("write raw");
    fs::write(&text, format!("{}\n", BASE64.encode(key.to_bytes()))).expect("write text");

    assert_eq!(load_signing_key(&raw).expect("raw").to_bytes(), key.to_bytes());
    assert_eq!(load_signing_key(&text).expect("text").to_bytes(), key.to_bytes());

    let short = dir.path().join("short.key");
    fs::write(&short, BASE64.encode([1u8; 16])).expect("write short");
    assert!(load_signing_key(&short).is_err());
}

#[test]
fn read_bytes_with_limit_rejects_large_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("large.bin");
    fs::write(&path, vec![0u8; 9]).expect("write");

    match read_bytes_with_limit(&path, 8) {
        Err(ReadLimitError::TooLarge {
            size,
            limit,
        }) => {
            assert_eq!(size, 9);
            assert_eq!(limit, 8);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(read_bytes_with_limit(&path, 9).expect("read").len(), 9);
}

#[test]
fn keygen_output_refuses_to_overwrite() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("admin.key");

    write_new_file(&path, b"first").expect("create");
    assert!(write_new_file(&path, b"second").is_err());
    assert_eq!(fs::read(&path).expect("read"), b"first");
}

#[test]
fn signed_snippet_loads_and_verifies() {
    let key = fixed_key();
    let capability = CapabilityName::parse("action.network.disable").expect("name");
    let entry = allowlist_entry(&key, "ops", "weather.example", capability.clone()).expect("sign");
    let snippet = render_snippet(BridgeSection {
        admin_keys: vec![admin_key_entry(&key, "ops")],
        allowlist: vec![entry.clone()],
    })
    .expect("render");

    let config = NerveConfig::from_toml_str(&snippet).expect("snippet is valid config");
    assert_eq!(config.bridge.allowlist, vec![entry.clone()]);
    assert_eq!(config.bridge.admin_keys[0].key_id, "ops");

    let signature =
        Signature::from_slice(&BASE64.decode(entry.signature.as_bytes()).expect("base64"))
            .expect("signature");
    let message = allowlist_message("weather.example", &capability).expect("message");
    assert!(key.verifying_key().verify(&message, &signature).is_ok());
    let other = allowlist_message("other.example", &capability).expect("message");
    assert!(key.verifying_key().verify(&other, &signature).is_err());
}

#[test]
fn allowlist_entry_requires_endpoint() {
    let capability = CapabilityName::parse("action.network.disable").expect("name");
    assert!(allowlist_entry(&fixed_key(), "ops", "  ", capability).is_err());
}
