// crates/nerve-config/tests/common/mod.rs
// =============================================================================
// Module: Config Test Helpers
// Description: Shared fixtures for nerve-config integration tests.
// Purpose: Build minimal valid configs and check validation messages.
// =============================================================================

#![allow(dead_code, reason = "Shared helpers are not used by every test binary.")]

use nerve_config::ConfigError;
use nerve_config::NerveConfig;

/// Result type used by config tests.
pub type TestResult = Result<(), String>;

/// Returns a config built entirely from defaults.
pub fn minimal_config() -> Result<NerveConfig, ConfigError> {
    NerveConfig::from_toml_str("")
}

/// Asserts that validation failed with a message containing `needle`.
pub fn assert_invalid(result: Result<(), ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(()) => Err("expected invalid config".to_string()),
    }
}
