// crates/nerve-cli/src/main.rs
// ============================================================================
// Module: Context Nerve CLI Entry Point
// Description: Command dispatcher for the Context Nerve host and its tooling.
// Purpose: Serve the control protocol and inspect config, policy, and audit.
// Dependencies: clap, nerve-config, nerve-router, tokio, tracing-subscriber
// ============================================================================

//! ## Overview
//! `nerve serve` hosts a runtime and speaks newline-delimited JSON-RPC on
//! stdio; stdout carries protocol frames only, so diagnostics and tracing go
//! to stderr. The remaining commands are offline: configuration validation,
//! policy table inspection, audit export verification, and administrator
//! tooling for the signed bridge allowlist.

// ============================================================================
// SECTION: Modules
// ============================================================================

#[cfg(test)]
mod main_tests;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use ed25519_dalek::Signer;
use ed25519_dalek::SigningKey;
use nerve_config::AdminKeyConfig;
use nerve_config::AllowlistEntryConfig;
use nerve_config::NerveConfig;
use nerve_config::PolicyEffect;
use nerve_config::PolicySnapshot;
use nerve_core::CapabilityName;
use nerve_core::RequestorClass;
use nerve_providers::allowlist_message;
use nerve_router::ControlServer;
use nerve_router::NerveRuntime;
use nerve_router::verify_audit_file;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size for signing key material.
const MAX_SIGNING_KEY_BYTES: usize = 8 * 1024;
/// Raw ed25519 secret key length.
const SIGNING_KEY_LEN: usize = 32;
/// Filter applied when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "info";

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "nerve", version, disable_help_subcommand = true)]
struct Cli {
    /// Emit tracing output as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the control protocol on stdin and stdout.
    Serve(ServeCommand),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Policy table utilities.
    Policy {
        /// Selected policy subcommand.
        #[command(subcommand)]
        command: PolicyCommand,
    },
    /// Audit export utilities.
    Audit {
        /// Selected audit subcommand.
        #[command(subcommand)]
        command: AuditCommand,
    },
    /// Bridge allowlist administration.
    Allowlist {
        /// Selected allowlist subcommand.
        #[command(subcommand)]
        command: AllowlistCommand,
    },
}

/// Arguments for `serve`.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Optional config file path (defaults to `nerve.toml` or `NERVE_CONFIG`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Serve administrative methods (grants, policy reload, audit export, system sessions).
    #[arg(long)]
    admin: bool,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate a configuration file.
    Validate(ConfigValidateCommand),
}

/// Arguments for `config validate`.
#[derive(Args, Debug)]
struct ConfigValidateCommand {
    /// Optional config file path (defaults to `nerve.toml` or `NERVE_CONFIG`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Policy subcommands.
#[derive(Subcommand, Debug)]
enum PolicyCommand {
    /// Report which policy rule decides a class and capability.
    Check(PolicyCheckCommand),
}

/// Arguments for `policy check`.
#[derive(Args, Debug)]
struct PolicyCheckCommand {
    /// Optional config file path (defaults to `nerve.toml` or `NERVE_CONFIG`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Requestor class to evaluate.
    #[arg(long, value_enum)]
    class: ClassArg,
    /// Capability name to evaluate.
    #[arg(long, value_name = "NAME")]
    capability: String,
}

/// Requestor class selector.
#[derive(ValueEnum, Clone, Copy, Debug)]
enum ClassArg {
    /// Host-internal component.
    System,
    /// Interactive user.
    User,
    /// Low-trust user.
    Guest,
    /// Bridged external agent.
    External,
}

impl From<ClassArg> for RequestorClass {
    fn from(value: ClassArg) -> Self {
        match value {
            ClassArg::System => Self::System,
            ClassArg::User => Self::User,
            ClassArg::Guest => Self::Guest,
            ClassArg::External => Self::External,
        }
    }
}

/// Audit subcommands.
#[derive(Subcommand, Debug)]
enum AuditCommand {
    /// Verify the hash chain of an exported audit file.
    Verify(AuditVerifyCommand),
}

/// Arguments for `audit verify`.
#[derive(Args, Debug)]
struct AuditVerifyCommand {
    /// JSON-lines audit file written by the file mirror.
    #[arg(long, value_name = "PATH")]
    file: PathBuf,
}

/// Allowlist subcommands.
#[derive(Subcommand, Debug)]
enum AllowlistCommand {
    /// Generate an administrator signing key.
    Keygen(AllowlistKeygenCommand),
    /// Sign an allowlist entry for one endpoint and capability.
    Sign(AllowlistSignCommand),
}

/// Arguments for `allowlist keygen`.
#[derive(Args, Debug)]
struct AllowlistKeygenCommand {
    /// Output path for the base64 private key; must not exist.
    #[arg(long, value_name = "PATH")]
    out: PathBuf,
    /// Key identifier written into the config snippet.
    #[arg(long, value_name = "ID")]
    key_id: String,
}

/// Arguments for `allowlist sign`.
#[derive(Args, Debug)]
struct AllowlistSignCommand {
    /// Private key file (raw 32 bytes or base64).
    #[arg(long, value_name = "PATH")]
    key: PathBuf,
    /// Key identifier the bridge uses to find the public key.
    #[arg(long, value_name = "ID")]
    key_id: String,
    /// External endpoint label.
    #[arg(long, value_name = "ENDPOINT")]
    endpoint: String,
    /// Irreversible capability to admit.
    #[arg(long, value_name = "NAME")]
    capability: String,
}

// ============================================================================
// SECTION: Output Types
// ============================================================================

/// JSON report for `policy check`.
#[derive(Debug, Serialize)]
struct PolicyCheckReport {
    /// Evaluated class.
    class: RequestorClass,
    /// Evaluated capability.
    capability: CapabilityName,
    /// Deciding rule identifier.
    rule_id: String,
    /// Effect of the deciding rule.
    effect: PolicyEffect,
    /// True when an explicit rule matched.
    explicit: bool,
    /// Policy table version.
    policy_version: u64,
}

/// Config snippet rendered for bridge administration commands.
#[derive(Debug, Serialize)]
struct BridgeSnippet {
    /// Bridge section.
    bridge: BridgeSection,
}

/// Bridge section of a config snippet.
#[derive(Debug, Default, Serialize)]
struct BridgeSection {
    /// Administrator keys.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    admin_keys: Vec<AdminKeyConfig>,
    /// Signed allowlist entries.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    allowlist: Vec<AllowlistEntryConfig>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper carrying a human-readable message.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

/// Errors raised while reading bounded input files.
#[derive(Debug)]
enum ReadLimitError {
    /// File I/O failure.
    Io(std::io::Error),
    /// File size exceeds the configured limit.
    TooLarge {
        /// Actual size in bytes.
        size: u64,
        /// Allowed limit in bytes.
        limit: usize,
    },
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    match cli.command {
        Commands::Serve(command) => command_serve(command).await,
        Commands::Config {
            command,
        } => match command {
            ConfigCommand::Validate(command) => command_config_validate(&command),
        },
        Commands::Policy {
            command,
        } => match command {
            PolicyCommand::Check(command) => command_policy_check(&command),
        },
        Commands::Audit {
            command,
        } => match command {
            AuditCommand::Verify(command) => command_audit_verify(&command),
        },
        Commands::Allowlist {
            command,
        } => match command {
            AllowlistCommand::Keygen(command) => command_allowlist_keygen(&command),
            AllowlistCommand::Sign(command) => command_allowlist_sign(&command),
        },
    }
}

/// Installs the stderr tracing subscriber.
fn init_tracing(json: bool) -> CliResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).try_init()
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).try_init()
    };
    result.map_err(|err| CliError::new(format!("failed to initialize logging: {err}")))
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Executes the `serve` command.
async fn command_serve(command: ServeCommand) -> CliResult<ExitCode> {
    let config = load_config(command.config.as_deref())?;
    let runtime = tokio::task::spawn_blocking(move || NerveRuntime::from_config(config))
        .await
        .map_err(|err| CliError::new(format!("runtime init join failed: {err}")))?
        .map_err(|err| CliError::new(format!("runtime init failed: {err}")))?;
    let runtime = Arc::new(runtime);
    let maintenance = runtime.spawn_maintenance();
    tracing::info!(
        policy_version = runtime.policy_version(),
        providers = runtime.registry().status().map_or(0, |status| status.len()),
        admin = command.admin,
        "control server listening on stdio"
    );

    let result =
        ControlServer::new(Arc::clone(&runtime)).with_admin(command.admin).serve_stdio().await;
    for handle in maintenance {
        handle.abort();
    }
    result.map_err(|err| CliError::new(format!("serve failed: {err}")))?;
    tracing::info!("control server stopped");
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Config and Policy Commands
// ============================================================================

/// Executes `config validate`.
fn command_config_validate(command: &ConfigValidateCommand) -> CliResult<ExitCode> {
    let config = load_config(command.config.as_deref())?;
    write_stdout_line(&format!(
        "config ok: policy version {}, {} rules",
        config.policy.version,
        config.policy.rules.len()
    ))
    .map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `policy check`.
fn command_policy_check(command: &PolicyCheckCommand) -> CliResult<ExitCode> {
    let config = load_config(command.config.as_deref())?;
    let report = policy_check(&config, command.class.into(), &command.capability)?;
    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|err| CliError::new(format!("failed to render report: {err}")))?;
    write_stdout_line(&rendered).map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

/// Evaluates the configured policy table for one class and capability.
fn policy_check(
    config: &NerveConfig,
    class: RequestorClass,
    capability: &str,
) -> CliResult<PolicyCheckReport> {
    let snapshot = PolicySnapshot::from_config(&config.policy)
        .map_err(|err| CliError::new(format!("invalid policy table: {err}")))?;
    let capability = CapabilityName::parse(capability)
        .map_err(|err| CliError::new(format!("invalid capability: {err}")))?;
    let decision = snapshot.evaluate(class, &capability);
    Ok(PolicyCheckReport {
        class,
        capability,
        rule_id: decision.rule_id,
        effect: decision.effect,
        explicit: decision.explicit,
        policy_version: snapshot.version(),
    })
}

// ============================================================================
// SECTION: Audit Command
// ============================================================================

/// Executes `audit verify`.
fn command_audit_verify(command: &AuditVerifyCommand) -> CliResult<ExitCode> {
    let count = verify_audit_file(&command.file).map_err(|err| {
        CliError::new(format!("{}: {} ({})", command.file.display(), err, err.code()))
    })?;
    write_stdout_line(&format!("audit chain ok: {count} entries"))
        .map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Allowlist Commands
// ============================================================================

/// Executes `allowlist keygen`.
fn command_allowlist_keygen(command: &AllowlistKeygenCommand) -> CliResult<ExitCode> {
    let mut seed = [0u8; SIGNING_KEY_LEN];
    OsRng.fill_bytes(&mut seed);
    let key = SigningKey::from_bytes(&seed);
    write_new_file(&command.out, format!("{}\n", BASE64.encode(key.to_bytes())).as_bytes())?;
    let snippet = render_snippet(BridgeSection {
        admin_keys: vec![admin_key_entry(&key, &command.key_id)],
        ..BridgeSection::default()
    })?;
    write_stdout_line(snippet.trim_end())
        .map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

/// Executes `allowlist sign`.
fn command_allowlist_sign(command: &AllowlistSignCommand) -> CliResult<ExitCode> {
    let key = load_signing_key(&command.key)?;
    let capability = CapabilityName::parse(&command.capability)
        .map_err(|err| CliError::new(format!("invalid capability: {err}")))?;
    let entry = allowlist_entry(&key, &command.key_id, &command.endpoint, capability)?;
    let snippet = render_snippet(BridgeSection {
        allowlist: vec![entry],
        ..BridgeSection::default()
    })?;
    write_stdout_line(snippet.trim_end())
        .map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

/// Builds the admin key entry for a signing key.
fn admin_key_entry(key: &SigningKey, key_id: &str) -> AdminKeyConfig {
    AdminKeyConfig {
        key_id: key_id.to_string(),
        public_key: BASE64.encode(key.verifying_key().to_bytes()),
    }
}

/// Signs the canonical allowlist payload for `endpoint` and `capability`.
fn allowlist_entry(
    key: &SigningKey,
    key_id: &str,
    endpoint: &str,
    capability: CapabilityName,
) -> CliResult<AllowlistEntryConfig> {
    if endpoint.trim().is_empty() {
        return Err(CliError::new("endpoint must be set".to_string()));
    }
    let message = allowlist_message(endpoint, &capability)
        .map_err(|err| CliError::new(format!("failed to build allowlist payload: {err}")))?;
    let signature = key.sign(&message);
    Ok(AllowlistEntryConfig {
        endpoint: endpoint.to_string(),
        capability,
        key_id: key_id.to_string(),
        signature: BASE64.encode(signature.to_bytes()),
    })
}

/// Renders a bridge config snippet as TOML.
fn render_snippet(section: BridgeSection) -> CliResult<String> {
    toml::to_string(&BridgeSnippet {
        bridge: section,
    })
    .map_err(|err| CliError::new(format!("failed to render config snippet: {err}")))
}

// ============================================================================
// SECTION: Input Helpers
// ============================================================================

/// Loads configuration, mapping failures to CLI errors.
fn load_config(path: Option<&Path>) -> CliResult<NerveConfig> {
    NerveConfig::load(path)
        .map_err(|err| CliError::new(format!("failed to load config: {err} ({})", err.code())))
}

/// Reads a file from disk while enforcing a hard size limit.
fn read_bytes_with_limit(path: &Path, max_bytes: usize) -> Result<Vec<u8>, ReadLimitError> {
    let file = File::open(path).map_err(ReadLimitError::Io)?;
    let size = file.metadata().map_err(ReadLimitError::Io)?.len();
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX);
    if size > limit {
        return Err(ReadLimitError::TooLarge {
            size,
            limit: max_bytes,
        });
    }
    let mut bytes = Vec::new();
    file.take(limit.saturating_add(1)).read_to_end(&mut bytes).map_err(ReadLimitError::Io)?;
    if bytes.len() > max_bytes {
        return Err(ReadLimitError::TooLarge {
            size: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            limit: max_bytes,
        });
    }
    Ok(bytes)
}

/// Loads a signing key from disk; accepts raw 32 bytes or base64 text.
fn load_signing_key(path: &Path) -> CliResult<SigningKey> {
    let bytes = read_bytes_with_limit(path, MAX_SIGNING_KEY_BYTES).map_err(|err| match err {
        ReadLimitError::Io(err) => {
            CliError::new(format!("failed to read signing key {}: {err}", path.display()))
        }
        ReadLimitError::TooLarge {
            size,
            limit,
        } => CliError::new(format!(
            "signing key {} is {size} bytes; limit is {limit}",
            path.display()
        )),
    })?;
    let invalid = || CliError::new(format!("signing key {} is invalid", path.display()));
    if bytes.len() == SIGNING_KEY_LEN {
        let key: [u8; SIGNING_KEY_LEN] = bytes.as_slice().try_into().map_err(|_| invalid())?;
        return Ok(SigningKey::from_bytes(&key));
    }
    let text = std::str::from_utf8(&bytes).map_err(|_| invalid())?;
    let decoded = BASE64.decode(text.trim().as_bytes()).map_err(|_| invalid())?;
    let key: [u8; SIGNING_KEY_LEN] = decoded.as_slice().try_into().map_err(|_| invalid())?;
    Ok(SigningKey::from_bytes(&key))
}

/// Writes `bytes` to a file that must not already exist.
fn write_new_file(path: &Path, bytes: &[u8]) -> CliResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|err| CliError::new(format!("failed to create {}: {err}", path.display())))?;
    file.write_all(bytes)
        .map_err(|err| CliError::new(format!("failed to write {}: {err}", path.display())))
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output stream error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    format!("failed to write to {stream}: {error}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
