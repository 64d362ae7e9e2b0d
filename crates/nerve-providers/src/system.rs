// crates/nerve-providers/src/system.rs
// ============================================================================
// Module: System Provider
// Description: Built-in read capabilities for host and process information.
// Purpose: Give agents situational context about the running system.
// Dependencies: nerve-core, serde_json, tokio
// ============================================================================

//! ## Overview
//! `read.system.info` reports OS, architecture, CPU count, hostname, and
//! uptime. `read.process.list` enumerates processes from `/proc`; on hosts
//! without procfs the provider reports itself unavailable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env::consts;
use std::path::PathBuf;
use std::thread;

use async_trait::async_trait;
use nerve_core::Capability;
use nerve_core::CapabilityName;
use nerve_core::ContextProvider;
use nerve_core::InvocationContext;
use nerve_core::ProviderError;
use serde_json::Value;
use serde_json::json;
use tokio::fs;

use crate::filesystem::builtin_name;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Capability name for host information.
pub const READ_SYSTEM_INFO: &str = "read.system.info";
/// Capability name for the process list.
pub const READ_PROCESS_LIST: &str = "read.process.list";
/// Default process list limit.
const DEFAULT_PROCESS_LIMIT: usize = 256;
/// Hard process list limit.
const MAX_PROCESS_LIMIT: usize = 4096;

// ============================================================================
// SECTION: Provider
// ============================================================================

/// Built-in host information provider.
#[derive(Debug, Clone)]
pub struct SystemProvider {
    /// procfs mount point.
    proc_root: PathBuf,
}

impl Default for SystemProvider {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl SystemProvider {
    /// Creates a provider reading procfs at `proc_root`.
    #[must_use]
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    /// Capabilities served by this provider.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Failed`] if a built-in name fails validation.
    pub fn capabilities() -> Result<Vec<Capability>, ProviderError> {
        Ok(vec![
            Capability::read(builtin_name(READ_SYSTEM_INFO)?)
                .with_description("Host operating system, architecture, and uptime"),
            Capability::read(builtin_name(READ_PROCESS_LIST)?)
                .with_description("Running processes from procfs"),
        ])
    }

    /// Reports host information.
    async fn system_info(&self) -> Value {
        let hostname = fs::read_to_string(self.proc_root.join("sys/kernel/hostname"))
            .await
            .ok()
            .map(|name| name.trim().to_string());
        let uptime_secs = fs::read_to_string(self.proc_root.join("uptime"))
            .await
            .ok()
            .and_then(|text| text.split_whitespace().next().map(str::to_string))
            .and_then(|first| first.parse::<f64>().ok());
        let cpus = thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(1);
        json!({
            "os": consts::OS,
            "family": consts::FAMILY,
            "arch": consts::ARCH,
            "cpus": cpus,
            "hostname": hostname,
            "uptime_secs": uptime_secs,
        })
    }

    /// Lists processes.
    async fn process_list(
        &self,
        params: &Value,
        ctx: &InvocationContext,
    ) -> Result<Value, ProviderError> {
        let limit = match params.get("limit") {
            None | Some(Value::Null) => DEFAULT_PROCESS_LIMIT,
            Some(value) => value
                .as_u64()
                .and_then(|limit| usize::try_from(limit).ok())
                .filter(|limit| (1..=MAX_PROCESS_LIMIT).contains(limit))
                .ok_or_else(|| {
                    ProviderError::InvalidParams(format!(
                        "limit must be between 1 and {MAX_PROCESS_LIMIT}"
                    ))
                })?,
        };
        let mut reader = fs::read_dir(&self.proc_root)
            .await
            .map_err(|err| ProviderError::Unavailable(format!("procfs unavailable: {err}")))?;
        let mut processes = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|err| ProviderError::Failed(err.to_string()))?
        {
            if ctx.cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            let Some(pid) = entry.file_name().to_str().and_then(|name| name.parse::<u32>().ok())
            else {
                continue;
            };
            let Ok(comm) = fs::read_to_string(entry.path().join("comm")).await else {
                continue;
            };
            processes.push((pid, comm.trim().to_string()));
        }
        processes.sort_unstable_by_key(|(pid, _)| *pid);
        let total = processes.len();
        let listed: Vec<Value> = processes
            .into_iter()
            .take(limit)
            .map(|(pid, name)| json!({"pid": pid, "name": name}))
            .collect();
        Ok(json!({
            "total": total,
            "processes": listed,
        }))
    }
}

#[async_trait]
impl ContextProvider for SystemProvider {
    async fn invoke(
        &self,
        capability: &CapabilityName,
        params: &Value,
        ctx: &InvocationContext,
    ) -> Result<Value, ProviderError> {
        match capability.as_str() {
            READ_SYSTEM_INFO => Ok(self.system_info().await),
            READ_PROCESS_LIST => self.process_list(params, ctx).await,
            _ => Err(ProviderError::Unsupported(capability.clone())),
        }
    }
}
