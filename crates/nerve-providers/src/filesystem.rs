// crates/nerve-providers/src/filesystem.rs
// ============================================================================
// Module: Filesystem Provider
// Description: Built-in read capabilities for files and directories.
// Purpose: Serve file contents and listings below a configured root.
// Dependencies: nerve-core, serde_json, tokio
// ============================================================================

//! ## Overview
//! Serves `read.file` and `read.dir.list`. Paths must be absolute. After the
//! session scope has been checked by the guard, the provider additionally
//! resolves symlinks and refuses anything that lands outside its root.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use nerve_core::Capability;
use nerve_core::CapabilityName;
use nerve_core::ContextProvider;
use nerve_core::DataShape;
use nerve_core::InvocationContext;
use nerve_core::ProviderError;
use serde_json::Value;
use serde_json::json;
use tokio::fs;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Capability name for reading a file.
pub const READ_FILE: &str = "read.file";
/// Capability name for listing a directory.
pub const READ_DIR_LIST: &str = "read.dir.list";
/// Maximum directory entries returned.
const MAX_DIR_ENTRIES: usize = 1024;

// ============================================================================
// SECTION: Provider
// ============================================================================

/// Built-in filesystem reader.
#[derive(Debug, Clone)]
pub struct FilesystemProvider {
    /// Directory the provider may read below.
    root: PathBuf,
    /// Largest file returned.
    max_file_bytes: u64,
}

impl FilesystemProvider {
    /// Creates a provider rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, max_file_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_file_bytes,
        }
    }

    /// Capabilities served by this provider.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Failed`] if a built-in name fails validation.
    pub fn capabilities() -> Result<Vec<Capability>, ProviderError> {
        Ok(vec![
            Capability::read(builtin_name(READ_FILE)?)
                .with_description("Read a UTF-8 file below the provider root")
                .with_input_shape(path_params_shape())
                .with_output_shape(DataShape {
                    id: "nerve.fs.file".to_string(),
                    schema: json!({
                        "type": "object",
                        "required": ["path", "size", "content"],
                        "properties": {
                            "path": {"type": "string"},
                            "size": {"type": "integer", "minimum": 0},
                            "content": {"type": "string"}
                        }
                    }),
                }),
            Capability::read(builtin_name(READ_DIR_LIST)?)
                .with_description("List a directory below the provider root")
                .with_input_shape(path_params_shape())
                .with_output_shape(DataShape {
                    id: "nerve.fs.listing".to_string(),
                    schema: json!({
                        "type": "object",
                        "required": ["path", "entries"],
                        "properties": {"entries": {"type": "array"}}
                    }),
                }),
        ])
    }

    /// Resolves a requested path and confirms it stays below the root.
    async fn confine(&self, params: &Value) -> Result<PathBuf, ProviderError> {
        let raw = params
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::InvalidParams("path must be a string".to_string()))?;
        let requested = Path::new(raw);
        if !requested.is_absolute() {
            return Err(ProviderError::InvalidParams("path must be absolute".to_string()));
        }
        let root = fs::canonicalize(&self.root)
            .await
            .map_err(|err| ProviderError::Unavailable(format!("root unavailable: {err}")))?;
        let resolved = fs::canonicalize(requested)
            .await
            .map_err(|err| ProviderError::Failed(format!("cannot resolve {raw}: {err}")))?;
        if !resolved.starts_with(&root) {
            return Err(ProviderError::InvalidParams(format!("{raw} is outside the provider root")));
        }
        Ok(resolved)
    }

    /// Reads one file.
    async fn read_file(&self, params: &Value) -> Result<Value, ProviderError> {
        let path = self.confine(params).await?;
        let metadata = fs::metadata(&path).await.map_err(io_failure)?;
        if !metadata.is_file() {
            return Err(ProviderError::InvalidParams("path is not a regular file".to_string()));
        }
        if metadata.len() > self.max_file_bytes {
            return Err(ProviderError::Failed(format!(
                "file of {} bytes exceeds limit {}",
                metadata.len(),
                self.max_file_bytes
            )));
        }
        let bytes = fs::read(&path).await.map_err(io_failure)?;
        Ok(json!({
            "path": path.to_string_lossy(),
            "size": metadata.len(),
            "content": String::from_utf8_lossy(&bytes),
        }))
    }

    /// Lists one directory.
    async fn list_dir(
        &self,
        params: &Value,
        ctx: &InvocationContext,
    ) -> Result<Value, ProviderError> {
        let path = self.confine(params).await?;
        let mut reader = fs::read_dir(&path).await.map_err(io_failure)?;
        let mut entries = Vec::new();
        let mut truncated = false;
        while let Some(entry) = reader.next_entry().await.map_err(io_failure)? {
            if ctx.cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            if entries.len() == MAX_DIR_ENTRIES {
                truncated = true;
                break;
            }
            let kind = match entry.file_type().await {
                Ok(kind) if kind.is_dir() => "dir",
                Ok(kind) if kind.is_symlink() => "symlink",
                Ok(_) => "file",
                Err(_) => "unknown",
            };
            entries.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "kind": kind,
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        Ok(json!({
            "path": path.to_string_lossy(),
            "entries": entries,
            "truncated": truncated,
        }))
    }
}

#[async_trait]
impl ContextProvider for FilesystemProvider {
    async fn invoke(
        &self,
        capability: &CapabilityName,
        params: &Value,
        ctx: &InvocationContext,
    ) -> Result<Value, ProviderError> {
        match capability.as_str() {
            READ_FILE => self.read_file(params).await,
            READ_DIR_LIST => self.list_dir(params, ctx).await,
            _ => Err(ProviderError::Unsupported(capability.clone())),
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Input shape shared by both capabilities.
fn path_params_shape() -> DataShape {
    DataShape {
        id: "nerve.fs.path".to_string(),
        schema: json!({
            "type": "object",
            "required": ["path"],
            "properties": {"path": {"type": "string", "minLength": 1}}
        }),
    }
}

/// Parses a built-in capability name.
pub(crate) fn builtin_name(raw: &str) -> Result<CapabilityName, ProviderError> {
    CapabilityName::parse(raw).map_err(|err| ProviderError::Failed(err.to_string()))
}

/// Maps an I/O error to a provider failure.
fn io_failure(err: std::io::Error) -> ProviderError {
    ProviderError::Failed(err.to_string())
}
