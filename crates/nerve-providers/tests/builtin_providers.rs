//! Integration tests for the built-in filesystem and system providers.
// crates/nerve-providers/tests/builtin_providers.rs
// =============================================================================
// Module: Built-in Provider Tests
// Description: Filesystem confinement and procfs enumeration against temp dirs.
// Purpose: Ensure built-in providers stay inside their roots and fail cleanly.
// =============================================================================

use std::fs;

use nerve_core::ContextProvider;
use nerve_core::ProviderError;
use nerve_core::SideEffect;
use nerve_providers::FilesystemProvider;
use nerve_providers::SystemProvider;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;

mod common;

use common::TestResult;
use common::ctx;
use common::name;

fn workspace() -> Result<TempDir, String> {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    fs::create_dir(dir.path().join("notes")).map_err(|err| err.to_string())?;
    fs::write(dir.path().join("notes/todo.txt"), "ship it").map_err(|err| err.to_string())?;
    fs::write(dir.path().join("readme.md"), "# hi").map_err(|err| err.to_string())?;
    Ok(dir)
}

fn path_param(dir: &TempDir, rel: &str) -> Value {
    json!({"path": dir.path().join(rel).to_string_lossy()})
}

#[tokio::test]
async fn reads_file_below_root() -> TestResult {
    let dir = workspace()?;
    let provider = FilesystemProvider::new(dir.path(), 1024);
    let payload = provider
        .invoke(&name("read.file")?, &path_param(&dir, "notes/todo.txt"), &ctx())
        .await
        .map_err(|err| err.to_string())?;
    if payload["content"] != json!("ship it") || payload["size"] != json!(7) {
        return Err(format!("unexpected payload {payload}"));
    }
    Ok(())
}

#[tokio::test]
async fn lists_directory_sorted() -> TestResult {
    let dir = workspace()?;
    let provider = FilesystemProvider::new(dir.path(), 1024);
    let payload = provider
        .invoke(&name("read.dir.list")?, &path_param(&dir, ""), &ctx())
        .await
        .map_err(|err| err.to_string())?;
    let expected = json!([
        {"name": "notes", "kind": "dir"},
        {"name": "readme.md", "kind": "file"}
    ]);
    if payload["entries"] != expected {
        return Err(format!("unexpected entries {}", payload["entries"]));
    }
    Ok(())
}

#[tokio::test]
async fn refuses_paths_outside_root() -> TestResult {
    let outer = workspace()?;
    let provider = FilesystemProvider::new(outer.path().join("notes"), 1024);
    let result = provider
        .invoke(&name("read.file")?, &path_param(&outer, "notes/../readme.md"), &ctx())
        .await;
    match result {
        Err(err) if err.code() == "invalid_params" => Ok(()),
        other => Err(format!("expected invalid_params, got {}", describe(other))),
    }
}

#[tokio::test]
async fn refuses_relative_paths_and_large_files() -> TestResult {
    let dir = workspace()?;
    let provider = FilesystemProvider::new(dir.path(), 4);
    let relative =
        provider.invoke(&name("read.file")?, &json!({"path": "readme.md"}), &ctx()).await;
    if !matches!(&relative, Err(err) if err.code() == "invalid_params") {
        return Err(format!("relative path accepted: {}", describe(relative)));
    }
    let large = provider
        .invoke(&name("read.file")?, &path_param(&dir, "notes/todo.txt"), &ctx())
        .await;
    if !matches!(&large, Err(err) if err.code() == "provider_failed") {
        return Err(format!("oversize file accepted: {}", describe(large)));
    }
    Ok(())
}

#[tokio::test]
async fn filesystem_capabilities_are_read_only() -> TestResult {
    let caps = FilesystemProvider::capabilities().map_err(|err| err.to_string())?;
    let all_reads = caps
        .iter()
        .all(|cap| cap.validate().is_ok() && cap.side_effect == SideEffect::None);
    if caps.len() != 2 || !all_reads {
        return Err("filesystem capabilities must be valid reads".to_string());
    }
    Ok(())
}

#[tokio::test]
async fn process_list_reads_fake_procfs() -> TestResult {
    let proc_root = tempfile::tempdir().map_err(|err| err.to_string())?;
    for (pid, comm) in [("42", "nerved\n"), ("7", "init\n")] {
        fs::create_dir(proc_root.path().join(pid)).map_err(|err| err.to_string())?;
        fs::write(proc_root.path().join(pid).join("comm"), comm).map_err(|err| err.to_string())?;
    }
    fs::create_dir(proc_root.path().join("self")).map_err(|err| err.to_string())?;
    let provider = SystemProvider::new(proc_root.path());
    let payload = provider
        .invoke(&name("read.process.list")?, &json!({"limit": 1}), &ctx())
        .await
        .map_err(|err| err.to_string())?;
    let expected = json!({"total": 2, "processes": [{"pid": 7, "name": "init"}]});
    if payload != expected {
        return Err(format!("unexpected payload {payload}"));
    }
    Ok(())
}

#[tokio::test]
async fn missing_procfs_is_unavailable() -> TestResult {
    let provider = SystemProvider::new("/nonexistent/nerve/proc");
    let result = provider.invoke(&name("read.process.list")?, &json!({}), &ctx()).await;
    match result {
        Err(err) if err.code() == "provider_unavailable" => Ok(()),
        other => Err(format!("expected provider_unavailable, got {}", describe(other))),
    }
}

#[tokio::test]
async fn system_info_reports_platform() -> TestResult {
    let provider = SystemProvider::default();
    let payload = provider
        .invoke(&name("read.system.info")?, &json!({}), &ctx())
        .await
        .map_err(|err| err.to_string())?;
    if payload["os"] != json!(std::env::consts::OS) || payload["cpus"].as_u64().unwrap_or(0) == 0 {
        return Err(format!("unexpected payload {payload}"));
    }
    Ok(())
}

fn describe(result: Result<Value, ProviderError>) -> String {
    match result {
        Ok(value) => format!("ok {value}"),
        Err(err) => err.code().to_string(),
    }
}
