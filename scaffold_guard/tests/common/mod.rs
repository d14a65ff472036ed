//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use scaffold_guard::audit::{AuditEntry, AuditEventType, AuditLogger};
use scaffold_guard::setup::tools::{Dimensions, resolve_selections};
use scaffold_guard::setup::{
    EnvironmentSpec, MemoryOperationLog, SetupEnvironment, SetupTools, ToolsSpec,
};
use scaffold_guard::utils::logging::init_test_logging;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const ACCEPTED_SCRIPT: &str = "export default async function ({ ctx, tools }) {}\n";

pub struct Project {
    pub dir: TempDir,
    pub tools: SetupTools,
    pub env: Arc<SetupEnvironment>,
    pub oplog: Arc<MemoryOperationLog>,
    pub audit: Arc<AuditLogger>,
}

pub fn dimensions() -> Dimensions {
    serde_json::from_value(json!({
        "styling": {"type": "single", "values": ["css", "tailwind"], "default": "css"},
        "features": {"type": "multi", "values": ["auth", "docs"]},
    }))
    .unwrap()
}

/// A toolkit over a fresh temporary project named `demo`.
pub fn project(raw_options: &[&str], inputs: Value) -> Project {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let dims = dimensions();
    let raw: Vec<String> = raw_options.iter().map(|s| s.to_string()).collect();
    let env = SetupEnvironment::new(EnvironmentSpec {
        project_dir: dir.path().to_path_buf(),
        project_name: "demo".into(),
        cwd: dir.path().to_path_buf(),
        ide: Some("vscode".into()),
        authoring_mode: "wysiwyg".into(),
        options: resolve_selections(&raw, &dims).unwrap(),
        inputs: inputs.as_object().cloned().unwrap_or_default(),
        constants: json!({"org": "acme"}).as_object().cloned().unwrap(),
    });
    let oplog = Arc::new(MemoryOperationLog::new());
    let audit = AuditLogger::in_memory();
    let tools = SetupTools::create(ToolsSpec {
        project_dir: dir.path().to_path_buf(),
        environment: env.clone(),
        dimensions: dims,
        logger: oplog.clone(),
        audit: audit.clone(),
    })
    .unwrap();
    Project {
        dir,
        tools,
        env,
        oplog,
        audit,
    }
}

pub fn write_script(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("_setup.mjs");
    std::fs::write(&path, body).unwrap();
    path
}

/// Flushed entries of one type.
pub async fn audited(audit: &AuditLogger, event_type: AuditEventType) -> Vec<AuditEntry> {
    audit.flush().await.unwrap();
    audit
        .entries()
        .into_iter()
        .filter(|e| e.event_type() == event_type)
        .collect()
}

/// Tests that run real scripts return early without a `node` binary.
pub fn node_available() -> bool {
    std::process::Command::new("node")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}
