//! # Guard Configuration
//!
//! Optional TOML file tuning the three layers. Every key has a default, so an
//! empty file (or no file at all) gives the stock behavior:
//!
//! ```toml
//! [gate]
//! cache_capacity = 1000
//! abuse_threshold = 10
//! abuse_window_secs = 60
//!
//! [audit]
//! log_file = "/var/log/scaffold/audit.jsonl"
//! flush_threshold = 10
//! idle_flush_ms = 1000
//! echo = false
//!
//! [sandbox]
//! interpreter = "node"
//! interpreter_args = []
//! allowed_imports = []
//! script_name = "_setup.mjs"
//! ```
//!
//! Unknown keys are rejected so a typo cannot silently fall back to a default.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audit::{AuditConfig, DEFAULT_FLUSH_THRESHOLD, DEFAULT_IDLE_FLUSH};
use crate::gate::{DEFAULT_ABUSE_THRESHOLD, DEFAULT_ABUSE_WINDOW, DEFAULT_CACHE_CAPACITY, GateConfig};
use crate::setup::{DEFAULT_INTERPRETER, DEFAULT_SCRIPT_NAME, SandboxConfig};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardConfig {
    pub gate: GateSection,
    pub audit: AuditSection,
    pub sandbox: SandboxSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateSection {
    pub cache_capacity: usize,
    pub abuse_threshold: u32,
    pub abuse_window_secs: u64,
}

impl Default for GateSection {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            abuse_threshold: DEFAULT_ABUSE_THRESHOLD,
            abuse_window_secs: DEFAULT_ABUSE_WINDOW.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    pub flush_threshold: usize,
    pub idle_flush_ms: u64,
    pub echo: bool,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            log_file: None,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            idle_flush_ms: DEFAULT_IDLE_FLUSH.as_millis() as u64,
            echo: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxSection {
    pub interpreter: String,
    pub interpreter_args: Vec<String>,
    pub allowed_imports: Vec<String>,
    pub script_name: String,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            interpreter: DEFAULT_INTERPRETER.to_string(),
            interpreter_args: Vec::new(),
            allowed_imports: Vec::new(),
            script_name: DEFAULT_SCRIPT_NAME.to_string(),
        }
    }
}

impl GuardConfig {
    /// Read and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Invalid config file '{}'", path.display()))
    }

    /// `Ok(default)` when `path` is `None`; a given path must exist.
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            cache_capacity: self.gate.cache_capacity,
            abuse_threshold: self.gate.abuse_threshold,
            abuse_window: Duration::from_secs(self.gate.abuse_window_secs),
        }
    }

    /// `log_file` here wins over nothing; the CLI may still override it.
    pub fn audit_config(&self) -> AuditConfig {
        let base = match &self.audit.log_file {
            Some(path) => AuditConfig::to_file(path),
            None => AuditConfig::in_memory(),
        };
        base.with_flush_threshold(self.audit.flush_threshold)
            .with_idle_flush(Duration::from_millis(self.audit.idle_flush_ms))
            .with_echo(self.audit.echo)
    }

    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            interpreter: self.sandbox.interpreter.clone(),
            interpreter_args: self.sandbox.interpreter_args.clone(),
            allowed_imports: self.sandbox.allowed_imports.clone(),
            script_name: self.sandbox.script_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = GuardConfig::from_toml_str("").unwrap();
        assert_eq!(config, GuardConfig::default());
        let gate = config.gate_config();
        assert_eq!(gate.cache_capacity, 1000);
        assert_eq!(gate.abuse_threshold, 10);
        assert_eq!(gate.abuse_window, Duration::from_secs(60));
        assert_eq!(config.sandbox_config().interpreter, "node");
        assert!(config.audit_config().log_file.is_none());
    }

    #[test]
    fn sections_override_defaults() {
        let config = GuardConfig::from_toml_str(
            r#"
            [gate]
            abuse_threshold = 3

            [audit]
            log_file = "audit.jsonl"
            idle_flush_ms = 250

            [sandbox]
            allowed_imports = ["node:path"]
            "#,
        )
        .unwrap();
        assert_eq!(config.gate_config().abuse_threshold, 3);
        assert_eq!(config.gate_config().cache_capacity, 1000);
        let audit = config.audit_config();
        assert_eq!(audit.log_file.as_deref(), Some(Path::new("audit.jsonl")));
        assert_eq!(audit.idle_flush, Duration::from_millis(250));
        assert_eq!(config.sandbox_config().allowed_imports, vec!["node:path"]);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(GuardConfig::from_toml_str("[gate]\nabuse_treshold = 3\n").is_err());
        assert!(GuardConfig::from_toml_str("[plugins]\n").is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GuardConfig::load_optional(Some(&dir.path().join("nope.toml"))).is_err());
        assert_eq!(GuardConfig::load_optional(None).unwrap(), GuardConfig::default());
    }
}
