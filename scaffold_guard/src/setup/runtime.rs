use std::path::Path;
use std::sync::Arc;

use super::environment::SetupEnvironment;
use super::error::SandboxError;
use super::host::{HostError, LoadedScript, ScriptExit, ScriptHost};
use super::inspect::{ScriptInspection, inspect_source};
use super::node_host::NodeScriptHost;
use super::policy::{ImportPolicy, SandboxConfig};
use super::tools::SetupTools;
use crate::audit::{AuditLogger, SandboxViolationEvent};

/// Result of a setup run that got as far as invoking the script.
#[derive(Debug)]
pub enum SetupOutcome {
    Completed,
    /// The script threw after it started. Whatever it wrote stays on disk.
    CompletedWithWarning(SandboxError),
}

impl SetupOutcome {
    pub fn warning(&self) -> Option<&SandboxError> {
        match self {
            SetupOutcome::Completed => None,
            SetupOutcome::CompletedWithWarning(err) => Some(err),
        }
    }
}

/// Loads setup scripts under the sandbox guard and runs them through a
/// [`ScriptHost`].
pub struct SetupRuntime {
    audit: Arc<AuditLogger>,
    policy: ImportPolicy,
    host: Arc<dyn ScriptHost>,
}

impl std::fmt::Debug for SetupRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupRuntime")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl SetupRuntime {
    pub fn new(config: &SandboxConfig, audit: Arc<AuditLogger>) -> Self {
        Self {
            audit,
            policy: ImportPolicy::new(&config.allowed_imports),
            host: Arc::new(NodeScriptHost::new(config)),
        }
    }

    pub fn with_host(mut self, host: Arc<dyn ScriptHost>) -> Self {
        self.host = host;
        self
    }

    pub fn policy(&self) -> &ImportPolicy {
        &self.policy
    }

    /// Run the sandbox guard over a script without running it.
    ///
    /// Nothing in the script executes: signature and imports are read from
    /// the source. Every refusal is audited as a sandbox violation.
    pub async fn load_setup_script(&self, path: &Path) -> Result<LoadedScript, SandboxError> {
        let loaded = self.guard(path).await;
        if let Err(err) = &loaded {
            self.report(err, path, None);
        }
        loaded
    }

    async fn guard(&self, path: &Path) -> Result<LoadedScript, SandboxError> {
        let unreadable = |source| SandboxError::Unreadable {
            script: path.to_path_buf(),
            source,
        };
        let absolute = tokio::fs::canonicalize(path).await.map_err(unreadable)?;
        let source = tokio::fs::read_to_string(&absolute)
            .await
            .map_err(unreadable)?;

        let ScriptInspection { imports, entry } =
            inspect_source(&source).map_err(|detail| SandboxError::Unparsable {
                script: path.to_path_buf(),
                detail,
            })?;
        if let Some(blocked) = self.policy.first_blocked(&imports) {
            return Err(SandboxError::BlockedImport {
                script: path.to_path_buf(),
                specifier: blocked.specifier.clone(),
                line: blocked.line,
            });
        }
        let signature = entry.map_err(|detail| SandboxError::InvalidSignature {
            script: path.to_path_buf(),
            detail,
        })?;

        tracing::debug!(
            "Accepted setup script '{}' (binds {})",
            path.display(),
            signature.bindings.join(", ")
        );
        Ok(LoadedScript {
            path: absolute,
            signature,
            imports,
        })
    }

    /// Run an already loaded script. A throw from inside the script comes
    /// back as [`SetupOutcome::CompletedWithWarning`]; failing to start the
    /// host, or a toolkit call leaving the project, is an error.
    pub async fn run_loaded(
        &self,
        script: &LoadedScript,
        env: &SetupEnvironment,
        tools: &SetupTools,
    ) -> Result<SetupOutcome, SandboxError> {
        match self.host.execute(script, env, tools).await {
            Ok(ScriptExit::Completed) => {
                tracing::info!("Setup script '{}' completed", script.path().display());
                Ok(SetupOutcome::Completed)
            }
            Ok(ScriptExit::Threw { message, stack }) => {
                let warning = SandboxError::ScriptFailed {
                    script: script.path().to_path_buf(),
                    message,
                    stack,
                };
                Ok(self.downgrade(warning, tools))
            }
            Ok(ScriptExit::Stopped(violation)) => {
                let err = SandboxError::BoundaryEscape {
                    script: script.path().to_path_buf(),
                    violation,
                };
                self.report(&err, script.path(), Some(env));
                Err(err)
            }
            Ok(ScriptExit::Blocked(specifier)) => {
                let err = SandboxError::RuntimeImport {
                    script: script.path().to_path_buf(),
                    specifier,
                };
                self.report(&err, script.path(), Some(env));
                Err(err)
            }
            Err(HostError::Spawn { program, source }) => {
                let err = SandboxError::HostUnavailable { program, source };
                self.report(&err, script.path(), Some(env));
                Err(err)
            }
            Err(other) => Ok(self.downgrade(SandboxError::Protocol(other.to_string()), tools)),
        }
    }

    /// Guard, then run.
    pub async fn run_setup_script(
        &self,
        path: &Path,
        env: &SetupEnvironment,
        tools: &SetupTools,
    ) -> Result<SetupOutcome, SandboxError> {
        let script = self.load_setup_script(path).await?;
        self.run_loaded(&script, env, tools).await
    }

    fn downgrade(&self, warning: SandboxError, tools: &SetupTools) -> SetupOutcome {
        tracing::warn!("{}", warning);
        tools.logger.warn(&warning.to_string());
        SetupOutcome::CompletedWithWarning(warning)
    }

    fn report(&self, err: &SandboxError, script: &Path, env: Option<&SetupEnvironment>) {
        tracing::warn!("Sandbox refused setup script: {}", err);
        self.audit.log_sandbox_violation(&SandboxViolationEvent {
            violation: err.violation_label().to_string(),
            script: script.display().to_string(),
            detail: err.to_string(),
            project: env.map(|e| e.project_name().to_string()),
            options: env.map(|e| e.options().raw.clone()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditEventType;
    use crate::setup::host::{ReplayEnd, ReplayScriptHost};
    use crate::setup::oplog::LogLevel;
    use crate::setup::protocol::ToolCall;
    use crate::setup::tools::test_support::fixture;
    use serde_json::json;

    const GOOD: &str = "export default async function ({ ctx, tools }) {}\n";

    fn runtime(audit: Arc<AuditLogger>, host: ReplayScriptHost) -> SetupRuntime {
        SetupRuntime::new(&SandboxConfig::default(), audit).with_host(Arc::new(host))
    }

    #[tokio::test]
    async fn rejected_script_never_reaches_the_host() {
        let fx = fixture();
        let scripts = tempfile::tempdir().unwrap();
        let path = scripts.path().join("_setup.mjs");
        std::fs::write(&path, "export default async function (ctx, tools) {}\n").unwrap();

        let host = ReplayScriptHost::new(
            vec![ToolCall::new("files", "write", vec![json!("x.txt"), json!("x")])],
            ReplayEnd::Done,
        );
        let rt = runtime(fx.audit.clone(), host);
        let err = rt
            .run_setup_script(&path, fx.tools.environment(), &fx.tools)
            .await
            .unwrap_err();
        assert!(err.is_rejected());
        assert!(!fx.dir.path().join("x.txt").exists());

        fx.audit.flush().await.unwrap();
        let entries = fx.audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type(), AuditEventType::SandboxViolation);
        assert_eq!(entries[0].field("violation"), Some(&json!("invalid_signature")));
    }

    #[tokio::test]
    async fn blocked_import_names_the_specifier() {
        let fx = fixture();
        let scripts = tempfile::tempdir().unwrap();
        let path = scripts.path().join("_setup.mjs");
        std::fs::write(&path, format!("import {{ rmSync }} from 'node:fs';\n{GOOD}")).unwrap();

        let rt = runtime(fx.audit.clone(), ReplayScriptHost::new(vec![], ReplayEnd::Done));
        match rt.load_setup_script(&path).await {
            Err(SandboxError::BlockedImport { specifier, line, .. }) => {
                assert_eq!(specifier, "node:fs");
                assert_eq!(line, 1);
            }
            other => panic!("expected blocked import, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_script_is_rejected() {
        let fx = fixture();
        let rt = runtime(fx.audit.clone(), ReplayScriptHost::new(vec![], ReplayEnd::Done));
        let err = rt
            .load_setup_script(Path::new("/definitely/not/here/_setup.mjs"))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Unreadable { .. }));
    }

    #[tokio::test]
    async fn throw_after_write_is_a_warning() {
        let fx = fixture();
        let scripts = tempfile::tempdir().unwrap();
        let path = scripts.path().join("_setup.mjs");
        std::fs::write(&path, GOOD).unwrap();

        let host = ReplayScriptHost::new(
            vec![ToolCall::new("files", "write", vec![json!("kept.txt"), json!("k")])],
            ReplayEnd::Throw("boom".into()),
        );
        let rt = runtime(fx.audit.clone(), host);
        let outcome = rt
            .run_setup_script(&path, fx.tools.environment(), &fx.tools)
            .await
            .unwrap();

        let warning = outcome.warning().unwrap();
        assert!(!warning.is_rejected());
        assert!(warning.to_string().contains("boom"));
        assert!(fx.dir.path().join("kept.txt").exists());
        assert_eq!(fx.oplog.operations()[0].paths, vec!["kept.txt"]);
        assert!(fx.oplog.messages(LogLevel::Warn)[0].contains("boom"));
    }

    #[tokio::test]
    async fn escape_attempt_stops_the_script() {
        let fx = fixture();
        let scripts = tempfile::tempdir().unwrap();
        let path = scripts.path().join("_setup.mjs");
        std::fs::write(&path, GOOD).unwrap();

        let host = ReplayScriptHost::new(
            vec![
                ToolCall::new("files", "write", vec![json!("../../etc/evil"), json!("x")]),
                ToolCall::new("files", "write", vec![json!("after.txt"), json!("x")]),
            ],
            ReplayEnd::Done,
        );
        let rt = runtime(fx.audit.clone(), host);
        let err = rt
            .run_setup_script(&path, fx.tools.environment(), &fx.tools)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::BoundaryEscape { .. }));
        assert!(!fx.dir.path().join("after.txt").exists());

        fx.audit.flush().await.unwrap();
        let types: Vec<AuditEventType> = fx.audit.entries().iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec![AuditEventType::BoundaryViolation, AuditEventType::SandboxViolation]
        );
    }

    #[tokio::test]
    async fn import_refused_while_running_is_fatal() {
        let fx = fixture();
        let scripts = tempfile::tempdir().unwrap();
        let path = scripts.path().join("_setup.mjs");
        std::fs::write(&path, GOOD).unwrap();

        let host = ReplayScriptHost::new(
            vec![ToolCall::new("files", "write", vec![json!("kept.txt"), json!("k")])],
            ReplayEnd::Blocked("node:child_process".into()),
        );
        let rt = runtime(fx.audit.clone(), host);
        let err = rt
            .run_setup_script(&path, fx.tools.environment(), &fx.tools)
            .await
            .unwrap_err();
        match &err {
            SandboxError::RuntimeImport { specifier, .. } => {
                assert_eq!(specifier, "node:child_process")
            }
            other => panic!("expected runtime import refusal, got {other:?}"),
        }
        assert!(!err.is_rejected());

        fx.audit.flush().await.unwrap();
        let entries = fx.audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type(), AuditEventType::SandboxViolation);
        assert_eq!(entries[0].field("violation").unwrap(), "blocked_import");
    }

    #[tokio::test]
    async fn unparsable_script_is_rejected() {
        let fx = fixture();
        let scripts = tempfile::tempdir().unwrap();
        let path = scripts.path().join("_setup.mjs");
        std::fs::write(&path, "export default async function ({ ctx }) {
").unwrap();

        let rt = runtime(fx.audit.clone(), ReplayScriptHost::new(vec![], ReplayEnd::Done));
        let err = rt.load_setup_script(&path).await.unwrap_err();
        assert!(matches!(err, SandboxError::Unparsable { .. }));
        assert!(err.is_rejected());
    }

    #[tokio::test]
    async fn missing_interpreter_is_rejected() {
        let fx = fixture();
        let scripts = tempfile::tempdir().unwrap();
        let path = scripts.path().join("_setup.mjs");
        std::fs::write(&path, GOOD).unwrap();

        let config = SandboxConfig {
            interpreter: "scaffold-guard-no-such-interpreter".into(),
            ..SandboxConfig::default()
        };
        let rt = SetupRuntime::new(&config, fx.audit.clone());
        let err = rt
            .run_setup_script(&path, fx.tools.environment(), &fx.tools)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::HostUnavailable { .. }));
        assert!(err.is_rejected());
    }
}
