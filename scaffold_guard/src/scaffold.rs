//! # Scaffold driver
//!
//! Materializes a project from a local template directory and runs the
//! template's setup script inside it:
//!
//! 1. the Validation Gate checks the raw request;
//! 2. `template.json` is read and the option and placeholder inputs are
//!    resolved against it;
//! 3. the setup script, if the template has one, passes the sandbox guard
//!    before anything is written;
//! 4. the template is copied into a fresh project directory through bounded
//!    filesystems on both sides;
//! 5. the setup script runs against a toolkit rooted at the project.
//!
//! A setup script that throws leaves the project in place; the warning is
//! part of the [`ScaffoldReport`].

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::audit::AuditLogger;
use crate::boundary::{BoundaryEnforcer, BoundedFs};
use crate::config::GuardConfig;
use crate::gate::{GateContext, ScaffoldInputValidator, ValidationGate};
use crate::setup::tools::resolve_selections;
use crate::setup::{
    Dimensions, EnvironmentSpec, LoadedScript, OperationLogger, SetupEnvironment, SetupOutcome,
    SetupRuntime, SetupTools, ToolsSpec, TracingOperationLog,
};

pub const MANIFEST_FILE: &str = "template.json";
const COMMAND: &str = "new";
const REQUIRED_FIELDS: &[&str] = &["projectDirectory", "template"];
const NEVER_COPIED: &[&str] = &[".git", "node_modules"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceholderSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `template.json` at the root of a template directory. Every key is
/// optional; a template without a manifest copies as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateManifest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub dimensions: Dimensions,
    pub placeholders: BTreeMap<String, PlaceholderSpec>,
    pub constants: Map<String, Value>,
}

impl TemplateManifest {
    /// Read the manifest from `template_dir`, or an empty one if absent.
    pub async fn load(template_dir: &BoundedFs) -> Result<Self> {
        match template_dir.read_to_string(MANIFEST_FILE).await {
            Ok(text) => serde_json::from_str(&text).with_context(|| {
                format!(
                    "Invalid {} in '{}'",
                    MANIFEST_FILE,
                    template_dir.root().display()
                )
            }),
            Err(e) if e.is_not_found() => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Merge caller-supplied values over declared defaults. Every required
    /// placeholder must end up with a value.
    pub fn resolve_inputs(&self, supplied: &Map<String, Value>) -> Result<Map<String, Value>> {
        let mut inputs = Map::new();
        let mut missing = Vec::new();
        for (name, spec) in &self.placeholders {
            let value = match supplied.get(name) {
                None | Some(Value::Null) => spec.default.clone().map(Value::String),
                Some(value) => Some(value.clone()),
            };
            match value {
                Some(value) => {
                    inputs.insert(name.clone(), value);
                }
                None if spec.required => missing.push(name.as_str()),
                None => {}
            }
        }
        if !missing.is_empty() {
            bail!("Missing required placeholder(s): {}", missing.join(", "));
        }
        for (name, value) in supplied {
            if !self.placeholders.contains_key(name) {
                tracing::debug!("Placeholder '{}' is not declared by the template", name);
                inputs.insert(name.clone(), value.clone());
            }
        }
        Ok(inputs)
    }
}

/// The normalized request the gate hands back.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScaffoldRequest {
    project_directory: String,
    template: String,
    ide: Option<String>,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    placeholders: Map<String, Value>,
    authoring_mode: String,
}

#[derive(Debug)]
pub struct ScaffoldReport {
    pub project_dir: PathBuf,
    pub template_name: String,
    pub files_copied: usize,
    /// `None` when the template has no setup script.
    pub setup: Option<SetupOutcome>,
}

impl ScaffoldReport {
    pub fn warning(&self) -> Option<String> {
        self.setup
            .as_ref()
            .and_then(SetupOutcome::warning)
            .map(ToString::to_string)
    }
}

pub struct Scaffolder {
    gate: ValidationGate,
    runtime: SetupRuntime,
    audit: Arc<AuditLogger>,
    oplog: Arc<dyn OperationLogger>,
    script_name: String,
}

impl std::fmt::Debug for Scaffolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scaffolder")
            .field("gate", &self.gate)
            .field("runtime", &self.runtime)
            .field("script_name", &self.script_name)
            .finish_non_exhaustive()
    }
}

impl Scaffolder {
    pub fn new(config: &GuardConfig, audit: Arc<AuditLogger>) -> Self {
        let sandbox = config.sandbox_config();
        Self {
            gate: ValidationGate::new(
                Arc::new(ScaffoldInputValidator::new()),
                audit.clone(),
                config.gate_config(),
            ),
            runtime: SetupRuntime::new(&sandbox, audit.clone()),
            audit,
            oplog: Arc::new(TracingOperationLog),
            script_name: sandbox.script_name,
        }
    }

    pub fn with_runtime(mut self, runtime: SetupRuntime) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_operation_log(mut self, oplog: Arc<dyn OperationLogger>) -> Self {
        self.oplog = oplog;
        self
    }

    pub fn gate(&self) -> &ValidationGate {
        &self.gate
    }

    pub fn runtime(&self) -> &SetupRuntime {
        &self.runtime
    }

    /// Create a project from `raw` scaffold inputs, resolving relative paths
    /// against `cwd`.
    pub async fn scaffold(&self, raw: &Map<String, Value>, cwd: &Path) -> Result<ScaffoldReport> {
        let context = GateContext::new(COMMAND).with_required_fields(REQUIRED_FIELDS.iter().copied());
        let validated = self.gate.enforce(raw, &context)?;
        let request: ScaffoldRequest =
            serde_json::from_value(validated).context("Gate returned an unexpected shape")?;

        let template_root = cwd.join(&request.template);
        let template_fs = BoundaryEnforcer::new(&template_root, self.audit.clone())
            .with_context(|| format!("Template '{}' is not a directory", request.template))?
            .wrap_fs();
        let manifest = TemplateManifest::load(&template_fs).await?;
        let template_name = manifest.name.clone().unwrap_or_else(|| {
            template_fs
                .root()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| request.template.clone())
        });

        let options = resolve_selections(&request.options, &manifest.dimensions)?;
        let inputs = manifest.resolve_inputs(&request.placeholders)?;

        let script_path = template_fs.root().join(&self.script_name);
        let script = if template_fs.exists(&script_path).await? {
            Some(self.runtime.load_setup_script(&script_path).await?)
        } else {
            None
        };

        let project_dir = self
            .prepare_project_dir(cwd, &request.project_directory)
            .await?;
        let project_fs = BoundaryEnforcer::new(&project_dir, self.audit.clone())?.wrap_fs();
        let files_copied = self.copy_template(&template_fs, &project_fs).await?;
        tracing::info!(
            "Copied {} file(s) from template '{}' into '{}'",
            files_copied,
            template_name,
            project_fs.root().display()
        );

        let setup = match script {
            Some(script) => {
                let environment = SetupEnvironment::new(EnvironmentSpec {
                    project_dir: project_fs.root().to_path_buf(),
                    project_name: request.project_directory.clone(),
                    cwd: cwd.to_path_buf(),
                    ide: request.ide.clone(),
                    authoring_mode: request.authoring_mode.clone(),
                    options,
                    inputs,
                    constants: manifest.constants.clone(),
                });
                Some(
                    self.run_script(&script, environment, manifest.dimensions.clone(), &project_fs)
                        .await?,
                )
            }
            None => None,
        };

        Ok(ScaffoldReport {
            project_dir: project_fs.root().to_path_buf(),
            template_name,
            files_copied,
            setup,
        })
    }

    async fn run_script(
        &self,
        script: &LoadedScript,
        environment: Arc<SetupEnvironment>,
        dimensions: Dimensions,
        project_fs: &BoundedFs,
    ) -> Result<SetupOutcome> {
        let tools = SetupTools::create(ToolsSpec {
            project_dir: project_fs.root().to_path_buf(),
            environment: environment.clone(),
            dimensions,
            logger: self.oplog.clone(),
            audit: self.audit.clone(),
        })?;
        self.runtime
            .run_loaded(script, &environment, &tools)
            .await
            .with_context(|| {
                format!(
                    "Setup script failed; project left at '{}'",
                    project_fs.root().display()
                )
            })
    }

    /// Create `<cwd>/<name>`, refusing one that already has content.
    async fn prepare_project_dir(&self, cwd: &Path, name: &str) -> Result<PathBuf> {
        let parent = BoundaryEnforcer::new(cwd, self.audit.clone())?.wrap_fs();
        if parent.exists(name).await? && !parent.read_dir(name).await?.is_empty() {
            bail!(
                "Project directory '{}' already exists and is not empty",
                cwd.join(name).display()
            );
        }
        parent.create_dir_all(name).await?;
        Ok(parent.enforcer().validate_path(name, "mkdir")?)
    }

    /// Copy every regular file of the template, preserving permissions.
    /// The manifest and the setup script stay behind.
    async fn copy_template(&self, from: &BoundedFs, to: &BoundedFs) -> Result<usize> {
        let root = from.root().to_path_buf();
        let mut copied = 0;
        let mut stack = vec![root.clone()];
        while let Some(dir) = stack.pop() {
            for entry in from.read_dir(&dir).await? {
                let rel = entry
                    .strip_prefix(&root)
                    .map_err(|_| anyhow!("'{}' is outside the template", entry.display()))?
                    .to_path_buf();
                if Self::skipped(&rel, &self.script_name) {
                    continue;
                }
                let meta = from.symlink_metadata(&entry).await?;
                if meta.is_dir() {
                    to.create_dir_all(&rel).await?;
                    stack.push(entry);
                } else if meta.is_file() {
                    let bytes = from.read(&entry).await?;
                    to.write(&rel, bytes).await?;
                    to.set_permissions(&rel, meta.permissions()).await?;
                    copied += 1;
                } else {
                    tracing::debug!("Not copying special file '{}'", rel.display());
                }
            }
        }
        Ok(copied)
    }

    fn skipped(rel: &Path, script_name: &str) -> bool {
        let top_level = rel.components().count() == 1;
        let name = rel.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        NEVER_COPIED.contains(&name) || (top_level && (name == MANIFEST_FILE || name == script_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn placeholder_resolution_applies_defaults_and_requirements() {
        let manifest: TemplateManifest = serde_json::from_value(json!({
            "placeholders": {
                "PROJECT_TITLE": {"required": true},
                "LICENSE": {"default": "MIT"},
                "AUTHOR": {}
            }
        }))
        .unwrap();

        let supplied = json!({"PROJECT_TITLE": "Demo", "EXTRA": "x"});
        let inputs = manifest.resolve_inputs(supplied.as_object().unwrap()).unwrap();
        assert_eq!(inputs["PROJECT_TITLE"], json!("Demo"));
        assert_eq!(inputs["LICENSE"], json!("MIT"));
        assert_eq!(inputs["EXTRA"], json!("x"));
        assert!(!inputs.contains_key("AUTHOR"));

        let err = manifest.resolve_inputs(&Map::new()).unwrap_err();
        assert!(err.to_string().contains("PROJECT_TITLE"));
    }

    #[test]
    fn manifest_and_script_stay_behind() {
        assert!(Scaffolder::skipped(Path::new("template.json"), "_setup.mjs"));
        assert!(Scaffolder::skipped(Path::new("_setup.mjs"), "_setup.mjs"));
        assert!(Scaffolder::skipped(Path::new("web/node_modules"), "_setup.mjs"));
        assert!(!Scaffolder::skipped(Path::new("docs/template.json"), "_setup.mjs"));
        assert!(!Scaffolder::skipped(Path::new("src/main.rs"), "_setup.mjs"));
    }
}
