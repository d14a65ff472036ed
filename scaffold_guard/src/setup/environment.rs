use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Resolved option selections: the tokens as given, plus the per-dimension view.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionSelections {
    pub raw: Vec<String>,
    /// Single-valued dimensions map to a string, multi-valued ones to an array.
    pub by_dimension: Map<String, Value>,
}

impl OptionSelections {
    pub fn selected(&self, dimension: &str) -> Vec<&str> {
        match self.by_dimension.get(dimension) {
            Some(Value::String(s)) => vec![s.as_str()],
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

/// Everything needed to build a [`SetupEnvironment`].
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSpec {
    pub project_dir: PathBuf,
    pub project_name: String,
    pub cwd: PathBuf,
    pub ide: Option<String>,
    pub authoring_mode: String,
    pub options: OptionSelections,
    pub inputs: Map<String, Value>,
    pub constants: Map<String, Value>,
}

/// The read-only context handed to a setup script as `ctx`.
///
/// Built once per invocation and shared by `Arc`; there are no mutators. The
/// serialized form is the contract template authors code against:
/// `{projectDir, projectName, cwd, ide, authoringMode, options: {raw,
/// byDimension}, inputs, constants}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupEnvironment {
    project_dir: PathBuf,
    project_name: String,
    cwd: PathBuf,
    ide: Option<String>,
    authoring_mode: String,
    options: OptionSelections,
    inputs: Map<String, Value>,
    constants: Map<String, Value>,
}

impl SetupEnvironment {
    pub fn new(spec: EnvironmentSpec) -> Arc<Self> {
        Arc::new(Self {
            project_dir: spec.project_dir,
            project_name: spec.project_name,
            cwd: spec.cwd,
            ide: spec.ide,
            authoring_mode: spec.authoring_mode,
            options: spec.options,
            inputs: spec.inputs,
            constants: spec.constants,
        })
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn ide(&self) -> Option<&str> {
        self.ide.as_deref()
    }

    pub fn authoring_mode(&self) -> &str {
        &self.authoring_mode
    }

    pub fn options(&self) -> &OptionSelections {
        &self.options
    }

    pub fn inputs(&self) -> &Map<String, Value> {
        &self.inputs
    }

    pub fn constants(&self) -> &Map<String, Value> {
        &self.constants
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
