//! # Capability Toolkit
//!
//! The only things a setup script can do. Built fresh for each run and closed
//! over one project directory: every disk-touching call resolves its paths
//! through the project's [`BoundaryEnforcer`] before any I/O happens, and
//! every mutating call is recorded with the project name and selected
//! options through the [`OperationLogger`].
//!
//! Rust callers use the namespace structs directly (`tools.files.write(..)`);
//! a hosted script reaches the same methods through [`SetupTools::dispatch`].

mod files;
mod ide;
mod inputs;
mod json;
mod logger;
mod options;
mod placeholders;
mod templates;
mod text;

pub use files::FilesTools;
pub use ide::{IdePreset, IdeTools, preset_for};
pub use inputs::InputsTools;
pub use json::JsonTools;
pub use logger::LoggerTools;
pub use options::{DimensionKind, DimensionSpec, Dimensions, OptionsTools, resolve_selections};
pub use placeholders::{PlaceholderTools, placeholder_token};
pub use templates::TemplateTools;
pub use text::TextTools;

use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use super::environment::SetupEnvironment;
use super::error::ToolError;
use super::oplog::{OperationLogger, OperationRecord};
use super::protocol::ToolCall;
use crate::audit::AuditLogger;
use crate::boundary::{BoundaryEnforcer, BoundedFs};

/// Directories never descended into when walking a project.
pub(crate) const SKIPPED_DIRS: &[&str] = &[".git", "node_modules"];

/// Protocol method names per namespace.
pub fn namespaces() -> &'static BTreeMap<&'static str, &'static [&'static str]> {
    static NAMESPACES: OnceLock<BTreeMap<&'static str, &'static [&'static str]>> = OnceLock::new();
    NAMESPACES.get_or_init(|| {
        BTreeMap::from([
            (
                "files",
                &["ensureDirs", "write", "read", "exists", "list", "copy", "move", "remove"][..],
            ),
            (
                "text",
                &["insertAfter", "ensureBlock", "replaceBetween", "appendLines", "replace"][..],
            ),
            (
                "json",
                &["read", "merge", "set", "remove", "addToArray", "mergeArray"][..],
            ),
            (
                "placeholders",
                &["replaceAll", "replaceInFile", "applyInputs"][..],
            ),
            ("ide", &["selected", "applyPreset"][..]),
            ("templates", &["renderString", "renderFile", "copy"][..]),
            ("options", &["list", "byDimension", "has", "in", "require"][..]),
            ("inputs", &["get", "all"][..]),
            ("logger", &["info", "warn", "error"][..]),
        ])
    })
}

/// What `SetupTools::create` needs.
pub struct ToolsSpec {
    pub project_dir: PathBuf,
    pub environment: Arc<SetupEnvironment>,
    pub dimensions: Dimensions,
    pub logger: Arc<dyn OperationLogger>,
    pub audit: Arc<AuditLogger>,
}

/// State shared by every namespace of one toolkit.
pub(crate) struct ToolScope {
    fs: BoundedFs,
    env: Arc<SetupEnvironment>,
    dimensions: Dimensions,
    oplog: Arc<dyn OperationLogger>,
}

impl ToolScope {
    pub(crate) fn fs(&self) -> &BoundedFs {
        &self.fs
    }

    pub(crate) fn env(&self) -> &SetupEnvironment {
        &self.env
    }

    pub(crate) fn dimensions(&self) -> &Dimensions {
        &self.dimensions
    }

    pub(crate) fn oplog(&self) -> &dyn OperationLogger {
        self.oplog.as_ref()
    }

    /// Validate a path for `operation`; audited on refusal.
    pub(crate) fn resolve(&self, path: impl AsRef<Path>, operation: &str) -> Result<PathBuf, ToolError> {
        Ok(self.fs.enforcer().validate_path(path, operation)?)
    }

    pub(crate) fn resolve_destructive(
        &self,
        path: impl AsRef<Path>,
        operation: &str,
    ) -> Result<PathBuf, ToolError> {
        Ok(self.fs.enforcer().validate_destructive(path, operation)?)
    }

    pub(crate) fn relative(&self, validated: &Path) -> String {
        self.fs.enforcer().relative(validated)
    }

    pub(crate) fn record(&self, operation: &str, paths: &[&Path]) {
        self.oplog.operation(&OperationRecord {
            operation: operation.to_string(),
            project: self.env.project_name().to_string(),
            options: self.env.options().raw.clone(),
            paths: paths.iter().map(|p| self.relative(p)).collect(),
        });
    }

    pub(crate) async fn read_text(&self, path: &Path) -> Result<String, ToolError> {
        Ok(self.fs.read_to_string(path).await?)
    }

    /// Read a file, treating a missing one as empty.
    pub(crate) async fn read_text_or_empty(&self, path: &Path) -> Result<String, ToolError> {
        match self.fs.read_to_string(path).await {
            Ok(text) => Ok(text),
            Err(e) if e.is_not_found() => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a file, creating its parent directories inside the root.
    pub(crate) async fn write_text(&self, path: &Path, contents: &str) -> Result<(), ToolError> {
        if let Some(parent) = path.parent() {
            self.fs.create_dir_all(parent).await?;
        }
        self.fs.write(path, contents).await?;
        Ok(())
    }

    /// Every regular file under `dir`, depth-first, skipping [`SKIPPED_DIRS`].
    pub(crate) async fn walk_files(&self, dir: &Path) -> Result<Vec<PathBuf>, ToolError> {
        let mut files = Vec::new();
        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            let meta = self.fs.symlink_metadata(&current).await?;
            if meta.is_dir() {
                for child in self.fs.read_dir(&current).await?.into_iter().rev() {
                    let skipped = child
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| SKIPPED_DIRS.contains(&n));
                    if !skipped {
                        stack.push(child);
                    }
                }
            } else if meta.is_file() {
                files.push(current);
            }
        }
        Ok(files)
    }
}

/// The toolkit handed to one setup-script run.
#[derive(Clone)]
pub struct SetupTools {
    pub files: FilesTools,
    pub text: TextTools,
    pub json: JsonTools,
    pub placeholders: PlaceholderTools,
    pub ide: IdeTools,
    pub templates: TemplateTools,
    pub options: OptionsTools,
    pub inputs: InputsTools,
    pub logger: LoggerTools,
    scope: Arc<ToolScope>,
}

impl std::fmt::Debug for SetupTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupTools")
            .field("root", &self.scope.fs.root())
            .field("project", &self.scope.env.project_name())
            .finish_non_exhaustive()
    }
}

impl SetupTools {
    /// Build a toolkit rooted at `spec.project_dir`, which must already exist.
    pub fn create(spec: ToolsSpec) -> anyhow::Result<Self> {
        let enforcer = BoundaryEnforcer::new(&spec.project_dir, spec.audit)?.with_attribution(
            spec.environment.project_name(),
            spec.environment.options().raw.clone(),
        );
        let scope = Arc::new(ToolScope {
            fs: enforcer.wrap_fs(),
            env: spec.environment,
            dimensions: spec.dimensions,
            oplog: spec.logger,
        });
        Ok(Self {
            files: FilesTools::new(scope.clone()),
            text: TextTools::new(scope.clone()),
            json: JsonTools::new(scope.clone()),
            placeholders: PlaceholderTools::new(scope.clone()),
            ide: IdeTools::new(scope.clone()),
            templates: TemplateTools::new(scope.clone()),
            options: OptionsTools::new(scope.clone()),
            inputs: InputsTools::new(scope.clone()),
            logger: LoggerTools::new(scope.clone()),
            scope,
        })
    }

    pub fn root(&self) -> &Path {
        self.scope.fs.root()
    }

    pub fn environment(&self) -> &SetupEnvironment {
        &self.scope.env
    }

    pub fn enforcer(&self) -> &BoundaryEnforcer {
        self.scope.fs.enforcer()
    }

    /// Execute one protocol call against the matching namespace method.
    pub async fn dispatch(&self, call: &ToolCall) -> Result<Value, ToolError> {
        let args = Args {
            call,
            enforcer: self.enforcer(),
        };
        match (call.namespace.as_str(), call.method.as_str()) {
            ("files", "ensureDirs") => {
                let dirs = args.paths(0)?;
                self.files.ensure_dirs(&dirs).await?;
                Ok(Value::Null)
            }
            ("files", "write") => {
                self.files
                    .write(args.path(0)?, &args.string(1)?)
                    .await?;
                Ok(Value::Null)
            }
            ("files", "read") => Ok(json!(self.files.read(args.path(0)?).await?)),
            ("files", "exists") => Ok(json!(self.files.exists(args.path(0)?).await?)),
            ("files", "list") => {
                let dir = args.opt_path(0)?.unwrap_or_else(|| ".".to_string());
                Ok(json!(self.files.list(dir).await?))
            }
            ("files", "copy") => {
                let copied = self.files.copy(args.path(0)?, args.path(1)?).await?;
                Ok(json!(copied))
            }
            ("files", "move") => {
                self.files.move_path(args.path(0)?, args.path(1)?).await?;
                Ok(Value::Null)
            }
            ("files", "remove") => Ok(json!(self.files.remove(args.path(0)?).await?)),

            ("text", "insertAfter") => {
                let changed = self
                    .text
                    .insert_after(args.path(0)?, &args.string(1)?, &args.string(2)?)
                    .await?;
                Ok(json!(changed))
            }
            ("text", "ensureBlock") => {
                let changed = self
                    .text
                    .ensure_block(args.path(0)?, &args.string(1)?)
                    .await?;
                Ok(json!(changed))
            }
            ("text", "replaceBetween") => {
                let changed = self
                    .text
                    .replace_between(
                        args.path(0)?,
                        &args.string(1)?,
                        &args.string(2)?,
                        &args.string(3)?,
                    )
                    .await?;
                Ok(json!(changed))
            }
            ("text", "appendLines") => {
                let added = self
                    .text
                    .append_lines(args.path(0)?, &args.strings(1)?)
                    .await?;
                Ok(json!(added))
            }
            ("text", "replace") => {
                let count = self
                    .text
                    .replace(args.path(0)?, &args.string(1)?, &args.string(2)?)
                    .await?;
                Ok(json!(count))
            }

            ("json", "read") => Ok(self.json.read(args.path(0)?).await?),
            ("json", "merge") => {
                let patch = args.required(1)?.clone();
                Ok(self.json.merge(args.path(0)?, patch).await?)
            }
            ("json", "set") => {
                let value = args.required(2)?.clone();
                self.json
                    .set(args.path(0)?, &args.string(1)?, value)
                    .await?;
                Ok(Value::Null)
            }
            ("json", "remove") => {
                let removed = self.json.remove(args.path(0)?, &args.string(1)?).await?;
                Ok(json!(removed))
            }
            ("json", "addToArray") => {
                let value = args.required(2)?.clone();
                let unique = args.opt_bool(3)?.unwrap_or(false);
                let added = self
                    .json
                    .add_to_array(args.path(0)?, &args.string(1)?, value, unique)
                    .await?;
                Ok(json!(added))
            }
            ("json", "mergeArray") => {
                let values = args.array(2)?;
                let added = self
                    .json
                    .merge_array(args.path(0)?, &args.string(1)?, values)
                    .await?;
                Ok(json!(added))
            }

            ("placeholders", "replaceAll") => {
                let values = args.object(1)?;
                Ok(json!(self.placeholders.replace_all(&args.string(0)?, &values)))
            }
            ("placeholders", "replaceInFile") => {
                let values = args.object(1)?;
                let count = self
                    .placeholders
                    .replace_in_file(args.path(0)?, &values)
                    .await?;
                Ok(json!(count))
            }
            ("placeholders", "applyInputs") => {
                let include = match args.value(0) {
                    Some(_) => Some(args.paths(0)?),
                    None => None,
                };
                Ok(json!(self.placeholders.apply_inputs(include.as_deref()).await?))
            }

            ("ide", "selected") => Ok(json!(self.ide.selected())),
            ("ide", "applyPreset") => {
                let ide = args.opt_string(0)?;
                let settings = args.object(1)?;
                Ok(json!(self.ide.apply_preset(ide.as_deref(), &settings).await?))
            }

            ("templates", "renderString") => {
                let data = args.object(1)?;
                Ok(json!(self.templates.render_string(&args.string(0)?, &data)))
            }
            ("templates", "renderFile") => {
                let data = args.object(1)?;
                self.templates.render_file(args.path(0)?, &data).await?;
                Ok(Value::Null)
            }
            ("templates", "copy") => {
                let data = args.object(2)?;
                self.templates
                    .copy(args.path(0)?, args.path(1)?, &data)
                    .await?;
                Ok(Value::Null)
            }

            ("options", "list") => Ok(json!(self.options.list())),
            ("options", "byDimension") => Ok(Value::Object(self.options.by_dimension())),
            ("options", "has") => Ok(json!(self.options.has(&args.string(0)?)?)),
            ("options", "in") => {
                let selected = self
                    .options
                    .in_dimension(&args.string(0)?, &args.string(1)?)?;
                Ok(json!(selected))
            }
            ("options", "require") => Ok(self.options.require(&args.string(0)?)?),

            ("inputs", "get") => Ok(self.inputs.get(&args.string(0)?).unwrap_or(Value::Null)),
            ("inputs", "all") => Ok(Value::Object(self.inputs.all())),

            ("logger", "info") => {
                self.logger.info(&args.message());
                Ok(Value::Null)
            }
            ("logger", "warn") => {
                self.logger.warn(&args.message());
                Ok(Value::Null)
            }
            ("logger", "error") => {
                self.logger.error(&args.message());
                Ok(Value::Null)
            }

            _ => Err(ToolError::UnknownMethod {
                namespace: call.namespace.clone(),
                method: call.method.clone(),
            }),
        }
    }
}

/// Typed access to positional protocol arguments.
struct Args<'a> {
    call: &'a ToolCall,
    enforcer: &'a BoundaryEnforcer,
}

impl Args<'_> {
    fn value(&self, i: usize) -> Option<&Value> {
        self.call.args.get(i).filter(|v| !v.is_null())
    }

    fn required(&self, i: usize) -> Result<&Value, ToolError> {
        self.value(i)
            .ok_or_else(|| ToolError::invalid(self.call.name(), format!("argument {} is required", i + 1)))
    }

    fn string(&self, i: usize) -> Result<String, ToolError> {
        match self.required(i)? {
            Value::String(s) => Ok(s.clone()),
            _ => Err(ToolError::invalid(
                self.call.name(),
                format!("argument {} must be a string", i + 1),
            )),
        }
    }

    fn opt_string(&self, i: usize) -> Result<Option<String>, ToolError> {
        match self.value(i) {
            None => Ok(None),
            Some(_) => self.string(i).map(Some),
        }
    }

    fn opt_bool(&self, i: usize) -> Result<Option<bool>, ToolError> {
        match self.value(i) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(ToolError::invalid(
                self.call.name(),
                format!("argument {} must be a boolean", i + 1),
            )),
        }
    }

    fn strings(&self, i: usize) -> Result<Vec<String>, ToolError> {
        match self.required(i)? {
            Value::String(s) => Ok(vec![s.clone()]),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    _ => Err(ToolError::invalid(
                        self.call.name(),
                        format!("argument {} must contain only strings", i + 1),
                    )),
                })
                .collect(),
            _ => Err(ToolError::invalid(
                self.call.name(),
                format!("argument {} must be a string or an array of strings", i + 1),
            )),
        }
    }

    fn array(&self, i: usize) -> Result<Vec<Value>, ToolError> {
        match self.required(i)? {
            Value::Array(items) => Ok(items.clone()),
            _ => Err(ToolError::invalid(
                self.call.name(),
                format!("argument {} must be an array", i + 1),
            )),
        }
    }

    /// Optional object argument; absent means empty.
    fn object(&self, i: usize) -> Result<Map<String, Value>, ToolError> {
        match self.value(i) {
            None => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(_) => Err(ToolError::invalid(
                self.call.name(),
                format!("argument {} must be an object", i + 1),
            )),
        }
    }

    /// A path argument. Non-strings are boundary violations, not argument errors.
    fn path(&self, i: usize) -> Result<String, ToolError> {
        let value = self.call.args.get(i).unwrap_or(&Value::Null);
        self.path_value(value)
    }

    fn opt_path(&self, i: usize) -> Result<Option<String>, ToolError> {
        match self.value(i) {
            None => Ok(None),
            Some(value) => self.path_value(value).map(Some),
        }
    }

    fn paths(&self, i: usize) -> Result<Vec<String>, ToolError> {
        match self.call.args.get(i) {
            Some(Value::Array(items)) => items.iter().map(|v| self.path_value(v)).collect(),
            Some(value) => Ok(vec![self.path_value(value)?]),
            None => Err(ToolError::invalid(
                self.call.name(),
                format!("argument {} is required", i + 1),
            )),
        }
    }

    fn path_value(&self, value: &Value) -> Result<String, ToolError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => {
                let validated = self.enforcer.validate_value(other, &self.call.name())?;
                Ok(validated.to_string_lossy().into_owned())
            }
        }
    }

    /// Logger arguments joined the way `console.log` would.
    fn message(&self) -> String {
        self.call
            .args
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::fixture;
    use super::*;
    use crate::boundary::ViolationType;

    fn call(namespace: &str, method: &str, args: Vec<Value>) -> ToolCall {
        ToolCall::new(namespace, method, args)
    }

    #[test]
    fn every_namespace_is_listed() {
        let names: Vec<&str> = namespaces().keys().copied().collect();
        assert_eq!(
            names,
            vec![
                "files",
                "ide",
                "inputs",
                "json",
                "logger",
                "options",
                "placeholders",
                "templates",
                "text"
            ]
        );
    }

    #[tokio::test]
    async fn dispatch_routes_to_namespaces() {
        let fx = fixture();
        fx.tools
            .dispatch(&call("files", "write", vec![json!("src/a.txt"), json!("hello")]))
            .await
            .unwrap();
        let read = fx
            .tools
            .dispatch(&call("files", "read", vec![json!("src/a.txt")]))
            .await
            .unwrap();
        assert_eq!(read, json!("hello"));

        let has = fx
            .tools
            .dispatch(&call("options", "has", vec![json!("styling=tailwind")]))
            .await
            .unwrap();
        assert_eq!(has, json!(true));

        let title = fx
            .tools
            .dispatch(&call("inputs", "get", vec![json!("PROJECT_TITLE")]))
            .await
            .unwrap();
        assert_eq!(title, json!("Demo App"));
    }

    #[tokio::test]
    async fn non_string_path_is_an_invalid_type_violation() {
        let fx = fixture();
        let err = fx
            .tools
            .dispatch(&call("files", "write", vec![json!(42), json!("x")]))
            .await
            .unwrap_err();
        let violation = err.as_boundary_violation().unwrap();
        assert_eq!(violation.violation_type, ViolationType::InvalidType);
    }

    #[tokio::test]
    async fn escape_attempt_is_refused_and_nothing_written() {
        let fx = fixture();
        let err = fx
            .tools
            .dispatch(&call(
                "files",
                "write",
                vec![json!("../outside.txt"), json!("x")],
            ))
            .await
            .unwrap_err();
        assert_eq!(
            err.as_boundary_violation().unwrap().violation_type,
            ViolationType::PathTraversal
        );
        assert!(!fx.dir.path().parent().unwrap().join("outside.txt").exists());
        assert!(fx.oplog.operations().is_empty());
    }

    #[tokio::test]
    async fn unknown_method_is_reported() {
        let fx = fixture();
        let err = fx
            .tools
            .dispatch(&call("files", "chmod", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownMethod { .. }));
        assert_eq!(err.to_string(), "Unknown tool 'files.chmod'");
    }

    #[tokio::test]
    async fn mutating_calls_are_attributed() {
        let fx = fixture();
        fx.tools.files.write("notes.txt", "n").await.unwrap();
        let ops = fx.oplog.operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].operation, "files.write");
        assert_eq!(ops[0].project, "demo");
        assert_eq!(ops[0].options, vec!["styling=tailwind", "auth"]);
        assert_eq!(ops[0].paths, vec!["notes.txt"]);
    }
}
