use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::error::{BoundaryViolation, ViolationType};
use super::fs::BoundedFs;
use super::normalize::normalize_path_lexically;
use crate::audit::{AuditLogger, BoundaryViolationEvent};

/// Resolves and validates paths against one canonical root directory.
///
/// The root is fixed at construction; clones share nothing mutable, so an
/// enforcer can be handed to as many components as need it.
#[derive(Clone)]
pub struct BoundaryEnforcer {
    root: PathBuf,
    audit: Arc<AuditLogger>,
    attribution: Option<Attribution>,
}

/// Who a refused path is charged to in the audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub project: String,
    pub options: Vec<String>,
}

impl std::fmt::Debug for BoundaryEnforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundaryEnforcer")
            .field("root", &self.root)
            .field("attribution", &self.attribution)
            .finish_non_exhaustive()
    }
}

impl BoundaryEnforcer {
    /// Create an enforcer rooted at `root`, which must be an existing directory.
    ///
    /// The filesystem root itself is never a valid boundary.
    pub fn new(root: impl AsRef<Path>, audit: Arc<AuditLogger>) -> Result<Self> {
        let root = root.as_ref();
        if root.as_os_str().is_empty() {
            return Err(anyhow!("Boundary root must not be empty"));
        }

        let canonical = std::fs::canonicalize(root)
            .with_context(|| format!("Failed to canonicalize boundary root '{}'", root.display()))?;

        if !canonical.is_dir() {
            return Err(anyhow!(
                "Boundary root '{}' is not a directory",
                canonical.display()
            ));
        }
        if canonical.parent().is_none() {
            return Err(anyhow!(
                "Root '/' is not a valid boundary (resolved from '{}')",
                root.display()
            ));
        }

        Ok(Self {
            root: canonical,
            audit,
            attribution: None,
        })
    }

    /// Stamp every audited refusal with the project and options of a run.
    pub fn with_attribution(mut self, project: impl Into<String>, options: Vec<String>) -> Self {
        self.attribution = Some(Attribution {
            project: project.into(),
            options,
        });
        self
    }

    pub fn attribution(&self) -> Option<&Attribution> {
        self.attribution.as_ref()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    /// Resolve `path` against the root and return it only if it stays inside.
    ///
    /// Every refusal is audited as a boundary violation before it is returned.
    pub fn validate_path(
        &self,
        path: impl AsRef<Path>,
        operation: &str,
    ) -> Result<PathBuf, BoundaryViolation> {
        self.check(path.as_ref(), operation)
            .map_err(|violation| self.report(violation))
    }

    /// Like [`validate_path`](Self::validate_path), and also refuses the
    /// root itself. For operations that would remove or relocate their target.
    pub fn validate_destructive(
        &self,
        path: impl AsRef<Path>,
        operation: &str,
    ) -> Result<PathBuf, BoundaryViolation> {
        let resolved = self.validate_path(path.as_ref(), operation)?;
        if resolved == self.root {
            return Err(self.report(BoundaryViolation {
                violation_type: ViolationType::RootTarget,
                operation: operation.to_string(),
                attempted_path: path.as_ref().to_string_lossy().into_owned(),
                resolved_path: Some(resolved),
                allowed_root: self.root.clone(),
            }));
        }
        Ok(resolved)
    }

    /// Validate a batch; the first refusal aborts the whole batch.
    pub fn validate_paths<P: AsRef<Path>>(
        &self,
        paths: &[P],
        operation: &str,
    ) -> Result<Vec<PathBuf>, BoundaryViolation> {
        paths
            .iter()
            .map(|p| self.validate_path(p, operation))
            .collect()
    }

    /// Validate a path that arrived as untyped data (for example over the
    /// setup-script protocol). Anything other than a JSON string is refused.
    pub fn validate_value(
        &self,
        value: &Value,
        operation: &str,
    ) -> Result<PathBuf, BoundaryViolation> {
        match value {
            Value::String(s) => self.validate_path(s, operation),
            other => Err(self.report(BoundaryViolation {
                violation_type: ViolationType::InvalidType,
                operation: operation.to_string(),
                attempted_path: other.to_string(),
                resolved_path: None,
                allowed_root: self.root.clone(),
            })),
        }
    }

    /// Non-throwing check. Refusals are neither raised nor audited.
    pub fn is_within_boundaries(&self, path: impl AsRef<Path>) -> bool {
        self.check(path.as_ref(), "contains").is_ok()
    }

    /// Root-relative display form of a validated path (`.` for the root).
    pub fn relative(&self, validated: &Path) -> String {
        match validated.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => validated.to_string_lossy().into_owned(),
        }
    }

    /// Filesystem façade whose every path argument passes through this enforcer.
    pub fn wrap_fs(&self) -> BoundedFs {
        BoundedFs::new(self.clone())
    }

    fn contains(&self, candidate: &Path) -> bool {
        // Component-wise: "/tmp/proj2" does not start with "/tmp/proj".
        candidate == self.root || candidate.starts_with(&self.root)
    }

    fn check(&self, path: &Path, operation: &str) -> Result<PathBuf, BoundaryViolation> {
        let attempted = path.to_string_lossy().into_owned();
        let violation = |violation_type, resolved_path| BoundaryViolation {
            violation_type,
            operation: operation.to_string(),
            attempted_path: attempted.clone(),
            resolved_path,
            allowed_root: self.root.clone(),
        };

        if attempted.contains('\0') {
            return Err(violation(ViolationType::NullByte, None));
        }

        let full_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let resolved = normalize_path_lexically(&full_path);

        if !self.contains(&resolved) {
            return Err(violation(ViolationType::PathTraversal, Some(resolved)));
        }

        if let Some(real) = resolve_existing(&resolved)
            && !self.contains(&real)
        {
            return Err(violation(ViolationType::SymlinkEscape, Some(real)));
        }

        Ok(resolved)
    }

    fn report(&self, violation: BoundaryViolation) -> BoundaryViolation {
        tracing::warn!(
            operation = %violation.operation,
            violation_type = %violation.violation_type,
            "Refused path '{}' for root '{}'",
            violation.attempted_path,
            self.root.display()
        );
        self.audit.log_boundary_violation(&BoundaryViolationEvent {
            operation: violation.operation.clone(),
            violation_type: violation.violation_type.to_string(),
            attempted_path: violation.attempted_path.clone(),
            resolved_path: violation
                .resolved_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            allowed_root: self.root.to_string_lossy().into_owned(),
            project: self.attribution.as_ref().map(|a| a.project.clone()),
            options: self.attribution.as_ref().map(|a| a.options.clone()),
        });
        violation
    }
}

/// Resolve symlinks along `path` as far as the filesystem allows.
///
/// Canonicalizes the deepest existing ancestor and re-appends the missing
/// tail. A dangling symlink is followed lexically so that writing through it
/// cannot create a file outside the root.
fn resolve_existing(path: &Path) -> Option<PathBuf> {
    let mut tail = Vec::new();
    let mut current = path.to_path_buf();

    loop {
        match std::fs::canonicalize(&current) {
            Ok(mut real) => {
                real.extend(tail.iter().rev());
                return Some(real);
            }
            Err(_) => {
                if let Ok(meta) = std::fs::symlink_metadata(&current)
                    && meta.file_type().is_symlink()
                    && let Ok(target) = std::fs::read_link(&current)
                {
                    let parent = current.parent()?;
                    let parent = std::fs::canonicalize(parent).unwrap_or_else(|_| parent.to_path_buf());
                    let mut real = normalize_path_lexically(&parent.join(target));
                    real.extend(tail.iter().rev());
                    return Some(real);
                }

                tail.push(current.file_name()?.to_os_string());
                current = current.parent()?.to_path_buf();
            }
        }
    }
}
