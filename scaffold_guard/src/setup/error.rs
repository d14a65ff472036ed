use std::path::PathBuf;

use crate::boundary::{BoundaryViolation, FsError};

/// Whether a sandbox failure happened before the script ran, or while it ran.
///
/// The driver keys its decision on this: a `Rejected` script never touched
/// the project, a `Runtime` failure leaves whatever the script already wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxErrorKind {
    Rejected,
    Runtime,
}

impl std::fmt::Display for SandboxErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SandboxErrorKind::Rejected => f.write_str("rejected"),
            SandboxErrorKind::Runtime => f.write_str("runtime"),
        }
    }
}

/// Errors specific to loading and running setup scripts
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error(
        "Setup script '{}' has an invalid entry point: {detail} (expected `export default async function ({{ ctx, tools }}) {{ ... }}`)",
        script.display()
    )]
    InvalidSignature { script: PathBuf, detail: String },

    #[error(
        "Setup script '{}' imports blocked module '{specifier}' at line {line}; scripts may only use the provided tools",
        script.display()
    )]
    BlockedImport {
        script: PathBuf,
        specifier: String,
        line: usize,
    },

    #[error("Setup script '{}' is not a valid ES module: {detail}", script.display())]
    Unparsable { script: PathBuf, detail: String },

    #[error(
        "Setup script '{}' was stopped: it tried to load blocked module '{specifier}'",
        script.display()
    )]
    RuntimeImport { script: PathBuf, specifier: String },

    #[error("Failed to read setup script '{}': {source}", script.display())]
    Unreadable {
        script: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start setup script host '{program}': {source}")]
    HostUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Setup script '{}' failed: {message}", script.display())]
    ScriptFailed {
        script: PathBuf,
        message: String,
        stack: Option<String>,
    },

    #[error("Setup script '{}' was stopped: {violation}", script.display())]
    BoundaryEscape {
        script: PathBuf,
        violation: BoundaryViolation,
    },

    #[error("Unknown option '{value}' for dimension '{dimension}'")]
    UnknownOption { dimension: String, value: String },

    #[error("Unknown option dimension '{0}'")]
    UnknownDimension(String),

    #[error("Option '{value}' matches more than one dimension ({})", dimensions.join(", "))]
    AmbiguousOption {
        value: String,
        dimensions: Vec<String>,
    },

    #[error("Dimension '{dimension}' accepts a single value but got '{first}' and '{second}'")]
    ConflictingOptions {
        dimension: String,
        first: String,
        second: String,
    },

    #[error("No option selected for required dimension '{0}'")]
    MissingOption(String),

    #[error("Setup script host protocol error: {0}")]
    Protocol(String),
}

impl SandboxError {
    pub fn kind(&self) -> SandboxErrorKind {
        match self {
            SandboxError::InvalidSignature { .. }
            | SandboxError::BlockedImport { .. }
            | SandboxError::Unparsable { .. }
            | SandboxError::Unreadable { .. }
            | SandboxError::HostUnavailable { .. } => SandboxErrorKind::Rejected,
            _ => SandboxErrorKind::Runtime,
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.kind() == SandboxErrorKind::Rejected
    }

    /// Short machine-readable label used in audit entries.
    pub fn violation_label(&self) -> &'static str {
        match self {
            SandboxError::InvalidSignature { .. } => "invalid_signature",
            SandboxError::BlockedImport { .. } | SandboxError::RuntimeImport { .. } => {
                "blocked_import"
            }
            SandboxError::Unparsable { .. } => "unparsable_script",
            SandboxError::Unreadable { .. } => "unreadable_script",
            SandboxError::HostUnavailable { .. } => "host_unavailable",
            SandboxError::ScriptFailed { .. } => "script_failed",
            SandboxError::BoundaryEscape { .. } => "boundary_escape",
            SandboxError::UnknownOption { .. }
            | SandboxError::UnknownDimension(_)
            | SandboxError::AmbiguousOption { .. }
            | SandboxError::ConflictingOptions { .. }
            | SandboxError::MissingOption(_) => "option_error",
            SandboxError::Protocol(_) => "protocol_error",
        }
    }
}

/// Failure of one toolkit call. Reported back to the script as a rejected
/// promise; a boundary violation additionally stops the script.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error(transparent)]
    Boundary(#[from] BoundaryViolation),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("{operation} failed for '{}': {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in '{path}': {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{call}: {message}")]
    InvalidArgument { call: String, message: String },

    #[error("Unknown tool '{namespace}.{method}'")]
    UnknownMethod { namespace: String, method: String },
}

impl From<FsError> for ToolError {
    fn from(err: FsError) -> Self {
        match err {
            FsError::Boundary(violation) => ToolError::Boundary(violation),
            FsError::Io {
                operation,
                path,
                source,
            } => ToolError::Io {
                operation,
                path,
                source,
            },
        }
    }
}

impl ToolError {
    pub(crate) fn invalid(call: impl Into<String>, message: impl Into<String>) -> Self {
        ToolError::InvalidArgument {
            call: call.into(),
            message: message.into(),
        }
    }

    pub fn as_boundary_violation(&self) -> Option<&BoundaryViolation> {
        match self {
            ToolError::Boundary(violation) => Some(violation),
            _ => None,
        }
    }
}
