use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Why a path was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    /// The path contains an embedded NUL byte.
    NullByte,
    /// The value offered as a path was not a string.
    InvalidType,
    /// Lexical resolution of `.`/`..` lands outside the root.
    PathTraversal,
    /// An existing symlink under the root points outside it.
    SymlinkEscape,
    /// A destructive operation named the root itself.
    RootTarget,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::NullByte => "null_byte",
            ViolationType::InvalidType => "invalid_type",
            ViolationType::PathTraversal => "path_traversal",
            ViolationType::SymlinkEscape => "symlink_escape",
            ViolationType::RootTarget => "root_target",
        }
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A path the boundary refused, usually one that tried to leave the root.
/// Always audited before it is returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "Boundary violation ({violation_type}) during '{operation}': path '{attempted_path}' is not permitted under the allowed root '{}'",
    allowed_root.display()
)]
pub struct BoundaryViolation {
    pub violation_type: ViolationType,
    pub operation: String,
    pub attempted_path: String,
    pub resolved_path: Option<PathBuf>,
    pub allowed_root: PathBuf,
}

/// Failure of a [`BoundedFs`](super::BoundedFs) call: either the path was
/// refused, or the underlying I/O failed on a validated path.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error(transparent)]
    Boundary(#[from] BoundaryViolation),

    #[error("{operation} failed for '{}': {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    pub fn is_boundary_violation(&self) -> bool {
        matches!(self, FsError::Boundary(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}
