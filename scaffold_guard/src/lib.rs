//! # scaffold_guard
//!
//! The trust boundary of a project scaffolder. A new project is materialized
//! from a template, then the template's setup script runs inside it. The
//! script is third-party code, so everything it touches goes through three
//! cooperating layers:
//!
//! 1. [`gate`]: the Validation Gate every entry point calls before acting on
//!    raw input.
//! 2. [`boundary`]: the Boundary Enforcer, the only sanctioned way to turn a
//!    requested path into one that is safe to touch.
//! 3. [`setup`]: the Sandbox Runtime that inspects, loads and runs the setup
//!    script against a capability toolkit built on the boundary enforcer.
//!
//! All three report to the [`audit`] logger, an explicitly constructed,
//! buffered JSON-lines sink shared by `Arc`.
//!
//! [`scaffold`] wires the layers together for the CLI in [`shell`].

pub mod audit;
pub mod boundary;
pub mod config;
pub mod gate;
pub mod scaffold;
pub mod setup;
pub mod shell;
pub mod utils;

pub use audit::{AuditEventType, AuditLogger};
pub use boundary::{BoundaryEnforcer, BoundaryViolation, BoundedFs, ViolationType};
pub use gate::{GateContext, GateError, ValidationGate};
pub use setup::{SandboxError, SandboxErrorKind, SetupOutcome, SetupRuntime, SetupTools};
