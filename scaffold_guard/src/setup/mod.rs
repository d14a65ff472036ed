//! # Sandbox Runtime
//!
//! Loads and runs a template's setup script. The script is third-party code,
//! so it is inspected before anything of it executes:
//!
//! - its imports must all be on the [`ImportPolicy`] allow-list (empty by
//!   default, so a script can import nothing);
//! - its default export must take exactly one object-pattern parameter that
//!   binds `ctx` and/or `tools`, nothing else.
//!
//! An accepted script runs through a [`ScriptHost`]. Its only capability is
//! the [`SetupTools`] toolkit, whose every effect passes the project's
//! boundary enforcer. A script that throws after it started leaves its work
//! on disk and yields [`SetupOutcome::CompletedWithWarning`]; a toolkit call
//! that tries to leave the project stops the script.

mod environment;
mod error;
mod host;
mod inspect;
mod node_host;
mod oplog;
mod policy;
mod protocol;
mod runtime;
pub mod tools;

pub use environment::{EnvironmentSpec, OptionSelections, SetupEnvironment};
pub use error::{SandboxError, SandboxErrorKind, ToolError};
pub use host::{HostError, LoadedScript, ReplayEnd, ReplayScriptHost, ScriptExit, ScriptHost};
pub use inspect::{
    COMPUTED_SPECIFIER, EntrySignature, ImportForm, ImportRef, ScriptInspection, inspect_source,
};
pub use node_host::NodeScriptHost;
pub use oplog::{
    LogLevel, MemoryOperationLog, OperationLogEntry, OperationLogger, OperationRecord,
    TracingOperationLog,
};
pub use policy::{DEFAULT_INTERPRETER, DEFAULT_SCRIPT_NAME, ImportPolicy, SandboxConfig};
pub use protocol::{HostMessage, ScriptMessage, ToolCall, parse_script_line};
pub use runtime::{SetupOutcome, SetupRuntime};
pub use tools::{Dimensions, SetupTools, ToolsSpec};
