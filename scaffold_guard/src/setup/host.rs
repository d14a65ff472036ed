use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::environment::SetupEnvironment;
use super::inspect::{EntrySignature, ImportRef};
use super::protocol::{HostMessage, ToolCall};
use super::tools::SetupTools;
use crate::boundary::BoundaryViolation;

/// A setup script that passed the sandbox guard.
#[derive(Debug, Clone)]
pub struct LoadedScript {
    pub(crate) path: PathBuf,
    pub(crate) signature: EntrySignature,
    pub(crate) imports: Vec<ImportRef>,
}

impl LoadedScript {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn signature(&self) -> &EntrySignature {
        &self.signature
    }

    /// Imports the policy allowed.
    pub fn imports(&self) -> &[ImportRef] {
        &self.imports
    }
}

/// How a hosted script ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptExit {
    Completed,
    /// The script threw (or its host died) after it was invoked.
    Threw {
        message: String,
        stack: Option<String>,
    },
    /// A toolkit call tried to leave the project; the script was stopped.
    Stopped(BoundaryViolation),
    /// The script tried to load a module outside the allow-list; it was stopped.
    Blocked(String),
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Setup script host I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Setup script host protocol error: {0}")]
    Protocol(String),
}

/// Executes an accepted script, routing each of its toolkit calls through
/// [`SetupTools::dispatch`].
#[async_trait]
pub trait ScriptHost: Send + Sync {
    async fn execute(
        &self,
        script: &LoadedScript,
        env: &SetupEnvironment,
        tools: &SetupTools,
    ) -> Result<ScriptExit, HostError>;
}

/// Outcome of serving one call.
pub(crate) enum Answer {
    Reply(String),
    /// Reply, then stop the script.
    Stop(String, BoundaryViolation),
}

/// Run one call and build the protocol reply for it.
pub(crate) async fn answer(tools: &SetupTools, call: &ToolCall) -> Result<Answer, HostError> {
    let reply = |ok: bool, value: Option<Value>, error: Option<String>| {
        HostMessage::Result {
            id: call.id,
            ok,
            value,
            error,
        }
        .to_line()
        .map_err(|e| HostError::Protocol(e.to_string()))
    };
    match tools.dispatch(call).await {
        Ok(value) => Ok(Answer::Reply(reply(true, Some(value), None)?)),
        Err(err) => {
            tracing::debug!("Setup tool call {} failed: {}", call.name(), err);
            let line = reply(false, None, Some(err.to_string()))?;
            match err.as_boundary_violation() {
                Some(violation) => Ok(Answer::Stop(line, violation.clone())),
                None => Ok(Answer::Reply(line)),
            }
        }
    }
}

/// How a [`ReplayScriptHost`] run ends after its calls.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayEnd {
    Done,
    Throw(String),
    /// The import hook refused this specifier.
    Blocked(String),
}

/// Host that plays a fixed call sequence instead of running the script.
///
/// Gives the runtime and toolkit a deterministic driver when no interpreter is
/// involved. Failed calls behave as unhandled rejections: the run ends as a
/// throw, or as a stop for boundary violations.
#[derive(Debug)]
pub struct ReplayScriptHost {
    calls: Vec<ToolCall>,
    end: ReplayEnd,
    replies: Mutex<Vec<Value>>,
}

impl ReplayScriptHost {
    pub fn new(calls: Vec<ToolCall>, end: ReplayEnd) -> Self {
        Self {
            calls,
            end,
            replies: Mutex::new(Vec::new()),
        }
    }

    /// Values returned to the script so far, in order.
    pub fn replies(&self) -> Vec<Value> {
        self.replies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ScriptHost for ReplayScriptHost {
    async fn execute(
        &self,
        _script: &LoadedScript,
        _env: &SetupEnvironment,
        tools: &SetupTools,
    ) -> Result<ScriptExit, HostError> {
        for (id, call) in self.calls.iter().enumerate() {
            let call = ToolCall {
                id: id as u64 + 1,
                ..call.clone()
            };
            match tools.dispatch(&call).await {
                Ok(value) => self
                    .replies
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .push(value),
                Err(err) => {
                    return Ok(match err.as_boundary_violation() {
                        Some(violation) => ScriptExit::Stopped(violation.clone()),
                        None => ScriptExit::Threw {
                            message: err.to_string(),
                            stack: None,
                        },
                    });
                }
            }
        }
        Ok(match &self.end {
            ReplayEnd::Done => ScriptExit::Completed,
            ReplayEnd::Throw(message) => ScriptExit::Threw {
                message: message.clone(),
                stack: None,
            },
            ReplayEnd::Blocked(specifier) => ScriptExit::Blocked(specifier.clone()),
        })
    }
}
