//! Newline-delimited JSON messages between the host and a running script.
//!
//! Host → script: `init`, then one `result` per `call`.
//! Script → host: any number of `call`s, then exactly one `done`, `error` or
//! `blocked`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One toolkit invocation requested by the script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: u64,
    pub namespace: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl ToolCall {
    pub fn new(namespace: impl Into<String>, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id: 0,
            namespace: namespace.into(),
            method: method.into(),
            args,
        }
    }

    /// `namespace.method`, for messages.
    pub fn name(&self) -> String {
        format!("{}.{}", self.namespace, self.method)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ScriptMessage {
    Call(ToolCall),
    Done,
    Error {
        message: String,
        #[serde(default)]
        stack: Option<String>,
    },
    /// A module resolution the import hook refused.
    Blocked { specifier: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostMessage<'a> {
    Init {
        script: String,
        /// Path of the module resolve hook file.
        hooks: String,
        #[serde(rename = "allowedImports")]
        allowed_imports: &'a [String],
        ctx: &'a Value,
        namespaces: &'a BTreeMap<&'static str, &'static [&'static str]>,
    },
    Result {
        id: u64,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl HostMessage<'_> {
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Parse one stdout line. `None` means the line is not a protocol message.
pub fn parse_script_line(line: &str) -> Option<ScriptMessage> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}
