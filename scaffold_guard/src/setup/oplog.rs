use serde::Serialize;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One mutating toolkit call, attributed to the project and its options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub operation: String,
    pub project: String,
    pub options: Vec<String>,
    /// Project-relative paths the call touched.
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OperationLogEntry {
    Operation(OperationRecord),
    Message { level: LogLevel, message: String },
}

/// Where a setup run reports what it did.
pub trait OperationLogger: Send + Sync {
    fn operation(&self, record: &OperationRecord);
    fn message(&self, level: LogLevel, message: &str);
}

/// Default sink: everything goes to `tracing` at target `setup`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingOperationLog;

impl OperationLogger for TracingOperationLog {
    fn operation(&self, record: &OperationRecord) {
        tracing::info!(
            target: "setup",
            project = %record.project,
            options = ?record.options,
            "{} {}",
            record.operation,
            record.paths.join(", ")
        );
    }

    fn message(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => tracing::info!(target: "setup", "{}", message),
            LogLevel::Warn => tracing::warn!(target: "setup", "{}", message),
            LogLevel::Error => tracing::error!(target: "setup", "{}", message),
        }
    }
}

/// Captures entries in order. Also forwards them to tracing.
#[derive(Debug, Default)]
pub struct MemoryOperationLog {
    entries: Mutex<Vec<OperationLogEntry>>,
}

impl MemoryOperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<OperationLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn operations(&self) -> Vec<OperationRecord> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                OperationLogEntry::Operation(record) => Some(record),
                OperationLogEntry::Message { .. } => None,
            })
            .collect()
    }

    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                OperationLogEntry::Message { level: l, message } if l == level => Some(message),
                _ => None,
            })
            .collect()
    }

    fn push(&self, entry: OperationLogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

impl OperationLogger for MemoryOperationLog {
    fn operation(&self, record: &OperationRecord) {
        TracingOperationLog.operation(record);
        self.push(OperationLogEntry::Operation(record.clone()));
    }

    fn message(&self, level: LogLevel, message: &str) {
        TracingOperationLog.message(level, message);
        self.push(OperationLogEntry::Message {
            level,
            message: message.to_string(),
        });
    }
}
