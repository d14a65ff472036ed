use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;

use super::entry::{
    AuditEntry, AuditEventType, BoundaryViolationEvent, SandboxViolationEvent, SecurityEvent,
    ValidationEvent,
};

/// Default number of buffered entries that triggers an immediate flush.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 10;

/// Default idle time after the last log call before buffered entries are flushed.
pub const DEFAULT_IDLE_FLUSH: Duration = Duration::from_secs(1);

/// Errors raised while flushing; never surfaced from the `log_*` methods.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Failed to write audit log '{path:?}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize audit entry: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Append-only JSON-lines file. `None` keeps entries in memory.
    pub log_file: Option<PathBuf>,
    pub flush_threshold: usize,
    pub idle_flush: Duration,
    /// Mirror every entry to stderr as it is queued.
    pub echo: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl AuditConfig {
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            log_file: Some(path.into()),
            ..Self::in_memory()
        }
    }

    pub fn in_memory() -> Self {
        Self {
            log_file: None,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            idle_flush: DEFAULT_IDLE_FLUSH,
            echo: false,
        }
    }

    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold.max(1);
        self
    }

    pub fn with_idle_flush(mut self, idle: Duration) -> Self {
        self.idle_flush = idle;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }
}

/// Buffered, append-only audit sink.
///
/// One instance is constructed by the driver and handed to every component
/// by `Arc`. Callers must `close()` it before the process exits.
pub struct AuditLogger {
    config: AuditConfig,
    buffer: Mutex<VecDeque<AuditEntry>>,
    idle_timer: Mutex<Option<JoinHandle<()>>>,
    /// Serializes drain-and-append so concurrent flushes cannot interleave lines.
    flush_lock: tokio::sync::Mutex<()>,
    memory: Mutex<Vec<AuditEntry>>,
    me: Weak<AuditLogger>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("config", &self.config)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn echo_line(entry: &AuditEntry) -> Option<String> {
    serde_json::to_string(entry)
        .ok()
        .map(|json| format!("[audit] {json}"))
}

impl AuditLogger {
    pub fn new(config: AuditConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            config,
            buffer: Mutex::new(VecDeque::new()),
            idle_timer: Mutex::new(None),
            flush_lock: tokio::sync::Mutex::new(()),
            memory: Mutex::new(Vec::new()),
            me: me.clone(),
        })
    }

    /// In-memory logger for tests and runs without a log file.
    pub fn in_memory() -> Arc<Self> {
        Self::new(AuditConfig::in_memory())
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn log_validation(&self, event: &ValidationEvent) {
        self.record(AuditEventType::Validation, event);
    }

    pub fn log_boundary_violation(&self, event: &BoundaryViolationEvent) {
        self.record(AuditEventType::BoundaryViolation, event);
    }

    pub fn log_sandbox_violation(&self, event: &SandboxViolationEvent) {
        self.record(AuditEventType::SandboxViolation, event);
    }

    pub fn log_security_event(&self, event: &SecurityEvent) {
        self.record(AuditEventType::SecurityEvent, event);
    }

    /// Number of entries queued but not yet written.
    pub fn pending(&self) -> usize {
        lock(&self.buffer).len()
    }

    /// Entries flushed to the in-memory sink. Always empty for file-backed loggers.
    pub fn entries(&self) -> Vec<AuditEntry> {
        lock(&self.memory).clone()
    }

    fn record<E: Serialize>(&self, event_type: AuditEventType, event: &E) {
        let fields = match serde_json::to_value(event) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                let mut map = Map::new();
                map.insert("details".to_string(), other);
                map
            }
            Err(e) => {
                tracing::error!("Dropping unserializable {} audit event: {}", event_type, e);
                return;
            }
        };
        let entry = AuditEntry::new(event_type, fields);

        if self.config.echo
            && let Some(line) = echo_line(&entry)
        {
            // Straight to the operator's terminal, whatever the tracing setup.
            let _ = writeln!(std::io::stderr().lock(), "{line}");
        }

        let pending = {
            let mut buffer = lock(&self.buffer);
            buffer.push_back(entry);
            buffer.len()
        };

        if pending >= self.config.flush_threshold {
            self.spawn_flush();
        } else {
            self.schedule_idle_flush();
        }
    }

    fn spawn_flush(&self) {
        self.cancel_idle_timer();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let Some(this) = self.me.upgrade() else {
            return;
        };
        handle.spawn(async move {
            // Failures are reported and re-queued inside flush().
            let _ = this.flush().await;
        });
    }

    fn schedule_idle_flush(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let Some(this) = self.me.upgrade() else {
            return;
        };
        let idle = self.config.idle_flush;
        let timer = handle.spawn(async move {
            tokio::time::sleep(idle).await;
            // Detach the flush itself: aborting the timer must never interrupt
            // a drain that is already in progress.
            tokio::spawn(async move {
                let _ = this.flush().await;
            });
        });

        if let Some(previous) = lock(&self.idle_timer).replace(timer) {
            previous.abort();
        }
    }

    fn cancel_idle_timer(&self) {
        if let Some(timer) = lock(&self.idle_timer).take() {
            timer.abort();
        }
    }

    /// Write every buffered entry. On failure the drained entries go back to
    /// the front of the buffer in their original order.
    pub async fn flush(&self) -> Result<usize, AuditError> {
        let _guard = self.flush_lock.lock().await;

        let drained: Vec<AuditEntry> = lock(&self.buffer).drain(..).collect();
        if drained.is_empty() {
            return Ok(0);
        }

        match self.write_entries(&drained).await {
            Ok(()) => Ok(drained.len()),
            Err(e) => {
                tracing::error!(
                    "Audit log flush failed, re-queued {} entries: {}",
                    drained.len(),
                    e
                );
                let mut buffer = lock(&self.buffer);
                for entry in drained.into_iter().rev() {
                    buffer.push_front(entry);
                }
                Err(e)
            }
        }
    }

    async fn write_entries(&self, entries: &[AuditEntry]) -> Result<(), AuditError> {
        let Some(path) = &self.config.log_file else {
            lock(&self.memory).extend(entries.iter().cloned());
            return Ok(());
        };

        let mut payload = String::new();
        for entry in entries {
            payload.push_str(&serde_json::to_string(entry)?);
            payload.push('\n');
        }

        let io_err = |source: std::io::Error| AuditError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(io_err)?;
        file.write_all(payload.as_bytes()).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        Ok(())
    }

    /// Cancel the idle timer and write whatever is still buffered.
    pub async fn close(&self) -> Result<(), AuditError> {
        self.cancel_idle_timer();
        self.flush().await.map(|_| ())
    }
}
