//! # Validation Gate
//!
//! The mandatory checkpoint between raw input arriving and code acting on it.
//! Every entry point calls [`ValidationGate::enforce`] before it reads any part
//! of the raw inputs; nothing reaches the filesystem or the setup-script
//! sandbox with unvalidated input.
//!
//! ## What `enforce` does
//!
//! 1. Checks the context's required fields and reports all missing ones at once.
//! 2. Serves repeats of an already-validated input shape from a bounded cache
//!    (deep copies, insertion-order eviction).
//! 3. Runs the injected [`InputValidator`].
//! 4. On success: caches, audits, and clears the context's abuse streak.
//! 5. On failure: records the failure against the abuse tracker, audits it
//!    with a sanitized context, raises a security event once the streak
//!    crosses the threshold, and returns a [`GateError`].
//!
//! The cache and tracker are behind mutexes; each critical section is short
//! and never spans an await.

mod abuse;
mod cache;
mod issue;
mod sanitize;
mod validator;

pub use abuse::{
    AbuseEntry, AbuseTracker, DEFAULT_ABUSE_THRESHOLD, DEFAULT_ABUSE_WINDOW, MAX_RECENT_ERRORS,
};
pub use cache::{CacheStats, DEFAULT_CACHE_CAPACITY, ValidationCache, canonical_key};
pub use issue::{InputIssue, ValidationErrorType, ValidationFailure};
pub use sanitize::{redact_sensitive_text, strip_sensitive};
pub use validator::{AUTHORING_MODES, InputValidator, SUPPORTED_IDES, ScaffoldInputValidator};

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::audit::{AuditLogger, SecurityEvent, ValidationEvent};

const UNKNOWN_COMMAND: &str = "unknown";
const ANONYMOUS_USER: &str = "anonymous";

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub cache_capacity: usize,
    pub abuse_threshold: u32,
    pub abuse_window: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            abuse_threshold: DEFAULT_ABUSE_THRESHOLD,
            abuse_window: DEFAULT_ABUSE_WINDOW,
        }
    }
}

/// Who is asking, and what they must supply.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required_fields: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GateContext {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_required_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn command_name(&self) -> &str {
        self.command.as_deref().unwrap_or(UNKNOWN_COMMAND)
    }

    pub fn user_name(&self) -> &str {
        self.user.as_deref().unwrap_or(ANONYMOUS_USER)
    }

    /// Abuse-tracker key: `command:user`.
    pub fn context_id(&self) -> String {
        format!("{}:{}", self.command_name(), self.user_name())
    }

    /// The context as it may appear in logs: credentials, tokens, passwords
    /// and secrets removed at any depth.
    pub fn sanitized(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(value) => strip_sensitive(&value),
            Err(_) => Value::Null,
        }
    }
}

/// Raised for any input the gate refuses. Carries the complete problem list
/// and the sanitized context.
#[derive(Debug, thiserror::Error)]
#[error("Invalid input for '{command}': {source}")]
pub struct GateError {
    pub command: String,
    #[source]
    pub source: ValidationFailure,
    pub context: Value,
}

impl GateError {
    pub fn issues(&self) -> &[InputIssue] {
        &self.source.issues
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

pub struct ValidationGate {
    validator: Arc<dyn InputValidator>,
    audit: Arc<AuditLogger>,
    config: GateConfig,
    cache: Mutex<ValidationCache>,
    tracker: Mutex<AbuseTracker>,
}

impl std::fmt::Debug for ValidationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationGate")
            .field("config", &self.config)
            .field("cache", &self.cache_stats())
            .finish_non_exhaustive()
    }
}

impl ValidationGate {
    pub fn new(
        validator: Arc<dyn InputValidator>,
        audit: Arc<AuditLogger>,
        config: GateConfig,
    ) -> Self {
        Self {
            validator,
            audit,
            cache: Mutex::new(ValidationCache::new(config.cache_capacity)),
            tracker: Mutex::new(AbuseTracker::new(
                config.abuse_threshold,
                config.abuse_window,
            )),
            config,
        }
    }

    /// Validate `raw` for `context`, or refuse it.
    pub fn enforce(
        &self,
        raw: &Map<String, Value>,
        context: &GateContext,
    ) -> Result<Value, GateError> {
        let started = Instant::now();

        let missing: Vec<String> = context
            .required_fields
            .iter()
            .filter(|field| is_empty_value(raw.get(field.as_str())))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(self.reject(ValidationFailure::missing_fields(&missing), context, started));
        }

        let key = canonical_key(raw);
        let cached = lock(&self.cache).get(&key);
        if let Some(value) = cached {
            lock(&self.tracker).record_success(&context.context_id());
            let duration_ms = elapsed_ms(started);
            tracing::debug!(
                "Validation cache hit for '{}' ({} ms)",
                context.command_name(),
                duration_ms
            );
            self.audit.log_validation(&ValidationEvent {
                success: true,
                cached: true,
                command: context.command_name().to_string(),
                user: context.user_name().to_string(),
                duration_ms,
                ..Default::default()
            });
            return Ok(value);
        }

        match self.validator.validate(raw) {
            Ok(value) => {
                lock(&self.cache).insert(key, value.clone());
                lock(&self.tracker).record_success(&context.context_id());
                let duration_ms = elapsed_ms(started);
                tracing::debug!(
                    "Validated input for '{}' ({} ms)",
                    context.command_name(),
                    duration_ms
                );
                self.audit.log_validation(&ValidationEvent {
                    success: true,
                    cached: false,
                    command: context.command_name().to_string(),
                    user: context.user_name().to_string(),
                    duration_ms,
                    ..Default::default()
                });
                Ok(value)
            }
            Err(failure) => Err(self.reject(failure, context, started)),
        }
    }

    fn reject(
        &self,
        failure: ValidationFailure,
        context: &GateContext,
        started: Instant,
    ) -> GateError {
        let context_id = context.context_id();
        let sanitized = context.sanitized();
        let summary = redact_sensitive_text(&failure.to_string());

        let crossed = lock(&self.tracker).record_failure(&context_id, &summary, Instant::now());

        self.audit.log_validation(&ValidationEvent {
            success: false,
            cached: false,
            command: context.command_name().to_string(),
            user: context.user_name().to_string(),
            duration_ms: elapsed_ms(started),
            errors: failure
                .messages()
                .iter()
                .map(|m| redact_sensitive_text(m))
                .collect(),
            context: Some(sanitized.clone()),
        });

        if let Some(entry) = crossed {
            tracing::warn!(
                "Possible abuse: {} validation failures for '{}' within {}s",
                entry.count,
                context_id,
                self.config.abuse_window.as_secs()
            );
            self.audit.log_security_event(&SecurityEvent {
                event: "repeated_validation_failures".to_string(),
                context_id,
                failure_count: entry.count,
                window_secs: self.config.abuse_window.as_secs(),
                recent_errors: entry.recent_errors.into_iter().collect(),
            });
        }

        GateError {
            command: context.command_name().to_string(),
            source: failure,
            context: sanitized,
        }
    }

    /// Test/ops utility; no security role.
    pub fn clear_cache(&self) {
        lock(&self.cache).clear();
    }

    /// Test/ops utility; no security role.
    pub fn cache_stats(&self) -> CacheStats {
        lock(&self.cache).stats()
    }

    /// Current streak for a context id, if it has one.
    pub fn abuse_stats(&self, context_id: &str) -> Option<AbuseEntry> {
        lock(&self.tracker).get(context_id).cloned()
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }
}
