use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The four kinds of security-relevant events the audit log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    Validation,
    BoundaryViolation,
    SandboxViolation,
    SecurityEvent,
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuditEventType::Validation => "VALIDATION",
            AuditEventType::BoundaryViolation => "BOUNDARY_VIOLATION",
            AuditEventType::SandboxViolation => "SANDBOX_VIOLATION",
            AuditEventType::SecurityEvent => "SECURITY_EVENT",
        };
        f.write_str(name)
    }
}

/// One line of the audit log: `{type, timestamp, ...fields}`.
///
/// Entries are frozen when queued; there are no mutating accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(rename = "type")]
    event_type: AuditEventType,
    timestamp: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl AuditEntry {
    pub(crate) fn new(event_type: AuditEventType, mut fields: Map<String, Value>) -> Self {
        // The stamped keys always win over caller-supplied ones.
        fields.remove("type");
        fields.remove("timestamp");
        Self {
            event_type,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            fields,
        }
    }

    pub fn event_type(&self) -> AuditEventType {
        self.event_type
    }

    /// RFC 3339 UTC timestamp assigned when the entry was queued.
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Outcome of one pass through the validation gate.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationEvent {
    pub success: bool,
    pub cached: bool,
    pub command: String,
    pub user: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// A path that tried to leave its boundary root.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundaryViolationEvent {
    pub operation: String,
    pub violation_type: String,
    pub attempted_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_path: Option<String>,
    pub allowed_root: String,
    /// Project and options of the setup run that made the call, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// A setup script rejected by the sandbox guard, or a toolkit call the
/// sandbox refused.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxViolationEvent {
    pub violation: String,
    pub script: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// Pattern-level signal, currently only raised by the abuse tracker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub event: String,
    pub context_id: String,
    pub failure_count: u32,
    pub window_secs: u64,
    pub recent_errors: Vec<String>,
}
