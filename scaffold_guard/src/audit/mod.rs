//! # Audit Logger
//!
//! Durable, non-blocking record of security events. Every layer of the trust
//! boundary reports here: validation outcomes, boundary violations, sandbox
//! rejections and abuse-pattern security events.
//!
//! Entries are stamped with their type and a timestamp, buffered, and written
//! as JSON lines either when the buffer reaches its threshold or after an idle
//! debounce. A failed write re-queues the drained entries at the front of the
//! buffer, so entries are only lost under sustained filesystem failure.
//!
//! The logger is not a global. Construct it once, share it by `Arc`, and call
//! [`AuditLogger::close`] before exit.

mod entry;
mod logger;

pub use entry::{
    AuditEntry, AuditEventType, BoundaryViolationEvent, SandboxViolationEvent, SecurityEvent,
    ValidationEvent,
};
pub use logger::{
    AuditConfig, AuditError, AuditLogger, DEFAULT_FLUSH_THRESHOLD, DEFAULT_IDLE_FLUSH,
};
