use std::sync::Arc;

use super::ToolScope;
use crate::setup::oplog::LogLevel;

/// `tools.logger`: script messages, routed to the run's operation logger.
#[derive(Clone)]
pub struct LoggerTools {
    scope: Arc<ToolScope>,
}

impl LoggerTools {
    pub(super) fn new(scope: Arc<ToolScope>) -> Self {
        Self { scope }
    }

    pub fn info(&self, message: &str) {
        self.scope.oplog().message(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.scope.oplog().message(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.scope.oplog().message(LogLevel::Error, message);
    }
}
