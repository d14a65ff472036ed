use serde_json::{Map, Value};
use std::sync::Arc;

use super::ToolScope;

/// `tools.inputs`: read-only view of the resolved placeholder values.
#[derive(Clone)]
pub struct InputsTools {
    scope: Arc<ToolScope>,
}

impl InputsTools {
    pub(super) fn new(scope: Arc<ToolScope>) -> Self {
        Self { scope }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.scope.env().inputs().get(name).cloned()
    }

    /// A copy; changing it changes nothing the toolkit sees.
    pub fn all(&self) -> Map<String, Value> {
        self.scope.env().inputs().clone()
    }
}
