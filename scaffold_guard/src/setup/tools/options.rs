use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::ToolScope;
use crate::setup::environment::OptionSelections;
use crate::setup::error::SandboxError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionKind {
    #[default]
    Single,
    Multi,
}

/// One template-declared option dimension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DimensionSpec {
    #[serde(rename = "type", default)]
    pub kind: DimensionKind,
    pub values: Vec<String>,
    /// A string for single dimensions, a string or array for multi.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

pub type Dimensions = BTreeMap<String, DimensionSpec>;

fn declared(dimensions: &Dimensions, dimension: &str, value: &str) -> Result<(), SandboxError> {
    let spec = dimensions
        .get(dimension)
        .ok_or_else(|| SandboxError::UnknownDimension(dimension.to_string()))?;
    if spec.values.iter().any(|v| v == value) {
        Ok(())
    } else {
        Err(SandboxError::UnknownOption {
            dimension: dimension.to_string(),
            value: value.to_string(),
        })
    }
}

/// The dimension a bare option value belongs to.
fn dimension_of<'a>(dimensions: &'a Dimensions, value: &str) -> Result<&'a str, SandboxError> {
    let owners: Vec<&str> = dimensions
        .iter()
        .filter(|(_, spec)| spec.values.iter().any(|v| v == value))
        .map(|(name, _)| name.as_str())
        .collect();
    match owners.as_slice() {
        [only] => Ok(only),
        [] => Err(SandboxError::UnknownOption {
            dimension: "*".to_string(),
            value: value.to_string(),
        }),
        many => Err(SandboxError::AmbiguousOption {
            value: value.to_string(),
            dimensions: many.iter().map(|s| s.to_string()).collect(),
        }),
    }
}

/// Split `dimension=value` or attribute a bare `value` to its dimension.
fn parse_token<'a>(
    dimensions: &'a Dimensions,
    token: &'a str,
) -> Result<(&'a str, &'a str), SandboxError> {
    match token.split_once('=') {
        Some((dimension, value)) => {
            declared(dimensions, dimension, value)?;
            Ok((dimension, value))
        }
        None => Ok((dimension_of(dimensions, token)?, token)),
    }
}

/// Resolve raw option tokens against the declared dimensions, then fill in
/// declared defaults for dimensions left unselected.
pub fn resolve_selections(
    raw: &[String],
    dimensions: &Dimensions,
) -> Result<OptionSelections, SandboxError> {
    let mut picked: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for token in raw {
        let (dimension, value) = parse_token(dimensions, token)?;
        let values = picked.entry(dimension).or_default();
        if values.contains(&value) {
            continue;
        }
        let single = dimensions
            .get(dimension)
            .is_some_and(|spec| spec.kind == DimensionKind::Single);
        if single && let Some(first) = values.first() {
            return Err(SandboxError::ConflictingOptions {
                dimension: dimension.to_string(),
                first: first.to_string(),
                second: value.to_string(),
            });
        }
        values.push(value);
    }

    let mut by_dimension = Map::new();
    for (name, spec) in dimensions {
        let selection = match picked.get(name.as_str()) {
            Some(values) => match spec.kind {
                DimensionKind::Single => Value::String(values[0].to_string()),
                DimensionKind::Multi => {
                    Value::Array(values.iter().map(|v| Value::String(v.to_string())).collect())
                }
            },
            None => match &spec.default {
                Some(default) => {
                    for value in default_values(default) {
                        declared(dimensions, name, value)?;
                    }
                    match (spec.kind, default) {
                        (DimensionKind::Multi, Value::String(s)) => {
                            Value::Array(vec![Value::String(s.clone())])
                        }
                        (_, other) => other.clone(),
                    }
                }
                None => continue,
            },
        };
        by_dimension.insert(name.clone(), selection);
    }

    Ok(OptionSelections {
        raw: raw.to_vec(),
        by_dimension,
    })
}

fn default_values(default: &Value) -> Vec<&str> {
    match default {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// `tools.options`: questions about the selected options. Asking about a
/// dimension or value the template never declared is an error.
#[derive(Clone)]
pub struct OptionsTools {
    scope: Arc<ToolScope>,
}

impl OptionsTools {
    pub(super) fn new(scope: Arc<ToolScope>) -> Self {
        Self { scope }
    }

    pub fn list(&self) -> Vec<String> {
        self.scope.env().options().raw.clone()
    }

    pub fn by_dimension(&self) -> Map<String, Value> {
        self.scope.env().options().by_dimension.clone()
    }

    /// `token` is `dimension=value` or a bare value.
    pub fn has(&self, token: &str) -> Result<bool, SandboxError> {
        let (dimension, value) = parse_token(self.scope.dimensions(), token)?;
        Ok(self.selected(dimension).contains(&value))
    }

    pub fn in_dimension(&self, dimension: &str, value: &str) -> Result<bool, SandboxError> {
        declared(self.scope.dimensions(), dimension, value)?;
        Ok(self.selected(dimension).contains(&value))
    }

    /// The selection for `dimension`: a string for single dimensions, an array
    /// for multi. Fails when nothing is selected.
    pub fn require(&self, dimension: &str) -> Result<Value, SandboxError> {
        if !self.scope.dimensions().contains_key(dimension) {
            return Err(SandboxError::UnknownDimension(dimension.to_string()));
        }
        match self.scope.env().options().by_dimension.get(dimension) {
            Some(Value::Array(items)) if items.is_empty() => {
                Err(SandboxError::MissingOption(dimension.to_string()))
            }
            Some(selection) => Ok(selection.clone()),
            None => Err(SandboxError::MissingOption(dimension.to_string())),
        }
    }

    fn selected(&self, dimension: &str) -> Vec<&str> {
        self.scope.env().options().selected(dimension)
    }
}
