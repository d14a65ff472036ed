use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::ToolScope;
use crate::setup::error::ToolError;

/// `tools.json`: structured edits of JSON files.
///
/// Keys are dotted paths (`scripts.build`, `workspaces.0`); a numeric segment
/// indexes an array. Missing files read as `{}`. Files are written back
/// pretty-printed with a trailing newline.
#[derive(Clone)]
pub struct JsonTools {
    scope: Arc<ToolScope>,
}

fn split_key(key: &str) -> Result<Vec<String>, String> {
    if key.is_empty() {
        return Err("key path must not be empty".to_string());
    }
    key.split('.')
        .map(|segment| {
            if segment.is_empty() {
                Err(format!("key path '{key}' has an empty segment"))
            } else {
                Ok(segment.to_string())
            }
        })
        .collect()
}

fn index(segment: &str) -> Result<usize, String> {
    segment
        .parse()
        .map_err(|_| format!("'{segment}' is not an array index"))
}

fn container_for(next: &str) -> Value {
    if next.parse::<usize>().is_ok() {
        Value::Array(Vec::new())
    } else {
        Value::Object(Map::new())
    }
}

/// Step into `segment` of `node`. With `create`, missing children are
/// inserted (appending when the index equals the array length).
fn child_mut<'a>(
    node: &'a mut Value,
    segment: &str,
    create: Option<Value>,
) -> Result<&'a mut Value, String> {
    if node.is_null() && create.is_some() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => match create {
            Some(fresh) => Ok(map.entry(segment.to_string()).or_insert(fresh)),
            None => map
                .get_mut(segment)
                .ok_or_else(|| format!("'{segment}' does not exist")),
        },
        Value::Array(items) => {
            let idx = index(segment)?;
            if let Some(fresh) = create
                && idx == items.len()
            {
                items.push(fresh);
            }
            items
                .get_mut(idx)
                .ok_or_else(|| format!("index {idx} is out of range"))
        }
        _ => Err(format!("'{segment}' does not address an object or array")),
    }
}

fn set_path(root: &mut Value, segments: &[String], value: Value) -> Result<(), String> {
    let Some((last, parents)) = segments.split_last() else {
        return Err("key path must not be empty".to_string());
    };
    let mut current = root;
    for (i, segment) in parents.iter().enumerate() {
        current = child_mut(current, segment, Some(container_for(&segments[i + 1])))?;
    }
    *child_mut(current, last, Some(Value::Null))? = value;
    Ok(())
}

fn remove_path(root: &mut Value, segments: &[String]) -> Result<bool, String> {
    let Some((last, parents)) = segments.split_last() else {
        return Err("key path must not be empty".to_string());
    };
    let mut current = root;
    for segment in parents {
        match child_mut(current, segment, None) {
            Ok(child) => current = child,
            Err(_) => return Ok(false),
        }
    }
    Ok(match current {
        Value::Object(map) => map.remove(last.as_str()).is_some(),
        Value::Array(items) => match index(last) {
            Ok(idx) if idx < items.len() => {
                items.remove(idx);
                true
            }
            _ => false,
        },
        _ => false,
    })
}

/// The array at `segments`, created if absent.
fn array_at<'a>(root: &'a mut Value, segments: &[String]) -> Result<&'a mut Vec<Value>, String> {
    let mut current = root;
    for (i, segment) in segments.iter().enumerate() {
        let fresh = match segments.get(i + 1) {
            Some(next) => container_for(next),
            None => Value::Array(Vec::new()),
        };
        current = child_mut(current, segment, Some(fresh))?;
    }
    if current.is_null() {
        *current = Value::Array(Vec::new());
    }
    match current {
        Value::Array(items) => Ok(items),
        _ => Err(format!("'{}' is not an array", segments.join("."))),
    }
}

/// Objects merge key by key, recursively; anything else is replaced.
pub(crate) fn deep_merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, patch) => *base = patch,
    }
}

impl JsonTools {
    pub(super) fn new(scope: Arc<ToolScope>) -> Self {
        Self { scope }
    }

    async fn load(&self, target: &Path) -> Result<Value, ToolError> {
        let text = self.scope.read_text_or_empty(target).await?;
        if text.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        serde_json::from_str(&text).map_err(|source| ToolError::Json {
            path: self.scope.relative(target),
            source,
        })
    }

    async fn save(&self, operation: &str, target: &Path, value: &Value) -> Result<(), ToolError> {
        let mut text = serde_json::to_string_pretty(value).map_err(|source| ToolError::Json {
            path: self.scope.relative(target),
            source,
        })?;
        text.push('\n');
        self.scope.write_text(target, &text).await?;
        self.scope.record(operation, &[target]);
        Ok(())
    }

    fn target(&self, path: impl AsRef<Path>, operation: &str) -> Result<PathBuf, ToolError> {
        self.scope.resolve(path, operation)
    }

    pub async fn read(&self, path: impl AsRef<Path>) -> Result<Value, ToolError> {
        let target = self.target(path, "json.read")?;
        self.load(&target).await
    }

    /// Deep-merge `patch` into the file. Returns the merged document.
    pub async fn merge(&self, path: impl AsRef<Path>, patch: Value) -> Result<Value, ToolError> {
        let target = self.target(path, "json.merge")?;
        let mut doc = self.load(&target).await?;
        deep_merge(&mut doc, patch);
        self.save("json.merge", &target, &doc).await?;
        Ok(doc)
    }

    pub async fn set(&self, path: impl AsRef<Path>, key: &str, value: Value) -> Result<(), ToolError> {
        let target = self.target(path, "json.set")?;
        let mut doc = self.load(&target).await?;
        split_key(key)
            .and_then(|segments| set_path(&mut doc, &segments, value))
            .map_err(|msg| ToolError::invalid("json.set", format!("{key}: {msg}")))?;
        self.save("json.set", &target, &doc).await
    }

    /// `false` if the key was not there; the file is then left untouched.
    pub async fn remove(&self, path: impl AsRef<Path>, key: &str) -> Result<bool, ToolError> {
        let target = self.target(path, "json.remove")?;
        let mut doc = self.load(&target).await?;
        let removed = split_key(key)
            .and_then(|segments| remove_path(&mut doc, &segments))
            .map_err(|msg| ToolError::invalid("json.remove", format!("{key}: {msg}")))?;
        if removed {
            self.save("json.remove", &target, &doc).await?;
        }
        Ok(removed)
    }

    /// Push `value` onto the array at `key`. With `unique`, an equal element
    /// already present makes this a no-op returning `false`.
    pub async fn add_to_array(
        &self,
        path: impl AsRef<Path>,
        key: &str,
        value: Value,
        unique: bool,
    ) -> Result<bool, ToolError> {
        let target = self.target(path, "json.addToArray")?;
        let mut doc = self.load(&target).await?;
        let added = split_key(key)
            .and_then(|segments| {
                let items = array_at(&mut doc, &segments)?;
                if unique && items.contains(&value) {
                    return Ok(false);
                }
                items.push(value);
                Ok(true)
            })
            .map_err(|msg| ToolError::invalid("json.addToArray", format!("{key}: {msg}")))?;
        if added {
            self.save("json.addToArray", &target, &doc).await?;
        }
        Ok(added)
    }

    /// Append each of `values` not already in the array. Returns how many were added.
    pub async fn merge_array(
        &self,
        path: impl AsRef<Path>,
        key: &str,
        values: Vec<Value>,
    ) -> Result<usize, ToolError> {
        let target = self.target(path, "json.mergeArray")?;
        let mut doc = self.load(&target).await?;
        let added = split_key(key)
            .and_then(|segments| {
                let items = array_at(&mut doc, &segments)?;
                let mut added = 0;
                for value in values {
                    if !items.contains(&value) {
                        items.push(value);
                        added += 1;
                    }
                }
                Ok(added)
            })
            .map_err(|msg| ToolError::invalid("json.mergeArray", format!("{key}: {msg}")))?;
        if added > 0 {
            self.save("json.mergeArray", &target, &doc).await?;
        }
        Ok(added)
    }
}
