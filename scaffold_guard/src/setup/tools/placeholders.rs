use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use super::ToolScope;
use crate::setup::error::ToolError;

/// `tools.placeholders`: `⦃NAME⦄` token substitution.
#[derive(Clone)]
pub struct PlaceholderTools {
    scope: Arc<ToolScope>,
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"⦃([A-Za-z_][A-Za-z0-9_]*)⦄").expect("placeholder token regex must compile")
    })
}

pub fn placeholder_token(name: &str) -> String {
    format!("⦃{name}⦄")
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute known tokens; unknown ones stay as written. Returns the new
/// text and the number of tokens replaced.
fn substitute(text: &str, values: &Map<String, Value>) -> (String, usize) {
    let mut count = 0;
    let replaced = token_regex().replace_all(text, |caps: &Captures| match values.get(&caps[1]) {
        Some(value) => {
            count += 1;
            display(value)
        }
        None => caps[0].to_string(),
    });
    (replaced.into_owned(), count)
}

impl PlaceholderTools {
    pub(super) fn new(scope: Arc<ToolScope>) -> Self {
        Self { scope }
    }

    pub fn replace_all(&self, text: &str, values: &Map<String, Value>) -> String {
        substitute(text, values).0
    }

    /// Returns the number of tokens replaced; the file is only rewritten when
    /// that is non-zero.
    pub async fn replace_in_file(
        &self,
        path: impl AsRef<Path>,
        values: &Map<String, Value>,
    ) -> Result<usize, ToolError> {
        let target = self.scope.resolve(path, "placeholders.replaceInFile")?;
        let text = self.scope.read_text(&target).await?;
        let (updated, count) = substitute(&text, values);
        if count > 0 {
            self.scope.fs().write(&target, updated).await?;
            self.scope.record("placeholders.replaceInFile", &[&target]);
        }
        Ok(count)
    }

    /// Fill the resolved inputs into every text file under `include` (files or
    /// directories, project-relative; the whole project when absent). Binary
    /// files are skipped. Returns the project-relative paths that changed.
    pub async fn apply_inputs(&self, include: Option<&[String]>) -> Result<Vec<String>, ToolError> {
        let roots: Vec<String> = match include {
            Some(paths) => paths.to_vec(),
            None => vec![".".to_string()],
        };
        let mut files: Vec<PathBuf> = Vec::new();
        for root in &roots {
            let target = self.scope.resolve(root, "placeholders.applyInputs")?;
            for file in self.scope.walk_files(&target).await? {
                if !files.contains(&file) {
                    files.push(file);
                }
            }
        }

        let inputs = self.scope.env().inputs();
        let mut changed = Vec::new();
        for file in files {
            let bytes = self.scope.fs().read(&file).await?;
            let Ok(text) = String::from_utf8(bytes) else {
                continue;
            };
            let (updated, count) = substitute(&text, inputs);
            if count > 0 {
                self.scope.fs().write(&file, updated).await?;
                self.scope.record("placeholders.applyInputs", &[&file]);
                changed.push(self.scope.relative(&file));
            }
        }
        Ok(changed)
    }
}
