use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use super::ToolScope;
use crate::setup::error::ToolError;

/// `tools.templates`: `{{ key }}` rendering.
///
/// Render data starts from the template constants, the resolved inputs and
/// `projectName`; call-site data overrides all of them. Dotted keys walk into
/// nested objects. Unknown keys are left in place.
#[derive(Clone)]
pub struct TemplateTools {
    scope: Arc<ToolScope>,
}

fn mustache_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s*\}\}")
            .expect("template key regex must compile")
    })
}

fn lookup<'a>(data: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    let mut parts = key.split('.');
    let mut current = data.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

pub(crate) fn render(template: &str, data: &Map<String, Value>) -> String {
    mustache_regex()
        .replace_all(template, |caps: &Captures| match lookup(data, &caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) => String::new(),
            Some(other) => other.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

impl TemplateTools {
    pub(super) fn new(scope: Arc<ToolScope>) -> Self {
        Self { scope }
    }

    fn data(&self, overrides: &Map<String, Value>) -> Map<String, Value> {
        let env = self.scope.env();
        let mut data = env.constants().clone();
        data.extend(env.inputs().clone());
        data.insert(
            "projectName".to_string(),
            Value::String(env.project_name().to_string()),
        );
        data.extend(overrides.clone());
        data
    }

    pub fn render_string(&self, template: &str, data: &Map<String, Value>) -> String {
        render(template, &self.data(data))
    }

    /// Render a file in place.
    pub async fn render_file(
        &self,
        path: impl AsRef<Path>,
        data: &Map<String, Value>,
    ) -> Result<(), ToolError> {
        let target = self.scope.resolve(path, "templates.renderFile")?;
        let text = self.scope.read_text(&target).await?;
        let rendered = render(&text, &self.data(data));
        if rendered != text {
            self.scope.fs().write(&target, rendered).await?;
            self.scope.record("templates.renderFile", &[&target]);
        }
        Ok(())
    }

    /// Render `from` into `to`, leaving `from` untouched.
    pub async fn copy(
        &self,
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
        data: &Map<String, Value>,
    ) -> Result<(), ToolError> {
        let source = self.scope.resolve(from, "templates.copy")?;
        let dest = self.scope.resolve(to, "templates.copy")?;
        let text = self.scope.read_text(&source).await?;
        self.scope
            .write_text(&dest, &render(&text, &self.data(data)))
            .await?;
        self.scope.record("templates.copy", &[&source, &dest]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::fixture;
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_nested_keys_and_keeps_unknown() {
        let data = json!({"app": {"name": "demo", "ports": [8080]}, "empty": null});
        let out = render(
            "{{app.name}}:{{ app.ports.0 }} {{empty}}|{{ missing }}",
            data.as_object().unwrap(),
        );
        assert_eq!(out, "demo:8080 |{{ missing }}");
    }

    #[tokio::test]
    async fn default_data_comes_from_the_environment() {
        let fx = fixture();
        let out = fx.tools.templates.render_string(
            "{{ projectName }} by {{ org }}: {{ PROJECT_TITLE }}",
            &Map::new(),
        );
        assert_eq!(out, "demo by acme: Demo App");
    }

    #[tokio::test]
    async fn copy_renders_into_destination() {
        let fx = fixture();
        fx.tools
            .files
            .write("templates/env.tpl", "NAME={{ projectName }}\nPORT={{ port }}\n")
            .await
            .unwrap();
        let data = json!({"port": 3000});
        fx.tools
            .templates
            .copy("templates/env.tpl", ".env", data.as_object().unwrap())
            .await
            .unwrap();
        assert_eq!(
            fx.tools.files.read(".env").await.unwrap(),
            "NAME=demo\nPORT=3000\n"
        );
        assert!(fx.tools.files.exists("templates/env.tpl").await.unwrap());
    }
}
