use serde_json::{Map, Value, json};
use std::sync::Arc;

use super::ToolScope;
use super::json::JsonTools;
use crate::setup::error::ToolError;

/// Editor configuration written by `ide.applyPreset`.
#[derive(Debug, Clone, PartialEq)]
pub struct IdePreset {
    pub ide: &'static str,
    /// Settings file, deep-merged.
    pub settings_file: &'static str,
    pub settings: Value,
    /// Extension recommendations file, merged into its `recommendations` array.
    pub extensions_file: Option<&'static str>,
    pub recommendations: &'static [&'static str],
}

const VSCODE_RECOMMENDATIONS: &[&str] = &["esbenp.prettier-vscode", "dbaeumer.vscode-eslint"];

pub fn preset_for(ide: &str) -> Option<IdePreset> {
    let shared_settings = json!({
        "editor.formatOnSave": true,
        "editor.defaultFormatter": "esbenp.prettier-vscode",
        "files.exclude": {"**/node_modules": true},
    });
    match ide {
        "vscode" | "cursor" | "windsurf" => Some(IdePreset {
            ide: match ide {
                "cursor" => "cursor",
                "windsurf" => "windsurf",
                _ => "vscode",
            },
            settings_file: ".vscode/settings.json",
            settings: shared_settings,
            extensions_file: Some(".vscode/extensions.json"),
            recommendations: VSCODE_RECOMMENDATIONS,
        }),
        "kiro" => Some(IdePreset {
            ide: "kiro",
            settings_file: ".kiro/settings/editor.json",
            settings: shared_settings,
            extensions_file: None,
            recommendations: &[],
        }),
        _ => None,
    }
}

/// `tools.ide`: the selected editor and its preset.
#[derive(Clone)]
pub struct IdeTools {
    scope: Arc<ToolScope>,
}

impl IdeTools {
    pub(super) fn new(scope: Arc<ToolScope>) -> Self {
        Self { scope }
    }

    pub fn selected(&self) -> Option<String> {
        self.scope.env().ide().map(str::to_string)
    }

    /// Write the preset for `ide` (default: the selected IDE), with `settings`
    /// merged over the preset's own. Returns the files written; empty when no
    /// IDE is selected.
    pub async fn apply_preset(
        &self,
        ide: Option<&str>,
        settings: &Map<String, Value>,
    ) -> Result<Vec<String>, ToolError> {
        let Some(ide) = ide.map(str::to_string).or_else(|| self.selected()) else {
            return Ok(Vec::new());
        };
        let preset = preset_for(&ide).ok_or_else(|| {
            ToolError::invalid("ide.applyPreset", format!("unknown IDE '{ide}'"))
        })?;

        let json = JsonTools::new(self.scope.clone());
        let mut merged = preset.settings.clone();
        super::json::deep_merge(&mut merged, Value::Object(settings.clone()));
        json.merge(preset.settings_file, merged).await?;
        let mut written = vec![preset.settings_file.to_string()];

        if let Some(extensions_file) = preset.extensions_file {
            let recommendations = preset.recommendations.iter().map(|r| json!(r)).collect();
            json.merge_array(extensions_file, "recommendations", recommendations)
                .await?;
            written.push(extensions_file.to_string());
        }
        Ok(written)
    }
}
