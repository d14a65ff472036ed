use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use super::ToolScope;
use crate::setup::error::ToolError;

/// `tools.text`: line-oriented edits. Every edit except `replace` is a no-op
/// when its result is already present.
#[derive(Clone)]
pub struct TextTools {
    scope: Arc<ToolScope>,
}

fn with_newline(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}

impl TextTools {
    pub(super) fn new(scope: Arc<ToolScope>) -> Self {
        Self { scope }
    }

    async fn commit(&self, operation: &str, target: &Path, contents: &str) -> Result<(), ToolError> {
        self.scope.write_text(target, contents).await?;
        self.scope.record(operation, &[target]);
        Ok(())
    }

    /// Insert `text` on the line after the first line containing `anchor`.
    pub async fn insert_after(
        &self,
        path: impl AsRef<Path>,
        anchor: &str,
        text: &str,
    ) -> Result<bool, ToolError> {
        let target = self.scope.resolve(path, "text.insertAfter")?;
        let content = self.scope.read_text(&target).await?;
        if content.contains(text.trim_end_matches('\n')) {
            return Ok(false);
        }
        let Some(at) = content.find(anchor) else {
            return Err(ToolError::invalid(
                "text.insertAfter",
                format!("anchor '{anchor}' not found in '{}'", self.scope.relative(&target)),
            ));
        };
        let after_anchor = at + anchor.len();
        let line_end = content[after_anchor..]
            .find('\n')
            .map_or(content.len(), |offset| after_anchor + offset + 1);

        let mut updated = String::with_capacity(content.len() + text.len() + 2);
        updated.push_str(&content[..line_end]);
        if !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(&with_newline(text));
        updated.push_str(&content[line_end..]);

        self.commit("text.insertAfter", &target, &updated).await?;
        Ok(true)
    }

    /// Append `block` unless the file already contains it. Creates the file.
    pub async fn ensure_block(&self, path: impl AsRef<Path>, block: &str) -> Result<bool, ToolError> {
        let target = self.scope.resolve(path, "text.ensureBlock")?;
        let mut content = self.scope.read_text_or_empty(&target).await?;
        if content.contains(block.trim_end_matches('\n')) {
            return Ok(false);
        }
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&with_newline(block));
        self.commit("text.ensureBlock", &target, &content).await?;
        Ok(true)
    }

    /// Replace whatever sits between the `start` and `end` markers, keeping
    /// the markers. `false` when the region already holds `replacement`.
    pub async fn replace_between(
        &self,
        path: impl AsRef<Path>,
        start: &str,
        end: &str,
        replacement: &str,
    ) -> Result<bool, ToolError> {
        let target = self.scope.resolve(path, "text.replaceBetween")?;
        let content = self.scope.read_text(&target).await?;
        let missing = |marker: &str| {
            ToolError::invalid(
                "text.replaceBetween",
                format!("marker '{marker}' not found in '{}'", self.scope.relative(&target)),
            )
        };
        let inner_start = content.find(start).ok_or_else(|| missing(start))? + start.len();
        let inner_end = content[inner_start..]
            .find(end)
            .map(|offset| inner_start + offset)
            .ok_or_else(|| missing(end))?;

        let region = format!("\n{}", with_newline(replacement));
        if content[inner_start..inner_end] == region {
            return Ok(false);
        }
        let updated = format!("{}{}{}", &content[..inner_start], region, &content[inner_end..]);
        self.commit("text.replaceBetween", &target, &updated).await?;
        Ok(true)
    }

    /// Append each line not already present. Returns how many were added.
    pub async fn append_lines(
        &self,
        path: impl AsRef<Path>,
        lines: &[String],
    ) -> Result<usize, ToolError> {
        let target = self.scope.resolve(path, "text.appendLines")?;
        let mut content = self.scope.read_text_or_empty(&target).await?;
        let mut present: HashSet<String> = content.lines().map(str::to_string).collect();
        let fresh: Vec<&String> = lines
            .iter()
            .filter(|line| present.insert((*line).clone()))
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        for line in &fresh {
            content.push_str(line);
            content.push('\n');
        }
        self.commit("text.appendLines", &target, &content).await?;
        Ok(fresh.len())
    }

    /// Replace every occurrence of `search`. Returns the number replaced.
    pub async fn replace(
        &self,
        path: impl AsRef<Path>,
        search: &str,
        replacement: &str,
    ) -> Result<usize, ToolError> {
        if search.is_empty() {
            return Err(ToolError::invalid("text.replace", "search text must not be empty"));
        }
        let target = self.scope.resolve(path, "text.replace")?;
        let content = self.scope.read_text(&target).await?;
        let count = content.matches(search).count();
        if count > 0 {
            let updated = content.replace(search, replacement);
            self.commit("text.replace", &target, &updated).await?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::fixture;

    #[tokio::test]
    async fn insert_after_is_idempotent() {
        let fx = fixture();
        fx.tools
            .files
            .write("main.js", "import a from 'a';\nrun();\n")
            .await
            .unwrap();
        let text = &fx.tools.text;
        assert!(text.insert_after("main.js", "import a", "import b from 'b';").await.unwrap());
        assert!(!text.insert_after("main.js", "import a", "import b from 'b';").await.unwrap());
        assert_eq!(
            fx.tools.files.read("main.js").await.unwrap(),
            "import a from 'a';\nimport b from 'b';\nrun();\n"
        );
    }

    #[tokio::test]
    async fn insert_after_missing_anchor_fails() {
        let fx = fixture();
        fx.tools.files.write("main.js", "run();\n").await.unwrap();
        let err = fx
            .tools
            .text
            .insert_after("main.js", "nope", "x")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("anchor 'nope' not found in 'main.js'"));
    }

    #[tokio::test]
    async fn ensure_block_creates_and_dedupes() {
        let fx = fixture();
        let text = &fx.tools.text;
        assert!(text.ensure_block(".gitignore", "dist/\n.env").await.unwrap());
        assert!(!text.ensure_block(".gitignore", "dist/\n.env\n").await.unwrap());
        assert_eq!(fx.tools.files.read(".gitignore").await.unwrap(), "dist/\n.env\n");
    }

    #[tokio::test]
    async fn replace_between_keeps_markers() {
        let fx = fixture();
        fx.tools
            .files
            .write("README.md", "# T\n<!-- start -->\nold\n<!-- end -->\ntail\n")
            .await
            .unwrap();
        let text = &fx.tools.text;
        assert!(
            text.replace_between("README.md", "<!-- start -->", "<!-- end -->", "new")
                .await
                .unwrap()
        );
        assert!(
            !text
                .replace_between("README.md", "<!-- start -->", "<!-- end -->", "new")
                .await
                .unwrap()
        );
        assert_eq!(
            fx.tools.files.read("README.md").await.unwrap(),
            "# T\n<!-- start -->\nnew\n<!-- end -->\ntail\n"
        );
    }

    #[tokio::test]
    async fn append_lines_skips_existing() {
        let fx = fixture();
        fx.tools.files.write(".env", "A=1").await.unwrap();
        let lines = vec!["A=1".to_string(), "B=2".to_string(), "B=2".to_string()];
        assert_eq!(fx.tools.text.append_lines(".env", &lines).await.unwrap(), 1);
        assert_eq!(fx.tools.text.append_lines(".env", &lines).await.unwrap(), 0);
        assert_eq!(fx.tools.files.read(".env").await.unwrap(), "A=1\nB=2\n");
    }

    #[tokio::test]
    async fn replace_counts_occurrences() {
        let fx = fixture();
        fx.tools.files.write("a.txt", "x-x-x").await.unwrap();
        assert_eq!(fx.tools.text.replace("a.txt", "x", "y").await.unwrap(), 3);
        assert_eq!(fx.tools.files.read("a.txt").await.unwrap(), "y-y-y");
        assert_eq!(fx.tools.text.replace("a.txt", "x", "y").await.unwrap(), 0);
    }
}
