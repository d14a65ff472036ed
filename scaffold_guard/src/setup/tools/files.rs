use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::ToolScope;
use crate::setup::error::ToolError;

/// `tools.files`: plain file and directory operations inside the project.
#[derive(Clone)]
pub struct FilesTools {
    scope: Arc<ToolScope>,
}

impl FilesTools {
    pub(super) fn new(scope: Arc<ToolScope>) -> Self {
        Self { scope }
    }

    /// Create every directory (and parents). All paths are validated before
    /// any directory is created.
    pub async fn ensure_dirs<P: AsRef<Path>>(&self, dirs: &[P]) -> Result<(), ToolError> {
        let targets = dirs
            .iter()
            .map(|dir| self.scope.resolve(dir, "files.ensureDirs"))
            .collect::<Result<Vec<PathBuf>, ToolError>>()?;
        for target in &targets {
            self.scope.fs().create_dir_all(target).await?;
        }
        let touched: Vec<&Path> = targets.iter().map(PathBuf::as_path).collect();
        self.scope.record("files.ensureDirs", &touched);
        Ok(())
    }

    pub async fn write(&self, path: impl AsRef<Path>, contents: &str) -> Result<(), ToolError> {
        let target = self.scope.resolve(path, "files.write")?;
        self.scope.write_text(&target, contents).await?;
        self.scope.record("files.write", &[&target]);
        Ok(())
    }

    pub async fn read(&self, path: impl AsRef<Path>) -> Result<String, ToolError> {
        let target = self.scope.resolve(path, "files.read")?;
        self.scope.read_text(&target).await
    }

    pub async fn exists(&self, path: impl AsRef<Path>) -> Result<bool, ToolError> {
        let target = self.scope.resolve(path, "files.exists")?;
        Ok(self.scope.fs().exists(&target).await?)
    }

    /// Entry names of a directory, sorted.
    pub async fn list(&self, dir: impl AsRef<Path>) -> Result<Vec<String>, ToolError> {
        let target = self.scope.resolve(dir, "files.list")?;
        let entries = self.scope.fs().read_dir(&target).await?;
        Ok(entries
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect())
    }

    /// Copy a file, or a directory tree recursively. Returns the number of
    /// files copied.
    pub async fn copy(
        &self,
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
    ) -> Result<usize, ToolError> {
        let source = self.scope.resolve(from, "files.copy")?;
        let dest = self.scope.resolve(to, "files.copy")?;
        let fs = self.scope.fs();

        let pairs: Vec<(PathBuf, PathBuf)> = if fs.metadata(&source).await?.is_dir() {
            self.scope
                .walk_files(&source)
                .await?
                .into_iter()
                .filter_map(|file| {
                    let rel = file.strip_prefix(&source).ok()?.to_path_buf();
                    Some((file, dest.join(rel)))
                })
                .collect()
        } else {
            vec![(source.clone(), dest.clone())]
        };

        for (file, target) in &pairs {
            if let Some(parent) = target.parent() {
                fs.create_dir_all(parent).await?;
            }
            fs.copy(file, target).await?;
        }
        self.scope.record("files.copy", &[&source, &dest]);
        Ok(pairs.len())
    }

    pub async fn move_path(
        &self,
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
    ) -> Result<(), ToolError> {
        let source = self.scope.resolve_destructive(from, "files.move")?;
        let dest = self.scope.resolve(to, "files.move")?;
        if let Some(parent) = dest.parent() {
            self.scope.fs().create_dir_all(parent).await?;
        }
        self.scope.fs().rename(&source, &dest).await?;
        self.scope.record("files.move", &[&source, &dest]);
        Ok(())
    }

    /// Remove a file or directory tree. `false` if nothing was there.
    pub async fn remove(&self, path: impl AsRef<Path>) -> Result<bool, ToolError> {
        let target = self.scope.resolve_destructive(path, "files.remove")?;
        let fs = self.scope.fs();
        let meta = match fs.symlink_metadata(&target).await {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            fs.remove_dir_all(&target).await?;
        } else {
            fs.remove_file(&target).await?;
        }
        self.scope.record("files.remove", &[&target]);
        Ok(true)
    }
}
