use std::fs::{Metadata, Permissions};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::enforcer::BoundaryEnforcer;
use super::error::{FsError, ViolationType};

type FsResult<T> = Result<T, FsError>;

fn io_error(operation: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> FsError {
    let path = path.to_path_buf();
    move |source| FsError::Io {
        operation,
        path,
        source,
    }
}

/// Filesystem façade bound to one [`BoundaryEnforcer`].
///
/// Each method validates every path argument first and only then forwards to
/// `tokio::fs` with the resolved path. Two-path operations validate both
/// sides. Components downstream of the boundary hold this, never a raw
/// filesystem handle.
#[derive(Debug, Clone)]
pub struct BoundedFs {
    enforcer: BoundaryEnforcer,
}

impl BoundedFs {
    pub(super) fn new(enforcer: BoundaryEnforcer) -> Self {
        Self { enforcer }
    }

    pub fn enforcer(&self) -> &BoundaryEnforcer {
        &self.enforcer
    }

    pub fn root(&self) -> &Path {
        self.enforcer.root()
    }

    fn check(&self, path: &Path, operation: &'static str) -> FsResult<PathBuf> {
        Ok(self.enforcer.validate_path(path, operation)?)
    }

    pub async fn read(&self, path: impl AsRef<Path>) -> FsResult<Vec<u8>> {
        let path = self.check(path.as_ref(), "read")?;
        tokio::fs::read(&path).await.map_err(io_error("read", &path))
    }

    pub async fn read_to_string(&self, path: impl AsRef<Path>) -> FsResult<String> {
        let path = self.check(path.as_ref(), "read")?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(io_error("read", &path))
    }

    pub async fn write(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> FsResult<()> {
        let path = self.check(path.as_ref(), "write")?;
        tokio::fs::write(&path, contents)
            .await
            .map_err(io_error("write", &path))
    }

    pub async fn append(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> FsResult<()> {
        let path = self.check(path.as_ref(), "append")?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_error("append", &path))?;
        file.write_all(contents.as_ref())
            .await
            .map_err(io_error("append", &path))?;
        file.flush().await.map_err(io_error("append", &path))
    }

    /// Entries of a directory as validated absolute paths, sorted by name.
    ///
    /// An entry that is a symlink resolving outside the root is audited and
    /// left out of the listing.
    pub async fn read_dir(&self, path: impl AsRef<Path>) -> FsResult<Vec<PathBuf>> {
        let path = self.check(path.as_ref(), "list")?;
        let mut reader = tokio::fs::read_dir(&path)
            .await
            .map_err(io_error("list", &path))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(io_error("list", &path))?
        {
            match self.check(&entry.path(), "list") {
                Ok(validated) => entries.push(validated),
                Err(FsError::Boundary(violation))
                    if violation.violation_type == ViolationType::SymlinkEscape =>
                {
                    tracing::debug!("Skipping '{}' in listing", violation.attempted_path);
                }
                Err(err) => return Err(err),
            }
        }
        entries.sort();
        Ok(entries)
    }

    pub async fn create_dir(&self, path: impl AsRef<Path>) -> FsResult<()> {
        let path = self.check(path.as_ref(), "mkdir")?;
        tokio::fs::create_dir(&path)
            .await
            .map_err(io_error("mkdir", &path))
    }

    pub async fn create_dir_all(&self, path: impl AsRef<Path>) -> FsResult<()> {
        let path = self.check(path.as_ref(), "mkdir")?;
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(io_error("mkdir", &path))
    }

    pub async fn remove_dir(&self, path: impl AsRef<Path>) -> FsResult<()> {
        let path = self.check(path.as_ref(), "rmdir")?;
        tokio::fs::remove_dir(&path)
            .await
            .map_err(io_error("rmdir", &path))
    }

    pub async fn remove_dir_all(&self, path: impl AsRef<Path>) -> FsResult<()> {
        let path = self.check(path.as_ref(), "rm")?;
        tokio::fs::remove_dir_all(&path)
            .await
            .map_err(io_error("rm", &path))
    }

    pub async fn remove_file(&self, path: impl AsRef<Path>) -> FsResult<()> {
        let path = self.check(path.as_ref(), "unlink")?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(io_error("unlink", &path))
    }

    pub async fn metadata(&self, path: impl AsRef<Path>) -> FsResult<Metadata> {
        let path = self.check(path.as_ref(), "stat")?;
        tokio::fs::metadata(&path)
            .await
            .map_err(io_error("stat", &path))
    }

    pub async fn symlink_metadata(&self, path: impl AsRef<Path>) -> FsResult<Metadata> {
        let path = self.check(path.as_ref(), "lstat")?;
        tokio::fs::symlink_metadata(&path)
            .await
            .map_err(io_error("lstat", &path))
    }

    /// Access check: `Ok(false)` when the path simply does not exist.
    pub async fn exists(&self, path: impl AsRef<Path>) -> FsResult<bool> {
        let path = self.check(path.as_ref(), "access")?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(io_error("access", &path))
    }

    pub async fn copy(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> FsResult<u64> {
        let from = self.check(from.as_ref(), "copy")?;
        let to = self.check(to.as_ref(), "copy")?;
        tokio::fs::copy(&from, &to)
            .await
            .map_err(io_error("copy", &from))
    }

    pub async fn rename(&self, from: impl AsRef<Path>, to: impl AsRef<Path>) -> FsResult<()> {
        let from = self.check(from.as_ref(), "rename")?;
        let to = self.check(to.as_ref(), "rename")?;
        tokio::fs::rename(&from, &to)
            .await
            .map_err(io_error("rename", &from))
    }

    pub async fn set_permissions(&self, path: impl AsRef<Path>, perms: Permissions) -> FsResult<()> {
        let path = self.check(path.as_ref(), "chmod")?;
        tokio::fs::set_permissions(&path, perms)
            .await
            .map_err(io_error("chmod", &path))
    }

    #[cfg(unix)]
    pub async fn chown(
        &self,
        path: impl AsRef<Path>,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> FsResult<()> {
        let path = self.check(path.as_ref(), "chown")?;
        let target = path.clone();
        tokio::task::spawn_blocking(move || std::os::unix::fs::chown(&target, uid, gid))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))
            .and_then(|r| r)
            .map_err(io_error("chown", &path))
    }

    /// The raw link target. The target itself is not validated; following it
    /// goes through another call on this façade.
    pub async fn read_link(&self, path: impl AsRef<Path>) -> FsResult<PathBuf> {
        let path = self.check(path.as_ref(), "readlink")?;
        tokio::fs::read_link(&path)
            .await
            .map_err(io_error("readlink", &path))
    }

    /// Create `link` pointing at `target`. A relative target is resolved from
    /// the link's directory, and both ends must stay inside the root.
    #[cfg(unix)]
    pub async fn symlink(&self, target: impl AsRef<Path>, link: impl AsRef<Path>) -> FsResult<()> {
        let link = self.check(link.as_ref(), "symlink")?;
        let target = target.as_ref();
        let effective_target = match link.parent() {
            Some(parent) if target.is_relative() => parent.join(target),
            _ => target.to_path_buf(),
        };
        self.check(&effective_target, "symlink")?;
        tokio::fs::symlink(target, &link)
            .await
            .map_err(io_error("symlink", &link))
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::AuditLogger;
    use crate::boundary::{BoundaryEnforcer, ViolationType};
    use tempfile::TempDir;

    fn bounded(temp: &TempDir) -> super::BoundedFs {
        BoundaryEnforcer::new(temp.path(), AuditLogger::in_memory())
            .unwrap()
            .wrap_fs()
    }

    #[tokio::test]
    async fn write_then_read_inside_root() {
        let temp = TempDir::new().unwrap();
        let fs = bounded(&temp);
        fs.create_dir_all("src/lib").await.unwrap();
        fs.write("src/lib/a.txt", "hello").await.unwrap();
        fs.append("src/lib/a.txt", " world").await.unwrap();
        assert_eq!(fs.read_to_string("src/lib/a.txt").await.unwrap(), "hello world");
        assert!(fs.exists("src/lib/a.txt").await.unwrap());
        assert!(!fs.exists("src/lib/missing.txt").await.unwrap());
    }

    #[tokio::test]
    async fn escape_is_refused_before_touching_disk() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("proj");
        std::fs::create_dir(&root).unwrap();
        let fs = BoundaryEnforcer::new(&root, AuditLogger::in_memory())
            .unwrap()
            .wrap_fs();

        let err = fs.write("../escaped.txt", "nope").await.unwrap_err();
        assert!(err.is_boundary_violation());
        assert!(!temp.path().join("escaped.txt").exists());
    }

    #[tokio::test]
    async fn two_path_operations_validate_both_sides() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("proj");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("inside.txt"), "x").unwrap();
        std::fs::write(temp.path().join("outside.txt"), "y").unwrap();
        let fs = BoundaryEnforcer::new(&root, AuditLogger::in_memory())
            .unwrap()
            .wrap_fs();

        assert!(fs.copy("inside.txt", "../copied.txt").await.is_err());
        assert!(fs.copy("../outside.txt", "stolen.txt").await.is_err());
        assert!(fs.rename("inside.txt", "../moved.txt").await.is_err());
        assert!(root.join("inside.txt").exists());
        assert!(!root.join("stolen.txt").exists());
    }

    #[tokio::test]
    async fn read_dir_lists_sorted_entries() {
        let temp = TempDir::new().unwrap();
        let fs = bounded(&temp);
        fs.write("b.txt", "").await.unwrap();
        fs.write("a.txt", "").await.unwrap();
        let names: Vec<String> = fs
            .read_dir(".")
            .await
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn read_dir_skips_and_audits_escaping_symlinks() {
        let temp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let audit = AuditLogger::in_memory();
        let fs = BoundaryEnforcer::new(temp.path(), audit.clone())
            .unwrap()
            .wrap_fs();
        fs.write("a.txt", "").await.unwrap();
        fs.write("c.txt", "").await.unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("b-escape")).unwrap();

        let names: Vec<String> = fs
            .read_dir(".")
            .await
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.txt", "c.txt"]);

        audit.close().await.unwrap();
        let entries = audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].field("violationType").unwrap(), "symlink_escape");
        assert_eq!(entries[0].field("operation").unwrap(), "list");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_target_outside_root_is_refused() {
        let temp = TempDir::new().unwrap();
        let fs = bounded(&temp);
        let err = fs.symlink("../../etc/passwd", "passwd").await.unwrap_err();
        match err {
            super::FsError::Boundary(v) => assert_eq!(v.violation_type, ViolationType::PathTraversal),
            other => panic!("expected boundary violation, got {other}"),
        }
        fs.write("real.txt", "ok").await.unwrap();
        fs.symlink("real.txt", "alias.txt").await.unwrap();
        assert_eq!(fs.read_to_string("alias.txt").await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn io_failure_on_valid_path_is_not_a_violation() {
        let temp = TempDir::new().unwrap();
        let fs = bounded(&temp);
        let err = fs.read_to_string("missing.txt").await.unwrap_err();
        assert!(!err.is_boundary_violation());
        assert!(err.is_not_found());
    }
}
