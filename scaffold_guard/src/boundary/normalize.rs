use std::path::{Component, Path, PathBuf};

/// Normalize a path lexically (without filesystem access).
///
/// `.` segments are dropped and `..` pops the previous segment, but never past
/// the root: `/a/../..` normalizes to `/`.
pub fn normalize_path_lexically(path: &Path) -> PathBuf {
    let mut stack = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if stack
                    .last()
                    .is_some_and(|c| matches!(c, Component::Normal(_)))
                {
                    stack.pop();
                }
            }
            c => stack.push(c),
        }
    }

    stack.iter().collect()
}
