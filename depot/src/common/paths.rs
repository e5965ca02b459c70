//! Path Utilities
//!
//! Resolution of manifest package paths against the package store root.

use std::path::{Component, Path, PathBuf};

/// Resolve `relative` under `root` without ever leaving `root`.
///
/// Normalization is lexical: `.` is dropped and `..` pops the previous
/// component. Absolute paths, drive prefixes and any `..` that would climb
/// above `root` yield `None`, as does a path with no file component.
pub fn resolve_package_path(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    let mut depth = 0usize;

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                normalized.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                normalized.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if depth == 0 {
        return None;
    }

    Some(root.join(normalized))
}
