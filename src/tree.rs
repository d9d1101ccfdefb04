//! Mapping between wire paths and the served directory tree.

use std::fs::Metadata;
use std::io;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::protocol::{ErrorCode, PathEntry};

pub const ROOT_PATH: &str = ".";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path escapes the served root: {0}")]
    Invalid(String),
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("cannot access {0}: {1}")]
    Io(String, String),
}

impl PathError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PathError::Invalid(_) => ErrorCode::INVALID_PATH,
            PathError::NotFound(_) => ErrorCode::NOT_FOUND,
            PathError::Io(..) => ErrorCode::IO,
        }
    }
}

/// Resolves a client supplied `/`-separated path under `root`.
///
/// Rejects absolute paths and any `..` component. `""` and `"."` name the
/// root itself.
pub fn resolve(root: &Path, wire_path: &str) -> Result<PathBuf, PathError> {
    let invalid = || PathError::Invalid(wire_path.to_string());
    if wire_path.starts_with('/') || wire_path.contains('\\') {
        return Err(invalid());
    }

    let mut resolved = root.to_path_buf();
    for part in wire_path.split('/') {
        match part {
            "" | "." => {}
            ".." => return Err(invalid()),
            part => {
                // catches drive prefixes and anything else the host treats specially
                let mut components = Path::new(part).components();
                match (components.next(), components.next()) {
                    (Some(Component::Normal(_)), None) => resolved.push(part),
                    _ => return Err(invalid()),
                }
            }
        }
    }
    Ok(resolved)
}

/// Canonical wire form: separators collapsed, `.` components dropped.
pub fn normalize(wire_path: &str) -> String {
    let parts: Vec<&str> = wire_path
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();
    if parts.is_empty() {
        ROOT_PATH.to_string()
    } else {
        parts.join("/")
    }
}

/// Converts a path below `root` to its wire form, or `None` if it lies
/// outside.
pub fn to_wire_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        Some(ROOT_PATH.to_string())
    } else {
        Some(parts.join("/"))
    }
}

/// Resolves `wire_path`, follows symlinks and checks the target still lies
/// under `root`. Returns the real path and its metadata.
pub fn locate(root: &Path, wire_path: &str) -> Result<(PathBuf, Metadata), PathError> {
    let resolved = resolve(root, wire_path)?;
    let real_root = root.canonicalize().map_err(|e| io_error(wire_path, e))?;
    let real = resolved
        .canonicalize()
        .map_err(|e| io_error(wire_path, e))?;
    if !real.starts_with(&real_root) {
        return Err(PathError::Invalid(wire_path.to_string()));
    }
    let meta = std::fs::metadata(&real).map_err(|e| io_error(wire_path, e))?;
    Ok((real, meta))
}

fn io_error(wire_path: &str, e: io::Error) -> PathError {
    if e.kind() == io::ErrorKind::NotFound {
        PathError::NotFound(wire_path.to_string())
    } else {
        PathError::Io(wire_path.to_string(), e.to_string())
    }
}

/// Every entry under `root`, sorted, preceded by the synthetic root entry.
pub fn list_entries(root: &Path) -> Vec<PathEntry> {
    let mut entries = vec![PathEntry::new(ROOT_PATH, true)];
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("skipping unreadable entry: {e}");
                continue;
            }
        };
        if let Some(path) = to_wire_path(root, entry.path()) {
            entries.push(PathEntry::new(path, entry.file_type().is_dir()));
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_paths() {
        let root = Path::new("/srv/data");
        assert_eq!(
            resolve(root, "a/b.txt").unwrap(),
            PathBuf::from("/srv/data/a/b.txt")
        );
        assert_eq!(resolve(root, ".").unwrap(), PathBuf::from("/srv/data"));
        assert_eq!(resolve(root, "").unwrap(), PathBuf::from("/srv/data"));
        assert_eq!(
            resolve(root, "./a//b/").unwrap(),
            PathBuf::from("/srv/data/a/b")
        );
    }

    #[test]
    fn rejects_escaping_paths() {
        let root = Path::new("/srv/data");
        for bad in ["../etc/passwd", "a/../../x", "/etc/passwd", "..", "a\\b"] {
            assert_eq!(
                resolve(root, bad),
                Err(PathError::Invalid(bad.to_string())),
                "{bad}"
            );
        }
    }

    #[test]
    fn normalizes_wire_paths() {
        assert_eq!(normalize("./a//b/"), "a/b");
        assert_eq!(normalize(""), ".");
        assert_eq!(normalize("."), ".");
        assert_eq!(normalize("docs"), "docs");
    }

    #[test]
    fn wire_paths_from_host_paths() {
        let root = Path::new("/srv/data");
        assert_eq!(
            to_wire_path(root, Path::new("/srv/data/a/b.txt")).as_deref(),
            Some("a/b.txt")
        );
        assert_eq!(
            to_wire_path(root, Path::new("/srv/data")).as_deref(),
            Some(".")
        );
        assert_eq!(to_wire_path(root, Path::new("/srv/other/x")), None);
    }

    #[test]
    fn lists_tree_with_root_entry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), "").unwrap();

        assert_eq!(
            list_entries(dir.path()),
            vec![
                PathEntry::new(".", true),
                PathEntry::new("a.txt", false),
                PathEntry::new("sub", true),
                PathEntry::new("sub/b.txt", false),
            ]
        );
    }

    #[test]
    fn locate_reports_kind_or_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        assert!(!locate(dir.path(), "a.txt").unwrap().1.is_dir());
        assert!(locate(dir.path(), ".").unwrap().1.is_dir());

        let missing = locate(dir.path(), "missing").unwrap_err();
        assert_eq!(missing, PathError::NotFound("missing".into()));
        assert_eq!(missing.code(), ErrorCode::NOT_FOUND);
    }

    #[cfg(unix)]
    #[test]
    fn locate_rejects_symlinks_leaving_the_root() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), "x").unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/inner.txt"), "ok").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret"), dir.path().join("escape")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("sub/inner.txt"), dir.path().join("alias")).unwrap();

        assert_eq!(
            locate(dir.path(), "escape").unwrap_err(),
            PathError::Invalid("escape".into())
        );
        assert!(locate(dir.path(), "alias").unwrap().1.is_file());
    }
}
