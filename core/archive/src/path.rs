//! Mapping user-supplied paths to filesystem sources and member names.
//!
//! A path given on the command line names two things: where to read from
//! on disk, and what the member is called inside the archive. Member names
//! are always relative and `/`-separated; they are computed against a base
//! directory (the current directory unless one is given).

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use targpg_common::{Error, MemberName, Result};

/// A source path resolved against its base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPath {
    /// Absolute location to read from.
    pub fs_path: PathBuf,
    /// Name to store and match the member under.
    pub member_name: MemberName,
}

impl NormalizedPath {
    /// Fail with `Error::NotFound` unless something exists at `fs_path`.
    ///
    /// Symlinks count as existing even when dangling.
    pub fn ensure_exists(&self) -> Result<()> {
        match fs::symlink_metadata(&self.fs_path) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::NotFound(self.fs_path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Resolve `filepath` against `base`.
///
/// # Behavior
/// - Absolute `filepath` with no `base`: read from that path, store under
///   the same path with its root removed (`/srv/a.txt` becomes `srv/a.txt`)
/// - Otherwise `base` (default: current directory) is canonicalized, the
///   joined path is canonicalized as far as it exists, and the member name
///   is the result relative to `base`
///
/// # Errors
/// - `Error::NotFound` if `base` does not exist
/// - `Error::PathEscape` if the result lies outside `base`
/// - `Error::InvalidInput` for an empty path, a path that resolves to `base`
///   itself, or a name that is not valid UTF-8
pub fn normalize(filepath: impl AsRef<Path>, base: Option<&Path>) -> Result<NormalizedPath> {
    let filepath = filepath.as_ref();
    if filepath.as_os_str().is_empty() {
        return Err(Error::InvalidInput("Empty path".to_string()));
    }

    if base.is_none() && filepath.is_absolute() {
        let fs_path = lexical_clean(filepath);
        let member_name = member_name_from(&fs_path, filepath)?;
        debug!(path = %fs_path.display(), member = %member_name, "Absolute path, root stripped");
        return Ok(NormalizedPath {
            fs_path,
            member_name,
        });
    }

    let base = match base {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()?,
    };
    let base = fs::canonicalize(&base).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => {
            Error::NotFound(format!("base directory {}", base.display()))
        }
        _ => Error::Io(e),
    })?;

    let resolved = resolve(&base.join(filepath))?;
    let relative = resolved
        .strip_prefix(&base)
        .map_err(|_| Error::PathEscape {
            path: resolved.clone(),
            base: base.clone(),
        })?;
    let member_name = member_name_from(relative, filepath)?;

    debug!(
        base = %base.display(),
        path = %resolved.display(),
        member = %member_name,
        "Normalized path"
    );
    Ok(NormalizedPath {
        fs_path: resolved,
        member_name,
    })
}

/// Canonicalize `path`, or as much of it as exists.
///
/// Missing trailing components are appended lexically, so paths that do
/// not exist yet still get a stable member name.
fn resolve(path: &Path) -> Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(resolved) => return Ok(resolved),
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
        Err(_) => {}
    }

    let cleaned = lexical_clean(path);
    let mut existing = cleaned.as_path();
    let mut missing = Vec::new();
    loop {
        match fs::canonicalize(existing) {
            Ok(mut resolved) => {
                for component in missing.iter().rev() {
                    resolved.push(component);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name.to_os_string());
                        existing = parent;
                    }
                    _ => return Ok(cleaned.clone()),
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Fold `.` and `..` without touching the filesystem.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn member_name_from(path: &Path, original: &Path) -> Result<MemberName> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "{} is not valid UTF-8",
                        original.display()
                    ))
                })?;
                parts.push(part);
            }
            Component::ParentDir => {
                return Err(Error::InvalidInput(format!(
                    "{} climbs above the filesystem root",
                    original.display()
                )))
            }
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
        }
    }

    if parts.is_empty() {
        return Err(Error::InvalidInput(format!(
            "{} resolves to its base directory",
            original.display()
        )));
    }
    MemberName::new(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("file1.txt"), "hello").unwrap();
        fs::create_dir_all(dir.path().join("docs/nested")).unwrap();
        fs::write(dir.path().join("docs/nested/readme.txt"), "read me").unwrap();
        dir
    }

    #[test]
    fn test_relative_file() {
        let dir = workspace();
        let normalized = normalize("file1.txt", Some(dir.path())).unwrap();

        assert_eq!(normalized.member_name.as_str(), "file1.txt");
        assert_eq!(
            normalized.fs_path,
            fs::canonicalize(dir.path().join("file1.txt")).unwrap()
        );
    }

    #[test]
    fn test_nested_and_trailing_separator() {
        let dir = workspace();

        let nested = normalize("docs/nested/readme.txt", Some(dir.path())).unwrap();
        assert_eq!(nested.member_name.as_str(), "docs/nested/readme.txt");

        let directory = normalize("docs/", Some(dir.path())).unwrap();
        assert_eq!(directory.member_name.as_str(), "docs");
    }

    #[test]
    fn test_parent_components_folded() {
        let dir = workspace();
        let normalized = normalize("docs/nested/../../file1.txt", Some(dir.path())).unwrap();
        assert_eq!(normalized.member_name.as_str(), "file1.txt");
    }

    #[test]
    fn test_escape_rejected() {
        let dir = workspace();
        let base = dir.path().join("docs");

        let result = normalize("../file1.txt", Some(&base));
        assert!(matches!(result, Err(Error::PathEscape { .. })));
    }

    #[test]
    fn test_absolute_outside_base_rejected() {
        let dir = workspace();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("other.txt"), "x").unwrap();

        let result = normalize(outside.path().join("other.txt"), Some(dir.path()));
        assert!(matches!(result, Err(Error::PathEscape { .. })));
    }

    #[test]
    fn test_absolute_inside_base_is_relative() {
        let dir = workspace();
        let normalized = normalize(dir.path().join("file1.txt"), Some(dir.path())).unwrap();
        assert_eq!(normalized.member_name.as_str(), "file1.txt");
    }

    #[test]
    fn test_absolute_without_base_strips_root() {
        let dir = workspace();
        let absolute = dir.path().join("file1.txt");
        let normalized = normalize(&absolute, None).unwrap();

        assert_eq!(normalized.fs_path, absolute);
        assert!(!normalized.member_name.as_str().starts_with('/'));
        assert!(normalized.member_name.as_str().ends_with("/file1.txt"));
    }

    #[test]
    fn test_missing_file_still_named() {
        let dir = workspace();
        let normalized = normalize("docs/not-yet.txt", Some(dir.path())).unwrap();

        assert_eq!(normalized.member_name.as_str(), "docs/not-yet.txt");
        assert!(matches!(
            normalized.ensure_exists(),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_base_itself_rejected() {
        let dir = workspace();
        assert!(matches!(
            normalize(".", Some(dir.path())),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            normalize("", Some(dir.path())),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_missing_base() {
        let dir = workspace();
        let result = normalize("file1.txt", Some(&dir.path().join("nope")));
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_out_of_base_rejected() {
        let dir = workspace();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.txt"), "x").unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            dir.path().join("link.txt"),
        )
        .unwrap();

        let result = normalize("link.txt", Some(dir.path()));
        assert!(matches!(result, Err(Error::PathEscape { .. })));
    }

    #[test]
    fn test_lexical_clean() {
        assert_eq!(lexical_clean(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(lexical_clean(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(lexical_clean(Path::new("../a")), PathBuf::from("../a"));
    }

    proptest! {
        #[test]
        fn lexical_clean_leaves_no_dots_below_root(
            parts in proptest::collection::vec(prop_oneof![
                Just(".".to_string()),
                Just("..".to_string()),
                "[a-z]{1,4}"
            ], 0..10)
        ) {
            let path = PathBuf::from("/").join(parts.join("/"));
            let cleaned = lexical_clean(&path);
            prop_assert!(cleaned.is_absolute());
            prop_assert!(cleaned
                .components()
                .all(|c| matches!(c, Component::RootDir | Component::Normal(_))));
        }
    }
}
