use crate::error::{DessiError, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Lexically normalizes a path, removing `.` components and folding `..` into
/// the preceding component. Does not touch the filesystem, so the path need not exist.
///
/// A `..` directly under the filesystem root is dropped, matching how the OS
/// resolves `/..`.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component),
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            Component::Normal(name) => normalized.push(name),
        }
    }
    normalized
}

/// Makes a command-line path absolute against the current working directory
/// and normalizes it.
///
/// # Errors
///
/// Returns `DessiError::Io` if the current directory cannot be determined.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    Ok(normalize_path(&std::path::absolute(path)?))
}

/// Resolves the `virtual` path of an include directive against the root directory.
///
/// Virtual paths are always relative to `root`, never to the including file.
/// A leading `/` only marks the path as root-relative and is stripped.
///
/// # Errors
///
/// - `DessiError::PathTraversal` if `confine` is set and the resolved path leaves `root`.
pub fn resolve_virtual_path(virtual_path: &str, root: &Path, confine: bool) -> Result<PathBuf> {
    let cleaned = virtual_path.trim_start_matches('/');
    let resolved = normalize_path(&root.join(cleaned));

    if confine && !resolved.starts_with(normalize_path(root)) {
        return Err(DessiError::PathTraversal { path: resolved });
    }

    Ok(resolved)
}

/// Reads the contents of a file at the given path as text.
///
/// Invalid UTF-8 sequences are replaced with U+FFFD rather than failing, so
/// legacy-encoded pages and binary includes never abort a run.
///
/// # Errors
///
/// - `DessiError::FileNotFound` if the path doesn't exist or isn't a file.
/// - `DessiError::Read` if there's an error reading the file.
pub fn read_file_contents(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(DessiError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let bytes = fs::read(path).map_err(|source| DessiError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(e) => Ok(String::from_utf8_lossy(e.as_bytes()).into_owned()),
    }
}

/// Writes `contents` as UTF-8 to `path`, creating or truncating the file.
///
/// # Errors
///
/// Returns `DessiError::Write` if the file cannot be written.
pub fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).map_err(|source| DessiError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Copies `from` to `to` byte for byte. Returns the number of bytes copied.
///
/// # Errors
///
/// Returns `DessiError::Write` if the copy fails.
pub fn copy_file(from: &Path, to: &Path) -> Result<u64> {
    fs::copy(from, to).map_err(|source| DessiError::Write {
        path: to.to_path_buf(),
        source,
    })
}

/// Creates `path` and any missing parents. Succeeds if it already exists.
///
/// # Errors
///
/// Returns `DessiError::Write` if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| DessiError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Whether the final component of `path` starts with a dot.
#[must_use]
pub fn is_dotfile(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}
