//! Destination arbitration and source glob expansion.
//!
//! Peer-supplied names are slash-separated regardless of host; everything
//! here translates them through the host's native separator and answers the
//! receiver's "where does this record actually land" question against live
//! filesystem state.

use crate::errors::{Error, Result};

/// What a header announces the incoming entry to be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetKind {
    File,
    Directory,
}

/// Join an optional base and a slash-separated subpath using native
/// separators.
pub fn resolve_local(base: Option<&std::path::Path>, sub: &str) -> std::path::PathBuf {
    let mut path = base.map(|p| p.to_path_buf()).unwrap_or_default();
    if sub.starts_with('/') {
        path.push(std::path::Path::new("/"));
    }
    for component in sub.split('/').filter(|c| !c.is_empty()) {
        path.push(component);
    }
    path
}

/// The last path component, for use as a wire entry name.
pub fn leaf_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Stat that distinguishes "absent" from "cannot tell".
///
/// A permission failure on the lookup means existence cannot be decided and
/// maps to [`Error::AccessIndeterminate`]; symlinks are followed.
pub async fn stat(path: &std::path::Path) -> Result<Option<std::fs::Metadata>> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(Some(metadata)),
        Err(error) => match error.kind() {
            std::io::ErrorKind::NotFound => Ok(None),
            std::io::ErrorKind::PermissionDenied => {
                Err(Error::AccessIndeterminate(path.to_path_buf()))
            }
            _ => Err(error.into()),
        },
    }
}

/// Decide where a `C`/`D` record with leaf `name` lands against `target`.
///
/// An existing directory absorbs the entry as a child; an existing file is
/// overwritten in place (files only); a missing leaf is acceptable when its
/// parent is a live directory.
pub async fn arbitrate_destination(
    target: &std::path::Path,
    name: &str,
    kind: TargetKind,
) -> Result<std::path::PathBuf> {
    match stat(target).await? {
        Some(metadata) if metadata.is_dir() => Ok(resolve_local(Some(target), name)),
        Some(_) => match kind {
            TargetKind::File => Ok(target.to_path_buf()),
            TargetKind::Directory => Err(Error::NotADirectory(target.to_path_buf())),
        },
        None => {
            let parent = match target.parent() {
                // a bare leaf or a filesystem root resolves against the
                // current directory, which exists by definition
                None => return Ok(target.to_path_buf()),
                Some(parent) if parent.as_os_str().is_empty() => {
                    return Ok(target.to_path_buf());
                }
                Some(parent) => parent,
            };
            match stat(parent).await? {
                Some(metadata) if metadata.is_dir() => Ok(target.to_path_buf()),
                _ => Err(Error::CannotWrite(target.to_path_buf())),
            }
        }
    }
}

/// Split a `*` pattern into `(basedir, leaf-pattern)` at the last separator
/// preceding the first `*`. Returns `None` for literal paths.
pub fn split_glob(pattern: &str) -> Option<(std::path::PathBuf, String)> {
    let star = pattern.find('*')?;
    match pattern[..star].rfind('/') {
        Some(0) => Some((
            std::path::PathBuf::from("/"),
            pattern[1..].to_string(),
        )),
        Some(sep) => Some((
            resolve_local(None, &pattern[..sep]),
            pattern[sep + 1..].to_string(),
        )),
        None => Some((std::path::PathBuf::from("."), pattern.to_string())),
    }
}

/// Compile a leaf pattern for matching directory entries.
pub fn compile_leaf(pattern: &str) -> Result<globset::GlobMatcher> {
    // build glob with appropriate settings
    let glob = globset::GlobBuilder::new(pattern)
        .literal_separator(true) // * doesn't match /
        .build()
        .map_err(|error| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid glob pattern {pattern:?}: {error}"),
            ))
        })?;
    Ok(glob.compile_matcher())
}
