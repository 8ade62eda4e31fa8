use std::path::{Component, Path, PathBuf};

use crate::error::read_error;
use crate::{Error, Result};

/// Resolve `path` against `root`, refusing anything that lands outside of it.
///
/// Leading separators are dropped so absolute-looking names are treated as
/// root-relative. `..` may not climb above the root. The deepest existing
/// ancestor is canonicalized so a symlink cannot smuggle the result out.
/// `root` must already be canonical.
pub fn resolve(root: &Path, path: impl AsRef<Path>) -> Result<PathBuf> {
    let requested = path.as_ref();
    let cleaned = clean(requested).ok_or_else(|| Error::PathEscape {
        path: requested.to_path_buf(),
    })?;
    let resolved = root.join(cleaned);

    let existing = deepest_existing(&resolved);
    let canonical = existing.canonicalize().map_err(read_error(existing))?;
    if !canonical.starts_with(root) {
        return Err(Error::PathEscape {
            path: requested.to_path_buf(),
        });
    }

    Ok(resolved)
}

/// Inverse of [`resolve`]: the root-relative form of an absolute path.
pub fn relative(root: &Path, path: &Path) -> Option<PathBuf> {
    path.strip_prefix(root).ok().map(Path::to_path_buf)
}

/// Lexically normalize, returning `None` when `..` pops past the start.
fn clean(path: &Path) -> Option<PathBuf> {
    let mut result = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(part) => result.push(part),
            Component::ParentDir => {
                if !result.pop() {
                    return None;
                }
            }
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
        }
    }

    Some(result)
}

fn deepest_existing(path: &Path) -> &Path {
    let mut current = path;
    while current.symlink_metadata().is_err() {
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }
    current
}
