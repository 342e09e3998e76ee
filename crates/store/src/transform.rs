use std::fs;
use std::path::Path;
use tracing::warn;

use crate::StoreError;

/// Replaces the file at `path` with a transformed copy, keeping the
/// original at `backup`.
///
/// 1. `path` is renamed to `backup` (creating `backup`'s directory and
///    replacing any earlier backup).
/// 2. `f(backup, path)` streams the transformation from the backup into a
///    new file at `path`.
/// 3. If `f` fails, the backup stays in place and whatever `f` left at
///    `path` is removed.
///
/// # Errors
///
/// [`StoreError::MissingSource`] if `path` does not exist, rename failures,
/// and any error returned by `f`.
pub fn transform_file<T, E, F>(path: &Path, backup: &Path, f: F) -> Result<T, E>
where
    F: FnOnce(&Path, &Path) -> Result<T, E>,
    E: From<StoreError>,
{
    if !path.exists() {
        return Err(StoreError::MissingSource(path.to_path_buf()).into());
    }
    if let Some(parent) = backup.parent() {
        fs::create_dir_all(parent).map_err(StoreError::from)?;
    }
    fs::rename(path, backup).map_err(StoreError::from)?;

    match f(backup, path) {
        Ok(v) => Ok(v),
        Err(e) => {
            if path.exists() {
                if let Err(rm) = fs::remove_file(path) {
                    warn!(path = %path.display(), error = %rm, "failed to remove partial output");
                }
            }
            Err(e)
        }
    }
}
