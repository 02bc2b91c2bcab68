//! Tree maintenance
//!
//! `clean` resets a reference tree to its raw frames so every artifact is
//! rebuilt on the next run. It removes every file that is not a raw frame,
//! whatever its type, so it only runs when asked for.

use crate::error::{RefError, Result};
use crate::layout;
use std::fs;
use std::path::{Path, PathBuf};

/// Remove every file below `root` whose name does not end in `_raw.fits`
///
/// Directories are left in place. Returns the removed paths in walk order.
pub fn clean(root: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir)
            .map_err(|e| RefError::io(&dir, e))?
            .map(|entry| entry.and_then(|e| Ok((e.path(), e.file_type()?))))
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| RefError::io(&dir, e))?;
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        for (path, file_type) in entries {
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_symlink() && path.is_dir() {
                // Linked directories are not walked or removed
                tracing::debug!("Skipping directory link {}", path.display());
            } else if !layout::is_raw_frame(&path) {
                tracing::info!("Removing {}", path.display());
                fs::remove_file(&path).map_err(|e| RefError::io(&path, e))?;
                removed.push(path);
            }
        }
    }

    tracing::info!("Cleaned {} files under {}", removed.len(), root.display());
    Ok(removed)
}
