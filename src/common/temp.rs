//! Fresh work directories for output and scratch areas.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// `parent_dir/name`, emptied if it exists. A stale symlink or file in its
/// place is removed rather than followed.
pub fn prepare_work_dir(parent_dir: &Path, name: &str) -> io::Result<PathBuf> {
    let work_dir = parent_dir.join(name);

    if work_dir.symlink_metadata().is_ok() {
        if work_dir.is_dir() && !work_dir.is_symlink() {
            fs::remove_dir_all(&work_dir)?;
        } else {
            fs::remove_file(&work_dir)?;
        }
    }

    fs::create_dir_all(&work_dir)?;

    Ok(work_dir)
}

/// Remove a work directory; a missing one is fine.
pub fn cleanup_work_dir(path: &Path) {
    let _ = fs::remove_dir_all(path);
}
