//! Per-run scratch space.
//!
//! Every path handed out here lives under one temporary root owned by the
//! run and carries the partition name plus a sequence number, so concurrent
//! partition workers never share a mount point, raw image or tree directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;
use tracing::debug;

use crate::common::temp::{cleanup_work_dir, prepare_work_dir};
use crate::error::{IoContext, Result};

pub struct ScratchContext {
    root: TempDir,
    sequence: AtomicUsize,
}

impl ScratchContext {
    /// Create the scratch root under `parent`, or the system temp dir.
    pub fn new(parent: Option<&Path>) -> Result<Self> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("vendortree-");
            b
        };
        let root = match parent {
            Some(dir) => {
                fs::create_dir_all(dir)
                    .io_context(|| format!("cannot create scratch parent {}", dir.display()))?;
                builder.tempdir_in(dir)
            }
            None => builder.tempdir(),
        }
        .io_context(|| "cannot create scratch directory")?;
        debug!(root = %root.path().display(), "scratch ready");
        Ok(Self {
            root,
            sequence: AtomicUsize::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    fn unique(&self, area: &str, partition: &str, suffix: &str) -> PathBuf {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.root
            .path()
            .join(area)
            .join(format!("{}.{}{}", partition, n, suffix))
    }

    /// Fresh, empty directory for a partition's extracted files.
    pub fn tree_dir(&self, partition: &str) -> Result<PathBuf> {
        let path = self.unique("trees", partition, "");
        let parent = path.parent().unwrap_or(self.root.path());
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| partition.to_string());
        prepare_work_dir(parent, &name)
            .io_context(|| format!("cannot prepare tree dir for {}", partition))
    }

    /// Directory that receives the images split out of a super container.
    /// Removed with everything in it when the guard drops.
    pub fn container_dir(&self, partition: &str) -> Result<ScratchDir> {
        let path = self.unique("containers", partition, "");
        fs::create_dir_all(&path)
            .io_context(|| format!("cannot create {}", path.display()))?;
        Ok(ScratchDir { path })
    }

    /// Empty mount point directory.
    pub fn mount_point(&self, partition: &str) -> Result<PathBuf> {
        let path = self.unique("mnt", partition, "");
        fs::create_dir_all(&path)
            .io_context(|| format!("cannot create mount point {}", path.display()))?;
        Ok(path)
    }

    /// Path for a converted raw image, removed when the guard drops.
    pub fn temp_raw(&self, partition: &str, backend: &str) -> Result<TempFile> {
        let path = self.unique("raw", &format!("{}-{}", partition, backend), ".raw.img");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .io_context(|| format!("cannot create {}", parent.display()))?;
        }
        Ok(TempFile { path })
    }

    /// Remove a tree directory left behind by a failed attempt.
    pub fn discard(&self, path: &Path) {
        cleanup_work_dir(path);
    }

    /// Remove a single scratch file, such as a container member already unpacked.
    pub fn discard_file(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

/// A scratch directory deleted, contents and all, on drop.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        debug!("removing {}", self.path.display());
        cleanup_work_dir(&self.path);
    }
}

/// A scratch file deleted on drop.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
}

impl TempFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!("failed to remove {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_unique_per_request() {
        let scratch = ScratchContext::new(None).unwrap();
        let a = scratch.mount_point("vendor").unwrap();
        let b = scratch.mount_point("vendor").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with(scratch.root()));
        assert!(a.to_string_lossy().contains("vendor"));
    }

    #[test]
    fn test_temp_file_removed_on_drop() {
        let scratch = ScratchContext::new(None).unwrap();
        let temp = scratch.temp_raw("system", "mount").unwrap();
        let path = temp.path().to_path_buf();
        fs::write(&path, b"raw").unwrap();
        drop(temp);
        assert!(!path.exists());
    }

    #[test]
    fn test_container_dir_removed_on_drop() {
        let scratch = ScratchContext::new(None).unwrap();
        let dir = scratch.container_dir("super").unwrap();
        let member = dir.path().join("system_a.img");
        fs::write(&member, b"img").unwrap();
        scratch.discard_file(&member);
        scratch.discard_file(&member);
        assert!(!member.exists());

        let path = dir.path().to_path_buf();
        fs::write(path.join("vendor_a.img"), b"img").unwrap();
        drop(dir);
        assert!(!path.exists());
    }

    #[test]
    fn test_root_removed_on_drop() {
        let scratch = ScratchContext::new(None).unwrap();
        let tree = scratch.tree_dir("product").unwrap();
        fs::write(tree.join("file"), b"x").unwrap();
        let root = scratch.root().to_path_buf();
        drop(scratch);
        assert!(!root.exists());
    }
}
