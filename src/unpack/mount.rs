//! Loop-mount backend.
//!
//! Mounts the (converted) image read-only, copies everything out, then
//! unmounts. The unmount lives in [`MountGuard`]'s `Drop`, so it runs whether
//! the copy succeeded, failed, or was cancelled.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, IoContext, Result};
use crate::image::PartitionImage;
use crate::process::{Cmd, CommandResult, CommandRunner};

use super::{has_entries, BackendKind, BackendOutput, ExtractionBackend, UnpackContext};

pub struct MountBackend;

impl ExtractionBackend for MountBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mount
    }

    fn extract(&self, image: &PartitionImage, dest: &Path, ctx: &UnpackContext<'_>) -> Result<BackendOutput> {
        let name = image.name();
        let raw = ctx.raw_image(image, BackendKind::Mount)?;
        let mount_point = ctx.scratch.mount_point(name)?;
        let guard = MountGuard::mount(ctx, name, raw.path(), mount_point)?;

        copy_out(ctx, name, guard.path(), dest)?;
        guard.release()?;

        if !has_entries(dest) {
            return Err(Error::backend(BackendKind::Mount, name, "mounted filesystem is empty"));
        }
        Ok(BackendOutput::Tree)
    }
}

/// Map a finished command to `Ok` or a mount error carrying its diagnostic.
fn expect_success(partition: &str, program: &str, outcome: Result<CommandResult>) -> Result<()> {
    let result = outcome?;
    if result.success() {
        Ok(())
    } else {
        Err(Error::backend(BackendKind::Mount, partition, result.diagnostic(program)))
    }
}

/// Copy the mounted tree into `dest` and hand ownership back to the invoking user.
fn copy_out(ctx: &UnpackContext<'_>, partition: &str, mount_point: &Path, dest: &Path) -> Result<()> {
    // `cp -a` runs privileged and stamps the mounted root's owner onto
    // `dest`, so the owner to restore is read first.
    let owner = fs::metadata(dest).io_context(|| format!("cannot stat {}", dest.display()))?;
    let owner = format!("{}:{}", owner.uid(), owner.gid());

    let outcome = Cmd::new("cp")
        .arg("-a")
        .arg(format!("{}/.", mount_point.display()))
        .arg_path(dest)
        .privileged()
        .cancel_on(ctx.cancel)
        .run(ctx.runner);
    expect_success(partition, "cp", outcome)?;

    // The copies belong to root or to Android uids; reclaim them so the
    // scratch tree can be read and removed.
    let outcome = Cmd::new("chown")
        .arg("-R")
        .arg(&owner)
        .arg_path(dest)
        .privileged()
        .cancel_on(ctx.cancel)
        .run(ctx.runner);
    expect_success(partition, "chown", outcome)?;

    let outcome = Cmd::new("chmod")
        .args(["-R", "u+rwX"])
        .arg_path(dest)
        .cancel_on(ctx.cancel)
        .run(ctx.runner);
    expect_success(partition, "chmod", outcome)
}

/// A live read-only loop mount. Unmounted and its directory removed on drop.
pub struct MountGuard<'a> {
    runner: &'a dyn CommandRunner,
    partition: String,
    path: PathBuf,
    mounted: bool,
}

impl<'a> MountGuard<'a> {
    /// Mount `image` at `mount_point`. On failure the mount point is removed.
    ///
    /// `mount` itself is not cancellable: killing the `sudo` wrapper would
    /// not stop the mount, which could then land with no guard to undo it.
    /// Cancellation is checked once the guard owns the mount instead.
    pub fn mount(
        ctx: &UnpackContext<'a>,
        partition: &str,
        image: &Path,
        mount_point: PathBuf,
    ) -> Result<Self> {
        let outcome = Cmd::new("mount")
            .args(["-o", "loop,ro"])
            .arg_path(image)
            .arg_path(&mount_point)
            .privileged()
            .run(ctx.runner);

        if let Err(e) = expect_success(partition, "mount", outcome) {
            if let Err(rm) = fs::remove_dir(&mount_point) {
                debug!(partition, "cannot remove {}: {}", mount_point.display(), rm);
            }
            return Err(e);
        }

        debug!(partition, mount_point = %mount_point.display(), "mounted {}", image.display());
        let guard = Self {
            runner: ctx.runner,
            partition: partition.to_string(),
            path: mount_point,
            mounted: true,
        };
        // Dropping the guard on cancellation unmounts.
        ctx.cancel.check()?;
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unmount now and report failure instead of only logging it.
    pub fn release(mut self) -> Result<()> {
        self.unmount()
    }

    fn unmount(&mut self) -> Result<()> {
        if !self.mounted {
            return Ok(());
        }

        // No cancel token: cleanup must run to completion.
        let result = Cmd::new("umount")
            .arg_path(&self.path)
            .privileged()
            .run(self.runner)?;

        if !result.success() {
            warn!(
                partition = %self.partition,
                mount_point = %self.path.display(),
                "{}, retrying lazily",
                result.diagnostic("umount")
            );
            let lazy = Cmd::new("umount")
                .arg("-l")
                .arg_path(&self.path)
                .privileged()
                .run(self.runner)?;
            if !lazy.success() {
                return Err(Error::backend(
                    BackendKind::Mount,
                    &self.partition,
                    format!("{} left mounted: {}", self.path.display(), lazy.diagnostic("umount -l")),
                ));
            }
        }

        self.mounted = false;
        let _ = fs::remove_dir(&self.path);
        Ok(())
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.unmount() {
            warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::process::CancelToken;
    use crate::unpack::testing::ScriptedRunner;
    use crate::unpack::ScratchContext;

    #[test]
    fn test_chown_restores_owner_from_before_the_copy() {
        let scratch = ScratchContext::new(None).unwrap();
        let dest = scratch.tree_dir("vendor").unwrap();
        let before = fs::metadata(&dest).unwrap();

        // Stand-in for `cp -a` replacing dest's owner with the mounted root's.
        let runner = ScriptedRunner::new(|inv| {
            if inv.program == "cp" {
                let dest = PathBuf::from(inv.args.last().unwrap());
                fs::remove_dir(&dest).unwrap();
                std::os::unix::fs::symlink("/", &dest).unwrap();
            }
            0
        });
        let cancel = CancelToken::new();
        let ctx = UnpackContext {
            runner: &runner,
            scratch: &scratch,
            cancel: &cancel,
        };
        copy_out(&ctx, "vendor", Path::new("/mnt/vendor"), &dest).unwrap();

        assert_eq!(runner.programs(), vec!["cp", "chown", "chmod"]);
        let chown = runner.call("chown");
        assert!(chown.privileged);
        assert_eq!(chown.args[1], format!("{}:{}", before.uid(), before.gid()));
        assert!(!runner.call("chmod").privileged);
    }

    #[test]
    fn test_cancel_during_mount_still_unmounts() {
        let scratch = ScratchContext::new(None).unwrap();
        let mount_point = scratch.mount_point("vendor").unwrap();
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let runner = ScriptedRunner::new(move |inv| {
            if inv.program == "mount" {
                token.cancel();
            }
            0
        });
        let ctx = UnpackContext {
            runner: &runner,
            scratch: &scratch,
            cancel: &cancel,
        };

        let result = MountGuard::mount(&ctx, "vendor", Path::new("/images/vendor.img"), mount_point.clone());

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(runner.programs(), vec!["mount", "umount"]);
        assert!(!mount_point.exists());
    }

    #[test]
    fn test_release_unmounts_once() {
        let scratch = ScratchContext::new(None).unwrap();
        let mount_point = scratch.mount_point("odm").unwrap();
        let cancel = CancelToken::new();
        let runner = ScriptedRunner::new(|_| 0);
        let ctx = UnpackContext {
            runner: &runner,
            scratch: &scratch,
            cancel: &cancel,
        };

        let guard = MountGuard::mount(&ctx, "odm", Path::new("/images/odm.img"), mount_point).unwrap();
        guard.release().unwrap();
        assert_eq!(runner.programs(), vec!["mount", "umount"]);
    }
}
