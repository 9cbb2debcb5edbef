//! Last-resort backend: let 7-Zip open the image as an archive.
//!
//! 7z understands ext4, FAT, cpio, tar and friends. It exits
//! 1 for warnings (unsupported symlinks, special files) while still extracting
//! the rest, so a warning exit with a non-empty result counts as success.

use std::path::Path;

use tracing::warn;

use crate::error::{Error, Result};
use crate::image::PartitionImage;
use crate::process::Cmd;

use super::{has_entries, BackendKind, BackendOutput, ExtractionBackend, UnpackContext};

const SEVEN_ZIP_WARNING: i32 = 1;

pub struct ArchiveBackend;

impl ExtractionBackend for ArchiveBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Archive
    }

    fn extract(&self, image: &PartitionImage, dest: &Path, ctx: &UnpackContext<'_>) -> Result<BackendOutput> {
        let name = image.name();
        let raw = ctx.raw_image(image, BackendKind::Archive)?;

        let result = Cmd::new("7z")
            .args(["x", "-y"])
            .arg(format!("-o{}", dest.display()))
            .arg_path(raw.path())
            .cancel_on(ctx.cancel)
            .run(ctx.runner)?;

        let extracted = has_entries(dest);
        if result.success() && extracted {
            return Ok(BackendOutput::Tree);
        }
        if result.code() == SEVEN_ZIP_WARNING && extracted {
            warn!(partition = %name, "7z finished with warnings: {}", result.stderr_trimmed());
            return Ok(BackendOutput::Tree);
        }

        let diagnostic = if result.success() {
            "7z extracted nothing".to_string()
        } else {
            result.diagnostic("7z")
        };
        Err(Error::backend(BackendKind::Archive, name, diagnostic))
    }
}
