//! Turning partition images into directory trees.
//!
//! Backends are tried in a fixed order: container split, loop mount, ext
//! filesystem dump, generic archive. A failed attempt is logged and the next
//! backend gets a fresh destination; a partition whose every backend fails
//! contributes nothing, and the run carries on with the others.

pub mod archive;
pub mod container;
pub mod dump;
pub mod mount;
pub mod scratch;

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::image::{convert_sparse, ImageFormat, PartitionImage, PartitionSource};
use crate::process::{CancelToken, CommandRunner};

pub use scratch::{ScratchContext, ScratchDir, TempFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendKind {
    Container,
    Mount,
    Dump,
    Archive,
    /// Input was already a directory.
    Directory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendKind::Container => "container",
            BackendKind::Mount => "mount",
            BackendKind::Dump => "dump",
            BackendKind::Archive => "archive",
            BackendKind::Directory => "directory",
        };
        f.write_str(s)
    }
}

/// Everything a backend may touch during one attempt.
pub struct UnpackContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub scratch: &'a ScratchContext,
    pub cancel: &'a CancelToken,
}

/// A raw view of an image: the image itself, or a converted temp copy.
pub enum RawImage<'i> {
    Original(&'i Path),
    Converted(TempFile),
}

impl RawImage<'_> {
    pub fn path(&self) -> &Path {
        match self {
            RawImage::Original(path) => path,
            RawImage::Converted(temp) => temp.path(),
        }
    }
}

impl<'a> UnpackContext<'a> {
    /// Convert `image` if it is sparse. The converted file is removed when the
    /// returned value drops, which bounds it to the calling attempt.
    pub fn raw_image<'i>(&self, image: &'i PartitionImage, backend: BackendKind) -> Result<RawImage<'i>> {
        if image.format() != ImageFormat::Sparse {
            return Ok(RawImage::Original(image.path()));
        }
        let temp = self.scratch.temp_raw(image.name(), &backend.to_string())?;
        convert_sparse(self.runner, image.path(), Some(temp.path()), Some(self.cancel))?;
        Ok(RawImage::Converted(temp))
    }
}

/// What a successful backend produced.
#[derive(Debug)]
pub enum BackendOutput {
    /// Files were written into the destination directory.
    Tree,
    /// The image was a container; these are its member partitions, written
    /// under `workdir`.
    Partitions {
        members: Vec<PartitionImage>,
        workdir: ScratchDir,
    },
}

/// One way of getting files out of an image.
pub trait ExtractionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether this backend should be attempted for `image` at all.
    fn applies_to(&self, _image: &PartitionImage) -> bool {
        true
    }

    /// Extract into `dest`, an empty directory owned by this attempt.
    fn extract(
        &self,
        image: &PartitionImage,
        dest: &Path,
        ctx: &UnpackContext<'_>,
    ) -> Result<BackendOutput>;
}

/// A failed backend attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub backend: BackendKind,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionStatus {
    Extracted { backend: BackendKind, tree: PathBuf },
    Failed,
}

/// Outcome of unpacking one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionResult {
    pub partition: String,
    pub status: ExtractionStatus,
    /// Failed attempts in order, including those before a success.
    pub attempts: Vec<Attempt>,
}

impl ExtractionResult {
    pub fn tree(&self) -> Option<&Path> {
        match &self.status {
            ExtractionStatus::Extracted { tree, .. } => Some(tree),
            ExtractionStatus::Failed => None,
        }
    }

    pub fn backend(&self) -> Option<BackendKind> {
        match &self.status {
            ExtractionStatus::Extracted { backend, .. } => Some(*backend),
            ExtractionStatus::Failed => None,
        }
    }
}

/// Ordered fallback chain of extraction backends.
pub struct PartitionUnpacker {
    backends: Vec<Box<dyn ExtractionBackend>>,
}

impl PartitionUnpacker {
    pub fn new(backends: Vec<Box<dyn ExtractionBackend>>) -> Self {
        Self { backends }
    }

    /// container → mount → dump → archive.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(container::ContainerBackend),
            Box::new(mount::MountBackend),
            Box::new(dump::DumpBackend),
            Box::new(archive::ArchiveBackend),
        ])
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    /// Unpack one input. Only cancellation is returned as an error; every
    /// other failure ends up in the results.
    pub fn unpack(&self, source: &PartitionSource, ctx: &UnpackContext<'_>) -> Result<Vec<ExtractionResult>> {
        match source {
            PartitionSource::Tree { name, path } => {
                info!(partition = %name, "using extracted tree {}", path.display());
                Ok(vec![ExtractionResult {
                    partition: name.clone(),
                    status: ExtractionStatus::Extracted {
                        backend: BackendKind::Directory,
                        tree: path.clone(),
                    },
                    attempts: Vec::new(),
                }])
            }
            PartitionSource::Image(image) => self.unpack_image(image, ctx, true),
        }
    }

    fn unpack_image(
        &self,
        image: &PartitionImage,
        ctx: &UnpackContext<'_>,
        allow_container: bool,
    ) -> Result<Vec<ExtractionResult>> {
        let name = image.name();
        let mut attempts = Vec::new();
        info!(
            partition = %name,
            format = %image.format(),
            bytes = image.size(),
            "unpacking {}",
            image.path().display()
        );

        for backend in &self.backends {
            let kind = backend.kind();
            if kind == BackendKind::Container && !allow_container {
                continue;
            }
            if !backend.applies_to(image) {
                continue;
            }
            ctx.cancel.check()?;

            let dest = match ctx.scratch.tree_dir(name) {
                Ok(dest) => dest,
                Err(e) => {
                    warn!(partition = %name, backend = %kind, "{}", e);
                    attempts.push(Attempt { backend: kind, error: e.to_string() });
                    continue;
                }
            };

            match backend.extract(image, &dest, ctx) {
                Ok(BackendOutput::Tree) => {
                    info!(partition = %name, backend = %kind, "extracted");
                    return Ok(vec![ExtractionResult {
                        partition: name.to_string(),
                        status: ExtractionStatus::Extracted { backend: kind, tree: dest },
                        attempts,
                    }]);
                }
                Ok(BackendOutput::Partitions { members, workdir }) => {
                    ctx.scratch.discard(&dest);
                    info!(partition = %name, backend = %kind, members = members.len(), "split container");
                    let mut results = Vec::new();
                    for member in &members {
                        let unpacked = self.unpack_image(member, ctx, false);
                        ctx.scratch.discard_file(member.path());
                        results.extend(unpacked?);
                    }
                    drop(workdir);
                    return Ok(results);
                }
                Err(Error::Cancelled) => {
                    ctx.scratch.discard(&dest);
                    return Err(Error::Cancelled);
                }
                Err(e) => {
                    warn!(partition = %name, backend = %kind, "{}", e);
                    ctx.scratch.discard(&dest);
                    attempts.push(Attempt { backend: kind, error: e.to_string() });
                }
            }
        }

        warn!(
            partition = %name,
            attempts = attempts.len(),
            "all backends failed, partition contributes no files"
        );
        Ok(vec![ExtractionResult {
            partition: name.to_string(),
            status: ExtractionStatus::Failed,
            attempts,
        }])
    }
}

/// True when `dir` holds at least one entry.
pub(crate) fn has_entries(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
