//! Partition images: format detection, sparse conversion and input discovery.

pub mod detect;
pub mod sparse;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, IoContext, Result};

pub use detect::{detect_format, is_elf};
pub use sparse::{convert_sparse, SparseHeader};

/// Dynamic partitions we know how to carry into a vendor tree.
pub const KNOWN_PARTITIONS: &[&str] = &["vendor", "system", "product", "system_ext", "odm"];

/// Images that never hold a filesystem worth scanning.
const SKIPPED_IMAGES: &[&str] = &[
    "boot",
    "init_boot",
    "vendor_boot",
    "recovery",
    "dtbo",
    "userdata",
    "cache",
    "misc",
    "metadata",
];

/// Encoding of an image, as reported by the header sniffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Raw,
    Sparse,
    /// Header could not be read. The image still goes through the backend chain.
    Unknown,
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImageFormat::Raw => "raw",
            ImageFormat::Sparse => "sparse",
            ImageFormat::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A partition image on disk. Immutable once probed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionImage {
    name: String,
    path: PathBuf,
    format: ImageFormat,
    size: u64,
}

impl PartitionImage {
    /// Stat and sniff `path`. A failed sniff yields [`ImageFormat::Unknown`].
    pub fn probe(name: impl Into<String>, path: &Path) -> Result<Self> {
        let size = fs::metadata(path)
            .io_context(|| format!("cannot stat {}", path.display()))?
            .len();
        let format = match detect_format(path) {
            Ok(format) => format,
            Err(e) => {
                warn!("{}", e);
                ImageFormat::Unknown
            }
        };
        Ok(Self {
            name: name.into(),
            path: path.to_path_buf(),
            format,
            size,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether this is a dynamic-partition super container.
    pub fn is_super(&self) -> bool {
        self.name == "super"
            || (self.format == ImageFormat::Raw && detect::has_lp_geometry(&self.path))
    }
}

/// One unit of input for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionSource {
    /// An image that must be unpacked.
    Image(PartitionImage),
    /// A directory that already holds the partition's files.
    Tree { name: String, path: PathBuf },
}

impl PartitionSource {
    pub fn name(&self) -> &str {
        match self {
            PartitionSource::Image(image) => image.name(),
            PartitionSource::Tree { name, .. } => name,
        }
    }
}

/// Strip an A/B slot suffix. Returns the base name and the slot letter.
pub fn split_slot(stem: &str) -> (&str, Option<char>) {
    for (suffix, slot) in [("_a", 'a'), ("_b", 'b')] {
        if let Some(base) = stem.strip_suffix(suffix) {
            if !base.is_empty() {
                return (base, Some(slot));
            }
        }
    }
    (stem, None)
}

fn is_skipped_image(name: &str) -> bool {
    SKIPPED_IMAGES.contains(&name) || name.starts_with("vbmeta")
}

/// Collect the partition sources found at `input`.
///
/// A file is taken as a single image. A directory contributes every `*.img`
/// it holds plus subdirectories named after known partitions.
pub fn discover(input: &Path) -> Result<Vec<PartitionSource>> {
    if input.is_file() {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "super".to_string());
        let (name, _) = split_slot(&stem);
        return Ok(vec![PartitionSource::Image(PartitionImage::probe(name, input)?)]);
    }

    if !input.is_dir() {
        return Err(Error::NoImages(input.to_path_buf()));
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(input)
        .io_context(|| format!("cannot list {}", input.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    // name -> (slot, source); slot `a` beats `b`, unslotted beats both.
    let mut found: BTreeMap<String, (Option<char>, PartitionSource)> = BTreeMap::new();

    for path in entries {
        let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };

        let candidate = if path.is_dir() {
            if !KNOWN_PARTITIONS.contains(&file_name.as_str()) {
                continue;
            }
            (
                file_name.clone(),
                None,
                PartitionSource::Tree {
                    name: file_name.clone(),
                    path: path.clone(),
                },
            )
        } else if let Some(stem) = file_name.strip_suffix(".img") {
            let (name, slot) = split_slot(stem);
            if is_skipped_image(name) {
                debug!(image = %file_name, "skipping non-filesystem image");
                continue;
            }
            let image = PartitionImage::probe(name, &path)?;
            (name.to_string(), slot, PartitionSource::Image(image))
        } else {
            continue;
        };

        let (name, slot, source) = candidate;
        match found.get(&name) {
            None => {
                found.insert(name, (slot, source));
            }
            Some((existing, _)) if slot_rank(slot) < slot_rank(*existing) => {
                debug!(partition = %name, "preferring {}", path.display());
                found.insert(name, (slot, source));
            }
            Some(_) => {
                warn!(partition = %name, "ignoring duplicate input {}", path.display());
            }
        }
    }

    if found.is_empty() {
        return Err(Error::NoImages(input.to_path_buf()));
    }

    Ok(found.into_values().map(|(_, source)| source).collect())
}

fn slot_rank(slot: Option<char>) -> u8 {
    match slot {
        None => 0,
        Some('a') => 1,
        Some(_) => 2,
    }
}
