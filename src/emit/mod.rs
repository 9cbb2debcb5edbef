//! Text artifacts rendered from the final catalog.
//!
//! Every renderer is a pure function of the identity and the catalog; no
//! timestamps or host paths leak into the output, so identical inputs give
//! byte-identical files.

pub mod blueprint;
pub mod makefile;
pub mod manifest;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::catalog::{Catalog, CatalogEntry};
use crate::common::write_file_atomic;
use crate::error::{Error, Result};

pub const MANIFEST_FILE: &str = "proprietary-files.txt";
pub const PROPRIETARY_DIR: &str = "proprietary";

/// Who the tree is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildIdentity {
    pub vendor: String,
    pub device: String,
    pub android_version: String,
}

impl BuildIdentity {
    /// `vendor/<vendor>/<device>`, the tree's path inside a source checkout.
    pub fn tree_path(&self) -> String {
        format!("vendor/{}/{}", self.vendor, self.device)
    }

    pub(crate) fn generated_header(&self, comment: &str) -> String {
        format!(
            "{c} Automatically generated file. DO NOT MODIFY\n\
             {c}\n\
             {c} This file is generated by vendortree for {} {} (Android {})\n\n",
            self.vendor,
            self.device,
            self.android_version,
            c = comment
        )
    }
}

/// A build description file derived from the catalog.
pub trait BuildFile: Send + Sync {
    fn file_name(&self, identity: &BuildIdentity) -> String;
    fn render(&self, identity: &BuildIdentity, catalog: &Catalog) -> String;
}

pub struct BuildFileEmitter {
    files: Vec<Box<dyn BuildFile>>,
}

impl BuildFileEmitter {
    pub fn new(files: Vec<Box<dyn BuildFile>>) -> Self {
        Self { files }
    }

    /// Android.mk, Android.bp, BoardConfig.mk and `<device>-vendor.mk`.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(makefile::AndroidMk),
            Box::new(blueprint::AndroidBp),
            Box::new(makefile::BoardConfigMk),
            Box::new(makefile::DeviceVendorMk),
        ])
    }

    pub fn write_manifest(&self, output: &Path, identity: &BuildIdentity, catalog: &Catalog) -> Result<PathBuf> {
        let path = output.join(MANIFEST_FILE);
        write(&path, &manifest::render(identity, catalog))?;
        info!(entries = catalog.len(), "wrote {}", MANIFEST_FILE);
        Ok(path)
    }

    pub fn write_build_files(
        &self,
        output: &Path,
        identity: &BuildIdentity,
        catalog: &Catalog,
    ) -> Result<Vec<PathBuf>> {
        let mut written = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let path = output.join(file.file_name(identity));
            write(&path, &file.render(identity, catalog))?;
            info!("wrote {}", path.display());
            written.push(path);
        }
        Ok(written)
    }

    /// The manifest followed by every build file path this emitter writes.
    pub fn output_paths(&self, output: &Path, identity: &BuildIdentity) -> Vec<PathBuf> {
        std::iter::once(output.join(MANIFEST_FILE))
            .chain(self.files.iter().map(|f| output.join(f.file_name(identity))))
            .collect()
    }

    /// Remove what a previous run wrote, so an unfinished build leaves no
    /// manifest behind.
    pub fn clear(&self, output: &Path, identity: &BuildIdentity) -> Result<()> {
        for path in self.output_paths(output, identity) {
            match fs::remove_file(&path) {
                Ok(()) => debug!("removed stale {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(Error::Output { path, source }),
            }
        }
        Ok(())
    }
}

fn write(path: &Path, content: &str) -> Result<()> {
    write_file_atomic(path, content).map_err(|source| Error::Output {
        path: path.to_path_buf(),
        source,
    })
}

/// Where an entry is installed on the device, relative to its partition root.
///
/// System images laid out system-as-root carry a leading `system/` that the
/// install path drops.
pub(crate) fn install_path(entry: &CatalogEntry) -> &str {
    let path = entry.path_in_partition();
    if entry.partition() == "system" {
        path.strip_prefix("system/").unwrap_or(path)
    } else {
        path
    }
}

/// `$(TARGET_COPY_OUT_<PARTITION>)` for a partition name.
pub(crate) fn copy_out_var(partition: &str) -> String {
    format!("$(TARGET_COPY_OUT_{})", partition.to_ascii_uppercase())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn identity() -> BuildIdentity {
        BuildIdentity {
            vendor: "acme".to_string(),
            device: "rocket".to_string(),
            android_version: "13".to_string(),
        }
    }

    pub fn entry(partition: &str, rel: &str, elf: bool) -> CatalogEntry {
        CatalogEntry::new(partition, rel, format!("/scratch/{}", rel), 4, "ab", elf)
    }

    pub fn catalog() -> Catalog {
        Catalog::from_entries(vec![
            entry("vendor", "vendor/lib64/libfoo.so", true),
            entry("vendor", "vendor/lib/libfoo.so", true),
            entry("vendor", "vendor/lib64/hw/camera.qcom.so", true),
            entry("vendor", "vendor/etc/init/foo service.rc", false),
            entry("product", "product/lib64/libfoo.so", true),
            entry("system", "system/system/lib64/libqti.so", true),
        ])
    }
}
