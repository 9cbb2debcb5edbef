//! ext2/3/4 dump backend (`debugfs`), usable without mount privileges.
//!
//! `debugfs` reports most failures on stderr while still exiting 0, so
//! success is judged by what actually landed in the destination.

use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::image::PartitionImage;

use crate::process::Cmd;

use super::{has_entries, BackendKind, BackendOutput, ExtractionBackend, UnpackContext};

pub struct DumpBackend;

impl ExtractionBackend for DumpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Dump
    }

    fn extract(&self, image: &PartitionImage, dest: &Path, ctx: &UnpackContext<'_>) -> Result<BackendOutput> {
        let name = image.name();
        let fail = |diagnostic: String| Error::backend(BackendKind::Dump, name, diagnostic);

        let raw = ctx.raw_image(image, BackendKind::Dump)?;

        let listing = Cmd::new("debugfs")
            .args(["-R", "ls -p /"])
            .arg_path(raw.path())
            .cancel_on(ctx.cancel)
            .run(ctx.runner)?;
        if !listing.success() {
            return Err(fail(listing.diagnostic("debugfs")));
        }

        let roots = parse_ls_p(&listing.stdout);
        if roots.is_empty() {
            return Err(fail(format!(
                "no root entries listed: {}",
                listing.stderr_trimmed()
            )));
        }
        debug!(partition = %name, entries = roots.len(), "dumping root entries");

        let request = rdump_request(&roots, dest);
        let result = Cmd::new("debugfs")
            .arg("-R")
            .arg(&request)
            .arg_path(raw.path())
            .cancel_on(ctx.cancel)
            .run(ctx.runner)?;
        if !result.success() {
            return Err(fail(result.diagnostic("debugfs")));
        }
        if !has_entries(dest) {
            return Err(fail(format!("rdump wrote nothing: {}", result.stderr_trimmed())));
        }
        Ok(BackendOutput::Tree)
    }
}

/// Names of the root directory entries in `debugfs ls -p` output.
///
/// Each line looks like `/12/100644/0/0/build.prop/1234/`; `.`, `..` and
/// `lost+found` are dropped.
pub fn parse_ls_p(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.trim().strip_prefix('/')?.split('/').collect();
            if fields.len() < 5 {
                return None;
            }
            let name = fields[4];
            if name.is_empty() || name == "." || name == ".." || name == "lost+found" {
                return None;
            }
            Some(name.to_string())
        })
        .collect()
}

/// `rdump "/a" "/b" "<dest>"`, quoted for debugfs' own argument parser.
pub fn rdump_request(roots: &[String], dest: &Path) -> String {
    let mut request = String::from("rdump");
    for root in roots {
        request.push_str(&format!(" \"/{}\"", root));
    }
    request.push_str(&format!(" \"{}\"", dest.display()));
    request
}
