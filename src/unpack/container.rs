//! Super (dynamic partition) container backend, via `lpunpack`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, IoContext, Result};
use crate::image::{split_slot, PartitionImage, KNOWN_PARTITIONS};
use crate::process::Cmd;

use super::{BackendKind, BackendOutput, ExtractionBackend, UnpackContext};

pub struct ContainerBackend;

impl ExtractionBackend for ContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    fn applies_to(&self, image: &PartitionImage) -> bool {
        image.is_super()
    }

    fn extract(&self, image: &PartitionImage, _dest: &Path, ctx: &UnpackContext<'_>) -> Result<BackendOutput> {
        let name = image.name();
        let raw = ctx.raw_image(image, BackendKind::Container)?;
        // Partial output is removed with the guard if anything below fails.
        let workdir = ctx.scratch.container_dir(name)?;
        let out_dir = workdir.path();

        let result = Cmd::new("lpunpack")
            .arg_path(raw.path())
            .arg_path(out_dir)
            .cancel_on(ctx.cancel)
            .run(ctx.runner)?;
        if !result.success() {
            return Err(Error::backend(
                BackendKind::Container,
                name,
                result.diagnostic("lpunpack"),
            ));
        }

        let members = collect_members(out_dir)?;
        if members.is_empty() {
            return Err(Error::backend(
                BackendKind::Container,
                name,
                format!("no known partitions in {}", out_dir.display()),
            ));
        }
        debug!(
            partition = %name,
            members = ?members.iter().map(|m| m.name()).collect::<Vec<_>>(),
            "container members"
        );
        Ok(BackendOutput::Partitions { members, workdir })
    }
}

/// Known partitions among the images `lpunpack` wrote, slot `a` preferred.
pub fn collect_members(dir: &Path) -> Result<Vec<PartitionImage>> {
    let mut files: Vec<_> = fs::read_dir(dir)
        .io_context(|| format!("cannot list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    files.sort();

    let mut chosen: BTreeMap<String, (Option<char>, std::path::PathBuf)> = BTreeMap::new();
    for path in files {
        let Some(stem) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(".img"))
        else {
            continue;
        };
        let (base, slot) = split_slot(stem);
        if !KNOWN_PARTITIONS.contains(&base) {
            continue;
        }
        // Empty images are inactive slots.
        if fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true) {
            continue;
        }
        let replace = match chosen.get(base) {
            None => true,
            Some((existing, _)) => slot == Some('a') && *existing == Some('b'),
        };
        if replace {
            chosen.insert(base.to_string(), (slot, path.clone()));
        }
    }

    chosen
        .into_iter()
        .map(|(name, (_, path))| PartitionImage::probe(name, &path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use crate::process::CancelToken;
    use crate::unpack::testing::ScriptedRunner;
    use crate::unpack::{ExtractionStatus, PartitionUnpacker, ScratchContext};
    use tempfile::TempDir;

    /// Writes one file per image and notes which earlier members were still on disk.
    #[derive(Clone, Default)]
    struct NotingBackend {
        seen: Arc<Mutex<Vec<PathBuf>>>,
        leftovers: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl ExtractionBackend for NotingBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Archive
        }

        fn extract(&self, image: &PartitionImage, dest: &Path, _ctx: &UnpackContext<'_>) -> Result<BackendOutput> {
            let mut seen = self.seen.lock().unwrap();
            self.leftovers
                .lock()
                .unwrap()
                .extend(seen.iter().filter(|p| p.exists()).cloned());
            seen.push(image.path().to_path_buf());
            fs::write(dest.join("build.prop"), image.name()).unwrap();
            Ok(BackendOutput::Tree)
        }
    }

    fn write_members(inv: &crate::process::Invocation) {
        let out = Path::new(&inv.args[1]);
        fs::write(out.join("system_a.img"), [1u8; 64]).unwrap();
        fs::write(out.join("vendor_a.img"), [1u8; 64]).unwrap();
    }

    fn super_image(dir: &Path) -> PartitionImage {
        let path = dir.join("super.img");
        fs::write(&path, [0u8; 64]).unwrap();
        PartitionImage::probe("super", &path).unwrap()
    }

    fn is_empty_dir(dir: &Path) -> bool {
        fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(true)
    }

    #[test]
    fn test_partial_lpunpack_output_is_removed() {
        let dir = TempDir::new().unwrap();
        let image = super_image(dir.path());
        let scratch = ScratchContext::new(Some(dir.path())).unwrap();
        let runner = ScriptedRunner::new(|inv| {
            write_members(inv);
            1
        });
        let cancel = CancelToken::new();
        let ctx = UnpackContext {
            runner: &runner,
            scratch: &scratch,
            cancel: &cancel,
        };

        let err = ContainerBackend
            .extract(&image, &dir.path().join("unused"), &ctx)
            .unwrap_err();

        assert!(matches!(err, Error::ContainerUnpack { .. }));
        assert!(is_empty_dir(&scratch.root().join("containers")));
    }

    #[test]
    fn test_members_are_removed_once_unpacked() {
        let dir = TempDir::new().unwrap();
        let image = super_image(dir.path());
        let scratch = ScratchContext::new(Some(dir.path())).unwrap();
        let runner = ScriptedRunner::new(|inv| {
            write_members(inv);
            0
        });
        let cancel = CancelToken::new();
        let ctx = UnpackContext {
            runner: &runner,
            scratch: &scratch,
            cancel: &cancel,
        };
        let noting = NotingBackend::default();

        let unpacker = PartitionUnpacker::new(vec![Box::new(ContainerBackend), Box::new(noting.clone())]);
        let results = unpacker
            .unpack(&crate::image::PartitionSource::Image(image), &ctx)
            .unwrap();

        let names: Vec<&str> = results.iter().map(|r| r.partition.as_str()).collect();
        assert_eq!(names, vec!["system", "vendor"]);
        assert!(results
            .iter()
            .all(|r| matches!(r.status, ExtractionStatus::Extracted { .. })));
        assert_eq!(noting.seen.lock().unwrap().len(), 2);
        assert!(noting.leftovers.lock().unwrap().is_empty(), "member image kept after unpacking");
        assert!(is_empty_dir(&scratch.root().join("containers")));
    }

    #[test]
    fn test_collect_members_prefers_slot_a() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("system_a.img"), [0u8; 8]).unwrap();
        fs::write(dir.path().join("system_b.img"), [0u8; 0]).unwrap();
        fs::write(dir.path().join("vendor_b.img"), [1u8; 8]).unwrap();
        fs::write(dir.path().join("vendor_a.img"), [2u8; 8]).unwrap();
        fs::write(dir.path().join("vendor_dlkm_a.img"), [2u8; 8]).unwrap();

        let members = collect_members(dir.path()).unwrap();
        let names: Vec<&str> = members.iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["system", "vendor"]);
        assert!(members[1].path().ends_with("vendor_a.img"));
    }
}
