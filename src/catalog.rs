//! Walking extracted partition trees into an ordered list of proprietary files.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::common::hash::sha256_file;
use crate::error::{Error, Result};
use crate::image::is_elf;
use crate::process::CancelToken;
use crate::rules::RuleSet;

/// Deeper trees than this are treated as a traversal anomaly.
pub const MAX_WALK_DEPTH: usize = 64;

/// A proprietary file found in an extracted partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    partition: String,
    relative_path: String,
    source: PathBuf,
    size: u64,
    sha256: String,
    is_elf: bool,
}

impl CatalogEntry {
    pub fn new(
        partition: impl Into<String>,
        relative_path: impl Into<String>,
        source: impl Into<PathBuf>,
        size: u64,
        sha256: impl Into<String>,
        is_elf: bool,
    ) -> Self {
        Self {
            partition: partition.into(),
            relative_path: relative_path.into(),
            source: source.into(),
            size,
            sha256: sha256.into(),
            is_elf,
        }
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Partition-qualified path, e.g. `vendor/lib64/libfoo.so`.
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Path inside the partition, e.g. `lib64/libfoo.so`.
    pub fn path_in_partition(&self) -> &str {
        self.relative_path
            .strip_prefix(self.partition.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(&self.relative_path)
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn is_elf(&self) -> bool {
        self.is_elf
    }

    fn key(&self) -> (String, String) {
        (self.partition.clone(), self.relative_path.clone())
    }
}

/// Entries sorted by (partition, relative path), unique on that pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn from_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let mut unique: BTreeMap<(String, String), CatalogEntry> = BTreeMap::new();
        for entry in entries {
            let key = entry.key();
            if unique.contains_key(&key) {
                warn!(partition = %key.0, "duplicate entry {} ignored", key.1);
                continue;
            }
            unique.insert(key, entry);
        }
        Self {
            entries: unique.into_values().collect(),
        }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries grouped by partition, both levels in catalog order.
    pub fn by_partition(&self) -> BTreeMap<&str, Vec<&CatalogEntry>> {
        let mut groups: BTreeMap<&str, Vec<&CatalogEntry>> = BTreeMap::new();
        for entry in &self.entries {
            groups.entry(entry.partition()).or_default().push(entry);
        }
        groups
    }

    /// Keep only the entries `keep` accepts.
    pub fn retain(mut self, mut keep: impl FnMut(&CatalogEntry) -> bool) -> Self {
        self.entries.retain(|e| keep(e));
        self
    }
}

/// Walk one extracted partition tree in lexical order.
///
/// Relative symlinks that stay inside the tree are followed for one hop; a
/// followed directory link is walked without following the links inside it.
/// Absolute or escaping links are skipped.
pub fn scan_partition(
    partition: &str,
    root: &Path,
    rules: &RuleSet,
    cancel: &CancelToken,
) -> Result<Vec<CatalogEntry>> {
    let root_canonical = fs::canonicalize(root).map_err(|e| walk_error(partition, root, e.to_string()))?;
    let mut entries = Vec::new();
    let scanner = Scanner {
        partition,
        root_canonical: &root_canonical,
        rules,
        cancel,
    };
    scanner.walk(root, "", 0, true, &mut entries)?;
    debug!(partition, entries = entries.len(), "scanned");
    Ok(entries)
}

fn walk_error(partition: &str, path: &Path, reason: impl Into<String>) -> Error {
    Error::Walk {
        partition: partition.to_string(),
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

struct Scanner<'a> {
    partition: &'a str,
    root_canonical: &'a Path,
    rules: &'a RuleSet,
    cancel: &'a CancelToken,
}

impl Scanner<'_> {
    /// Walk `dir`, naming its entries under `prefix` (relative to the partition).
    fn walk(
        &self,
        dir: &Path,
        prefix: &str,
        base_depth: usize,
        follow_links: bool,
        out: &mut Vec<CatalogEntry>,
    ) -> Result<()> {
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for item in walker {
            self.cancel.check()?;
            let entry = item.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                walk_error(self.partition, &path, e.to_string())
            })?;

            let depth = base_depth + entry.depth();
            if depth > MAX_WALK_DEPTH {
                return Err(walk_error(
                    self.partition,
                    entry.path(),
                    format!("nesting deeper than {} levels", MAX_WALK_DEPTH),
                ));
            }

            let Some(rel) = relative_name(prefix, dir, entry.path()) else {
                warn!(partition = %self.partition, "skipping non UTF-8 path {}", entry.path().display());
                continue;
            };

            let file_type = entry.file_type();
            if file_type.is_file() {
                self.record(&rel, entry.path(), out)?;
            } else if file_type.is_symlink() {
                if follow_links {
                    self.follow(&rel, entry.path(), depth, out)?;
                } else {
                    debug!(partition = %self.partition, "not following nested link {}", rel);
                }
            }
        }
        Ok(())
    }

    fn follow(&self, rel: &str, link: &Path, depth: usize, out: &mut Vec<CatalogEntry>) -> Result<()> {
        let target = match fs::read_link(link) {
            Ok(target) => target,
            Err(e) => {
                warn!(partition = %self.partition, "unreadable link {}: {}", rel, e);
                return Ok(());
            }
        };
        if target.is_absolute() {
            debug!(partition = %self.partition, "skipping absolute link {} -> {}", rel, target.display());
            return Ok(());
        }

        let hop = link.parent().unwrap_or(link).join(&target);
        let Ok(meta) = fs::symlink_metadata(&hop) else {
            debug!(partition = %self.partition, "skipping dangling link {}", rel);
            return Ok(());
        };
        if meta.file_type().is_symlink() {
            debug!(partition = %self.partition, "skipping link chain at {}", rel);
            return Ok(());
        }
        let Ok(resolved) = fs::canonicalize(&hop) else {
            return Ok(());
        };
        if !resolved.starts_with(self.root_canonical) {
            debug!(partition = %self.partition, "skipping link leaving the tree: {}", rel);
            return Ok(());
        }

        if meta.is_file() {
            return self.record(rel, &resolved, out);
        }
        if meta.is_dir() {
            let link_parent = link
                .parent()
                .and_then(|p| fs::canonicalize(p).ok())
                .unwrap_or_default();
            if link_parent.starts_with(&resolved) {
                return Err(walk_error(
                    self.partition,
                    link,
                    format!("link cycle: {} points at its own ancestor", rel),
                ));
            }
            return self.walk(&resolved, rel, depth, false, out);
        }
        Ok(())
    }

    fn record(&self, rel: &str, source: &Path, out: &mut Vec<CatalogEntry>) -> Result<()> {
        let qualified = format!("{}/{}", self.partition, rel);
        if !self.rules.is_proprietary(&qualified) {
            return Ok(());
        }

        let hashed = fs::metadata(source).and_then(|meta| Ok((meta.len(), sha256_file(source)?)));
        match hashed {
            Ok((size, sha256)) => {
                out.push(CatalogEntry {
                    partition: self.partition.to_string(),
                    relative_path: qualified,
                    source: source.to_path_buf(),
                    size,
                    sha256,
                    is_elf: is_elf(source),
                });
            }
            Err(e) => warn!(partition = %self.partition, "cannot read {}: {}", qualified, e),
        }
        Ok(())
    }
}

/// `prefix/<path relative to base>` with `/` separators.
fn relative_name(prefix: &str, base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let mut parts: Vec<&str> = Vec::new();
    if !prefix.is_empty() {
        parts.push(prefix);
    }
    for component in rel.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_str()?),
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn touch(path: &Path, content: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn paths(entries: &[CatalogEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.relative_path()).collect()
    }

    #[test]
    fn test_scan_classifies_and_flags_elf() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("lib64/libfoo.so"), b"\x7fELF\x02\x01\x01\x00");
        touch(&dir.path().join("etc/readme.txt"), b"not a blob");
        touch(&dir.path().join("etc/init/foo.rc"), b"service foo");
        touch(&dir.path().join("app/Foo.apk"), b"PK");

        let entries =
            scan_partition("vendor", dir.path(), &RuleSet::default(), &CancelToken::new()).unwrap();

        assert_eq!(paths(&entries), vec!["vendor/etc/init/foo.rc", "vendor/lib64/libfoo.so"]);
        let lib = &entries[1];
        assert!(lib.is_elf());
        assert_eq!(lib.size(), 8);
        assert_eq!(lib.sha256().len(), 64);
        assert_eq!(lib.path_in_partition(), "lib64/libfoo.so");
        assert!(!entries[0].is_elf());
    }

    #[test]
    fn test_relative_file_link_is_followed() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("lib64/libreal.so"), b"\x7fELFreal");
        symlink("libreal.so", dir.path().join("lib64/libalias.so")).unwrap();
        symlink("/system/lib64/libc.so", dir.path().join("lib64/libc.so")).unwrap();

        let entries =
            scan_partition("vendor", dir.path(), &RuleSet::default(), &CancelToken::new()).unwrap();
        assert_eq!(
            paths(&entries),
            vec!["vendor/lib64/libalias.so", "vendor/lib64/libreal.so"]
        );
        assert_eq!(entries[0].sha256(), entries[1].sha256());
    }

    #[test]
    fn test_directory_link_walked_once() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("real/lib64/libbar.so"), b"\x7fELFbar");
        symlink("real/lib64", dir.path().join("lib64")).unwrap();
        // Nested link inside the followed directory is not followed again.
        symlink("../../lib64", dir.path().join("real/lib64/again")).unwrap();

        let entries =
            scan_partition("vendor", dir.path(), &RuleSet::default(), &CancelToken::new()).unwrap();
        assert_eq!(paths(&entries), vec!["vendor/lib64/libbar.so"]);
    }

    #[test]
    fn test_link_cycle_is_walk_error() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("lib64/libbar.so"), b"bar");
        symlink("..", dir.path().join("lib64/loop")).unwrap();

        let err = scan_partition("vendor", dir.path(), &RuleSet::default(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::Walk { .. }));
    }

    #[test]
    fn test_cancelled_scan_stops() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("lib64/libfoo.so"), b"foo");
        let token = CancelToken::new();
        token.cancel();
        let err = scan_partition("vendor", dir.path(), &RuleSet::default(), &token).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_catalog_sorted_and_unique() {
        let entry = |partition: &str, rel: &str| {
            CatalogEntry::new(partition, rel, format!("/src/{}", rel), 1, "00", false)
        };
        let catalog = Catalog::from_entries(vec![
            entry("vendor", "vendor/lib/b.so"),
            entry("product", "product/lib/z.so"),
            entry("vendor", "vendor/lib/a.so"),
            entry("vendor", "vendor/lib/a.so"),
        ]);
        assert_eq!(
            paths(catalog.entries()),
            vec!["product/lib/z.so", "vendor/lib/a.so", "vendor/lib/b.so"]
        );
        let groups = catalog.by_partition();
        assert_eq!(groups["vendor"].len(), 2);
    }
}
