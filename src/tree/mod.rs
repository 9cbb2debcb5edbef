//! Assembling the vendor tree from extracted partitions.
//!
//! A build moves through a fixed sequence of states:
//!
//! ```text
//! Initialized -> DirectoriesCreated -> Scanning -> Copying
//!     -> ManifestWritten -> BuildFilesWritten -> Done
//! ```
//!
//! Any fatal error moves it to `Failed`. Files left by an earlier run are
//! removed before scanning, so a failed build never looks finished. The manifest is only written after
//! every copy has either landed or been dropped, so it always lists exactly
//! the files under `proprietary/`.

pub mod layout;

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::catalog::{scan_partition, Catalog, CatalogEntry};
use crate::common::temp::prepare_work_dir;
use crate::emit::{BuildFileEmitter, BuildIdentity, PROPRIETARY_DIR};
use crate::error::{Error, Result};
use crate::process::CancelToken;
use crate::rules::RuleSet;
use crate::timing::Timer;
use crate::unpack::ExtractionResult;

const EXECUTABLE_MODE: u32 = 0o755;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Initialized,
    DirectoriesCreated,
    Scanning,
    Copying,
    ManifestWritten,
    BuildFilesWritten,
    Done,
    Failed,
}

impl BuildState {
    /// The state that follows this one on success.
    pub fn next(self) -> Option<BuildState> {
        use BuildState::*;
        match self {
            Initialized => Some(DirectoriesCreated),
            DirectoriesCreated => Some(Scanning),
            Scanning => Some(Copying),
            Copying => Some(ManifestWritten),
            ManifestWritten => Some(BuildFilesWritten),
            BuildFilesWritten => Some(Done),
            Done | Failed => None,
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An entry that could not be copied and was left out of the manifest.
#[derive(Debug)]
pub struct CopyFailure {
    pub entry: CatalogEntry,
    pub error: Error,
}

#[derive(Debug)]
pub struct TreeReport {
    /// Entries found by the scan, before copy failures were dropped.
    pub catalogued: usize,
    /// The entries that were copied and listed in the manifest.
    pub catalog: Catalog,
    pub copy_failures: Vec<CopyFailure>,
    pub walk_errors: Vec<Error>,
    pub manifest: PathBuf,
    pub build_files: Vec<PathBuf>,
}

pub struct VendorTreeBuilder<'a> {
    output: PathBuf,
    identity: BuildIdentity,
    rules: &'a RuleSet,
    emitter: BuildFileEmitter,
    cancel: CancelToken,
    state: BuildState,
}

impl<'a> VendorTreeBuilder<'a> {
    pub fn new(output: impl Into<PathBuf>, identity: BuildIdentity, rules: &'a RuleSet) -> Self {
        Self {
            output: output.into(),
            identity,
            rules,
            emitter: BuildFileEmitter::standard(),
            cancel: CancelToken::new(),
            state: BuildState::Initialized,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_emitter(mut self, emitter: BuildFileEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn proprietary_dir(&self) -> PathBuf {
        self.output.join(PROPRIETARY_DIR)
    }

    /// Scan, copy and describe every extracted partition in `results`.
    ///
    /// Runs once; a second call is rejected as the states are not re-entered.
    pub fn build(&mut self, results: &[ExtractionResult]) -> Result<TreeReport> {
        if self.state != BuildState::Initialized {
            return Err(Error::Output {
                path: self.output.clone(),
                source: std::io::Error::other(format!("builder already {}", self.state)),
            });
        }
        match self.run(results) {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(state = %self.state, "vendor tree build failed: {}", e);
                self.state = BuildState::Failed;
                Err(e)
            }
        }
    }

    fn advance(&mut self, to: BuildState) {
        debug_assert_eq!(self.state.next(), Some(to), "out of order transition");
        debug!("{} -> {}", self.state, to);
        self.state = to;
    }

    fn run(&mut self, results: &[ExtractionResult]) -> Result<TreeReport> {
        fs::create_dir_all(&self.output).map_err(|source| Error::Output {
            path: self.output.clone(),
            source,
        })?;
        self.emitter.clear(&self.output, &self.identity)?;
        let proprietary = prepare_work_dir(&self.output, PROPRIETARY_DIR).map_err(|source| Error::Output {
            path: self.proprietary_dir(),
            source,
        })?;
        layout::create_layout(&proprietary).map_err(|source| Error::Output {
            path: proprietary.clone(),
            source,
        })?;
        self.advance(BuildState::DirectoriesCreated);

        self.advance(BuildState::Scanning);
        let timer = Timer::start("Scan");
        let (catalog, walk_errors) = self.scan(results)?;
        timer.finish();
        let catalogued = catalog.len();
        info!(entries = catalogued, "catalogued proprietary files");

        self.advance(BuildState::Copying);
        let timer = Timer::start("Copy");
        let copy_failures = self.copy_all(&catalog, &proprietary)?;
        timer.finish();

        let failed: BTreeSet<&str> = copy_failures.iter().map(|f| f.entry.relative_path()).collect();
        let catalog = catalog.retain(|e| !failed.contains(e.relative_path()));

        self.cancel.check()?;
        let manifest = self.emitter.write_manifest(&self.output, &self.identity, &catalog)?;
        self.advance(BuildState::ManifestWritten);

        let build_files = self
            .emitter
            .write_build_files(&self.output, &self.identity, &catalog)?;
        self.advance(BuildState::BuildFilesWritten);
        self.advance(BuildState::Done);

        Ok(TreeReport {
            catalogued,
            catalog,
            copy_failures,
            walk_errors,
            manifest,
            build_files,
        })
    }

    fn scan(&self, results: &[ExtractionResult]) -> Result<(Catalog, Vec<Error>)> {
        let mut entries = Vec::new();
        let mut walk_errors = Vec::new();
        for result in results {
            let Some(tree) = result.tree() else {
                continue;
            };
            match scan_partition(&result.partition, tree, self.rules, &self.cancel) {
                Ok(found) => entries.extend(found),
                Err(e) if e.is_recoverable() => {
                    warn!(partition = %result.partition, "{}; partition contributes no files", e);
                    walk_errors.push(e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok((Catalog::from_entries(entries), walk_errors))
    }

    fn copy_all(&self, catalog: &Catalog, proprietary: &Path) -> Result<Vec<CopyFailure>> {
        let mut failures = Vec::new();
        for entry in catalog.entries() {
            self.cancel.check()?;
            let dest = proprietary.join(entry.relative_path());
            if let Err(source) = copy_entry(entry, &dest) {
                let _ = fs::remove_file(&dest);
                let error = Error::Copy {
                    relative_path: entry.relative_path().to_string(),
                    source,
                };
                warn!(partition = %entry.partition(), "{}", error);
                failures.push(CopyFailure {
                    entry: entry.clone(),
                    error,
                });
            }
        }
        Ok(failures)
    }
}

fn copy_entry(entry: &CatalogEntry, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(entry.source(), dest)?;
    if entry.is_elf() {
        fs::set_permissions(dest, fs::Permissions::from_mode(EXECUTABLE_MODE))?;
    }
    Ok(())
}
