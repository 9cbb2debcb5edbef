//! End-to-end run: discover → unpack → catalog → copy → emit.
//!
//! Partitions are unpacked on blocking worker threads, at most `jobs` at a
//! time. A watcher task trips the run's cancel token on Ctrl-C or when the
//! timeout expires; workers see it at their next check or while waiting on
//! a child process, and their guards unmount and delete scratch files on
//! the way out.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::emit::{BuildFileEmitter, BuildIdentity};
use crate::error::{Error, IoContext, Result};
use crate::image::{discover, PartitionSource};
use crate::process::{CancelToken, CommandRunner};
use crate::rules::{RuleSet, RuleSource};
use crate::timing::Timer;
use crate::tree::{TreeReport, VendorTreeBuilder};
use crate::unpack::{ExtractionResult, ExtractionStatus, PartitionUnpacker, ScratchContext, UnpackContext};

/// Everything `generate` needs.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub identity: BuildIdentity,
    /// Image directory or a single image.
    pub input: PathBuf,
    pub output: PathBuf,
    pub rules: Option<PathBuf>,
    pub scratch_dir: Option<PathBuf>,
    pub jobs: usize,
    pub timeout: Option<Duration>,
}

#[derive(Debug)]
pub struct RunReport {
    pub rule_source: RuleSource,
    pub partitions: Vec<ExtractionResult>,
    pub tree: TreeReport,
}

impl RunReport {
    /// Human readable summary for the end of a run.
    pub fn summary(&self) -> String {
        let mut lines = vec!["Partitions:".to_string()];
        for result in &self.partitions {
            let status = match &result.status {
                ExtractionStatus::Extracted { backend, .. } => format!("extracted via {}", backend),
                ExtractionStatus::Failed => "FAILED".to_string(),
            };
            lines.push(format!("  {:<12} {}", result.partition, status));
            for attempt in &result.attempts {
                lines.push(format!("      {} failed: {}", attempt.backend, attempt.error));
            }
        }
        for error in &self.tree.walk_errors {
            lines.push(format!("  scan error: {}", error));
        }
        lines.push(format!("Catalogued: {}", self.tree.catalogued));
        lines.push(format!("Copied:     {}", self.tree.catalog.len()));
        if !self.tree.copy_failures.is_empty() {
            lines.push("Dropped:".to_string());
            for failure in &self.tree.copy_failures {
                lines.push(format!("  {}: {}", failure.entry.relative_path(), failure.error));
            }
        }
        lines.join("\n")
    }
}

/// Run the whole pipeline.
pub fn generate(request: &GenerateRequest, runner: Arc<dyn CommandRunner>, cancel: CancelToken) -> Result<RunReport> {
    let (rules, rule_source) = RuleSet::load_or_default(request.rules.as_deref());

    let sources = discover(&request.input)?;
    info!(
        partitions = ?sources.iter().map(|s| s.name()).collect::<Vec<_>>(),
        "discovered inputs"
    );
    // An earlier run's manifest must not outlive a run that stops early.
    if request.output.is_dir() {
        BuildFileEmitter::standard().clear(&request.output, &request.identity)?;
    }
    let scratch = Arc::new(ScratchContext::new(request.scratch_dir.as_deref())?);

    let rt = runtime()?;
    let (partitions, tree) = rt.block_on(async {
        let watcher = spawn_watcher(cancel.clone(), request.timeout);

        let outcome = async {
            let timer = Timer::start("Unpack");
            let partitions = unpack_all(sources, runner, scratch.clone(), request.jobs, cancel.clone()).await?;
            timer.finish();
            cancel.check()?;

            let output = request.output.clone();
            let identity = request.identity.clone();
            let cancel = cancel.clone();
            let results = partitions.clone();
            let tree = tokio::task::spawn_blocking(move || {
                VendorTreeBuilder::new(output, identity, &rules)
                    .with_cancel(cancel)
                    .build(&results)
            })
            .await
            .map_err(worker_failed)??;
            Ok::<_, Error>((partitions, tree))
        }
        .await;

        watcher.abort();
        outcome
    })?;

    Ok(RunReport {
        rule_source,
        partitions,
        tree,
    })
}

/// Discover and unpack only, moving each extracted tree to
/// `<output>/<partition>`.
pub fn extract(
    input: &Path,
    output: &Path,
    jobs: usize,
    runner: Arc<dyn CommandRunner>,
    cancel: CancelToken,
) -> Result<Vec<ExtractionResult>> {
    let sources = discover(input)?;
    fs::create_dir_all(output).map_err(|source| Error::Output {
        path: output.to_path_buf(),
        source,
    })?;
    // Scratch under the output so trees can be renamed into place.
    let scratch = Arc::new(ScratchContext::new(Some(output))?);

    let rt = runtime()?;
    let results = rt.block_on(async {
        let watcher = spawn_watcher(cancel.clone(), None);
        let results = unpack_all(sources, runner, scratch.clone(), jobs, cancel).await;
        watcher.abort();
        results
    })?;

    let mut placed = Vec::with_capacity(results.len());
    for mut result in results {
        if let ExtractionStatus::Extracted { tree, .. } = &mut result.status {
            if tree.starts_with(scratch.root()) {
                let dest = output.join(&result.partition);
                if dest.exists() {
                    fs::remove_dir_all(&dest).io_context(|| format!("cannot replace {}", dest.display()))?;
                }
                fs::rename(&*tree, &dest).io_context(|| format!("cannot move tree to {}", dest.display()))?;
                *tree = dest;
            }
        }
        placed.push(result);
    }
    Ok(placed)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().io_context(|| "cannot start worker runtime")
}

fn worker_failed(e: tokio::task::JoinError) -> Error {
    Error::io("partition worker failed", std::io::Error::other(e.to_string()))
}

/// Cancel on Ctrl-C, or once `timeout` has passed.
fn spawn_watcher(cancel: CancelToken, timeout: Option<Duration>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let expired = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    warn!("interrupted, cleaning up");
                    cancel.cancel();
                }
            }
            _ = expired => {
                warn!("timed out after {:?}, cleaning up", timeout.unwrap_or_default());
                cancel.cancel();
            }
        }
    })
}

/// Unpack every source, at most `jobs` at a time, keeping discovery order.
async fn unpack_all(
    sources: Vec<PartitionSource>,
    runner: Arc<dyn CommandRunner>,
    scratch: Arc<ScratchContext>,
    jobs: usize,
    cancel: CancelToken,
) -> Result<Vec<ExtractionResult>> {
    let unpacker = Arc::new(PartitionUnpacker::standard());
    let permits = Arc::new(Semaphore::new(jobs.max(1)));

    let mut handles = Vec::with_capacity(sources.len());
    for source in sources {
        let runner = runner.clone();
        let scratch = scratch.clone();
        let unpacker = unpacker.clone();
        let cancel = cancel.clone();
        let permits = permits.clone();
        handles.push(tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.map_err(|_| Error::Cancelled)?;
            tokio::task::spawn_blocking(move || {
                let ctx = UnpackContext {
                    runner: runner.as_ref(),
                    scratch: scratch.as_ref(),
                    cancel: &cancel,
                };
                unpacker.unpack(&source, &ctx)
            })
            .await
            .map_err(worker_failed)?
        }));
    }

    // Every worker is awaited so none is still holding a mount when we return.
    let mut results = Vec::new();
    let mut first_error = None;
    for handle in handles {
        match handle.await.map_err(worker_failed).and_then(|r| r) {
            Ok(found) => results.extend(found),
            Err(e) => {
                cancel.cancel();
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(results),
    }
}
