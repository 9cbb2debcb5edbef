//! Extract command - unpacks partitions for inspection.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use vendortree::config::Config;
use vendortree::pipeline;
use vendortree::process::{CancelToken, SystemRunner};
use vendortree::unpack::ExtractionStatus;

/// Execute the extract command.
pub fn cmd_extract(input: &Path, output: &Path, jobs: Option<usize>, config: &Config) -> Result<()> {
    let runner = Arc::new(SystemRunner::new(config.use_sudo));
    let results = pipeline::extract(
        input,
        output,
        jobs.unwrap_or(config.jobs),
        runner,
        CancelToken::new(),
    )
    .with_context(|| format!("failed to extract {}", input.display()))?;

    for result in &results {
        match &result.status {
            ExtractionStatus::Extracted { backend, tree } => {
                println!("  {:<12} {} ({})", result.partition, tree.display(), backend)
            }
            ExtractionStatus::Failed => {
                println!("  {:<12} FAILED", result.partition);
                for attempt in &result.attempts {
                    println!("      {} failed: {}", attempt.backend, attempt.error);
                }
            }
        }
    }
    Ok(())
}
