//! Generate command - the full pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;

use vendortree::config::Config;
use vendortree::emit::BuildIdentity;
use vendortree::pipeline::{self, GenerateRequest};
use vendortree::process::{CancelToken, SystemRunner};
use vendortree::Error;

/// Options given on the command line; unset ones come from [`Config`].
pub struct GenerateArgs {
    pub vendor: String,
    pub device: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub android_version: Option<String>,
    pub rules: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub timeout: Option<u64>,
}

/// Execute the generate command.
pub fn cmd_generate(args: GenerateArgs, config: &Config) -> Result<()> {
    if args.vendor.trim().is_empty() || args.device.trim().is_empty() {
        bail!("vendor and device must not be empty");
    }

    let request = GenerateRequest {
        identity: BuildIdentity {
            vendor: args.vendor,
            device: args.device,
            android_version: args
                .android_version
                .unwrap_or_else(|| config.android_version.clone()),
        },
        input: args.input,
        output: args.output,
        rules: args.rules.or_else(|| config.rules.clone()),
        scratch_dir: config.scratch_dir.clone(),
        jobs: args.jobs.unwrap_or(config.jobs).max(1),
        timeout: args.timeout.map(Duration::from_secs).or(config.timeout),
    };
    info!(
        vendor = %request.identity.vendor,
        device = %request.identity.device,
        "generating vendor tree from {}",
        request.input.display()
    );

    let runner = Arc::new(SystemRunner::new(config.use_sudo));
    let report = match pipeline::generate(&request, runner, CancelToken::new()) {
        Ok(report) => report,
        Err(Error::Cancelled) => bail!("cancelled; no manifest was written"),
        Err(e) => {
            return Err(e).with_context(|| {
                format!("failed to generate vendor tree in {}", request.output.display())
            })
        }
    };

    println!("{}", report.summary());
    println!();
    println!("Vendor tree: {}", request.output.display());
    println!("Manifest:    {}", report.tree.manifest.display());
    Ok(())
}
