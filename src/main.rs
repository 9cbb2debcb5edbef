//! Vendortree - Android vendor tree generator.
//!
//! Extracts partition images (sparse, raw or super) and assembles the
//! proprietary blobs into `vendor/<vendor>/<device>`:
//! - `proprietary/` with the copied files
//! - `proprietary-files.txt` listing them
//! - Android.mk, Android.bp, BoardConfig.mk and `<device>-vendor.mk`

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use vendortree::config::Config;

#[derive(Parser)]
#[command(name = "vendortree")]
#[command(about = "Android vendor tree generator")]
#[command(
    after_help = "QUICK START:\n  vendortree preflight                           Check host tools\n  vendortree generate -V acme -d rocket -i imgs  Build vendor/acme/rocket\n  vendortree detect imgs/*.img                   Inspect images"
)]
struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a vendor tree from partition images
    Generate {
        /// Vendor name (e.g. xiaomi)
        #[arg(short = 'V', long)]
        vendor: String,

        /// Device codename (e.g. marble)
        #[arg(short, long)]
        device: String,

        /// Directory of partition images, or a single (super) image
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory (default: vendor/<vendor>/<device>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Android version recorded in the build files (default: 13)
        #[arg(long)]
        android_version: Option<String>,

        /// Rule-set JSON file
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Partitions unpacked in parallel (default: 1)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Abort the run after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Print the detected format of images
    Detect {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Unpack partitions for inspection
    Extract {
        /// Directory of partition images, or a single (super) image
        input: PathBuf,

        /// Output directory, one subdirectory per partition
        #[arg(short, long)]
        output: PathBuf,

        /// Partitions unpacked in parallel (default: 1)
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// Print the effective rule set as JSON
    Rules {
        /// Rule-set JSON file (default: built-in rules)
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Check host tools used by the extraction backends
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show current configuration
    Config,
    /// Show the extraction backend order
    Backends,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(level.as_str()),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let base_dir = std::env::current_dir()?;
    let config = Config::load(&base_dir);

    match cli.command {
        Commands::Generate {
            vendor,
            device,
            input,
            output,
            android_version,
            rules,
            jobs,
            timeout,
        } => {
            let output = output.unwrap_or_else(|| {
                PathBuf::from("vendor").join(&vendor).join(&device)
            });
            let args = commands::generate::GenerateArgs {
                vendor,
                device,
                input,
                output,
                android_version,
                rules,
                jobs,
                timeout,
            };
            commands::cmd_generate(args, &config)?;
        }

        Commands::Detect { images } => {
            commands::cmd_detect(&images)?;
        }

        Commands::Extract {
            input,
            output,
            jobs,
        } => {
            commands::cmd_extract(&input, &output, jobs, &config)?;
        }

        Commands::Rules { file } => {
            commands::cmd_rules(file.as_deref().or(config.rules.as_deref()))?;
        }

        Commands::Show { what } => {
            let show_target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
                ShowTarget::Backends => commands::show::ShowTarget::Backends,
            };
            commands::cmd_show(show_target, &config)?;
        }

        Commands::Preflight { strict } => {
            commands::cmd_preflight(strict, &config)?;
        }
    }

    Ok(())
}
