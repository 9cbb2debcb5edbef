//! Show command - displays information.

use anyhow::Result;

use vendortree::config::Config;
use vendortree::unpack::PartitionUnpacker;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config,
    /// Show the extraction backend order
    Backends,
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget, config: &Config) -> Result<()> {
    match target {
        ShowTarget::Config => config.print(),
        ShowTarget::Backends => {
            println!("Extraction backends, in order:");
            for (i, kind) in PartitionUnpacker::standard().kinds().iter().enumerate() {
                println!("  {}. {}", i + 1, kind);
            }
        }
    }
    Ok(())
}
