//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `generate` - Build a vendor tree from partition images
//! - `detect` - Report image formats
//! - `extract` - Unpack partitions for inspection
//! - `rules` - Print the effective rule set
//! - `show` - Display information
//! - `preflight` - Run preflight checks

pub mod detect;
pub mod extract;
pub mod generate;
mod preflight;
pub mod rules;
pub mod show;

pub use detect::cmd_detect;
pub use extract::cmd_extract;
pub use generate::cmd_generate;
pub use preflight::cmd_preflight;
pub use rules::cmd_rules;
pub use show::cmd_show;
