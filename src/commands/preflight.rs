//! Preflight command - runs preflight checks.

use anyhow::Result;

use vendortree::config::Config;
use vendortree::preflight;

/// Execute the preflight command.
pub fn cmd_preflight(strict: bool, config: &Config) -> Result<()> {
    if strict {
        preflight::run_preflight_or_fail(config.use_sudo)?;
    } else {
        let report = preflight::run_preflight(config.use_sudo);
        report.print();
        if !report.all_passed() {
            println!("Some checks failed. Use --strict to exit non-zero.");
        }
    }
    Ok(())
}
