//! Preflight checks for vendortree.
//!
//! Verifies the host tools the extraction backends shell out to.
//! Run with `vendortree preflight` before a long extraction.

mod host_tools;
mod types;

use anyhow::{bail, Result};

use crate::process;

pub use host_tools::{HostTool, HOST_TOOLS};
pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all preflight checks.
pub fn run_preflight(use_sudo: bool) -> PreflightReport {
    println!("Checking host tools...");
    let mut checks = host_tools::check_host_tools(process::which);

    if !use_sudo {
        // Without the prefix the mount backend only works as root.
        for check in checks.iter_mut().filter(|c| c.name == "sudo") {
            *check = CheckResult::skip("sudo", "disabled by VENDORTREE_SUDO");
        }
    }
    println!();

    PreflightReport { checks }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(use_sudo: bool) -> Result<()> {
    let report = run_preflight(use_sudo);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before extracting.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}
