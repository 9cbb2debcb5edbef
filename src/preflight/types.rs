//! Preflight check types and report.

use std::fmt::Write as _;

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    /// Extraction cannot work.
    Fail,
    /// One backend is unavailable; the fallback chain continues without it.
    Warn,
    Skip,
}

impl CheckStatus {
    fn label(self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Warn => "WARN",
            CheckStatus::Skip => "SKIP",
        }
    }
}

impl CheckResult {
    fn with(name: &str, status: CheckStatus, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status,
            details: Some(details.to_string()),
        }
    }

    pub fn pass_with(name: &str, details: &str) -> Self {
        Self::with(name, CheckStatus::Pass, details)
    }

    pub fn fail(name: &str, details: &str) -> Self {
        Self::with(name, CheckStatus::Fail, details)
    }

    pub fn warn(name: &str, details: &str) -> Self {
        Self::with(name, CheckStatus::Warn, details)
    }

    pub fn skip(name: &str, details: &str) -> Self {
        Self::with(name, CheckStatus::Skip, details)
    }
}

/// Results of all preflight checks.
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Returns true if no check failed. Warnings do not count.
    pub fn all_passed(&self) -> bool {
        self.fail_count() == 0
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    pub fn fail_count(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    pub fn warn_count(&self) -> usize {
        self.count(CheckStatus::Warn)
    }

    pub fn render(&self) -> String {
        let mut out = String::from("=== Preflight Check Results ===\n\n");
        for check in &self.checks {
            let _ = write!(out, "  [{}] {}", check.status.label(), check.name);
            match &check.details {
                Some(details) => {
                    let _ = writeln!(out, ": {}", details);
                }
                None => out.push('\n'),
            }
        }

        let _ = writeln!(
            out,
            "\nSummary: {}/{} passed",
            self.count(CheckStatus::Pass),
            self.checks.len()
        );
        if self.fail_count() > 0 {
            let _ = writeln!(out, "         {} FAILED - extraction will not succeed", self.fail_count());
        }
        if self.warn_count() > 0 {
            let _ = writeln!(out, "         {} warnings (some backends unavailable)", self.warn_count());
        }
        out
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        print!("{}", self.render());
    }
}
