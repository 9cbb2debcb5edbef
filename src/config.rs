//! Configuration management for vendortree.
//!
//! Reads configuration from a .env file and environment variables.
//! Environment variables take precedence over the .env file; command-line
//! flags take precedence over both.

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_ANDROID_VERSION: &str = "13";
pub const DEFAULT_JOBS: usize = 1;

/// Vendortree configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Rule-set JSON file (default: built-in rules)
    pub rules: Option<PathBuf>,
    /// Parent of per-run scratch directories (default: system temp dir)
    pub scratch_dir: Option<PathBuf>,
    /// Prefix privileged commands with sudo
    pub use_sudo: bool,
    pub android_version: String,
    /// Concurrent partition workers
    pub jobs: usize,
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rules: None,
            scratch_dir: None,
            use_sudo: !running_as_root(),
            android_version: DEFAULT_ANDROID_VERSION.to_string(),
            jobs: DEFAULT_JOBS,
            timeout: None,
        }
    }
}

impl Config {
    /// Load configuration from `<base_dir>/.env` and the environment.
    pub fn load(base_dir: &Path) -> Self {
        let mut vars = HashMap::new();

        let env_path = base_dir.join(".env");
        if env_path.exists() {
            match dotenvy::from_path_iter(&env_path) {
                Ok(iter) => {
                    for item in iter {
                        match item {
                            Ok((key, value)) => {
                                vars.insert(key, value);
                            }
                            Err(e) => warn!("ignoring line in {}: {}", env_path.display(), e),
                        }
                    }
                }
                Err(e) => warn!("cannot read {}: {}", env_path.display(), e),
            }
        }

        // Environment variables override .env file
        vars.extend(std::env::vars());

        Self::from_vars(base_dir, &vars)
    }

    pub fn from_vars(base_dir: &Path, vars: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        let path = |key: &str| {
            vars.get(key).filter(|s| !s.is_empty()).map(|s| {
                let path = PathBuf::from(s);
                if path.is_absolute() {
                    path
                } else {
                    base_dir.join(path)
                }
            })
        };

        let use_sudo = match vars.get("VENDORTREE_SUDO").map(|s| s.to_ascii_lowercase()) {
            Some(v) if matches!(v.as_str(), "0" | "false" | "no") => false,
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes") => true,
            _ => defaults.use_sudo,
        };

        let jobs = vars
            .get("VENDORTREE_JOBS")
            .and_then(|s| parse_or_warn::<usize>("VENDORTREE_JOBS", s))
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_JOBS);

        let timeout = vars
            .get("VENDORTREE_TIMEOUT")
            .and_then(|s| parse_or_warn::<u64>("VENDORTREE_TIMEOUT", s))
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs);

        Self {
            rules: path("VENDORTREE_RULES"),
            scratch_dir: path("VENDORTREE_SCRATCH_DIR"),
            use_sudo,
            android_version: vars
                .get("VENDORTREE_ANDROID_VERSION")
                .filter(|s| !s.is_empty())
                .cloned()
                .unwrap_or(defaults.android_version),
            jobs,
            timeout,
        }
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        let or_default = |p: &Option<PathBuf>, default: &str| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| default.to_string())
        };
        println!("Configuration:");
        println!("  VENDORTREE_RULES: {}", or_default(&self.rules, "(built-in)"));
        println!(
            "  VENDORTREE_SCRATCH_DIR: {}",
            or_default(&self.scratch_dir, &std::env::temp_dir().display().to_string())
        );
        println!("  VENDORTREE_SUDO: {}", self.use_sudo);
        println!("  VENDORTREE_ANDROID_VERSION: {}", self.android_version);
        println!("  VENDORTREE_JOBS: {}", self.jobs);
        match self.timeout {
            Some(t) => println!("  VENDORTREE_TIMEOUT: {}s", t.as_secs()),
            None => println!("  VENDORTREE_TIMEOUT: (none)"),
        }
    }
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring {}={:?}: not a number", key, value);
            None
        }
    }
}

fn running_as_root() -> bool {
    fs::metadata("/proc/self").map(|m| m.uid() == 0).unwrap_or(false)
}
