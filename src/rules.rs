//! Proprietary file classification.
//!
//! A rule set is two ordered lists of pattern groups. A path is proprietary
//! when some include group has a substring it contains and no exclude group
//! does. Matching is plain substring containment on the partition-qualified
//! path, so `"bin/"` also hits `vendor/bin/` and `system/xbin/`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// One group of path substrings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternRule {
    #[serde(default)]
    pub paths: Vec<String>,
}

impl PatternRule {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.paths.iter().any(|p| path.contains(p.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub include_patterns: Vec<PatternRule>,
    #[serde(default)]
    pub exclude_patterns: Vec<PatternRule>,
}

/// Where the active rule set came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSource {
    File(PathBuf),
    BuiltIn,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            include_patterns: vec![
                PatternRule::new([
                    "vendor/bin/",
                    "vendor/lib/",
                    "vendor/lib64/",
                    "vendor/etc/",
                    "vendor/firmware/",
                ]),
                PatternRule::new(["system/lib/", "system/lib64/"]),
                PatternRule::new(["product/lib/", "product/lib64/"]),
                PatternRule::new(["bin/"]),
            ],
            exclude_patterns: vec![PatternRule::new([
                ".txt", ".xml", ".conf", ".cfg", ".ini", ".json",
            ])],
        }
    }
}

impl RuleSet {
    /// Parse a rule file. Fails on unreadable or malformed JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_error = |reason: String| Error::Config {
            path: path.to_path_buf(),
            reason,
        };
        let json = fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        serde_json::from_str(&json).map_err(|e| config_error(e.to_string()))
    }

    /// Rule file if given and usable, otherwise the built-in default.
    pub fn load_or_default(path: Option<&Path>) -> (Self, RuleSource) {
        match path {
            None => (Self::default(), RuleSource::BuiltIn),
            Some(path) => match Self::from_file(path) {
                Ok(rules) => {
                    info!(
                        rules = %path.display(),
                        include = rules.include_patterns.len(),
                        exclude = rules.exclude_patterns.len(),
                        "loaded rule set"
                    );
                    (rules, RuleSource::File(path.to_path_buf()))
                }
                Err(e) => {
                    warn!("{}; using built-in rules", e);
                    (Self::default(), RuleSource::BuiltIn)
                }
            },
        }
    }

    pub fn matches_include(&self, path: &str) -> bool {
        self.include_patterns.iter().any(|rule| rule.matches(path))
    }

    pub fn matches_exclude(&self, path: &str) -> bool {
        self.exclude_patterns.iter().any(|rule| rule.matches(path))
    }

    /// Exclusion wins over inclusion regardless of rule order.
    pub fn is_proprietary(&self, path: &str) -> bool {
        self.matches_include(path) && !self.matches_exclude(path)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config {
            path: PathBuf::new(),
            reason: e.to_string(),
        })
    }
}
