//! `proprietary-files.txt`: one partition-qualified path per line, grouped
//! under a `# <PARTITION> files` header per partition.

use crate::catalog::Catalog;

use super::BuildIdentity;

pub fn render(identity: &BuildIdentity, catalog: &Catalog) -> String {
    let mut out = format!(
        "# Proprietary files for {} {}\n# Generated by vendortree\n",
        identity.vendor, identity.device
    );
    for (partition, entries) in catalog.by_partition() {
        out.push('\n');
        out.push_str(&format!("# {} files\n", partition.to_ascii_uppercase()));
        for entry in entries {
            out.push_str(&escape(entry.relative_path()));
            out.push('\n');
        }
    }
    out
}

/// Backslash-escape backslashes and spaces.
pub fn escape(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '\\' || c == ' ' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub fn unescape(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Paths listed in a rendered manifest, skipping comments and blank lines.
pub fn parse(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(unescape)
        .collect()
}
