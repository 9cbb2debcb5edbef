//! Rules command - prints the effective rule set.

use std::path::Path;

use anyhow::Result;

use vendortree::rules::{RuleSet, RuleSource};

/// Execute the rules command.
pub fn cmd_rules(file: Option<&Path>) -> Result<()> {
    let (rules, source) = RuleSet::load_or_default(file);
    match source {
        RuleSource::File(path) => eprintln!("# rules from {}", path.display()),
        RuleSource::BuiltIn => eprintln!("# built-in rules"),
    }
    println!("{}", rules.to_json()?);
    Ok(())
}
