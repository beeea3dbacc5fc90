//! Loading alert rules from JSON files

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::AlertRule;

#[derive(Deserialize)]
#[serde(untagged)]
enum RulesDocument {
    List(Vec<AlertRule>),
    Wrapped { rules: Vec<AlertRule> },
}

/// Parse rules from a JSON document.
///
/// Accepts either a bare array or an object with a `rules` array. Every rule
/// is validated and ids must be unique within the document.
pub fn parse_rules(json: &str) -> Result<Vec<AlertRule>> {
    let rules = match serde_json::from_str(json)? {
        RulesDocument::List(rules) | RulesDocument::Wrapped { rules } => rules,
    };

    let mut seen = HashSet::new();
    for rule in &rules {
        rule.validate()
            .map_err(|e| Error::validation(format!("rule '{}': {e}", rule.id)))?;
        if !seen.insert(rule.id.as_str()) {
            return Err(Error::validation(format!("duplicate rule id '{}'", rule.id)));
        }
    }
    Ok(rules)
}

/// Read and parse a rules file
pub fn load_rules_file(path: &Path) -> Result<Vec<AlertRule>> {
    let contents = std::fs::read_to_string(path)?;
    parse_rules(&contents)
}
