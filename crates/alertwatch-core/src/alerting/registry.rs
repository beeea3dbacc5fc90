//! In-memory catalog of alert rules

use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{AlertRule, AlertRuleUpdate};

/// Rules keyed by id.
///
/// Mutations on unknown ids are no-ops and report `false`.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: HashMap<String, AlertRule>,
}

impl RuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule, replacing any rule with the same id
    pub fn add(&mut self, rule: AlertRule) -> Result<()> {
        rule.validate()?;
        info!(rule_id = %rule.id, name = %rule.name, kind = rule.condition.kind(), "Rule added");
        self.rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    /// Merge the provided fields into an existing rule.
    ///
    /// The merged rule is validated before it replaces the stored one.
    pub fn update(&mut self, id: &str, update: AlertRuleUpdate) -> Result<bool> {
        let Some(existing) = self.rules.get(id) else {
            debug!(rule_id = id, "Update for unknown rule ignored");
            return Ok(false);
        };

        let mut merged = existing.clone();
        merged.apply(update);
        merged.validate()?;

        info!(rule_id = id, "Rule updated");
        self.rules.insert(id.to_string(), merged);
        Ok(true)
    }

    /// Remove a rule, returning it if it existed
    pub fn remove(&mut self, id: &str) -> Option<AlertRule> {
        let removed = self.rules.remove(id);
        if removed.is_some() {
            info!(rule_id = id, "Rule removed");
        }
        removed
    }

    /// Enable a rule
    pub fn enable(&mut self, id: &str) -> bool {
        self.set_enabled(id, true)
    }

    /// Disable a rule
    pub fn disable(&mut self, id: &str) -> bool {
        self.set_enabled(id, false)
    }

    fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        let Some(rule) = self.rules.get_mut(id) else {
            return false;
        };
        if rule.enabled != enabled {
            rule.enabled = enabled;
            rule.updated_at = Utc::now();
            info!(rule_id = id, enabled, "Rule toggled");
        }
        true
    }

    /// Look up a rule
    pub fn get(&self, id: &str) -> Option<&AlertRule> {
        self.rules.get(id)
    }

    /// All rules, oldest first
    pub fn list(&self) -> Vec<AlertRule> {
        let mut rules: Vec<AlertRule> = self.rules.values().cloned().collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        rules
    }

    /// Enabled rules
    pub fn enabled(&self) -> impl Iterator<Item = &AlertRule> {
        self.rules.values().filter(|r| r.enabled)
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the registry holds no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
