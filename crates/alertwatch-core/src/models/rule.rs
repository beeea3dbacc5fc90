//! Alert rule and condition models

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::notification::NotificationTarget;
use crate::error::{Error, Result};

/// Alert severity level, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Warning
    #[default]
    Warning,
    /// Error
    Error,
    /// Critical
    Critical,
}

impl Severity {
    /// Lowercase name used in payloads and metric labels
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// Greater than
    #[serde(rename = ">", alias = "gt")]
    Gt,
    /// Less than
    #[serde(rename = "<", alias = "lt")]
    Lt,
    /// Greater than or equal to
    #[serde(rename = ">=", alias = "gte")]
    Gte,
    /// Less than or equal to
    #[serde(rename = "<=", alias = "lte")]
    Lte,
    /// Equal to
    #[serde(rename = "==", alias = "eq")]
    Eq,
    /// Not equal to
    #[serde(rename = "!=", alias = "ne")]
    Ne,
}

impl Operator {
    /// Apply the operator as `value <op> threshold`
    #[allow(clippy::float_cmp)]
    pub fn compare(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Lt => value < threshold,
            Self::Gte => value >= threshold,
            Self::Lte => value <= threshold,
            Self::Eq => value == threshold,
            Self::Ne => value != threshold,
        }
    }

    /// Operator symbol
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }

    /// Phrase used in alert descriptions
    pub fn describe(self) -> &'static str {
        match self {
            Self::Gt => "exceeded",
            Self::Lt => "fell below",
            Self::Gte => "reached or exceeded",
            Self::Lte => "fell to or below",
            Self::Eq => "equals",
            Self::Ne => "differs from",
        }
    }
}

/// Aggregation applied to samples inside a query window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Arithmetic mean
    #[default]
    Avg,
    /// Sum of samples
    Sum,
    /// Smallest sample
    Min,
    /// Largest sample
    Max,
    /// Number of samples
    Count,
    /// 95th percentile
    P95,
    /// 99th percentile
    P99,
}

impl Aggregation {
    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
            Self::P95 => "p95",
            Self::P99 => "p99",
        }
    }
}

/// Anomaly detection sensitivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    /// Fires beyond 4 standard deviations
    Low,
    /// Fires beyond 3 standard deviations
    #[default]
    Medium,
    /// Fires beyond 2 standard deviations
    High,
}

impl Sensitivity {
    /// Number of standard deviations a value must deviate by
    pub fn deviations(self) -> f64 {
        match self {
            Self::High => 2.0,
            Self::Medium => 3.0,
            Self::Low => 4.0,
        }
    }
}

/// How composite sub-conditions are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    /// Every sub-condition must hold
    #[default]
    #[serde(alias = "and")]
    And,
    /// At least one sub-condition must hold
    #[serde(alias = "or")]
    Or,
}

impl Combinator {
    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

fn default_window() -> u32 {
    5
}

fn default_rate_threshold() -> f64 {
    50.0
}

fn default_baseline_days() -> u32 {
    7
}

/// Compare an aggregated metric against a fixed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCondition {
    /// Metric name
    pub metric: String,
    /// Comparison applied as `value <op> threshold`
    pub operator: Operator,
    /// Value compared against
    pub threshold: f64,
    /// Trailing window the value is aggregated over
    #[serde(default = "default_window")]
    pub window_minutes: u32,
    /// How samples in the window are reduced
    #[serde(default)]
    pub aggregation: Aggregation,
}

/// Percentage change between two windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateCondition {
    /// Metric name
    pub metric: String,
    /// Window of the current value
    #[serde(default = "default_window")]
    pub window_minutes: u32,
    /// Reduction used for both windows
    #[serde(default)]
    pub aggregation: Aggregation,
    /// Window of the baseline value the current value is compared to
    pub rate_window_minutes: u32,
    /// Absolute change, in percent, that trips the condition
    #[serde(default = "default_rate_threshold")]
    pub rate_threshold_percent: f64,
}

/// Metric has stopped reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbsenceCondition {
    /// Metric name
    pub metric: String,
    /// Silence longer than this trips the condition
    #[serde(default = "default_window")]
    pub window_minutes: u32,
}

/// Z-score deviation from a historical baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyCondition {
    /// Metric name
    pub metric: String,
    /// Z-score cut-off
    #[serde(default)]
    pub sensitivity: Sensitivity,
    /// Days of history forming the baseline
    #[serde(default = "default_baseline_days")]
    pub baseline_days: u32,
    /// Reduction for the current value
    #[serde(default)]
    pub aggregation: Aggregation,
}

/// Boolean combination of threshold conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeCondition {
    /// Child conditions
    pub conditions: Vec<ThresholdCondition>,
    /// How child results are combined
    #[serde(default, alias = "operator_between_conditions")]
    pub combinator: Combinator,
}

/// The predicate a rule evaluates each tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Simple threshold comparison
    Threshold(ThresholdCondition),
    /// Rate of change detection
    Rate(RateCondition),
    /// Absence of data
    Absence(AbsenceCondition),
    /// Statistical anomaly detection
    Anomaly(AnomalyCondition),
    /// AND/OR over threshold conditions
    Composite(CompositeCondition),
}

impl Condition {
    /// Kind name as used on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Threshold(_) => "threshold",
            Self::Rate(_) => "rate",
            Self::Absence(_) => "absence",
            Self::Anomaly(_) => "anomaly",
            Self::Composite(_) => "composite",
        }
    }

    /// Primary metric name (the first sub-condition's for composites)
    pub fn metric(&self) -> Option<&str> {
        match self {
            Self::Threshold(c) => Some(&c.metric),
            Self::Rate(c) => Some(&c.metric),
            Self::Absence(c) => Some(&c.metric),
            Self::Anomaly(c) => Some(&c.metric),
            Self::Composite(c) => c.conditions.first().map(|c| c.metric.as_str()),
        }
    }

    /// Reject conditions that can never evaluate meaningfully
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Threshold(c) => validate_threshold(c),
            Self::Rate(c) => {
                require_metric(&c.metric)?;
                require_window("window_minutes", c.window_minutes)?;
                require_window("rate_window_minutes", c.rate_window_minutes)?;
                if !c.rate_threshold_percent.is_finite() || c.rate_threshold_percent < 0.0 {
                    return Err(Error::validation(
                        "rate_threshold_percent must be a non-negative number",
                    ));
                }
                Ok(())
            }
            Self::Absence(c) => {
                require_metric(&c.metric)?;
                require_window("window_minutes", c.window_minutes)
            }
            Self::Anomaly(c) => {
                require_metric(&c.metric)?;
                if c.baseline_days == 0 {
                    return Err(Error::validation("baseline_days must be at least 1"));
                }
                Ok(())
            }
            Self::Composite(c) => c.conditions.iter().try_for_each(validate_threshold),
        }
    }
}

fn validate_threshold(c: &ThresholdCondition) -> Result<()> {
    require_metric(&c.metric)?;
    require_window("window_minutes", c.window_minutes)?;
    if !c.threshold.is_finite() {
        return Err(Error::validation(format!(
            "threshold for '{}' must be finite",
            c.metric
        )));
    }
    Ok(())
}

fn require_metric(metric: &str) -> Result<()> {
    if metric.trim().is_empty() {
        return Err(Error::validation("metric name must not be empty"));
    }
    Ok(())
}

fn require_window(field: &str, minutes: u32) -> Result<()> {
    if minutes == 0 {
        return Err(Error::validation(format!("{field} must be at least 1")));
    }
    Ok(())
}

/// One delayed step of an escalation ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationStep {
    /// Minutes after the previous step (or the trigger) before this step fires
    pub delay_minutes: u32,
    /// Targets notified when the step fires
    pub notifications: Vec<NotificationTarget>,
}

/// Ordered escalation ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EscalationPolicy {
    /// Steps in firing order
    pub steps: Vec<EscalationStep>,
    /// Stop escalating once an operator acknowledges the alert
    #[serde(default)]
    pub stop_on_acknowledge: bool,
}

/// An alert rule definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Description of what this alert monitors
    #[serde(default)]
    pub description: Option<String>,

    /// Whether the rule is evaluated
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Condition to evaluate
    pub condition: Condition,

    /// Alert severity
    #[serde(default)]
    pub severity: Severity,

    /// Tags copied onto every alert, used for filter matching
    #[serde(default)]
    pub tags: HashMap<String, String>,

    /// Targets notified when an alert opens
    #[serde(default)]
    pub notifications: Vec<NotificationTarget>,

    /// Minutes after a resolution during which the rule may not re-open
    #[serde(default)]
    pub cooldown_minutes: u32,

    /// Resolve the open alert once the condition evaluates false
    #[serde(default)]
    pub auto_resolve: bool,

    /// Force-resolve open alerts older than this many minutes
    #[serde(default)]
    pub resolve_timeout_minutes: Option<u32>,

    /// Escalation ladder applied while the alert stays open
    #[serde(default)]
    pub escalation: Option<EscalationPolicy>,

    /// When the rule was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// When the rule was last updated
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl AlertRule {
    /// Create an enabled rule with default settings
    pub fn new(id: impl Into<String>, name: impl Into<String>, condition: Condition) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            enabled: true,
            condition,
            severity: Severity::default(),
            tags: HashMap::new(),
            notifications: Vec::new(),
            cooldown_minutes: 0,
            auto_resolve: false,
            resolve_timeout_minutes: None,
            escalation: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate identity, condition and escalation settings
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::validation("rule id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(Error::validation("rule name must not be empty"));
        }
        self.condition.validate()?;

        if self.resolve_timeout_minutes == Some(0) {
            return Err(Error::validation("resolve_timeout_minutes must be at least 1"));
        }
        for target in self.notifications.iter().chain(
            self.escalation
                .iter()
                .flat_map(|p| p.steps.iter())
                .flat_map(|s| s.notifications.iter()),
        ) {
            target.validate()?;
        }
        Ok(())
    }

    /// Escalation step at `level`, if the ladder has one
    pub fn escalation_step(&self, level: u32) -> Option<&EscalationStep> {
        self.escalation
            .as_ref()
            .and_then(|p| p.steps.get(level as usize))
    }

    /// Apply a partial update; only provided fields are replaced
    pub fn apply(&mut self, update: AlertRuleUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(condition) = update.condition {
            self.condition = condition;
        }
        if let Some(severity) = update.severity {
            self.severity = severity;
        }
        if let Some(tags) = update.tags {
            self.tags = tags;
        }
        if let Some(notifications) = update.notifications {
            self.notifications = notifications;
        }
        if let Some(cooldown) = update.cooldown_minutes {
            self.cooldown_minutes = cooldown;
        }
        if let Some(auto_resolve) = update.auto_resolve {
            self.auto_resolve = auto_resolve;
        }
        if let Some(timeout) = update.resolve_timeout_minutes {
            self.resolve_timeout_minutes = timeout;
        }
        if let Some(escalation) = update.escalation {
            self.escalation = escalation;
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update for an alert rule.
///
/// Nullable fields use a double option: absent leaves the value alone,
/// `null` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertRuleUpdate {
    /// New display name
    #[serde(default)]
    pub name: Option<String>,
    /// New description, or `null` to clear
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub description: Option<Option<String>>,
    /// Enable or disable
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Replacement condition
    #[serde(default)]
    pub condition: Option<Condition>,
    /// New severity
    #[serde(default)]
    pub severity: Option<Severity>,
    /// Replacement tag set
    #[serde(default)]
    pub tags: Option<HashMap<String, String>>,
    /// Replacement trigger targets
    #[serde(default)]
    pub notifications: Option<Vec<NotificationTarget>>,
    /// New cooldown
    #[serde(default)]
    pub cooldown_minutes: Option<u32>,
    /// Toggle auto-resolve
    #[serde(default)]
    pub auto_resolve: Option<bool>,
    /// New timeout, or `null` to clear
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub resolve_timeout_minutes: Option<Option<u32>>,
    /// New ladder, or `null` to clear
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    pub escalation: Option<Option<EscalationPolicy>>,
}
