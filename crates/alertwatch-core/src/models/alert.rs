//! Alert event models

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::notification::ChannelType;
use super::rule::Severity;

/// Status of an alert event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Alert is currently active
    #[default]
    Active,
    /// An operator has acknowledged the alert
    Acknowledged,
    /// Silenced until `suppressed_until`, then resolved
    Suppressed,
    /// Terminal; the alert lives in history
    Resolved,
}

/// An alert event (triggered alert)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Unique identifier
    pub id: Uuid,

    /// The rule that triggered this alert
    pub rule_id: String,

    /// Rule name at trigger time
    pub rule_name: String,

    /// Short human-readable title
    pub title: String,

    /// Human-readable description of what fired
    pub description: String,

    /// Severity level
    pub severity: Severity,

    /// The metric value that triggered the alert
    pub metric_value: Option<f64>,

    /// The threshold that was compared against
    pub threshold: Option<f64>,

    /// Copy of the rule's tags
    pub tags: HashMap<String, String>,

    /// Which metric/operator/window produced this alert
    pub context: serde_json::Value,

    /// When the alert was triggered
    pub triggered_at: DateTime<Utc>,

    /// When the alert was resolved (if resolved)
    pub resolved_at: Option<DateTime<Utc>>,

    /// Why the alert was resolved
    pub resolution_reason: Option<String>,

    /// Last notification attempt, successful or not
    pub last_notification_at: Option<DateTime<Utc>>,

    /// Current status
    pub status: AlertStatus,

    /// Who acknowledged the alert
    pub acknowledged_by: Option<String>,

    /// When the alert was acknowledged
    pub acknowledged_at: Option<DateTime<Utc>>,

    /// End of the suppression window
    pub suppressed_until: Option<DateTime<Utc>>,

    /// Notifications that were attempted, in order
    pub notifications_sent: Vec<NotificationRecord>,

    /// Number of escalation steps fired so far
    pub escalation_level: u32,

    /// When the next escalation step is due
    pub next_escalation_at: Option<DateTime<Utc>>,
}

impl AlertEvent {
    /// Append a delivery record and stamp the last attempt
    pub fn record_notification(&mut self, record: NotificationRecord) {
        self.last_notification_at = Some(record.sent_at);
        self.notifications_sent.push(record);
    }

    /// Successful deliveries so far
    pub fn successful_notifications(&self) -> usize {
        self.notifications_sent.iter().filter(|r| r.success).count()
    }
}

/// Record of a notification attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Channel type
    pub target_type: ChannelType,

    /// When it was sent
    pub sent_at: DateTime<Utc>,

    /// Whether it succeeded
    pub success: bool,

    /// Error message if failed
    pub error: Option<String>,

    /// Escalation level the notification belonged to (0 = initial)
    pub escalation_level: u32,
}
