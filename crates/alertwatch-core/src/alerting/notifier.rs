//! Notification routing for alerts

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    AlertEvent, AlertStatus, NotificationChannel, NotificationRecord, NotificationTarget,
    Severity,
};

/// Delivers formatted messages to external channels
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Deliver one message
    async fn send(&self, message: &OutboundMessage) -> Result<(), NotificationError>;
}

/// Notification errors
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// Transport failed or the endpoint returned a non-2xx status
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Channel lacks the settings needed to deliver
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    /// Send exceeded the configured timeout
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Payload could not be encoded
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// A message ready for a transport
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Destination
    pub channel: NotificationChannel,
    /// Alert being notified
    pub alert_id: Uuid,
    /// Rule that raised the alert
    pub rule_id: String,
    /// 0 for the trigger, N for escalation step N
    pub escalation_level: u32,
    /// Formatted body for the channel
    pub payload: Payload,
}

/// Channel-specific message body
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Plain text for email and SMS
    Text(TextPayload),
    /// Colour-coded attachment block for chat
    Chat(SlackPayload),
    /// Raw JSON envelope for generic webhooks
    Json(serde_json::Value),
    /// PagerDuty Events v2 body
    Pager(PagerDutyPayload),
}

/// Counts from one dispatch call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Targets a send was attempted for
    pub attempted: usize,
    /// Sends that succeeded
    pub delivered: usize,
    /// Targets skipped because disabled or filtered out
    pub skipped: usize,
}

/// Applies target filters and sends through the transport
#[derive(Clone)]
pub struct NotificationRouter {
    transport: Arc<dyn NotificationTransport>,
    send_timeout: Duration,
}

impl NotificationRouter {
    /// Create a router bounded by `send_timeout` per send
    pub fn new(transport: Arc<dyn NotificationTransport>, send_timeout: Duration) -> Self {
        Self {
            transport,
            send_timeout,
        }
    }

    /// Send `alert` to every enabled target whose filters pass.
    ///
    /// Every attempt is recorded on the alert; failures never propagate.
    pub async fn dispatch(
        &self,
        alert: &mut AlertEvent,
        targets: &[NotificationTarget],
        escalation_level: u32,
        now: DateTime<Utc>,
    ) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        for target in targets {
            if !target.enabled || !target.accepts(alert.severity, &alert.tags, now) {
                debug!(
                    alert_id = %alert.id,
                    channel = %target.channel.channel_type(),
                    "Notification target skipped"
                );
                summary.skipped += 1;
                continue;
            }

            let record = self.send(target, alert, escalation_level, now).await;
            summary.attempted += 1;
            if record.success {
                summary.delivered += 1;
            }
            alert.record_notification(record);
        }

        summary
    }

    async fn send(
        &self,
        target: &NotificationTarget,
        alert: &AlertEvent,
        escalation_level: u32,
        now: DateTime<Utc>,
    ) -> NotificationRecord {
        let channel_type = target.channel.channel_type();
        let message = OutboundMessage {
            channel: target.channel.clone(),
            alert_id: alert.id,
            rule_id: alert.rule_id.clone(),
            escalation_level,
            payload: format_payload(&target.channel, alert, escalation_level),
        };

        let result = match tokio::time::timeout(self.send_timeout, self.transport.send(&message))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(NotificationError::Timeout(self.send_timeout)),
        };

        let status = if result.is_ok() { "success" } else { "failure" };
        metrics::counter!(
            "alertwatch_notifications_total",
            "channel" => channel_type.as_str(),
            "status" => status
        )
        .increment(1);

        match &result {
            Ok(()) => info!(
                alert_id = %alert.id,
                rule_id = %alert.rule_id,
                channel = %channel_type,
                escalation_level,
                "Notification sent"
            ),
            Err(e) => warn!(
                alert_id = %alert.id,
                rule_id = %alert.rule_id,
                channel = %channel_type,
                error = %e,
                "Notification failed"
            ),
        }

        NotificationRecord {
            target_type: channel_type,
            sent_at: now,
            success: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
            escalation_level,
        }
    }
}

/// Build the channel-specific body for an alert
pub fn format_payload(
    channel: &NotificationChannel,
    alert: &AlertEvent,
    escalation_level: u32,
) -> Payload {
    match channel {
        NotificationChannel::Email { .. } => Payload::Text(TextPayload {
            subject: subject_line(alert, escalation_level),
            body: text_body(alert),
        }),
        NotificationChannel::Sms { .. } => Payload::Text(TextPayload {
            subject: String::new(),
            body: sms_body(alert, escalation_level),
        }),
        NotificationChannel::Slack { channel, .. } => {
            Payload::Chat(slack_payload(channel.as_deref(), alert, escalation_level))
        }
        NotificationChannel::Webhook { .. } => Payload::Json(webhook_envelope(alert, escalation_level)),
        NotificationChannel::PagerDuty { routing_key } => {
            Payload::Pager(pagerduty_payload(routing_key, alert, escalation_level))
        }
    }
}

fn escalation_prefix(escalation_level: u32) -> String {
    if escalation_level == 0 {
        String::new()
    } else {
        format!("[Escalation {escalation_level}] ")
    }
}

fn subject_line(alert: &AlertEvent, escalation_level: u32) -> String {
    format!(
        "{}[{}] {}",
        escalation_prefix(escalation_level),
        alert.severity.as_str().to_uppercase(),
        alert.title
    )
}

fn format_value(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:.2}"))
}

fn text_body(alert: &AlertEvent) -> String {
    let mut body = format!(
        "{}\n\nRule: {}\nSeverity: {}\nValue: {}\nThreshold: {}\nTriggered: {}\n",
        alert.description,
        alert.rule_name,
        alert.severity,
        format_value(alert.metric_value),
        format_value(alert.threshold),
        alert.triggered_at.to_rfc3339(),
    );

    if !alert.tags.is_empty() {
        let mut tags: Vec<String> = alert.tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
        tags.sort();
        body.push_str(&format!("Tags: {}\n", tags.join(", ")));
    }
    body.push_str(&format!("Alert ID: {}\n", alert.id));
    body
}

fn sms_body(alert: &AlertEvent, escalation_level: u32) -> String {
    let mut body = format!(
        "{}{}: {} (value {})",
        escalation_prefix(escalation_level),
        alert.severity.as_str().to_uppercase(),
        alert.title,
        format_value(alert.metric_value)
    );
    // single SMS segment
    if body.chars().count() > 160 {
        body = body.chars().take(157).collect();
        body.push_str("...");
    }
    body
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "#dc3545",
        Severity::Error => "#fd7e14",
        Severity::Warning => "#ffc107",
        Severity::Info => "#17a2b8",
    }
}

fn severity_emoji(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🚨",
        Severity::Error => "❗",
        Severity::Warning => "⚠️",
        Severity::Info => "ℹ️",
    }
}

fn slack_payload(channel: Option<&str>, alert: &AlertEvent, escalation_level: u32) -> SlackPayload {
    let mut fields = vec![
        SlackField {
            title: "Severity".to_string(),
            value: alert.severity.to_string(),
            short: true,
        },
        SlackField {
            title: "Metric Value".to_string(),
            value: format_value(alert.metric_value),
            short: true,
        },
        SlackField {
            title: "Threshold".to_string(),
            value: format_value(alert.threshold),
            short: true,
        },
        SlackField {
            title: "Status".to_string(),
            value: status_name(alert.status).to_string(),
            short: true,
        },
    ];
    if escalation_level > 0 {
        fields.push(SlackField {
            title: "Escalation Level".to_string(),
            value: escalation_level.to_string(),
            short: true,
        });
    }

    SlackPayload {
        channel: channel.map(String::from),
        username: Some("AlertWatch".to_string()),
        icon_emoji: Some(":rotating_light:".to_string()),
        attachments: vec![SlackAttachment {
            color: severity_color(alert.severity).to_string(),
            title: format!(
                "{} {}{}",
                severity_emoji(alert.severity),
                escalation_prefix(escalation_level),
                alert.title
            ),
            text: alert.description.clone(),
            fields,
            footer: Some(format!("AlertWatch | rule {}", alert.rule_id)),
            ts: Some(alert.triggered_at.timestamp()),
        }],
    }
}

fn status_name(status: AlertStatus) -> &'static str {
    match status {
        AlertStatus::Active => "active",
        AlertStatus::Acknowledged => "acknowledged",
        AlertStatus::Suppressed => "suppressed",
        AlertStatus::Resolved => "resolved",
    }
}

fn webhook_envelope(alert: &AlertEvent, escalation_level: u32) -> serde_json::Value {
    serde_json::json!({
        "event": if escalation_level == 0 { "alert.triggered" } else { "alert.escalated" },
        "escalation_level": escalation_level,
        "alert": alert,
    })
}

fn pagerduty_payload(routing_key: &str, alert: &AlertEvent, escalation_level: u32) -> PagerDutyPayload {
    let severity = match alert.severity {
        Severity::Critical => "critical",
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Info => "info",
    };

    PagerDutyPayload {
        routing_key: routing_key.to_string(),
        event_action: "trigger".to_string(),
        dedup_key: Some(format!("{}:{}", alert.rule_id, alert.id)),
        payload: PagerDutyEventPayload {
            summary: format!(
                "{}[{}] {}: {}",
                escalation_prefix(escalation_level),
                severity.to_uppercase(),
                alert.rule_name,
                alert.description
            ),
            source: "AlertWatch".to_string(),
            severity: severity.to_string(),
            timestamp: Some(alert.triggered_at.to_rfc3339()),
            custom_details: Some(serde_json::json!({
                "rule_id": alert.rule_id,
                "metric_value": alert.metric_value,
                "threshold": alert.threshold,
                "tags": alert.tags,
                "context": alert.context,
                "escalation_level": escalation_level,
            })),
        },
    }
}

/// Email/SMS body
#[derive(Debug, Clone, Serialize)]
pub struct TextPayload {
    /// Subject line; empty for SMS
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subject: String,
    /// Message text
    pub body: String,
}

/// Slack incoming webhook body
#[derive(Debug, Clone, Serialize)]
pub struct SlackPayload {
    /// Channel override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Bot display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Bot icon
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_emoji: Option<String>,
    /// Attachment blocks
    pub attachments: Vec<SlackAttachment>,
}

/// Slack attachment block
#[derive(Debug, Clone, Serialize)]
pub struct SlackAttachment {
    /// Severity colour
    pub color: String,
    /// Bold heading
    pub title: String,
    /// Body text
    pub text: String,
    /// Key/value rows
    pub fields: Vec<SlackField>,
    /// Footer text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    /// Unix timestamp shown in the footer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
}

/// Slack attachment field
#[derive(Debug, Clone, Serialize)]
pub struct SlackField {
    /// Label
    pub title: String,
    /// Value
    pub value: String,
    /// Render side by side
    pub short: bool,
}

/// PagerDuty Events v2 request
#[derive(Debug, Clone, Serialize)]
pub struct PagerDutyPayload {
    /// Integration key
    pub routing_key: String,
    /// `trigger`, `acknowledge` or `resolve`
    pub event_action: String,
    /// Groups events for one alert
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
    /// Event details
    pub payload: PagerDutyEventPayload,
}

/// PagerDuty event body
#[derive(Debug, Clone, Serialize)]
pub struct PagerDutyEventPayload {
    /// One-line summary
    pub summary: String,
    /// Emitting system
    pub source: String,
    /// PagerDuty severity name
    pub severity: String,
    /// RFC 3339 trigger time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Free-form context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_details: Option<serde_json::Value>,
}
