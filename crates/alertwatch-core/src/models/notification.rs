//! Notification target models and filters

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::rule::Severity;
use crate::error::{Error, Result};

/// Delivery channel kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// Email
    Email,
    /// Slack
    Slack,
    /// Generic webhook
    Webhook,
    /// SMS
    Sms,
    /// PagerDuty
    #[serde(rename = "pagerduty")]
    PagerDuty,
}

impl ChannelType {
    /// Lowercase name used in records and metric labels
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Slack => "slack",
            Self::Webhook => "webhook",
            Self::Sms => "sms",
            Self::PagerDuty => "pagerduty",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationChannel {
    /// Email, delivered through an HTTP relay
    Email {
        /// Recipient addresses
        to: Vec<String>,
        /// Relay endpoint that performs delivery
        #[serde(default)]
        relay_url: Option<String>,
    },
    /// Slack incoming webhook
    Slack {
        /// Incoming webhook URL
        webhook_url: String,
        /// Channel override
        #[serde(default)]
        channel: Option<String>,
    },
    /// Generic webhook
    Webhook {
        /// Endpoint receiving the JSON envelope
        url: String,
        /// Extra request headers
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// SMS, delivered through an HTTP relay
    Sms {
        /// Recipient phone numbers
        to: Vec<String>,
        /// Relay endpoint that performs delivery
        #[serde(default)]
        relay_url: Option<String>,
    },
    /// PagerDuty Events v2
    #[serde(rename = "pagerduty", alias = "pager")]
    PagerDuty {
        /// Events v2 integration key
        routing_key: String,
    },
}

impl NotificationChannel {
    /// The kind of this channel
    pub fn channel_type(&self) -> ChannelType {
        match self {
            Self::Email { .. } => ChannelType::Email,
            Self::Slack { .. } => ChannelType::Slack,
            Self::Webhook { .. } => ChannelType::Webhook,
            Self::Sms { .. } => ChannelType::Sms,
            Self::PagerDuty { .. } => ChannelType::PagerDuty,
        }
    }
}

/// A configured notification destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationTarget {
    /// Where the notification goes
    #[serde(flatten)]
    pub channel: NotificationChannel,

    /// Disabled targets are skipped
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Restrictions on when this target fires; none means always
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<NotificationFilters>,
}

fn default_enabled() -> bool {
    true
}

impl NotificationTarget {
    /// An enabled target without filters
    pub fn new(channel: NotificationChannel) -> Self {
        Self {
            channel,
            enabled: true,
            filters: None,
        }
    }

    /// Attach filters to the target
    #[must_use]
    pub fn with_filters(mut self, filters: NotificationFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Check the channel configuration is usable
    pub fn validate(&self) -> Result<()> {
        let missing = match &self.channel {
            NotificationChannel::Email { to, .. } | NotificationChannel::Sms { to, .. } => {
                to.is_empty().then_some("recipients")
            }
            NotificationChannel::Slack { webhook_url, .. } => {
                webhook_url.is_empty().then_some("webhook_url")
            }
            NotificationChannel::Webhook { url, .. } => url.is_empty().then_some("url"),
            NotificationChannel::PagerDuty { routing_key } => {
                routing_key.is_empty().then_some("routing_key")
            }
        };

        match missing {
            Some(field) => Err(Error::validation(format!(
                "{} target is missing {field}",
                self.channel.channel_type()
            ))),
            None => Ok(()),
        }
    }

    /// Whether an alert with this severity and these tags may be sent now
    pub fn accepts(
        &self,
        severity: Severity,
        tags: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> bool {
        self.filters
            .as_ref()
            .map_or(true, |f| f.matches(severity, tags, now))
    }
}

/// Per-target notification filters
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NotificationFilters {
    /// Allowed severities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severities: Option<Vec<Severity>>,

    /// Tags that must be present with exactly these values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, String>>,

    /// Delivery windows; the current time must fall inside at least one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_windows: Option<Vec<TimeWindow>>,
}

impl NotificationFilters {
    /// Evaluate every configured filter
    pub fn matches(
        &self,
        severity: Severity,
        tags: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> bool {
        if let Some(allowed) = &self.severities {
            if !allowed.contains(&severity) {
                return false;
            }
        }

        if let Some(required) = &self.tags {
            let all_match = required
                .iter()
                .all(|(key, value)| tags.get(key).is_some_and(|v| v == value));
            if !all_match {
                return false;
            }
        }

        if let Some(windows) = &self.time_windows {
            if !windows.iter().any(|w| w.contains(now)) {
                return false;
            }
        }

        true
    }
}

fn default_timezone() -> Tz {
    chrono_tz::UTC
}

/// Time-of-day window in a given timezone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Local start time, inclusive (`HH:MM:SS`)
    pub start: NaiveTime,
    /// Local end time, exclusive; earlier than `start` wraps past midnight
    pub end: NaiveTime,
    /// IANA timezone name
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
    /// Days the window applies on (local calendar); empty means every day
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days: Vec<Weekday>,
}

impl TimeWindow {
    /// Check whether the UTC instant falls inside this window
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone);
        let time = local.time();

        // A window crossing midnight belongs to the day it started on
        let crosses_midnight = self.end < self.start;
        let day = if crosses_midnight && time < self.end {
            local.weekday().pred()
        } else {
            local.weekday()
        };
        if !self.days.is_empty() && !self.days.contains(&day) {
            return false;
        }

        if self.start == self.end {
            true
        } else if crosses_midnight {
            time >= self.start || time < self.end
        } else {
            time >= self.start && time < self.end
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn hms(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn window(start: NaiveTime, end: NaiveTime, timezone: Tz) -> TimeWindow {
        TimeWindow {
            start,
            end,
            timezone,
            days: vec![],
        }
    }

    #[test]
    fn test_target_decodes_flattened_channel() {
        let json = r#"{
            "type": "slack",
            "webhook_url": "https://hooks.slack.test/abc",
            "filters": {"severities": ["critical", "error"]}
        }"#;
        let target: NotificationTarget = serde_json::from_str(json).unwrap();
        assert!(target.enabled);
        assert_eq!(target.channel.channel_type(), ChannelType::Slack);
        assert_eq!(
            target.filters.unwrap().severities.unwrap(),
            vec![Severity::Critical, Severity::Error]
        );
    }

    #[test]
    fn test_pagerduty_type_name() {
        let target: NotificationTarget =
            serde_json::from_str(r#"{"type": "pagerduty", "routing_key": "k"}"#).unwrap();
        assert_eq!(target.channel.channel_type(), ChannelType::PagerDuty);
    }

    #[test]
    fn test_validate_requires_destination() {
        let target = NotificationTarget::new(NotificationChannel::Email {
            to: vec![],
            relay_url: None,
        });
        assert!(target.validate().is_err());
    }

    #[test]
    fn test_no_filters_always_accepts() {
        let target = NotificationTarget::new(NotificationChannel::PagerDuty {
            routing_key: "key".to_string(),
        });
        assert!(target.accepts(Severity::Info, &HashMap::new(), Utc::now()));
    }

    #[test]
    fn test_severity_and_tag_filters() {
        let filters = NotificationFilters {
            severities: Some(vec![Severity::Critical]),
            tags: Some(HashMap::from([("team".to_string(), "growth".to_string())])),
            time_windows: None,
        };
        let tags = HashMap::from([
            ("team".to_string(), "growth".to_string()),
            ("env".to_string(), "prod".to_string()),
        ]);
        let now = Utc::now();

        assert!(filters.matches(Severity::Critical, &tags, now));
        assert!(!filters.matches(Severity::Warning, &tags, now));
        assert!(!filters.matches(Severity::Critical, &HashMap::new(), now));

        let other_team = HashMap::from([("team".to_string(), "billing".to_string())]);
        assert!(!filters.matches(Severity::Critical, &other_team, now));
    }

    #[rstest]
    #[case(9, 0, true)]
    #[case(16, 59, true)]
    #[case(17, 0, false)]
    #[case(8, 59, false)]
    fn test_business_hours_window(#[case] hour: u32, #[case] minute: u32, #[case] inside: bool) {
        let w = window(hms(9, 0), hms(17, 0), chrono_tz::UTC);
        let now = Utc.with_ymd_and_hms(2024, 3, 5, hour, minute, 0).unwrap();
        assert_eq!(w.contains(now), inside);
    }

    #[test]
    fn test_window_uses_local_timezone() {
        // 14:00 UTC is 09:00 in New York during EST
        let w = window(hms(9, 0), hms(10, 0), chrono_tz::America::New_York);
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap();
        assert!(w.contains(now));
        let later = Utc.with_ymd_and_hms(2024, 1, 15, 16, 0, 0).unwrap();
        assert!(!w.contains(later));
    }

    #[test]
    fn test_window_crossing_midnight() {
        let mut w = window(hms(22, 0), hms(6, 0), chrono_tz::UTC);
        // 2024-03-08 is a Friday
        let friday_late = Utc.with_ymd_and_hms(2024, 3, 8, 23, 0, 0).unwrap();
        let saturday_early = Utc.with_ymd_and_hms(2024, 3, 9, 2, 0, 0).unwrap();
        let saturday_noon = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        assert!(w.contains(friday_late));
        assert!(w.contains(saturday_early));
        assert!(!w.contains(saturday_noon));

        w.days = vec![Weekday::Fri];
        assert!(w.contains(saturday_early));
        assert!(!w.contains(Utc.with_ymd_and_hms(2024, 3, 9, 23, 0, 0).unwrap()));
    }
}
