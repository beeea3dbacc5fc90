//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use alertwatch::alerting::{
    AlertEngine, ConditionEvaluator, NotificationError, NotificationRouter,
    NotificationTransport, OutboundMessage,
};
use alertwatch::metric_store::MetricStore;
use alertwatch::models::{
    Aggregation, AlertRule, ChannelType, Condition, EscalationPolicy, EscalationStep,
    NotificationChannel, NotificationTarget, Operator, ThresholdCondition,
};
use alertwatch::{Error, Result};

/// Metric store whose answers are set directly by the test
#[derive(Default)]
pub struct SettableStore {
    values: Mutex<HashMap<String, f64>>,
    last_seen: Mutex<HashMap<String, DateTime<Utc>>>,
    history: Mutex<HashMap<String, Vec<f64>>>,
    failing: Mutex<HashSet<String>>,
}

impl SettableStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, metric: &str, value: f64) {
        self.values.lock().insert(metric.to_string(), value);
    }

    pub fn clear(&self, metric: &str) {
        self.values.lock().remove(metric);
    }

    pub fn seen_at(&self, metric: &str, at: DateTime<Utc>) {
        self.last_seen.lock().insert(metric.to_string(), at);
    }

    pub fn set_history(&self, metric: &str, samples: Vec<f64>) {
        self.history.lock().insert(metric.to_string(), samples);
    }

    pub fn fail(&self, metric: &str, failing: bool) {
        let mut set = self.failing.lock();
        if failing {
            set.insert(metric.to_string());
        } else {
            set.remove(metric);
        }
    }

    fn check(&self, metric: &str) -> Result<()> {
        if self.failing.lock().contains(metric) {
            return Err(Error::metric_store(format!("{metric}: backend unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl MetricStore for SettableStore {
    async fn query(&self, metric: &str, _: u32, _: Aggregation) -> Result<Option<f64>> {
        self.check(metric)?;
        Ok(self.values.lock().get(metric).copied())
    }

    async fn last_observed_at(&self, metric: &str) -> Result<Option<DateTime<Utc>>> {
        self.check(metric)?;
        Ok(self.last_seen.lock().get(metric).copied())
    }

    async fn history(&self, metric: &str, _: u32) -> Result<Vec<f64>> {
        self.check(metric)?;
        Ok(self.history.lock().get(metric).cloned().unwrap_or_default())
    }
}

/// Records delivered messages; channel types in `failing` always fail
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<OutboundMessage>>,
    failing: Mutex<HashSet<ChannelType>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, channel: ChannelType) {
        self.failing.lock().insert(channel);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn levels(&self) -> Vec<u32> {
        self.sent.lock().iter().map(|m| m.escalation_level).collect()
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send(&self, message: &OutboundMessage) -> std::result::Result<(), NotificationError> {
        if self.failing.lock().contains(&message.channel.channel_type()) {
            return Err(NotificationError::HttpError("503 Service Unavailable".to_string()));
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

pub fn engine(store: Arc<SettableStore>, transport: Arc<RecordingTransport>) -> AlertEngine {
    AlertEngine::new(
        ConditionEvaluator::new(store, Duration::from_secs(1)),
        NotificationRouter::new(transport, Duration::from_secs(1)),
        1_000,
    )
}

pub fn threshold(metric: &str, operator: Operator, threshold: f64) -> Condition {
    Condition::Threshold(ThresholdCondition {
        metric: metric.to_string(),
        operator,
        threshold,
        window_minutes: 5,
        aggregation: Aggregation::Avg,
    })
}

pub fn threshold_rule(id: &str, metric: &str, operator: Operator, value: f64) -> AlertRule {
    AlertRule::new(id, format!("{id} rule"), threshold(metric, operator, value))
}

pub fn webhook(url: &str) -> NotificationTarget {
    NotificationTarget::new(NotificationChannel::Webhook {
        url: url.to_string(),
        headers: HashMap::new(),
    })
}

pub fn slack() -> NotificationTarget {
    NotificationTarget::new(NotificationChannel::Slack {
        webhook_url: "https://hooks.slack.test/services/x".to_string(),
        channel: None,
    })
}

pub fn ladder(delays: &[u32], stop_on_acknowledge: bool) -> EscalationPolicy {
    EscalationPolicy {
        steps: delays
            .iter()
            .enumerate()
            .map(|(i, delay)| EscalationStep {
                delay_minutes: *delay,
                notifications: vec![webhook(&format!("https://oncall.test/level/{}", i + 1))],
            })
            .collect(),
        stop_on_acknowledge,
    }
}
