//! Condition evaluation against the metric store

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use crate::error::{Error, Result};
use crate::metric_store::MetricStore;
use crate::models::{
    AbsenceCondition, AnomalyCondition, Combinator, CompositeCondition, Condition, RateCondition,
    ThresholdCondition,
};

/// Outcome of evaluating a condition once
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Whether the condition currently holds
    pub triggered: bool,
    /// The observed value compared against the threshold
    pub value: Option<f64>,
    /// The threshold it was compared against
    pub threshold: Option<f64>,
    /// Condition-specific details for the alert context
    pub detail: serde_json::Value,
}

impl Evaluation {
    fn not_met(detail: serde_json::Value) -> Self {
        Self {
            triggered: false,
            value: None,
            threshold: None,
            detail,
        }
    }
}

/// Stateless evaluator for all condition kinds
#[derive(Clone)]
pub struct ConditionEvaluator {
    store: Arc<dyn MetricStore>,
    query_timeout: Duration,
}

impl ConditionEvaluator {
    /// Create an evaluator bounded by `query_timeout` per metric store call
    pub fn new(store: Arc<dyn MetricStore>, query_timeout: Duration) -> Self {
        Self {
            store,
            query_timeout,
        }
    }

    /// Evaluate a condition at `now`
    pub async fn evaluate(&self, condition: &Condition, now: DateTime<Utc>) -> Result<Evaluation> {
        match condition {
            Condition::Threshold(c) => self.threshold(c).await,
            Condition::Rate(c) => self.rate(c).await,
            Condition::Absence(c) => self.absence(c, now).await,
            Condition::Anomaly(c) => self.anomaly(c).await,
            Condition::Composite(c) => self.composite(c).await,
        }
    }

    async fn threshold(&self, c: &ThresholdCondition) -> Result<Evaluation> {
        let value = self
            .bounded(self.store.query(&c.metric, c.window_minutes, c.aggregation))
            .await?;

        let Some(value) = present(value) else {
            debug!(metric = %c.metric, "No data for metric");
            return Ok(Evaluation::not_met(json!({ "reason": "no_data" })));
        };

        Ok(Evaluation {
            triggered: c.operator.compare(value, c.threshold),
            value: Some(value),
            threshold: Some(c.threshold),
            detail: serde_json::Value::Null,
        })
    }

    async fn rate(&self, c: &RateCondition) -> Result<Evaluation> {
        let current = self
            .bounded(self.store.query(&c.metric, c.window_minutes, c.aggregation))
            .await?;
        let previous = self
            .bounded(
                self.store
                    .query(&c.metric, c.rate_window_minutes, c.aggregation),
            )
            .await?;

        let (Some(current), Some(previous)) = (present(current), present(previous)) else {
            return Ok(Evaluation::not_met(json!({ "reason": "no_data" })));
        };
        if previous == 0.0 {
            return Ok(Evaluation::not_met(json!({ "reason": "zero_baseline" })));
        }

        let rate = (current - previous) / previous * 100.0;

        Ok(Evaluation {
            triggered: rate.abs() > c.rate_threshold_percent,
            value: Some(rate),
            threshold: Some(c.rate_threshold_percent),
            detail: json!({ "current": current, "previous": previous }),
        })
    }

    async fn absence(&self, c: &AbsenceCondition, now: DateTime<Utc>) -> Result<Evaluation> {
        let last_seen = self.bounded(self.store.last_observed_at(&c.metric)).await?;
        let window = chrono::Duration::minutes(i64::from(c.window_minutes));

        // A metric that never reported is absent
        let Some(last_seen) = last_seen else {
            return Ok(Evaluation {
                triggered: true,
                value: None,
                threshold: Some(f64::from(c.window_minutes)),
                detail: json!({ "last_observed_at": null }),
            });
        };

        let silence = now - last_seen;
        #[allow(clippy::cast_precision_loss)]
        let silent_minutes = silence.num_seconds() as f64 / 60.0;

        Ok(Evaluation {
            triggered: silence > window,
            value: Some(silent_minutes),
            threshold: Some(f64::from(c.window_minutes)),
            detail: json!({ "last_observed_at": last_seen }),
        })
    }

    async fn anomaly(&self, c: &AnomalyCondition) -> Result<Evaluation> {
        let current = self
            .bounded(self.store.query(&c.metric, 1, c.aggregation))
            .await?;
        let samples = self
            .bounded(self.store.history(&c.metric, c.baseline_days))
            .await?;

        let samples: Vec<f64> = samples.into_iter().filter(|v| !v.is_nan()).collect();
        let Some(current) = present(current) else {
            return Ok(Evaluation::not_met(json!({ "reason": "no_data" })));
        };
        let Some((mean, stddev)) = mean_and_stddev(&samples) else {
            return Ok(Evaluation::not_met(json!({ "reason": "no_baseline" })));
        };

        let limit = c.sensitivity.deviations() * stddev;
        let deviation = (current - mean).abs();

        Ok(Evaluation {
            triggered: deviation > limit,
            value: Some(current),
            threshold: Some(limit),
            detail: json!({
                "mean": mean,
                "stddev": stddev,
                "deviation": deviation,
                "samples": samples.len(),
            }),
        })
    }

    async fn composite(&self, c: &CompositeCondition) -> Result<Evaluation> {
        if c.conditions.is_empty() {
            return Ok(Evaluation::not_met(json!({ "reason": "empty" })));
        }

        let mut results = Vec::with_capacity(c.conditions.len());
        for sub in &c.conditions {
            results.push(self.threshold(sub).await?);
        }

        let triggered = match c.combinator {
            Combinator::And => results.iter().all(|r| r.triggered),
            Combinator::Or => results.iter().any(|r| r.triggered),
        };

        let parts: Vec<serde_json::Value> = c
            .conditions
            .iter()
            .zip(&results)
            .map(|(sub, result)| {
                json!({
                    "metric": sub.metric,
                    "operator": sub.operator.symbol(),
                    "threshold": sub.threshold,
                    "value": result.value,
                    "triggered": result.triggered,
                })
            })
            .collect();

        Ok(Evaluation {
            triggered,
            value: None,
            threshold: None,
            detail: json!({ "conditions": parts }),
        })
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.query_timeout, call)
            .await
            .map_err(|_| Error::Timeout(self.query_timeout))?
    }
}

/// NaN counts as missing data
fn present(value: Option<f64>) -> Option<f64> {
    value.filter(|v| !v.is_nan())
}

/// Population mean and standard deviation, `None` for an empty sample set
#[allow(clippy::cast_precision_loss)]
pub fn mean_and_stddev(samples: &[f64]) -> Option<(f64, f64)> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}
