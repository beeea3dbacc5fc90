//! Time-series metric store interface and an in-memory implementation

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::Aggregation;

/// Read-only time-series queries used by the condition evaluator
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Aggregated value of `metric` over the trailing window, `None` when there is no data
    async fn query(
        &self,
        metric: &str,
        window_minutes: u32,
        aggregation: Aggregation,
    ) -> Result<Option<f64>>;

    /// Timestamp of the most recent observation
    async fn last_observed_at(&self, metric: &str) -> Result<Option<DateTime<Utc>>>;

    /// Raw sample values from the trailing `days` days
    async fn history(&self, metric: &str, days: u32) -> Result<Vec<f64>>;
}

/// A single observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Observation time
    pub timestamp: DateTime<Utc>,
    /// Observed value
    pub value: f64,
}

/// Metric store holding samples in memory for a bounded retention period
pub struct InMemoryMetricStore {
    series: RwLock<HashMap<String, VecDeque<Sample>>>,
    retention: Duration,
}

impl InMemoryMetricStore {
    /// Create a store keeping samples for `retention_days`
    pub fn new(retention_days: u32) -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            retention: Duration::days(i64::from(retention_days)),
        }
    }

    /// Record an observation
    pub fn record(&self, metric: &str, value: f64, timestamp: DateTime<Utc>) -> Result<()> {
        if metric.is_empty() {
            return Err(Error::validation("metric name must not be empty"));
        }
        if !value.is_finite() {
            return Err(Error::validation(format!(
                "metric '{metric}' value must be finite"
            )));
        }

        let mut series = self.series.write();
        let samples = series.entry(metric.to_string()).or_default();

        // Samples normally arrive in order; late ones are slotted in place
        let position = samples.partition_point(|s| s.timestamp <= timestamp);
        samples.insert(position, Sample { timestamp, value });

        let cutoff = Utc::now() - self.retention;
        while samples.front().is_some_and(|s| s.timestamp < cutoff) {
            samples.pop_front();
        }

        Ok(())
    }

    /// Names of all metrics with at least one sample
    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.series.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn values_since(&self, metric: &str, since: DateTime<Utc>) -> Option<Vec<f64>> {
        let series = self.series.read();
        let samples = series.get(metric)?;
        Some(
            samples
                .iter()
                .filter(|s| s.timestamp >= since)
                .map(|s| s.value)
                .collect(),
        )
    }
}

impl Default for InMemoryMetricStore {
    fn default() -> Self {
        Self::new(30)
    }
}

#[async_trait]
impl MetricStore for InMemoryMetricStore {
    async fn query(
        &self,
        metric: &str,
        window_minutes: u32,
        aggregation: Aggregation,
    ) -> Result<Option<f64>> {
        let since = Utc::now() - Duration::minutes(i64::from(window_minutes));
        let Some(values) = self.values_since(metric, since) else {
            debug!(metric, "Unknown metric");
            return Ok(None);
        };
        Ok(aggregate(&values, aggregation))
    }

    async fn last_observed_at(&self, metric: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .series
            .read()
            .get(metric)
            .and_then(|samples| samples.back())
            .map(|s| s.timestamp))
    }

    async fn history(&self, metric: &str, days: u32) -> Result<Vec<f64>> {
        let since = Utc::now() - Duration::days(i64::from(days));
        Ok(self.values_since(metric, since).unwrap_or_default())
    }
}

/// Aggregate sample values. Only `count` yields a value for an empty window.
#[allow(clippy::cast_precision_loss)]
pub fn aggregate(values: &[f64], aggregation: Aggregation) -> Option<f64> {
    if values.is_empty() {
        return (aggregation == Aggregation::Count).then_some(0.0);
    }

    let value = match aggregation {
        Aggregation::Avg => values.iter().sum::<f64>() / values.len() as f64,
        Aggregation::Sum => values.iter().sum(),
        Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Aggregation::P95 => percentile(values, 0.95),
        Aggregation::P99 => percentile(values, 0.99),
        Aggregation::Count => values.len() as f64,
    };
    Some(value)
}

/// Nearest-rank percentile
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn percentile(values: &[f64], p: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}
