//! Alert rule evaluation engine

use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AlertEvent, AlertRule, AlertRuleUpdate, AlertStatus, Condition, NotificationTarget,
};

use super::condition::{ConditionEvaluator, Evaluation};
use super::notifier::{DispatchSummary, NotificationRouter};
use super::registry::RuleRegistry;
use super::store::{
    AlertStore, REASON_AUTO_RESOLVED, REASON_MANUAL, REASON_RULE_REMOVED,
    REASON_SUPPRESSION_EXPIRED, REASON_TIMEOUT,
};

/// What a single tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Enabled rules evaluated
    pub evaluated: usize,
    /// Rules skipped because evaluation failed
    pub errors: usize,
    /// Alerts opened
    pub opened: usize,
    /// Alerts resolved because their condition cleared
    pub auto_resolved: usize,
    /// Suppressed alerts resolved at the end of their window
    pub suppressions_expired: usize,
    /// Escalation steps fired
    pub escalated: usize,
    /// Alerts force-resolved by their rule's timeout
    pub timed_out: usize,
    /// Notification sends attempted
    pub notifications_attempted: usize,
    /// Notification sends that failed
    pub notifications_failed: usize,
}

impl TickReport {
    fn add_dispatch(&mut self, summary: DispatchSummary) {
        self.notifications_attempted += summary.attempted;
        self.notifications_failed += summary.attempted - summary.delivered;
    }
}

/// Owns rules and alerts and runs the per-tick passes.
///
/// The engine is single-owner state; concurrent access goes through
/// [`EngineHandle`](super::EngineHandle).
pub struct AlertEngine {
    registry: RuleRegistry,
    store: AlertStore,
    evaluator: ConditionEvaluator,
    router: NotificationRouter,
}

impl AlertEngine {
    /// Create an engine with an empty rule set
    pub fn new(
        evaluator: ConditionEvaluator,
        router: NotificationRouter,
        history_capacity: usize,
    ) -> Self {
        Self {
            registry: RuleRegistry::new(),
            store: AlertStore::new(history_capacity),
            evaluator,
            router,
        }
    }

    // ---- rules ----

    /// Add or replace a rule
    pub fn add_rule(&mut self, rule: AlertRule) -> Result<()> {
        self.registry.add(rule)
    }

    /// Merge a partial update into a rule
    pub fn update_rule(&mut self, id: &str, update: AlertRuleUpdate) -> Result<bool> {
        self.registry.update(id, update)
    }

    /// Remove a rule, resolving its open alert
    pub fn remove_rule(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        if self.registry.remove(id).is_none() {
            return false;
        }
        if let Some(alert_id) = self.store.find_active_for_rule(id).map(|a| a.id) {
            self.resolve_with(alert_id, REASON_RULE_REMOVED, now);
        }
        true
    }

    /// Enable a rule
    pub fn enable_rule(&mut self, id: &str) -> bool {
        self.registry.enable(id)
    }

    /// Disable a rule; its open alert stays open
    pub fn disable_rule(&mut self, id: &str) -> bool {
        self.registry.disable(id)
    }

    /// Look up a rule
    pub fn rule(&self, id: &str) -> Option<AlertRule> {
        self.registry.get(id).cloned()
    }

    /// All rules, oldest first
    pub fn rules(&self) -> Vec<AlertRule> {
        self.registry.list()
    }

    // ---- alerts ----

    /// Acknowledge an active alert
    pub fn acknowledge(&mut self, id: Uuid, by: &str, now: DateTime<Utc>) -> bool {
        let acknowledged = self.store.acknowledge(id, by, now);
        if acknowledged {
            let stop = self
                .store
                .get(id)
                .and_then(|a| self.registry.get(&a.rule_id))
                .and_then(|r| r.escalation.as_ref())
                .is_some_and(|p| p.stop_on_acknowledge);
            if stop {
                if let Some(alert) = self.store.get_mut(id) {
                    alert.next_escalation_at = None;
                }
            }
        }
        acknowledged
    }

    /// Resolve an open alert on operator request
    pub fn resolve(&mut self, id: Uuid, reason: Option<&str>, now: DateTime<Utc>) -> bool {
        self.resolve_with(id, reason.unwrap_or(REASON_MANUAL), now)
    }

    /// Suppress an open alert for `minutes`
    pub fn suppress(&mut self, id: Uuid, minutes: u32, now: DateTime<Utc>) -> bool {
        self.store.suppress(id, minutes, now)
    }

    /// Look up an open alert
    pub fn alert(&self, id: Uuid) -> Option<AlertEvent> {
        self.store.get(id).cloned()
    }

    /// Open alerts, most severe first
    pub fn active_alerts(&self) -> Vec<AlertEvent> {
        self.store.open_alerts()
    }

    /// Resolved alerts, newest first
    pub fn alert_history(&self, limit: usize) -> Vec<AlertEvent> {
        self.store.history(limit)
    }

    fn resolve_with(&mut self, id: Uuid, reason: &str, now: DateTime<Utc>) -> bool {
        let resolved = self.store.resolve(id, reason, now).is_some();
        if resolved {
            metrics::counter!("alertwatch_alerts_resolved_total", "reason" => reason.to_string())
                .increment(1);
        }
        resolved
    }

    // ---- tick ----

    /// Run every pass once at `now`.
    ///
    /// Suppression, escalation and timeout passes see the state left by the
    /// evaluation pass.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();

        self.evaluation_pass(now, &mut report).await;
        self.suppression_pass(now, &mut report);
        self.escalation_pass(now, &mut report).await;
        self.timeout_pass(now, &mut report);

        #[allow(clippy::cast_precision_loss)]
        let active = self.store.active_count() as f64;
        metrics::gauge!("alertwatch_active_alerts").set(active);
        metrics::histogram!("alertwatch_tick_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        debug!(
            evaluated = report.evaluated,
            opened = report.opened,
            auto_resolved = report.auto_resolved,
            escalated = report.escalated,
            timed_out = report.timed_out,
            errors = report.errors,
            "Tick complete"
        );
        report
    }

    async fn evaluation_pass(&mut self, now: DateTime<Utc>, report: &mut TickReport) {
        let mut rules: Vec<AlertRule> = self.registry.enabled().cloned().collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));

        for rule in rules {
            report.evaluated += 1;

            let evaluation = match self.evaluator.evaluate(&rule.condition, now).await {
                Ok(evaluation) => evaluation,
                Err(e) => {
                    error!(rule_id = %rule.id, error = %e, "Error evaluating rule");
                    metrics::counter!("alertwatch_evaluation_errors_total").increment(1);
                    report.errors += 1;
                    continue;
                }
            };

            debug!(
                rule_id = %rule.id,
                kind = rule.condition.kind(),
                value = ?evaluation.value,
                threshold = ?evaluation.threshold,
                triggered = evaluation.triggered,
                "Evaluated rule"
            );

            let open = self.store.find_active_for_rule(&rule.id).map(|a| a.id);
            match (evaluation.triggered, open) {
                (true, None) => {
                    if self.store.in_cooldown(&rule.id, rule.cooldown_minutes, now) {
                        debug!(rule_id = %rule.id, "Rule in cooldown");
                        continue;
                    }
                    self.open_alert(&rule, &evaluation, now, report).await;
                }
                (false, Some(alert_id)) if rule.auto_resolve => {
                    if self.resolve_with(alert_id, REASON_AUTO_RESOLVED, now) {
                        info!(rule_id = %rule.id, alert_id = %alert_id, "Condition cleared");
                        report.auto_resolved += 1;
                    }
                }
                _ => {}
            }
        }
    }

    async fn open_alert(
        &mut self,
        rule: &AlertRule,
        evaluation: &Evaluation,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        let mut alert = build_alert(rule, evaluation, now);

        info!(
            rule_id = %rule.id,
            alert_id = %alert.id,
            severity = %alert.severity,
            value = ?alert.metric_value,
            "Alert triggered"
        );
        metrics::counter!(
            "alertwatch_alerts_triggered_total",
            "severity" => alert.severity.as_str()
        )
        .increment(1);

        let summary = self
            .router
            .dispatch(&mut alert, &rule.notifications, 0, now)
            .await;
        report.add_dispatch(summary);

        alert.next_escalation_at = rule
            .escalation_step(0)
            .map(|step| now + Duration::minutes(i64::from(step.delay_minutes)));

        self.store.open(alert, now);
        report.opened += 1;
    }

    fn suppression_pass(&mut self, now: DateTime<Utc>, report: &mut TickReport) {
        for id in self.store.due_suppressions(now) {
            if self.resolve_with(id, REASON_SUPPRESSION_EXPIRED, now) {
                report.suppressions_expired += 1;
            }
        }
    }

    async fn escalation_pass(&mut self, now: DateTime<Utc>, report: &mut TickReport) {
        let mut due: Vec<(DateTime<Utc>, Uuid)> = self
            .store
            .open_alerts()
            .into_iter()
            .filter_map(|a| {
                a.next_escalation_at
                    .filter(|at| *at <= now)
                    .map(|at| (at, a.id))
            })
            .collect();
        due.sort();

        for (_, id) in due {
            let Some(alert) = self.store.get_mut(id) else {
                continue;
            };
            let Some(rule) = self.registry.get(&alert.rule_id) else {
                alert.next_escalation_at = None;
                continue;
            };
            let policy_stops = rule
                .escalation
                .as_ref()
                .is_some_and(|p| p.stop_on_acknowledge);

            match alert.status {
                AlertStatus::Active => {}
                AlertStatus::Acknowledged if !policy_stops => {}
                AlertStatus::Acknowledged => {
                    alert.next_escalation_at = None;
                    continue;
                }
                // suppressed alerts hold their schedule until the window ends
                AlertStatus::Suppressed | AlertStatus::Resolved => continue,
            }

            let Some(step) = rule.escalation_step(alert.escalation_level) else {
                alert.next_escalation_at = None;
                continue;
            };
            let targets: Vec<NotificationTarget> = step.notifications.clone();

            alert.escalation_level += 1;
            let level = alert.escalation_level;
            alert.next_escalation_at = rule
                .escalation_step(level)
                .map(|next| now + Duration::minutes(i64::from(next.delay_minutes)));

            warn!(
                rule_id = %alert.rule_id,
                alert_id = %id,
                level,
                "Alert escalated"
            );
            metrics::counter!("alertwatch_escalations_total").increment(1);

            let summary = self.router.dispatch(alert, &targets, level, now).await;
            report.add_dispatch(summary);
            report.escalated += 1;
        }
    }

    fn timeout_pass(&mut self, now: DateTime<Utc>, report: &mut TickReport) {
        let expired: Vec<Uuid> = self
            .store
            .open_alerts()
            .into_iter()
            .filter(|alert| {
                self.registry
                    .get(&alert.rule_id)
                    .and_then(|r| r.resolve_timeout_minutes)
                    .is_some_and(|minutes| {
                        now - alert.triggered_at > Duration::minutes(i64::from(minutes))
                    })
            })
            .map(|a| a.id)
            .collect();

        for id in expired {
            if self.resolve_with(id, REASON_TIMEOUT, now) {
                report.timed_out += 1;
            }
        }
    }
}

/// Snapshot the rule and evaluation into a new active alert
fn build_alert(rule: &AlertRule, evaluation: &Evaluation, now: DateTime<Utc>) -> AlertEvent {
    let context = json!({
        "condition_type": rule.condition.kind(),
        "metric": rule.condition.metric(),
        "condition": serde_json::to_value(&rule.condition).unwrap_or_default(),
        "detail": evaluation.detail,
    });

    AlertEvent {
        id: Uuid::new_v4(),
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        title: format!("{} ({})", rule.name, rule.severity.as_str().to_uppercase()),
        description: format_alert_message(rule, evaluation),
        severity: rule.severity,
        metric_value: evaluation.value,
        threshold: evaluation.threshold,
        tags: rule.tags.clone(),
        context,
        triggered_at: now,
        resolved_at: None,
        resolution_reason: None,
        last_notification_at: None,
        status: AlertStatus::Active,
        acknowledged_by: None,
        acknowledged_at: None,
        suppressed_until: None,
        notifications_sent: Vec::new(),
        escalation_level: 0,
        next_escalation_at: None,
    }
}

fn format_alert_message(rule: &AlertRule, evaluation: &Evaluation) -> String {
    let value = evaluation.value.unwrap_or_default();
    let threshold = evaluation.threshold.unwrap_or_default();

    match &rule.condition {
        Condition::Threshold(c) => format!(
            "{} {} threshold of {:.2} (current value: {:.2})",
            c.metric,
            c.operator.describe(),
            c.threshold,
            value
        ),
        Condition::Rate(c) => format!(
            "{} changed by {:.1}% over {} minutes, limit is {:.1}%",
            c.metric, value, c.rate_window_minutes, threshold
        ),
        Condition::Absence(c) => match evaluation.value {
            Some(silent) => format!(
                "{} has not reported for {:.1} minutes (window: {} minutes)",
                c.metric, silent, c.window_minutes
            ),
            None => format!("{} has never reported", c.metric),
        },
        Condition::Anomaly(c) => format!(
            "{} deviates from its {}-day baseline by more than {:.2} (current value: {:.2})",
            c.metric, c.baseline_days, threshold, value
        ),
        Condition::Composite(c) => {
            let parts: Vec<String> = c
                .conditions
                .iter()
                .map(|sub| format!("{} {} {}", sub.metric, sub.operator.symbol(), sub.threshold))
                .collect();
            let joiner = format!(" {} ", c.combinator.as_str());
            format!("Composite condition met: {}", parts.join(&joiner))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::notifier::{NotificationError, NotificationTransport, OutboundMessage};
    use crate::metric_store::MetricStore;
    use crate::models::{
        Aggregation, EscalationPolicy, EscalationStep, NotificationChannel, Operator, Severity,
        ThresholdCondition,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Default)]
    struct FixedStore {
        values: Mutex<HashMap<String, f64>>,
    }

    impl FixedStore {
        fn set(&self, metric: &str, value: f64) {
            self.values.lock().insert(metric.to_string(), value);
        }
    }

    #[async_trait]
    impl MetricStore for FixedStore {
        async fn query(&self, metric: &str, _: u32, _: Aggregation) -> Result<Option<f64>> {
            Ok(self.values.lock().get(metric).copied())
        }

        async fn last_observed_at(&self, _: &str) -> Result<Option<DateTime<Utc>>> {
            Ok(None)
        }

        async fn history(&self, _: &str, _: u32) -> Result<Vec<f64>> {
            Ok(vec![])
        }
    }

    struct NullTransport;

    #[async_trait]
    impl NotificationTransport for NullTransport {
        async fn send(&self, _: &OutboundMessage) -> std::result::Result<(), NotificationError> {
            Ok(())
        }
    }

    fn engine(store: Arc<FixedStore>) -> AlertEngine {
        let timeout = std::time::Duration::from_secs(1);
        AlertEngine::new(
            ConditionEvaluator::new(store, timeout),
            NotificationRouter::new(Arc::new(NullTransport), timeout),
            100,
        )
    }

    fn webhook() -> NotificationTarget {
        NotificationTarget::new(NotificationChannel::Webhook {
            url: "https://example.test/hook".to_string(),
            headers: HashMap::new(),
        })
    }

    fn errors_rule() -> AlertRule {
        let mut rule = AlertRule::new(
            "errors",
            "Error rate",
            Condition::Threshold(ThresholdCondition {
                metric: "errors.rate".to_string(),
                operator: Operator::Gt,
                threshold: 5.0,
                window_minutes: 5,
                aggregation: Aggregation::Avg,
            }),
        );
        rule.severity = Severity::Critical;
        rule.notifications = vec![webhook()];
        rule
    }

    #[tokio::test]
    async fn test_open_snapshot_and_message() {
        let metrics = Arc::new(FixedStore::default());
        metrics.set("errors.rate", 7.2);
        let mut engine = engine(metrics);
        let mut rule = errors_rule();
        rule.tags.insert("team".to_string(), "growth".to_string());
        engine.add_rule(rule).unwrap();

        let now = Utc::now();
        let report = engine.tick(now).await;
        assert_eq!(report.opened, 1);
        assert_eq!(report.notifications_attempted, 1);

        let alert = &engine.active_alerts()[0];
        assert_eq!(alert.metric_value, Some(7.2));
        assert_eq!(alert.threshold, Some(5.0));
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.tags["team"], "growth");
        assert_eq!(alert.context["condition_type"], "threshold");
        assert_eq!(
            alert.description,
            "errors.rate exceeded threshold of 5.00 (current value: 7.20)"
        );
        assert_eq!(alert.notifications_sent.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_rule_resolves_open_alert() {
        let metrics = Arc::new(FixedStore::default());
        metrics.set("errors.rate", 9.0);
        let mut engine = engine(metrics);
        engine.add_rule(errors_rule()).unwrap();

        let now = Utc::now();
        engine.tick(now).await;
        assert!(engine.remove_rule("errors", now));
        assert!(engine.active_alerts().is_empty());
        assert_eq!(
            engine.alert_history(1)[0].resolution_reason.as_deref(),
            Some(REASON_RULE_REMOVED)
        );
        assert!(!engine.remove_rule("errors", now));
    }

    #[tokio::test]
    async fn test_stop_on_acknowledge_clears_schedule() {
        let metrics = Arc::new(FixedStore::default());
        metrics.set("errors.rate", 9.0);
        let mut engine = engine(metrics);
        let mut rule = errors_rule();
        rule.escalation = Some(EscalationPolicy {
            steps: vec![EscalationStep {
                delay_minutes: 10,
                notifications: vec![webhook()],
            }],
            stop_on_acknowledge: true,
        });
        engine.add_rule(rule).unwrap();

        let start = Utc::now();
        engine.tick(start).await;
        let id = engine.active_alerts()[0].id;
        assert!(engine.alert(id).unwrap().next_escalation_at.is_some());

        assert!(engine.acknowledge(id, "alice", start));
        let report = engine.tick(start + Duration::minutes(15)).await;
        assert_eq!(report.escalated, 0);
        assert_eq!(engine.alert(id).unwrap().escalation_level, 0);
    }

    #[tokio::test]
    async fn test_suppressed_alert_does_not_escalate_and_expires() {
        let metrics = Arc::new(FixedStore::default());
        metrics.set("errors.rate", 9.0);
        let mut engine = engine(metrics);
        let mut rule = errors_rule();
        rule.escalation = Some(EscalationPolicy {
            steps: vec![EscalationStep {
                delay_minutes: 10,
                notifications: vec![webhook()],
            }],
            stop_on_acknowledge: false,
        });
        engine.add_rule(rule).unwrap();

        let start = Utc::now();
        engine.tick(start).await;
        let id = engine.active_alerts()[0].id;
        assert!(engine.suppress(id, 30, start));

        let report = engine.tick(start + Duration::minutes(15)).await;
        assert_eq!(report.escalated, 0);
        assert_eq!(engine.alert(id).unwrap().status, AlertStatus::Suppressed);

        let report = engine.tick(start + Duration::minutes(30)).await;
        assert_eq!(report.suppressions_expired, 1);
        assert_eq!(
            engine.alert_history(1)[0].resolution_reason.as_deref(),
            Some(REASON_SUPPRESSION_EXPIRED)
        );
    }

    #[test]
    fn test_composite_message_joins_conditions() {
        let rule = AlertRule::new(
            "combo",
            "Combo",
            Condition::Composite(crate::models::CompositeCondition {
                conditions: vec![
                    ThresholdCondition {
                        metric: "cpu".to_string(),
                        operator: Operator::Gt,
                        threshold: 90.0,
                        window_minutes: 5,
                        aggregation: Aggregation::Avg,
                    },
                    ThresholdCondition {
                        metric: "mem".to_string(),
                        operator: Operator::Gte,
                        threshold: 80.0,
                        window_minutes: 5,
                        aggregation: Aggregation::Max,
                    },
                ],
                combinator: crate::models::Combinator::And,
            }),
        );
        let evaluation = Evaluation {
            triggered: true,
            value: None,
            threshold: None,
            detail: serde_json::Value::Null,
        };
        assert_eq!(
            format_alert_message(&rule, &evaluation),
            "Composite condition met: cpu > 90 AND mem >= 80"
        );
    }
}
