//! Active alert map and bounded resolution history

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{AlertEvent, AlertStatus};

/// Default number of resolved alerts retained
pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

/// Resolution reason when the condition clears
pub const REASON_AUTO_RESOLVED: &str = "auto-resolved";
/// Resolution reason when an alert outlives its rule's timeout
pub const REASON_TIMEOUT: &str = "timeout";
/// Resolution reason when a suppression window ends
pub const REASON_SUPPRESSION_EXPIRED: &str = "suppression-expired";
/// Resolution reason for a second alert opened for the same rule
pub const REASON_DUPLICATE: &str = "duplicate";
/// Resolution reason when the owning rule is deleted
pub const REASON_RULE_REMOVED: &str = "rule-removed";
/// Resolution reason for operator resolutions without a reason
pub const REASON_MANUAL: &str = "manual";

/// Holds open alerts (at most one per rule) and a ring buffer of resolved ones
#[derive(Debug)]
pub struct AlertStore {
    active: HashMap<Uuid, AlertEvent>,
    by_rule: HashMap<String, Uuid>,
    history: VecDeque<AlertEvent>,
    capacity: usize,
    last_resolved: HashMap<String, DateTime<Utc>>,
}

impl Default for AlertStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl AlertStore {
    /// Create a store retaining at most `capacity` resolved alerts
    pub fn new(capacity: usize) -> Self {
        Self {
            active: HashMap::new(),
            by_rule: HashMap::new(),
            history: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            last_resolved: HashMap::new(),
        }
    }

    /// Insert a newly opened alert.
    ///
    /// If the rule already has an open alert the older one is kept and the
    /// newer one is resolved as a duplicate. Returns the id of the alert that
    /// remains open for the rule.
    pub fn open(&mut self, alert: AlertEvent, now: DateTime<Utc>) -> Uuid {
        let rule_id = alert.rule_id.clone();
        let incoming = alert.id;
        self.active.insert(incoming, alert);

        let Some(&existing) = self.by_rule.get(&rule_id) else {
            self.by_rule.insert(rule_id, incoming);
            return incoming;
        };

        let (keep, drop) = match (self.active.get(&existing), self.active.get(&incoming)) {
            (Some(old), Some(new)) if new.triggered_at < old.triggered_at => (incoming, existing),
            _ => (existing, incoming),
        };
        warn!(
            rule_id = %rule_id,
            kept = %keep,
            resolved = %drop,
            "Duplicate active alert for rule"
        );
        self.by_rule.insert(rule_id, keep);
        self.resolve(drop, REASON_DUPLICATE, now);
        keep
    }

    /// Open alerts, most severe first, then oldest first
    pub fn open_alerts(&self) -> Vec<AlertEvent> {
        let mut alerts: Vec<AlertEvent> = self.active.values().cloned().collect();
        alerts.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.triggered_at.cmp(&b.triggered_at))
        });
        alerts
    }

    /// Look up an open alert
    pub fn get(&self, id: Uuid) -> Option<&AlertEvent> {
        self.active.get(&id)
    }

    /// Look up an open alert for mutation
    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut AlertEvent> {
        self.active.get_mut(&id)
    }

    /// The open alert for a rule, if any
    pub fn find_active_for_rule(&self, rule_id: &str) -> Option<&AlertEvent> {
        self.by_rule
            .get(rule_id)
            .and_then(|id| self.active.get(id))
    }

    /// Most recent resolved alerts, newest first
    pub fn history(&self, limit: usize) -> Vec<AlertEvent> {
        self.history.iter().rev().take(limit).cloned().collect()
    }

    /// Mark an active alert as acknowledged
    pub fn acknowledge(&mut self, id: Uuid, by: &str, now: DateTime<Utc>) -> bool {
        let Some(alert) = self.active.get_mut(&id) else {
            return false;
        };
        if alert.status != AlertStatus::Active {
            return false;
        }

        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_by = Some(by.to_string());
        alert.acknowledged_at = Some(now);
        info!(alert_id = %id, rule_id = %alert.rule_id, by, "Alert acknowledged");
        true
    }

    /// Resolve an open alert and move it into history
    pub fn resolve(&mut self, id: Uuid, reason: &str, now: DateTime<Utc>) -> Option<AlertEvent> {
        let mut alert = self.active.remove(&id)?;
        if self.by_rule.get(&alert.rule_id) == Some(&id) {
            self.by_rule.remove(&alert.rule_id);
        }

        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(now);
        alert.resolution_reason = Some(reason.to_string());
        alert.next_escalation_at = None;
        self.last_resolved.insert(alert.rule_id.clone(), now);

        info!(alert_id = %id, rule_id = %alert.rule_id, reason, "Alert resolved");

        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(alert.clone());
        Some(alert)
    }

    /// Silence an open alert; it resolves once the window has passed
    pub fn suppress(&mut self, id: Uuid, minutes: u32, now: DateTime<Utc>) -> bool {
        let Some(alert) = self.active.get_mut(&id) else {
            return false;
        };
        if !matches!(
            alert.status,
            AlertStatus::Active | AlertStatus::Acknowledged
        ) {
            return false;
        }

        let until = now + Duration::minutes(i64::from(minutes));
        alert.status = AlertStatus::Suppressed;
        alert.suppressed_until = Some(until);
        info!(alert_id = %id, rule_id = %alert.rule_id, until = %until, "Alert suppressed");
        true
    }

    /// Suppressed alerts whose window has passed
    pub fn due_suppressions(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.active
            .values()
            .filter(|a| a.status == AlertStatus::Suppressed)
            .filter(|a| a.suppressed_until.is_some_and(|until| until <= now))
            .map(|a| a.id)
            .collect()
    }

    /// When an alert for this rule was last resolved
    pub fn last_resolved_at(&self, rule_id: &str) -> Option<DateTime<Utc>> {
        self.last_resolved.get(rule_id).copied()
    }

    /// Whether the rule resolved less than `cooldown_minutes` ago
    pub fn in_cooldown(&self, rule_id: &str, cooldown_minutes: u32, now: DateTime<Utc>) -> bool {
        if cooldown_minutes == 0 {
            return false;
        }
        self.last_resolved_at(rule_id).is_some_and(|resolved| {
            now - resolved < Duration::minutes(i64::from(cooldown_minutes))
        })
    }

    /// Number of open alerts
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Number of alerts held in history
    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}
