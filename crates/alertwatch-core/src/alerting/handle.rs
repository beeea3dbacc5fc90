//! Engine task and its cloneable handle

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{AlertEvent, AlertRule, AlertRuleUpdate};

use super::engine::{AlertEngine, TickReport};

const MAILBOX_CAPACITY: usize = 256;

enum Command {
    AddRule {
        rule: Box<AlertRule>,
        reply: oneshot::Sender<Result<()>>,
    },
    UpdateRule {
        id: String,
        update: Box<AlertRuleUpdate>,
        reply: oneshot::Sender<Result<bool>>,
    },
    RemoveRule {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    SetRuleEnabled {
        id: String,
        enabled: bool,
        reply: oneshot::Sender<bool>,
    },
    GetRule {
        id: String,
        reply: oneshot::Sender<Option<AlertRule>>,
    },
    ListRules {
        reply: oneshot::Sender<Vec<AlertRule>>,
    },
    Acknowledge {
        id: Uuid,
        by: String,
        reply: oneshot::Sender<bool>,
    },
    Resolve {
        id: Uuid,
        reason: Option<String>,
        reply: oneshot::Sender<bool>,
    },
    Suppress {
        id: Uuid,
        minutes: u32,
        reply: oneshot::Sender<bool>,
    },
    GetAlert {
        id: Uuid,
        reply: oneshot::Sender<Option<AlertEvent>>,
    },
    ActiveAlerts {
        reply: oneshot::Sender<Vec<AlertEvent>>,
    },
    History {
        limit: usize,
        reply: oneshot::Sender<Vec<AlertEvent>>,
    },
    SetEnabled {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    IsEnabled {
        reply: oneshot::Sender<bool>,
    },
    Tick {
        at: DateTime<Utc>,
        reply: oneshot::Sender<TickReport>,
    },
}

/// Cloneable front end for a running [`AlertEngine`].
///
/// Every call is a message to the engine task; calls fail with
/// [`Error::Channel`] once the task has stopped.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl EngineHandle {
    /// Move `engine` onto its own task.
    ///
    /// The task ticks every `tick_interval` while enabled and stops on
    /// [`shutdown`](Self::shutdown) or when every handle is dropped.
    pub fn spawn(
        engine: AlertEngine,
        tick_interval: Duration,
        start_enabled: bool,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(
            engine,
            rx,
            tick_interval,
            start_enabled,
            cancel.clone(),
        ));

        (Self { tx, cancel }, task)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| Error::Channel("engine is not running".to_string()))?;
        response
            .await
            .map_err(|_| Error::Channel("engine dropped the request".to_string()))
    }

    /// Add or replace a rule
    pub async fn add_rule(&self, rule: AlertRule) -> Result<()> {
        self.request(|reply| Command::AddRule {
            rule: Box::new(rule),
            reply,
        })
        .await?
    }

    /// Merge a partial update into a rule; `false` for an unknown id
    pub async fn update_rule(&self, id: &str, update: AlertRuleUpdate) -> Result<bool> {
        self.request(|reply| Command::UpdateRule {
            id: id.to_string(),
            update: Box::new(update),
            reply,
        })
        .await?
    }

    /// Remove a rule and resolve its open alert
    pub async fn remove_rule(&self, id: &str) -> Result<bool> {
        self.request(|reply| Command::RemoveRule {
            id: id.to_string(),
            reply,
        })
        .await
    }

    /// Enable a rule
    pub async fn enable_rule(&self, id: &str) -> Result<bool> {
        self.set_rule_enabled(id, true).await
    }

    /// Disable a rule
    pub async fn disable_rule(&self, id: &str) -> Result<bool> {
        self.set_rule_enabled(id, false).await
    }

    async fn set_rule_enabled(&self, id: &str, enabled: bool) -> Result<bool> {
        self.request(|reply| Command::SetRuleEnabled {
            id: id.to_string(),
            enabled,
            reply,
        })
        .await
    }

    /// Look up a rule
    pub async fn rule(&self, id: &str) -> Result<Option<AlertRule>> {
        self.request(|reply| Command::GetRule {
            id: id.to_string(),
            reply,
        })
        .await
    }

    /// All rules
    pub async fn rules(&self) -> Result<Vec<AlertRule>> {
        self.request(|reply| Command::ListRules { reply }).await
    }

    /// Acknowledge an active alert
    pub async fn acknowledge(&self, id: Uuid, by: &str) -> Result<bool> {
        self.request(|reply| Command::Acknowledge {
            id,
            by: by.to_string(),
            reply,
        })
        .await
    }

    /// Resolve an open alert
    pub async fn resolve(&self, id: Uuid, reason: Option<String>) -> Result<bool> {
        self.request(|reply| Command::Resolve { id, reason, reply })
            .await
    }

    /// Suppress an open alert for `minutes`
    pub async fn suppress(&self, id: Uuid, minutes: u32) -> Result<bool> {
        self.request(|reply| Command::Suppress { id, minutes, reply })
            .await
    }

    /// Look up an open alert
    pub async fn alert(&self, id: Uuid) -> Result<Option<AlertEvent>> {
        self.request(|reply| Command::GetAlert { id, reply }).await
    }

    /// Open alerts, most severe first
    pub async fn active_alerts(&self) -> Result<Vec<AlertEvent>> {
        self.request(|reply| Command::ActiveAlerts { reply }).await
    }

    /// Resolved alerts, newest first
    pub async fn alert_history(&self, limit: usize) -> Result<Vec<AlertEvent>> {
        self.request(|reply| Command::History { limit, reply })
            .await
    }

    /// Resume periodic ticking
    pub async fn enable(&self) -> Result<()> {
        self.request(|reply| Command::SetEnabled {
            enabled: true,
            reply,
        })
        .await
    }

    /// Pause periodic ticking; commands are still served
    pub async fn disable(&self) -> Result<()> {
        self.request(|reply| Command::SetEnabled {
            enabled: false,
            reply,
        })
        .await
    }

    /// Whether periodic ticking is on
    pub async fn is_enabled(&self) -> Result<bool> {
        self.request(|reply| Command::IsEnabled { reply }).await
    }

    /// Run one tick now, even while ticking is paused
    pub async fn tick_now(&self) -> Result<TickReport> {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick as if the clock read `at`
    pub async fn tick_at(&self, at: DateTime<Utc>) -> Result<TickReport> {
        self.request(|reply| Command::Tick { at, reply }).await
    }

    /// Stop the engine task
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Whether the engine task is still accepting commands
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }
}

async fn run(
    mut engine: AlertEngine,
    mut rx: mpsc::Receiver<Command>,
    tick_interval: Duration,
    mut enabled: bool,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + tick_interval, tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        interval = ?tick_interval,
        enabled,
        "Alert engine started"
    );

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("Alert engine stopped");
                break;
            }

            command = rx.recv() => {
                let Some(command) = command else {
                    info!("All engine handles dropped, stopping");
                    break;
                };
                handle_command(&mut engine, command, &mut enabled).await;
            }

            _ = ticker.tick(), if enabled => {
                engine.tick(Utc::now()).await;
            }
        }
    }
}

async fn handle_command(engine: &mut AlertEngine, command: Command, enabled: &mut bool) {
    let now = Utc::now();

    // A dropped reply receiver only means the caller gave up waiting
    match command {
        Command::AddRule { rule, reply } => {
            let _ = reply.send(engine.add_rule(*rule));
        }
        Command::UpdateRule { id, update, reply } => {
            let _ = reply.send(engine.update_rule(&id, *update));
        }
        Command::RemoveRule { id, reply } => {
            let _ = reply.send(engine.remove_rule(&id, now));
        }
        Command::SetRuleEnabled { id, enabled, reply } => {
            let changed = if enabled {
                engine.enable_rule(&id)
            } else {
                engine.disable_rule(&id)
            };
            let _ = reply.send(changed);
        }
        Command::GetRule { id, reply } => {
            let _ = reply.send(engine.rule(&id));
        }
        Command::ListRules { reply } => {
            let _ = reply.send(engine.rules());
        }
        Command::Acknowledge { id, by, reply } => {
            let _ = reply.send(engine.acknowledge(id, &by, now));
        }
        Command::Resolve { id, reason, reply } => {
            let _ = reply.send(engine.resolve(id, reason.as_deref(), now));
        }
        Command::Suppress { id, minutes, reply } => {
            let _ = reply.send(engine.suppress(id, minutes, now));
        }
        Command::GetAlert { id, reply } => {
            let _ = reply.send(engine.alert(id));
        }
        Command::ActiveAlerts { reply } => {
            let _ = reply.send(engine.active_alerts());
        }
        Command::History { limit, reply } => {
            let _ = reply.send(engine.alert_history(limit));
        }
        Command::SetEnabled {
            enabled: value,
            reply,
        } => {
            if *enabled != value {
                info!(enabled = value, "Alert engine toggled");
            }
            *enabled = value;
            let _ = reply.send(());
        }
        Command::IsEnabled { reply } => {
            let _ = reply.send(*enabled);
        }
        Command::Tick { at, reply } => {
            debug!(at = %at, "Manual tick");
            let _ = reply.send(engine.tick(at).await);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::{ConditionEvaluator, NotificationRouter};
    use crate::alerting::notifier::{NotificationError, NotificationTransport, OutboundMessage};
    use crate::metric_store::InMemoryMetricStore;
    use crate::models::{AbsenceCondition, Condition};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NullTransport;

    #[async_trait]
    impl NotificationTransport for NullTransport {
        async fn send(&self, _: &OutboundMessage) -> std::result::Result<(), NotificationError> {
            Ok(())
        }
    }

    fn spawn(start_enabled: bool) -> (EngineHandle, JoinHandle<()>) {
        let timeout = Duration::from_secs(1);
        let engine = AlertEngine::new(
            ConditionEvaluator::new(Arc::new(InMemoryMetricStore::default()), timeout),
            NotificationRouter::new(Arc::new(NullTransport), timeout),
            100,
        );
        EngineHandle::spawn(engine, Duration::from_secs(3600), start_enabled)
    }

    fn heartbeat_rule() -> AlertRule {
        AlertRule::new(
            "heartbeat",
            "Heartbeat missing",
            Condition::Absence(AbsenceCondition {
                metric: "worker.heartbeat".to_string(),
                window_minutes: 5,
            }),
        )
    }

    #[tokio::test]
    async fn test_commands_round_trip_through_actor() {
        let (handle, _task) = spawn(false);

        handle.add_rule(heartbeat_rule()).await.unwrap();
        assert_eq!(handle.rules().await.unwrap().len(), 1);
        assert!(!handle.is_enabled().await.unwrap());

        // never-observed metric is absent
        let report = handle.tick_now().await.unwrap();
        assert_eq!(report.opened, 1);

        let alert = handle.active_alerts().await.unwrap().remove(0);
        assert!(handle.acknowledge(alert.id, "alice").await.unwrap());
        assert!(handle.resolve(alert.id, None).await.unwrap());
        assert!(handle.active_alerts().await.unwrap().is_empty());
        assert_eq!(handle.alert_history(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_ids_are_noops() {
        let (handle, _task) = spawn(true);
        assert!(!handle.remove_rule("missing").await.unwrap());
        assert!(!handle.enable_rule("missing").await.unwrap());
        assert!(!handle.acknowledge(Uuid::new_v4(), "bob").await.unwrap());
        assert!(!handle.suppress(Uuid::new_v4(), 5).await.unwrap());
        assert!(handle.rule("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let (handle, task) = spawn(true);
        assert!(handle.is_running());

        handle.shutdown();
        task.await.unwrap();

        assert!(!handle.is_running());
        let err = handle.rules().await.unwrap_err();
        assert!(matches!(err, Error::Channel(_)));
    }

    #[tokio::test]
    async fn test_enable_disable_toggle() {
        let (handle, _task) = spawn(true);
        assert!(handle.is_enabled().await.unwrap());
        handle.disable().await.unwrap();
        assert!(!handle.is_enabled().await.unwrap());
        handle.enable().await.unwrap();
        assert!(handle.is_enabled().await.unwrap());
    }
}
