//! # AlertWatch
//!
//! Rule evaluation and alert lifecycle engine for metric streams.
//!
//! AlertWatch evaluates alert rules against a metric store on a fixed tick,
//! opens and auto-resolves alerts, escalates unacknowledged ones and routes
//! notifications to email, Slack, webhooks, SMS and PagerDuty.
//!
//! ## Architecture
//!
//! - **Alerting**: condition evaluation, rule registry, alert store, escalation
//! - **Metric store**: the queries the evaluator needs, plus an in-memory store
//! - **API**: REST API for rules, alerts and metric ingestion
//!
//! ## Quick Start
//!
//! ```bash
//! # Start the engine and API with a rules file
//! alertwatch serve --rules rules.json
//!
//! # Validate a rules file
//! alertwatch check-rules rules.json
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod alerting;
pub mod api;
pub mod config;
pub mod error;
pub mod metric_store;
pub mod models;
pub mod rules_file;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{
        AlertEngine, ConditionEvaluator, EngineHandle, HttpTransport, NotificationRouter,
        NotificationTransport, TickReport,
    };
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::metric_store::{InMemoryMetricStore, MetricStore};
    pub use crate::models::*;
}
