//! Alert evaluation, lifecycle and notification delivery
//!
//! Rules are evaluated on a fixed tick by an [`AlertEngine`] that runs on its
//! own task behind an [`EngineHandle`]. Alerts move through
//! active/acknowledged/suppressed to resolved, escalate on a ladder of delays,
//! and fan out to notification targets through a [`NotificationRouter`].

mod condition;
mod engine;
mod handle;
mod notifier;
mod registry;
mod store;
mod transport;

pub use condition::{mean_and_stddev, ConditionEvaluator, Evaluation};
pub use engine::{AlertEngine, TickReport};
pub use handle::EngineHandle;
pub use notifier::{
    format_payload, DispatchSummary, NotificationError, NotificationRouter,
    NotificationTransport, OutboundMessage, Payload, TextPayload,
};
pub use registry::RuleRegistry;
pub use store::{
    AlertStore, DEFAULT_HISTORY_CAPACITY, REASON_AUTO_RESOLVED, REASON_DUPLICATE, REASON_MANUAL,
    REASON_RULE_REMOVED, REASON_SUPPRESSION_EXPIRED, REASON_TIMEOUT,
};
pub use transport::HttpTransport;
