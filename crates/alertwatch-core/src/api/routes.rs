//! API routes

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{self, AppState};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::prometheus_metrics))

        // Metric ingestion
        .route("/api/v1/metrics", post(handlers::ingest_metrics))

        // Rules
        .route(
            "/api/v1/rules",
            get(handlers::list_rules).post(handlers::create_rule),
        )
        .route(
            "/api/v1/rules/:rule_id",
            get(handlers::get_rule)
                .patch(handlers::update_rule)
                .delete(handlers::delete_rule),
        )
        .route("/api/v1/rules/:rule_id/enable", post(handlers::enable_rule))
        .route("/api/v1/rules/:rule_id/disable", post(handlers::disable_rule))

        // Alerts
        .route("/api/v1/alerts", get(handlers::list_active_alerts))
        .route("/api/v1/alerts/history", get(handlers::alert_history))
        .route("/api/v1/alerts/:alert_id", get(handlers::get_alert))
        .route("/api/v1/alerts/:alert_id/acknowledge", post(handlers::acknowledge_alert))
        .route("/api/v1/alerts/:alert_id/resolve", post(handlers::resolve_alert))
        .route("/api/v1/alerts/:alert_id/suppress", post(handlers::suppress_alert))

        // Engine
        .route("/api/v1/engine", get(handlers::engine_status))
        .route("/api/v1/engine/enable", post(handlers::enable_engine))
        .route("/api/v1/engine/disable", post(handlers::disable_engine))
        .route("/api/v1/engine/tick", post(handlers::tick_engine))

        .with_state(state)
}
