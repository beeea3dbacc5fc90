//! API handlers for the HTTP REST API

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::alerting::{EngineHandle, TickReport};
use crate::error::Error;
use crate::metric_store::InMemoryMetricStore;
use crate::models::{AlertEvent, AlertRule, AlertRuleUpdate};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Engine mailbox
    pub engine: EngineHandle,
    /// Store fed by the ingest endpoint
    pub metrics: Arc<InMemoryMetricStore>,
    /// Exporter handle; `None` disables `/metrics`
    pub prometheus: Option<PrometheusHandle>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

fn api_error(err: Error) -> (StatusCode, String) {
    let status = match &err {
        Error::Validation(_) | Error::Serialization(_) => StatusCode::BAD_REQUEST,
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::Channel(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn not_found(entity: &str, id: impl ToString) -> (StatusCode, String) {
    api_error(Error::not_found(entity, id.to_string()))
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` once the engine task has stopped
    pub status: String,
    /// Crate version
    pub version: String,
    /// Whether the engine task is alive
    pub engine_running: bool,
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let engine_running = state.engine.is_running();
    Json(HealthResponse {
        status: if engine_running { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        engine_running,
    })
}

/// Prometheus scrape endpoint
pub async fn prometheus_metrics(
    State(state): State<AppState>,
) -> Result<String, (StatusCode, String)> {
    state.prometheus.as_ref().map(PrometheusHandle::render).ok_or((
        StatusCode::SERVICE_UNAVAILABLE,
        "Metrics exporter not installed".to_string(),
    ))
}

// ---- metric ingestion ----

/// A single observation
#[derive(Debug, Deserialize)]
pub struct MetricSampleInput {
    /// Metric name
    pub metric: String,
    /// Observed value
    pub value: f64,
    /// Defaults to now
    pub timestamp: Option<DateTime<Utc>>,
}

/// Metric ingestion request
#[derive(Debug, Deserialize)]
pub struct IngestMetricsRequest {
    /// Samples to record
    pub samples: Vec<MetricSampleInput>,
}

/// Metric ingestion response
#[derive(Serialize)]
pub struct IngestMetricsResponse {
    /// Samples stored
    pub accepted: usize,
    /// Samples dropped as invalid
    pub rejected: usize,
}

/// Record metric samples for evaluation
pub async fn ingest_metrics(
    State(state): State<AppState>,
    Json(req): Json<IngestMetricsRequest>,
) -> ApiResult<IngestMetricsResponse> {
    let total = req.samples.len();
    let now = Utc::now();

    let mut accepted = 0;
    for sample in req.samples {
        match state
            .metrics
            .record(&sample.metric, sample.value, sample.timestamp.unwrap_or(now))
        {
            Ok(()) => accepted += 1,
            Err(e) => warn!(metric = %sample.metric, error = %e, "Rejected sample"),
        }
    }

    Ok(Json(IngestMetricsResponse {
        accepted,
        rejected: total - accepted,
    }))
}

// ---- rules ----

/// List rules response
#[derive(Serialize)]
pub struct ListRulesResponse {
    /// Rules in creation order
    pub rules: Vec<AlertRule>,
    /// Rule count
    pub total: usize,
}

/// List all rules
pub async fn list_rules(State(state): State<AppState>) -> ApiResult<ListRulesResponse> {
    let rules = state.engine.rules().await.map_err(api_error)?;
    let total = rules.len();
    Ok(Json(ListRulesResponse { rules, total }))
}

/// Create or replace a rule
pub async fn create_rule(
    State(state): State<AppState>,
    Json(rule): Json<AlertRule>,
) -> Result<(StatusCode, Json<AlertRule>), (StatusCode, String)> {
    let id = rule.id.clone();
    state.engine.add_rule(rule).await.map_err(api_error)?;

    let stored = state
        .engine
        .rule(&id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| not_found("Rule", &id))?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// Get a rule by id
pub async fn get_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
) -> ApiResult<AlertRule> {
    let rule = state
        .engine
        .rule(&rule_id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| not_found("Rule", &rule_id))?;
    Ok(Json(rule))
}

/// Apply a partial update to a rule
pub async fn update_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
    Json(update): Json<AlertRuleUpdate>,
) -> ApiResult<AlertRule> {
    let updated = state
        .engine
        .update_rule(&rule_id, update)
        .await
        .map_err(api_error)?;
    if !updated {
        return Err(not_found("Rule", &rule_id));
    }
    get_rule(State(state), Path(rule_id)).await
}

/// Delete a rule
pub async fn delete_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.engine.remove_rule(&rule_id).await.map_err(api_error)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Rule", &rule_id))
    }
}

/// Enable a rule
pub async fn enable_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.engine.enable_rule(&rule_id).await.map_err(api_error)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Rule", &rule_id))
    }
}

/// Disable a rule
pub async fn disable_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.engine.disable_rule(&rule_id).await.map_err(api_error)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Rule", &rule_id))
    }
}

// ---- alerts ----

/// Alert list response
#[derive(Serialize)]
pub struct ListAlertsResponse {
    /// Alerts
    pub alerts: Vec<AlertEvent>,
    /// Alert count
    pub total: usize,
}

/// Open alerts
pub async fn list_active_alerts(State(state): State<AppState>) -> ApiResult<ListAlertsResponse> {
    let alerts = state.engine.active_alerts().await.map_err(api_error)?;
    let total = alerts.len();
    Ok(Json(ListAlertsResponse { alerts, total }))
}

/// Query parameters for alert history
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Maximum entries, newest first
    pub limit: Option<usize>,
}

/// Resolved alerts, newest first
pub async fn alert_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<ListAlertsResponse> {
    let limit = query.limit.unwrap_or(100);
    let alerts = state.engine.alert_history(limit).await.map_err(api_error)?;
    let total = alerts.len();
    Ok(Json(ListAlertsResponse { alerts, total }))
}

/// Get an open alert
pub async fn get_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> ApiResult<AlertEvent> {
    let alert = state
        .engine
        .alert(alert_id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| not_found("Alert", alert_id))?;
    Ok(Json(alert))
}

/// Acknowledge request
#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    /// Operator acknowledging the alert
    pub by: String,
}

/// Acknowledge an active alert
pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    Json(req): Json<AcknowledgeRequest>,
) -> ApiResult<AlertEvent> {
    if !state
        .engine
        .acknowledge(alert_id, &req.by)
        .await
        .map_err(api_error)?
    {
        return Err((
            StatusCode::CONFLICT,
            format!("Alert {alert_id} is not active"),
        ));
    }
    get_alert(State(state), Path(alert_id)).await
}

/// Resolve request
#[derive(Debug, Default, Deserialize)]
pub struct ResolveRequest {
    /// Resolution reason; defaults to `manual`
    pub reason: Option<String>,
}

/// Resolve an open alert
pub async fn resolve_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    body: Option<Json<ResolveRequest>>,
) -> Result<StatusCode, (StatusCode, String)> {
    let reason = body.and_then(|Json(req)| req.reason);
    if state
        .engine
        .resolve(alert_id, reason)
        .await
        .map_err(api_error)?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("Alert", alert_id))
    }
}

/// Suppress request
#[derive(Debug, Deserialize)]
pub struct SuppressRequest {
    /// Suppression length
    pub minutes: u32,
}

/// Suppress an open alert
pub async fn suppress_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    Json(req): Json<SuppressRequest>,
) -> ApiResult<AlertEvent> {
    if req.minutes == 0 {
        return Err(api_error(Error::validation("minutes must be at least 1")));
    }
    if !state
        .engine
        .suppress(alert_id, req.minutes)
        .await
        .map_err(api_error)?
    {
        return Err((
            StatusCode::CONFLICT,
            format!("Alert {alert_id} cannot be suppressed"),
        ));
    }
    get_alert(State(state), Path(alert_id)).await
}

// ---- engine ----

/// Engine status response
#[derive(Serialize)]
pub struct EngineStatusResponse {
    /// Whether periodic ticks run
    pub enabled: bool,
    /// Registered rules
    pub rules: usize,
    /// Open alerts
    pub active_alerts: usize,
}

/// Engine status
pub async fn engine_status(State(state): State<AppState>) -> ApiResult<EngineStatusResponse> {
    let enabled = state.engine.is_enabled().await.map_err(api_error)?;
    let rules = state.engine.rules().await.map_err(api_error)?.len();
    let active_alerts = state.engine.active_alerts().await.map_err(api_error)?.len();
    Ok(Json(EngineStatusResponse {
        enabled,
        rules,
        active_alerts,
    }))
}

/// Resume periodic evaluation
pub async fn enable_engine(State(state): State<AppState>) -> ApiResult<EngineStatusResponse> {
    state.engine.enable().await.map_err(api_error)?;
    engine_status(State(state)).await
}

/// Pause periodic evaluation
pub async fn disable_engine(State(state): State<AppState>) -> ApiResult<EngineStatusResponse> {
    state.engine.disable().await.map_err(api_error)?;
    engine_status(State(state)).await
}

/// Run one evaluation tick immediately
pub async fn tick_engine(State(state): State<AppState>) -> ApiResult<TickReport> {
    let report = state.engine.tick_now().await.map_err(api_error)?;
    Ok(Json(report))
}
