//! REST API round trips against a live server

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use alertwatch::alerting::{
    AlertEngine, ConditionEvaluator, EngineHandle, NotificationError, NotificationRouter,
    NotificationTransport, OutboundMessage,
};
use alertwatch::api::{AppState, HttpServer};
use alertwatch::metric_store::InMemoryMetricStore;

struct NullTransport;

#[async_trait::async_trait]
impl NotificationTransport for NullTransport {
    async fn send(&self, _: &OutboundMessage) -> Result<(), NotificationError> {
        Ok(())
    }
}

struct TestServer {
    base: String,
    client: reqwest::Client,
    shutdown: CancellationToken,
    engine: EngineHandle,
}

impl TestServer {
    async fn start() -> Self {
        let metrics = Arc::new(InMemoryMetricStore::default());
        let engine = AlertEngine::new(
            ConditionEvaluator::new(metrics.clone(), Duration::from_secs(1)),
            NotificationRouter::new(Arc::new(NullTransport), Duration::from_secs(1)),
            100,
        );
        let (engine, _task) = EngineHandle::spawn(engine, Duration::from_secs(3600), false);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let shutdown = CancellationToken::new();

        let server = HttpServer::new(AppState {
            engine: engine.clone(),
            metrics,
            prometheus: None,
        });
        tokio::spawn(server.serve_listener(listener, shutdown.clone()));

        Self {
            base,
            client: reqwest::Client::new(),
            shutdown,
            engine,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.engine.shutdown();
    }
}

fn error_rule() -> Value {
    json!({
        "id": "errors",
        "name": "Error rate",
        "severity": "critical",
        "auto_resolve": true,
        "condition": {
            "type": "threshold",
            "metric": "errors.rate",
            "operator": ">",
            "threshold": 5,
            "window_minutes": 5,
            "aggregation": "avg"
        }
    })
}

#[tokio::test]
async fn health_reports_running_engine() {
    let server = TestServer::start().await;
    let body: Value = server.get("/health").await.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["engine_running"], true);

    // no recorder installed in tests
    assert_eq!(server.get("/metrics").await.status(), 503);
}

#[tokio::test]
async fn rule_crud() {
    let server = TestServer::start().await;

    let created = server.post("/api/v1/rules", error_rule()).await;
    assert_eq!(created.status(), 201);

    let rule: Value = server.get("/api/v1/rules/errors").await.json().await.unwrap();
    assert_eq!(rule["severity"], "critical");
    assert_eq!(rule["condition"]["type"], "threshold");

    let patched: Value = server
        .client
        .patch(server.url("/api/v1/rules/errors"))
        .json(&json!({"severity": "warning", "description": "tuned"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(patched["severity"], "warning");
    assert_eq!(patched["description"], "tuned");

    let disabled = server.post("/api/v1/rules/errors/disable", json!({})).await;
    assert_eq!(disabled.status(), 204);

    let list: Value = server.get("/api/v1/rules").await.json().await.unwrap();
    assert_eq!(list["total"], 1);
    assert_eq!(list["rules"][0]["enabled"], false);

    let deleted = server
        .client
        .delete(server.url("/api/v1/rules/errors"))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 204);
    assert_eq!(server.get("/api/v1/rules/errors").await.status(), 404);
}

#[tokio::test]
async fn invalid_rule_is_rejected() {
    let server = TestServer::start().await;
    let mut rule = error_rule();
    rule["name"] = json!("");

    let response = server.post("/api/v1/rules", rule).await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn ingest_tick_and_manage_alert() {
    let server = TestServer::start().await;
    server.post("/api/v1/rules", error_rule()).await;

    let ingest: Value = server
        .post(
            "/api/v1/metrics",
            json!({"samples": [
                {"metric": "errors.rate", "value": 7.0},
                {"metric": "errors.rate", "value": 7.4},
                {"metric": "", "value": 1.0}
            ]}),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(ingest["accepted"], 2);
    assert_eq!(ingest["rejected"], 1);

    let report: Value = server
        .post("/api/v1/engine/tick", json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(report["opened"], 1);

    let alerts: Value = server.get("/api/v1/alerts").await.json().await.unwrap();
    assert_eq!(alerts["total"], 1);
    let alert_id = alerts["alerts"][0]["id"].as_str().unwrap().to_string();
    assert!((alerts["alerts"][0]["metric_value"].as_f64().unwrap() - 7.2).abs() < 1e-9);

    let acked: Value = server
        .post(
            &format!("/api/v1/alerts/{alert_id}/acknowledge"),
            json!({"by": "alice"}),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(acked["status"], "acknowledged");
    assert_eq!(acked["acknowledged_by"], "alice");

    let again = server
        .post(
            &format!("/api/v1/alerts/{alert_id}/acknowledge"),
            json!({"by": "bob"}),
        )
        .await;
    assert_eq!(again.status(), 409);

    let resolved = server
        .post(
            &format!("/api/v1/alerts/{alert_id}/resolve"),
            json!({"reason": "fixed upstream"}),
        )
        .await;
    assert_eq!(resolved.status(), 204);

    let history: Value = server
        .get("/api/v1/alerts/history?limit=5")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(history["alerts"][0]["resolution_reason"], "fixed upstream");
    assert_eq!(
        server.get(&format!("/api/v1/alerts/{alert_id}")).await.status(),
        404
    );
}

#[tokio::test]
async fn engine_toggle() {
    let server = TestServer::start().await;

    let status: Value = server.get("/api/v1/engine").await.json().await.unwrap();
    assert_eq!(status["enabled"], false);

    let status: Value = server
        .post("/api/v1/engine/enable", json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(status["enabled"], true);

    let status: Value = server
        .post("/api/v1/engine/disable", json!({}))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(status["enabled"], false);
}
