//! Routing and status codes of the control API.
//!
//! None of these requests reach Telegram: every path exercised here fails
//! or succeeds before a connection would be opened.

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt as _;

use gift_responder::api::{self, AppState};
use gift_responder::config::{DetectionRules, DetectorSettings, ServerSettings, TelegramConfig};
use gift_responder::detector::DetectorController;

fn app_with(dir: &Path, settings: DetectorSettings, env: Option<TelegramConfig>) -> Router {
    let controller = Arc::new(DetectorController::new(
        settings,
        DetectionRules::default(),
        dir,
    ));
    api::router(AppState::new(controller, ServerSettings::default(), env))
}

fn app(dir: &Path) -> Router {
    app_with(dir, DetectorSettings::default(), None)
}

async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_reports_healthy() {
    let dir = tempfile::tempdir().unwrap();

    for uri in ["/health", "/api/health"] {
        let (status, body) = send(app(dir.path()), "GET", uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }
}

#[tokio::test]
async fn index_serves_panel() {
    let dir = tempfile::tempdir().unwrap();
    let response = app(dir.path())
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("/detector/start"));
}

#[tokio::test]
async fn info_lists_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = send(app(dir.path()), "GET", "/info", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["app_name"], "Telegram Gift Detector");
    assert!(body["data"]["endpoints"].as_array().unwrap().len() > 5);
}

#[tokio::test]
async fn status_aliases_agree() {
    let dir = tempfile::tempdir().unwrap();

    for uri in ["/status", "/api/status", "/detector/status"] {
        let (status, body) = send(app(dir.path()), "GET", uri, None).await;
        assert_eq!(status, StatusCode::OK, "{uri}");
        assert_eq!(body["data"]["status"], "idle");
        assert_eq!(body["data"]["running"], false);
        assert_eq!(body["data"]["gifts_detected"], 0);
        assert_eq!(body["data"]["history_size"], 0);
    }
}

#[tokio::test]
async fn start_rejects_bad_credentials() {
    let dir = tempfile::tempdir().unwrap();

    let (status, body) = send(
        app(dir.path()),
        "POST",
        "/detector/start",
        Some(json!({ "api_id": "123", "api_hash": "short" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("API hash"));

    let (status, _) = send(
        app(dir.path()),
        "POST",
        "/detector/start",
        Some(json!({ "api_id": "not-a-number", "api_hash": "0123456789abcdef" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(app(dir.path()), "POST", "/detector/start", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "api_id is required");
}

#[tokio::test]
async fn start_merges_environment_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let mut env = TelegramConfig::new(42, "0123456789abcdef".to_owned());
    env.phone_number = Some("12345".to_owned());

    // The phone from the environment lacks '+', so validation fails before connecting.
    let app = app_with(dir.path(), DetectorSettings::default(), Some(env));
    let (status, body) = send(app, "POST", "/detector/start", Some(json!({}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains('+'));
}

#[tokio::test]
async fn start_rejects_malformed_json() {
    let dir = tempfile::tempdir().unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/detector/start")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app(dir.path()).oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn complete_auth_without_pending_login() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = send(
        app(dir.path()),
        "POST",
        "/detector/complete_auth",
        Some(json!({ "sms_code": "12345" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn stop_restart_and_catalog_when_idle() {
    let dir = tempfile::tempdir().unwrap();

    let (status, body) = send(app(dir.path()), "POST", "/detector/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Detector was not running");

    let (status, _) = send(app(dir.path()), "POST", "/detector/restart", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(app(dir.path()), "GET", "/detector/catalog", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn sessions_list_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("main.session"), b"sqlite").unwrap();
    std::fs::write(dir.path().join("main.session-journal"), b"j").unwrap();

    let (status, body) = send(app(dir.path()), "GET", "/detector/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["sessions"][0]["name"], "main");
    assert_eq!(body["data"]["active"], Value::Null);

    let (status, _) = send(app(dir.path()), "DELETE", "/detector/sessions/main", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!dir.path().join("main.session").exists());
    assert!(!dir.path().join("main.session-journal").exists());

    let (status, _) = send(app(dir.path()), "DELETE", "/detector/sessions/main", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(app(dir.path()), "DELETE", "/detector/sessions/bad.name", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn simulate_gift_lands_in_history() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path());

    let (status, body) = send(
        app.clone(),
        "POST",
        "/detector/simulate-gift",
        Some(json!({ "gift_type": "star_gift", "gift_id": 7, "stars": 1500, "sender_username": "alice" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["gift"]["gift_type"], "star_gift");
    assert_eq!(body["data"]["gift"]["detection_method"], "simulated");
    assert!(body["data"]["response"].as_str().unwrap().contains("1,500"));

    let (status, body) = send(app.clone(), "GET", "/detector/history?limit=5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["gifts"][0]["details"]["id"], 7);

    // Simulated gifts do not touch the counters.
    let (_, body) = send(app, "GET", "/detector/status", None).await;
    assert_eq!(body["data"]["gifts_detected"], 0);
    assert_eq!(body["data"]["history_size"], 1);
}

#[tokio::test]
async fn simulate_gift_respects_detection_toggles() {
    let dir = tempfile::tempdir().unwrap();
    let settings = DetectorSettings {
        enable_text_detection: false,
        enable_extended_detection: false,
        ..DetectorSettings::default()
    };
    let app = app_with(dir.path(), settings, None);

    let (status, body) = send(
        app,
        "POST",
        "/detector/simulate-gift",
        Some(json!({ "gift_type": "text_mention" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn unknown_route_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let (status, _) = send(app(dir.path()), "GET", "/detector/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
