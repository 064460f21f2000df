//! Route handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::Html;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use super::AppState;
use super::types::{
    ApiError, ApiResponse, CompleteAuthRequest, DEFAULT_HISTORY_LIMIT, HistoryQuery,
    StartRequest,
};
use crate::config::{APP_NAME, APP_VERSION};
use crate::detector::{AuthState, SimulateRequest, Simulation, StatusSnapshot};
use crate::gifts::{GiftDetails, GiftInfo};
use crate::telegram::SessionInfo;

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

const PANEL: &str = include_str!("panel.html");

const ENDPOINTS: [&str; 14] = [
    "GET /health",
    "GET /info",
    "GET /status",
    "GET /detector/status",
    "POST /detector/start",
    "POST /detector/complete_auth",
    "POST /detector/stop",
    "POST /detector/restart",
    "GET /detector/history",
    "GET /detector/sessions",
    "DELETE /detector/sessions/{name}",
    "POST /detector/simulate-gift",
    "GET /detector/catalog",
    "GET /api/status",
];

pub async fn index() -> Html<&'static str> {
    Html(PANEL)
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "app": APP_NAME,
        "version": APP_VERSION,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub async fn info(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let settings = state.controller.settings();
    ApiResponse::ok(
        APP_NAME,
        json!({
            "app_name": APP_NAME,
            "version": APP_VERSION,
            "environment": state.server.environment,
            "detection": {
                "service": settings.enable_service_detection,
                "raw_api": settings.enable_raw_api_detection,
                "text": settings.enable_text_detection,
                "extended": settings.enable_extended_detection,
            },
            "endpoints": ENDPOINTS,
        }),
    )
}

#[derive(Debug, Serialize)]
pub struct StatusData {
    #[serde(flatten)]
    pub status: StatusSnapshot,
    pub history_size: usize,
}

pub async fn status(State(state): State<AppState>) -> ApiResult<StatusData> {
    let status = state.controller.status().await;
    let history_size = state.controller.history_len().await;
    let message = format!("Detector is {}", status.status.as_str());

    Ok(ApiResponse::ok(
        message,
        StatusData {
            status,
            history_size,
        },
    ))
}

#[derive(Debug, Serialize)]
pub struct AuthData {
    pub status: AuthState,
}

fn auth_reply(state: AuthState) -> Json<ApiResponse<AuthData>> {
    let message = match state {
        AuthState::Running => "Detector started",
        AuthState::SmsRequired => "Login code sent, submit it to /detector/complete_auth",
        AuthState::PasswordRequired => "2FA password required, submit it to /detector/complete_auth",
        _ => "Detector state changed",
    };
    ApiResponse::ok(message, AuthData { status: state })
}

pub async fn start(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> ApiResult<AuthData> {
    let config = request.into_config(state.env_config.as_deref())?;
    let auth = state.controller.start(config).await?;
    Ok(auth_reply(auth))
}

pub async fn complete_auth(
    State(state): State<AppState>,
    Json(request): Json<CompleteAuthRequest>,
) -> ApiResult<AuthData> {
    let auth = state
        .controller
        .complete_auth(request.sms_code, request.password)
        .await?;
    Ok(auth_reply(auth))
}

pub async fn stop(State(state): State<AppState>) -> Json<ApiResponse<()>> {
    if state.controller.stop().await {
        ApiResponse::message("Detector stopped")
    } else {
        ApiResponse::message("Detector was not running")
    }
}

pub async fn restart(State(state): State<AppState>) -> ApiResult<AuthData> {
    info!("Restart requested");
    let auth = state.controller.restart().await?;
    Ok(auth_reply(auth))
}

#[derive(Debug, Serialize)]
pub struct HistoryData {
    pub gifts: Vec<GiftInfo>,
    pub total: usize,
}

pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<HistoryData> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let gifts = state.controller.history(limit).await;
    let total = state.controller.history_len().await;

    Ok(ApiResponse::ok(
        format!("{} gifts", gifts.len()),
        HistoryData { gifts, total },
    ))
}

#[derive(Debug, Serialize)]
pub struct SessionsData {
    pub sessions: Vec<SessionInfo>,
    pub active: Option<String>,
}

pub async fn sessions(State(state): State<AppState>) -> ApiResult<SessionsData> {
    let (sessions, active) = state.controller.sessions().await?;
    Ok(ApiResponse::ok(
        format!("{} sessions", sessions.len()),
        SessionsData { sessions, active },
    ))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<()> {
    state.controller.delete_session(&name).await?;
    info!("Deleted session {}", name);
    Ok(ApiResponse::message(format!("Session '{name}' deleted")))
}

pub async fn simulate_gift(
    State(state): State<AppState>,
    Json(request): Json<SimulateRequest>,
) -> ApiResult<Simulation> {
    let simulation = state.controller.simulate_gift(&request).await?;
    Ok(ApiResponse::ok("Gift simulated", simulation))
}

pub async fn catalog(State(state): State<AppState>) -> ApiResult<Vec<GiftDetails>> {
    let catalog = state.controller.catalog().await?;
    let mut gifts: Vec<GiftDetails> = catalog.values().cloned().collect();
    gifts.sort_by_key(|g| g.id);

    Ok(ApiResponse::ok(format!("{} star gifts", gifts.len()), gifts))
}
