//! Request and response bodies of the control API.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{ConfigError, TelegramConfig, parse_api_id};
use crate::detector::ControlError;
use crate::telegram::SessionError;

/// Default number of history entries returned.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// JSON envelope shared by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data: Some(data),
        })
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data: None,
        })
    }
}

/// Error returned by handlers, rendered as `{ success: false, message }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        let status = match &err {
            ControlError::AlreadyRunning | ControlError::SessionInUse(_) => StatusCode::CONFLICT,
            ControlError::Session(SessionError::NotFound(_)) => StatusCode::NOT_FOUND,
            ControlError::FloodWait(_) => StatusCode::TOO_MANY_REQUESTS,
            ControlError::Session(SessionError::Io(_)) | ControlError::Telegram(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        };

        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!("Request failed ({}): {}", self.status, self.message);
        }

        let body = ApiResponse::<()> {
            success: false,
            message: self.message,
            data: None,
        };
        (self.status, Json(body)).into_response()
    }
}

/// API ID as sent by forms (string) or scripts (number).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ApiId {
    Number(i64),
    Text(String),
}

impl ApiId {
    fn parse(&self) -> Result<Option<i32>, ConfigError> {
        match self {
            Self::Number(n) => i32::try_from(*n)
                .ok()
                .filter(|n| *n > 0)
                .map(Some)
                .ok_or(ConfigError::InvalidApiId),
            Self::Text(s) if s.trim().is_empty() => Ok(None),
            Self::Text(s) => parse_api_id(s).map(Some),
        }
    }
}

/// Body of `POST /detector/start`. Missing fields come from the environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub api_id: Option<ApiId>,
    #[serde(default)]
    pub api_hash: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub session_name: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

impl StartRequest {
    /// Merges the request with the environment configuration.
    pub fn into_config(self, fallback: Option<&TelegramConfig>) -> Result<TelegramConfig, ApiError> {
        let api_id = match self.api_id.as_ref().map(ApiId::parse).transpose()?.flatten() {
            Some(id) => id,
            None => fallback
                .map(|c| c.api_id)
                .ok_or_else(|| ApiError::bad_request("api_id is required"))?,
        };

        let api_hash = non_empty(self.api_hash)
            .or_else(|| fallback.map(|c| c.api_hash.clone()))
            .ok_or_else(|| ApiError::bad_request("api_hash is required"))?;

        let mut config = TelegramConfig::new(api_id, api_hash);
        config.phone_number =
            non_empty(self.phone_number).or_else(|| fallback.and_then(|c| c.phone_number.clone()));
        if let Some(name) =
            non_empty(self.session_name).or_else(|| fallback.map(|c| c.session_name.clone()))
        {
            config.session_name = name;
        }

        Ok(config)
    }
}

/// Body of `POST /detector/complete_auth`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompleteAuthRequest {
    #[serde(default, alias = "code")]
    pub sms_code: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Query of `GET /detector/history`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}
