use std::time::Duration;

use async_trait::async_trait;
use meetsync_core::StatusValue;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::{PresenceServiceClient, validate_duration, validate_emoji};
use crate::error::{AUTH_ERROR_CODES, StatusError};

pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_REQUEST_ATTEMPTS: usize = 2;

pub const STATUS_PATH: &str = "/v1/status";
pub const CUSTOM_STATUS_PATH: &str = "/v1/custom-status";

#[derive(Debug, Clone)]
pub struct HttpStatusClientConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_ms: u64,
    pub request_attempts: usize,
}

impl HttpStatusClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// REST client for the status service.
///
/// `PUT /v1/status`, `PUT /v1/custom-status`, `DELETE /v1/custom-status`,
/// bearer-authenticated. Bodies, when present, follow `{"ok": bool, "error": ..}`.
#[derive(Debug, Clone)]
pub struct HttpStatusClient {
    base_url: String,
    token: Option<String>,
    timeout: Duration,
    request_attempts: usize,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SetStatusRequest<'a> {
    status: &'a str,
}

#[derive(Debug, Serialize)]
struct SetCustomStatusRequest<'a> {
    text: &'a str,
    emoji: &'a str,
    duration_seconds: i64,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default = "default_ok")]
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

fn default_ok() -> bool {
    true
}

impl HttpStatusClient {
    pub fn new(config: HttpStatusClientConfig) -> Result<Self, StatusError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            token: config.token.and_then(non_empty_string),
            timeout: Duration::from_millis(config.timeout_ms.max(250)),
            request_attempts: config.request_attempts.max(1),
            http: reqwest::Client::new(),
        })
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        let trimmed = path.trim();
        if trimmed.starts_with('/') {
            format!("{}{}", self.base_url, trimmed)
        } else {
            format!("{}/{}", self.base_url, trimmed)
        }
    }

    async fn send<Req>(&self, method: Method, path: &str, payload: Option<&Req>) -> Result<(), StatusError>
    where
        Req: Serialize + ?Sized,
    {
        let url = self.endpoint(path);
        let mut last_error: Option<String> = None;

        for attempt in 0..self.request_attempts {
            let mut request = self
                .http
                .request(method.clone(), url.as_str())
                .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
                .timeout(self.timeout);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            if let Some(payload) = payload {
                request = request.json(payload);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let bytes = response.bytes().await.map_err(|error| StatusError::Read {
                        message: error.to_string(),
                    })?;
                    return interpret_response(status, &bytes);
                }
                Err(error) => {
                    tracing::debug!(%url, attempt, "status request failed: {error}");
                    last_error = Some(error.to_string());
                    if attempt + 1 >= self.request_attempts {
                        break;
                    }
                }
            }
        }

        Err(StatusError::Request {
            message: last_error.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

#[async_trait]
impl PresenceServiceClient for HttpStatusClient {
    async fn set_status(&self, value: StatusValue) -> Result<(), StatusError> {
        let body = SetStatusRequest {
            status: value.as_str(),
        };
        self.send(Method::PUT, STATUS_PATH, Some(&body)).await
    }

    async fn set_custom_status(
        &self,
        text: &str,
        emoji: &str,
        duration_secs: i64,
    ) -> Result<(), StatusError> {
        let emoji = validate_emoji(emoji)?;
        let duration_seconds = validate_duration(duration_secs)?;
        let body = SetCustomStatusRequest {
            text,
            emoji: &emoji,
            duration_seconds,
        };
        self.send(Method::PUT, CUSTOM_STATUS_PATH, Some(&body)).await
    }

    async fn clear_custom_status(&self) -> Result<(), StatusError> {
        self.send::<()>(Method::DELETE, CUSTOM_STATUS_PATH, None).await
    }
}

/// Map a finished exchange to the call outcome.
pub fn interpret_response(status: StatusCode, body: &[u8]) -> Result<(), StatusError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let reason = non_empty_string(String::from_utf8_lossy(body).to_string())
            .unwrap_or_else(|| status.to_string());
        return Err(StatusError::Auth { reason });
    }
    if !status.is_success() {
        return Err(format_http_error(status, body));
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(());
    }

    let envelope: ApiEnvelope =
        serde_json::from_slice(body).map_err(|error| StatusError::Decode {
            message: error.to_string(),
        })?;
    if envelope.ok {
        return Ok(());
    }
    let error = envelope.error.unwrap_or_else(|| "unknown".to_string());
    if AUTH_ERROR_CODES.contains(&error.as_str()) {
        Err(StatusError::Auth { reason: error })
    } else {
        Err(StatusError::Api { error })
    }
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> StatusError {
    let body = non_empty_string(String::from_utf8_lossy(body).to_string())
        .unwrap_or_else(|| "<empty>".to_string());
    StatusError::Http { status, body }
}

fn normalize_base_url(base_url: &str) -> Result<String, StatusError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(StatusError::BaseUrlMissing);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
