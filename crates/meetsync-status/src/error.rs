use reqwest::StatusCode;
use thiserror::Error;

/// Error codes in a `{"ok": false, "error": ..}` body that mean the token is unusable.
pub const AUTH_ERROR_CODES: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "token_revoked",
    "token_expired",
    "account_inactive",
];

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("invalid emoji {0:?}: expected [a-z0-9_]{{1,64}}")]
    InvalidEmoji(String),
    #[error("invalid status duration {0}: must be >= 0 seconds")]
    InvalidDuration(i64),
    #[error("status_client_base_url_missing")]
    BaseUrlMissing,
    #[error("status_request_failed:{message}")]
    Request { message: String },
    #[error("status_read_failed:{message}")]
    Read { message: String },
    #[error("status_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("status_auth_failed:{reason}")]
    Auth { reason: String },
    #[error("status_api_error:{error}")]
    Api { error: String },
    #[error("status_json_decode_failed:{message}")]
    Decode { message: String },
}

impl StatusError {
    /// Credentials were rejected. Retrying with the same token will not help.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Rejected locally, before any request was sent.
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Self::InvalidEmoji(_) | Self::InvalidDuration(_))
    }
}
