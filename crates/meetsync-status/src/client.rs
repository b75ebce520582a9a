//! The remote presence-service seam.

use async_trait::async_trait;
use meetsync_core::StatusValue;

use crate::error::StatusError;

/// Longest emoji name accepted by the service.
pub const MAX_EMOJI_LEN: usize = 64;

/// Remote status service. Implementations must fail fast: callers sit on the
/// presence path and never wait out a hung request.
#[async_trait]
pub trait PresenceServiceClient: Send + Sync {
    async fn set_status(&self, value: StatusValue) -> Result<(), StatusError>;

    /// `duration_secs == 0` means the custom status does not expire.
    async fn set_custom_status(
        &self,
        text: &str,
        emoji: &str,
        duration_secs: i64,
    ) -> Result<(), StatusError>;

    async fn clear_custom_status(&self) -> Result<(), StatusError>;
}

#[async_trait]
impl<T: PresenceServiceClient + ?Sized> PresenceServiceClient for std::sync::Arc<T> {
    async fn set_status(&self, value: StatusValue) -> Result<(), StatusError> {
        (**self).set_status(value).await
    }

    async fn set_custom_status(
        &self,
        text: &str,
        emoji: &str,
        duration_secs: i64,
    ) -> Result<(), StatusError> {
        (**self).set_custom_status(text, emoji, duration_secs).await
    }

    async fn clear_custom_status(&self) -> Result<(), StatusError> {
        (**self).clear_custom_status().await
    }
}

/// Normalize an emoji name (`":calendar:"` → `"calendar"`) and check it
/// against `[a-z0-9_]{1,64}`.
pub fn validate_emoji(raw: &str) -> Result<String, StatusError> {
    let name = raw.trim().trim_matches(':');
    let valid = !name.is_empty()
        && name.len() <= MAX_EMOJI_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if valid {
        Ok(name.to_string())
    } else {
        Err(StatusError::InvalidEmoji(raw.to_string()))
    }
}

pub fn validate_duration(duration_secs: i64) -> Result<i64, StatusError> {
    if duration_secs < 0 {
        return Err(StatusError::InvalidDuration(duration_secs));
    }
    Ok(duration_secs)
}
