use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use meetsync_core::StatusValue;
use serde::Serialize;

use crate::client::{PresenceServiceClient, validate_duration, validate_emoji};
use crate::error::StatusError;

/// One call as seen by a [`RecordingClient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum StatusCall {
    SetStatus {
        value: StatusValue,
    },
    SetCustomStatus {
        text: String,
        emoji: String,
        duration_secs: i64,
    },
    ClearCustomStatus,
}

/// Client that records calls instead of sending them.
///
/// Backs the daemon's dry-run mode (no service URL configured) and stands in
/// for the service in tests. Queued failures are returned by the next calls,
/// in order, without recording them.
#[derive(Debug, Default)]
pub struct RecordingClient {
    calls: Mutex<Vec<StatusCall>>,
    failures: Mutex<VecDeque<StatusError>>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<StatusCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn take_calls(&self) -> Vec<StatusCall> {
        self.calls
            .lock()
            .map(|mut c| std::mem::take(&mut *c))
            .unwrap_or_default()
    }

    /// Make the next call fail with `error`.
    pub fn fail_next(&self, error: StatusError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(error);
        }
    }

    fn record(&self, call: StatusCall) -> Result<(), StatusError> {
        if let Some(error) = self.failures.lock().ok().and_then(|mut f| f.pop_front()) {
            return Err(error);
        }
        tracing::info!(?call, "dry-run status call");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        Ok(())
    }
}

#[async_trait]
impl PresenceServiceClient for RecordingClient {
    async fn set_status(&self, value: StatusValue) -> Result<(), StatusError> {
        self.record(StatusCall::SetStatus { value })
    }

    async fn set_custom_status(
        &self,
        text: &str,
        emoji: &str,
        duration_secs: i64,
    ) -> Result<(), StatusError> {
        let emoji = validate_emoji(emoji)?;
        let duration_secs = validate_duration(duration_secs)?;
        self.record(StatusCall::SetCustomStatus {
            text: text.to_string(),
            emoji,
            duration_secs,
        })
    }

    async fn clear_custom_status(&self) -> Result<(), StatusError> {
        self.record(StatusCall::ClearCustomStatus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_in_order() {
        let client = RecordingClient::new();
        client
            .set_custom_status("In a meeting", ":calendar:", 0)
            .await
            .expect("custom status");
        client.set_status(StatusValue::Dnd).await.expect("status");
        client.clear_custom_status().await.expect("clear");

        assert_eq!(
            client.take_calls(),
            vec![
                StatusCall::SetCustomStatus {
                    text: "In a meeting".into(),
                    emoji: "calendar".into(),
                    duration_secs: 0,
                },
                StatusCall::SetStatus {
                    value: StatusValue::Dnd
                },
                StatusCall::ClearCustomStatus,
            ]
        );
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_emoji_is_not_recorded() {
        let client = RecordingClient::new();
        let err = client
            .set_custom_status("In a meeting", "Calendar!", 0)
            .await
            .expect_err("rejected");
        assert!(err.is_validation_error());
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn queued_failure_applies_once() {
        let client = RecordingClient::new();
        client.fail_next(StatusError::Api {
            error: "ratelimited".into(),
        });

        assert!(client.set_status(StatusValue::Online).await.is_err());
        assert!(client.set_status(StatusValue::Online).await.is_ok());
        assert_eq!(client.calls().len(), 1);
    }
}
