//! Periodic baseline-status heartbeat.
//!
//! Independent of presence detection: it never reads or writes observer
//! state. Each tick re-reads the config and stops itself once the heartbeat
//! is disabled or the credentials have been rejected.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use meetsync_status::PresenceServiceClient;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigStore, MAX_HEARTBEAT_INTERVAL_MINUTES};

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    interval_minutes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeartbeatStatus {
    pub enabled: bool,
    pub running: bool,
    pub interval_minutes: u64,
}

pub struct HeartbeatScheduler {
    client: Arc<dyn PresenceServiceClient>,
    config: Arc<ConfigStore>,
    running: Mutex<Option<Running>>,
}

impl HeartbeatScheduler {
    pub fn new(client: Arc<dyn PresenceServiceClient>, config: Arc<ConfigStore>) -> Self {
        Self {
            client,
            config,
            running: Mutex::new(None),
        }
    }

    /// Start ticking every `interval_minutes`, clamped to a week. Replaces any
    /// running timer.
    pub fn start(&self, interval_minutes: u64) {
        let minutes = interval_minutes.clamp(1, MAX_HEARTBEAT_INTERVAL_MINUTES);
        if minutes != interval_minutes {
            warn!(
                requested = interval_minutes,
                minutes, "heartbeat interval out of range, clamped"
            );
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(tick_loop(
            Arc::clone(&self.client),
            Arc::clone(&self.config),
            Duration::from_secs(minutes.saturating_mul(60)),
            cancel.clone(),
        ));
        let next = Running {
            cancel,
            handle,
            interval_minutes: minutes,
        };

        if let Some(prev) = self.slot().replace(next) {
            prev.cancel.cancel();
        }
        info!(interval_minutes = minutes, "heartbeat started");
    }

    /// Cancel the timer. Safe to call when nothing is running.
    pub fn stop(&self) {
        if let Some(prev) = self.slot().take() {
            prev.cancel.cancel();
            info!("heartbeat stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    fn slot(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> HeartbeatStatus {
        let cfg = self.config.current();
        let interval_minutes = self
            .slot()
            .as_ref()
            .map(|r| r.interval_minutes)
            .unwrap_or(cfg.heartbeat_interval_minutes);
        HeartbeatStatus {
            enabled: cfg.heartbeat_enabled,
            running: self.is_running(),
            interval_minutes,
        }
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn tick_loop(
    client: Arc<dyn PresenceServiceClient>,
    config: Arc<ConfigStore>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let cfg = config.current();
        if cancel.is_cancelled() || !cfg.heartbeat_enabled {
            debug!("heartbeat disabled, stopping timer");
            break;
        }
        if !config.credentials_valid() {
            warn!("heartbeat stopping: credentials invalid");
            break;
        }

        match client.set_status(cfg.baseline_status).await {
            Ok(()) => debug!(status = %cfg.baseline_status, "heartbeat tick"),
            Err(e) if e.is_auth_error() => {
                error!("heartbeat auth failure: {e}");
                config.invalidate_credentials();
                break;
            }
            Err(e) => warn!("heartbeat tick failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PresenceConfig;
    use meetsync_core::StatusValue;
    use meetsync_status::{RecordingClient, StatusCall, StatusError};

    fn scheduler(enabled: bool) -> (HeartbeatScheduler, Arc<RecordingClient>, Arc<ConfigStore>) {
        let client = Arc::new(RecordingClient::new());
        let config = Arc::new(ConfigStore::in_memory(PresenceConfig {
            heartbeat_enabled: enabled,
            ..PresenceConfig::default()
        }));
        (
            HeartbeatScheduler::new(client.clone(), Arc::clone(&config)),
            client,
            config,
        )
    }

    async fn advance_minutes(minutes: u64) {
        tokio::time::advance(Duration::from_secs(minutes * 60)).await;
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    const BASELINE: StatusCall = StatusCall::SetStatus {
        value: StatusValue::Online,
    };

    #[tokio::test(start_paused = true)]
    async fn ticks_set_baseline_each_interval() {
        let (hb, client, _config) = scheduler(true);
        hb.start(1);
        advance_minutes(1).await;
        advance_minutes(1).await;
        assert_eq!(client.calls(), vec![BASELINE, BASELINE]);
        assert!(hb.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn no_tick_after_stop() {
        let (hb, client, _config) = scheduler(true);
        hb.start(1);
        hb.stop();
        advance_minutes(3).await;
        assert!(client.calls().is_empty());
        assert!(!hb.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_flag_self_cancels_on_next_tick() {
        let (hb, client, config) = scheduler(true);
        hb.start(1);
        config.set_heartbeat(false, None).expect("disable");
        advance_minutes(1).await;
        assert!(client.calls().is_empty());
        assert!(!hb.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_running_timer() {
        let (hb, client, _config) = scheduler(true);
        hb.start(1);
        hb.start(2);
        advance_minutes(1).await;
        assert!(client.calls().is_empty(), "1-minute timer was replaced");
        advance_minutes(1).await;
        assert_eq!(client.calls(), vec![BASELINE]);
        assert_eq!(hb.status().interval_minutes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_interval_is_clamped_to_a_week() {
        let (hb, client, _config) = scheduler(true);
        hb.start(u64::MAX / 30);
        assert!(hb.is_running());
        assert_eq!(hb.status().interval_minutes, MAX_HEARTBEAT_INTERVAL_MINUTES);

        advance_minutes(MAX_HEARTBEAT_INTERVAL_MINUTES - 1).await;
        assert!(client.calls().is_empty());
        advance_minutes(1).await;
        assert_eq!(client.calls(), vec![BASELINE]);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_stops_heartbeat() {
        let (hb, client, config) = scheduler(true);
        client.fail_next(StatusError::Auth {
            reason: "token_revoked".into(),
        });
        hb.start(1);
        advance_minutes(1).await;
        assert!(!config.credentials_valid());
        assert!(!hb.is_running());
        advance_minutes(2).await;
        assert!(client.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_keeps_ticking() {
        let (hb, client, _config) = scheduler(true);
        client.fail_next(StatusError::Request {
            message: "connection refused".into(),
        });
        hb.start(1);
        advance_minutes(1).await;
        advance_minutes(1).await;
        assert_eq!(client.calls(), vec![BASELINE]);
        assert!(hb.is_running());
    }
}
