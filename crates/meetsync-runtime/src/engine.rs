//! In-process presence engine.
//!
//! Owns the coordinator actor, the heartbeat scheduler and one driver task
//! per registered observer. The UDS server and the integration tests talk
//! to this type only.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use meetsync_core::{EnvironmentSnapshot, ObserverId, RoomId};
use meetsync_status::PresenceServiceClient;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ConfigError, ConfigStore};
use crate::coordinator::{Coordinator, CoordinatorHandle, ObserverEntry};
use crate::heartbeat::{HeartbeatScheduler, HeartbeatStatus};
use crate::observer::{ObserverDriver, ObserverInput};
use crate::store::PersistentStore;

/// Inputs buffered per observer before `push_snapshot` waits.
const OBSERVER_QUEUE: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown observer: {0}")]
    UnknownObserver(ObserverId),
    #[error("observer {0} has stopped")]
    ObserverGone(ObserverId),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Detector(#[from] meetsync_core::CoreError),
    #[error("engine is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub observers: BTreeMap<ObserverId, ObserverEntry>,
    pub present_count: usize,
    pub pending_enrichments: Vec<(ObserverId, Option<RoomId>)>,
    pub pending_clear: bool,
    pub heartbeat: HeartbeatStatus,
    pub integration_enabled: bool,
    pub credentials_valid: bool,
}

struct ObserverSlot {
    tx: mpsc::Sender<ObserverInput>,
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

pub struct PresenceEngine {
    config: Arc<ConfigStore>,
    coordinator: CoordinatorHandle,
    coordinator_task: Mutex<Option<JoinHandle<()>>>,
    heartbeat: HeartbeatScheduler,
    observers: Mutex<HashMap<ObserverId, ObserverSlot>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
}

impl PresenceEngine {
    /// Clear anything a previous run left applied, then start the coordinator
    /// and, if enabled, the heartbeat.
    pub async fn start(
        client: Arc<dyn PresenceServiceClient>,
        store: Arc<dyn PersistentStore>,
        config: Arc<ConfigStore>,
    ) -> Self {
        let mut coordinator =
            Coordinator::new(Arc::clone(&client), store, Arc::clone(&config));
        coordinator.recover_stale().await;

        let cancel = CancellationToken::new();
        let (handle, rx) = Coordinator::channel();
        let task = tokio::spawn(coordinator.run(rx, cancel.child_token()));

        let heartbeat = HeartbeatScheduler::new(client, Arc::clone(&config));
        let cfg = config.current();
        if cfg.heartbeat_enabled {
            heartbeat.start(cfg.heartbeat_interval_minutes);
        }

        info!(
            integration = cfg.presence_integration_enabled,
            heartbeat = cfg.heartbeat_enabled,
            "presence engine started"
        );
        Self {
            config,
            coordinator: handle,
            coordinator_task: Mutex::new(Some(task)),
            heartbeat,
            observers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            cancel,
        }
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub async fn register_observer(&self) -> Result<ObserverId, EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::ShuttingDown);
        }
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let detection = self.config.current().detection;
        let driver = ObserverDriver::new(id, &detection, self.coordinator.clone())?;

        self.coordinator.register(id);
        let (tx, rx) = mpsc::channel(OBSERVER_QUEUE);
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(driver.run(rx, cancel.clone()));
        self.observers
            .lock()
            .await
            .insert(id, ObserverSlot { tx, handle, cancel });
        info!(observer = %id, "observer registered");
        Ok(id)
    }

    pub async fn push_snapshot(
        &self,
        id: ObserverId,
        snapshot: EnvironmentSnapshot,
    ) -> Result<(), EngineError> {
        self.send(id, ObserverInput::Snapshot(snapshot)).await
    }

    pub async fn notify_mutation(&self, id: ObserverId) -> Result<(), EngineError> {
        self.send(id, ObserverInput::Mutation).await
    }

    /// The observer's document is unloading; clean up without waiting for a leave.
    pub async fn unload(&self, id: ObserverId) -> Result<(), EngineError> {
        self.send(id, ObserverInput::Unload).await
    }

    /// Stop an observer. A present observer leaves before it is forgotten.
    pub async fn teardown_observer(&self, id: ObserverId) -> Result<(), EngineError> {
        let slot = self
            .observers
            .lock()
            .await
            .remove(&id)
            .ok_or(EngineError::UnknownObserver(id))?;
        if slot.tx.send(ObserverInput::Teardown).await.is_err() {
            slot.cancel.cancel();
        }
        if let Err(e) = slot.handle.await {
            warn!(observer = %id, "observer task failed: {e}");
        }
        info!(observer = %id, "observer torn down");
        Ok(())
    }

    /// Persist the heartbeat setting and start or stop the timer to match.
    pub fn set_heartbeat(
        &self,
        enabled: bool,
        interval_minutes: Option<u64>,
    ) -> Result<HeartbeatStatus, EngineError> {
        let cfg = self.config.set_heartbeat(enabled, interval_minutes)?;
        if cfg.heartbeat_enabled {
            self.heartbeat.start(cfg.heartbeat_interval_minutes);
        } else {
            self.heartbeat.stop();
        }
        Ok(self.heartbeat.status())
    }

    /// Toggle remote sync. Detection keeps running either way.
    pub fn set_integration(&self, enabled: bool) -> Result<(), EngineError> {
        self.config.set_integration_enabled(enabled)?;
        info!(enabled, "presence integration toggled");
        Ok(())
    }

    /// Retry a failed clear now instead of waiting for the retry timer.
    pub fn retry_pending(&self) {
        self.coordinator.retry_pending();
    }

    /// Status after every input already sent to an observer has been processed.
    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let senders: Vec<_> = self
            .observers
            .lock()
            .await
            .values()
            .map(|slot| slot.tx.clone())
            .collect();
        for tx in senders {
            let (reply, done) = oneshot::channel();
            if tx.send(ObserverInput::Flush(reply)).await.is_ok() {
                let _ = done.await;
            }
        }

        let coordinator = self
            .coordinator
            .status()
            .await
            .ok_or(EngineError::ShuttingDown)?;
        let cfg = self.config.current();
        Ok(EngineStatus {
            observers: coordinator.observers,
            present_count: coordinator.present_count,
            pending_enrichments: coordinator.pending_enrichments,
            pending_clear: coordinator.pending_clear,
            heartbeat: self.heartbeat.status(),
            integration_enabled: cfg.presence_integration_enabled,
            credentials_valid: self.config.credentials_valid(),
        })
    }

    /// Tear down every observer, drain the coordinator and stop the heartbeat.
    pub async fn shutdown(&self) {
        let ids: Vec<ObserverId> = self.observers.lock().await.keys().copied().collect();
        for id in ids {
            if let Err(e) = self.teardown_observer(id).await {
                warn!(observer = %id, "teardown during shutdown failed: {e}");
            }
        }
        self.heartbeat.stop();

        // Let queued leaves reach the service before the actor stops.
        let _ = self.coordinator.status().await;
        self.cancel.cancel();
        if let Some(task) = self.coordinator_task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("coordinator task failed: {e}");
            }
        }
        info!("presence engine stopped");
    }

    async fn send(&self, id: ObserverId, input: ObserverInput) -> Result<(), EngineError> {
        let tx = self
            .observers
            .lock()
            .await
            .get(&id)
            .map(|slot| slot.tx.clone())
            .ok_or(EngineError::UnknownObserver(id))?;
        tx.send(input)
            .await
            .map_err(|_| EngineError::ObserverGone(id))
    }
}
