//! Presence coordinator: the single writer of remote status.
//!
//! All observers funnel their transitions through one actor so the
//! "is anyone else still present?" check and the clear that follows it can
//! never interleave with another observer's join or leave.
//!
//! Remote calls issued here:
//! - **Join**: `set_custom_status(text, emoji, duration)` then `set_status(present)`,
//!   once per (observer, room) until that observer leaves.
//! - **Enrichment**: one follow-up `set_custom_status("text (label)")` when a
//!   meaningful title shows up after the join.
//! - **Clear**: `set_status(baseline)` then `clear_custom_status()`, only when
//!   the last present observer leaves.
//!
//! Failures are logged and absorbed. Auth failures mark the credentials
//! invalid in the [`ConfigStore`], which pauses all remote calls.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use meetsync_core::{ActivityLabel, ObserverId, RoomId, TerminationCause, Transition};
use meetsync_status::{PresenceServiceClient, StatusError};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigStore, PresenceConfig};
use crate::store::PersistentStore;

/// Store key for rooms whose status is currently applied remotely.
pub const APPLIED_ROOMS_KEY: &str = "applied_rooms";

/// How often a failed clear is retried while nobody is present.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObserverEntry {
    pub present: bool,
    pub room: Option<RoomId>,
    pub label: Option<ActivityLabel>,
    /// This observer's join reached the service (or was covered by another observer's).
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRoom {
    pub observer: ObserverId,
    pub applied_at: DateTime<Utc>,
}

type AppliedRooms = BTreeMap<String, AppliedRoom>;

/// Point-in-time view of the coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub observers: BTreeMap<ObserverId, ObserverEntry>,
    pub present_count: usize,
    pub pending_enrichments: Vec<(ObserverId, Option<RoomId>)>,
    pub pending_clear: bool,
}

pub struct Coordinator {
    client: Arc<dyn PresenceServiceClient>,
    store: Arc<dyn PersistentStore>,
    config: Arc<ConfigStore>,
    registry: BTreeMap<ObserverId, ObserverEntry>,
    /// One-shot label enrichment subscriptions.
    enrichments: BTreeSet<(ObserverId, Option<RoomId>)>,
    pending_clear: bool,
}

impl Coordinator {
    pub fn new(
        client: Arc<dyn PresenceServiceClient>,
        store: Arc<dyn PersistentStore>,
        config: Arc<ConfigStore>,
    ) -> Self {
        Self {
            client,
            store,
            config,
            registry: BTreeMap::new(),
            enrichments: BTreeSet::new(),
            pending_clear: false,
        }
    }

    pub fn register(&mut self, observer: ObserverId) {
        self.registry.entry(observer).or_default();
    }

    /// Drop a torn-down observer. Its `Left` must already have been handled.
    pub fn forget(&mut self, observer: ObserverId) {
        self.registry.remove(&observer);
        self.enrichments.retain(|(id, _)| *id != observer);
    }

    pub async fn handle_transition(&mut self, observer: ObserverId, transition: Transition) {
        match transition {
            Transition::Joined { room, label } => self.on_joined(observer, room, label).await,
            Transition::Left { room } => self.on_left(observer, room).await,
            Transition::TitleChanged { room, label } => {
                self.on_title_changed(observer, room, label).await
            }
        }
    }

    pub async fn on_joined(
        &mut self,
        observer: ObserverId,
        room: Option<RoomId>,
        label: ActivityLabel,
    ) {
        info!(%observer, room = ?room.as_ref().map(RoomId::as_str), %label, "joined");

        let covered = room.is_some()
            && self
                .registry
                .iter()
                .any(|(id, e)| *id != observer && e.present && e.applied && e.room == room);

        let entry = self.registry.entry(observer).or_default();
        entry.present = true;
        entry.room = room.clone();
        entry.label = Some(label.clone());
        entry.applied = covered;
        self.pending_clear = false;

        if covered {
            debug!(%observer, "room already applied by another observer, skipping remote join");
            return;
        }
        let Some(cfg) = self.remote_config() else {
            return;
        };

        let immediate = cfg.show_activity_label && label.is_meaningful(room.as_ref());
        let text = if immediate {
            enriched_text(&cfg.status_text, &label)
        } else {
            cfg.status_text.clone()
        };

        let result = async {
            self.client
                .set_custom_status(&text, &cfg.emoji, cfg.status_duration_seconds)
                .await?;
            self.client.set_status(cfg.present_status).await
        }
        .await;

        match result {
            Ok(()) => {
                if let Some(entry) = self.registry.get_mut(&observer) {
                    entry.applied = true;
                }
                if cfg.show_activity_label && !immediate {
                    self.enrichments.insert((observer, room.clone()));
                }
                if let Some(room) = &room {
                    self.record_applied(observer, room).await;
                }
                info!(%observer, status = %cfg.present_status, %text, "meeting status applied");
            }
            Err(e) => self.report("join", &e),
        }
    }

    pub async fn on_title_changed(
        &mut self,
        observer: ObserverId,
        room: Option<RoomId>,
        label: ActivityLabel,
    ) {
        debug!(%observer, %label, "title changed");
        if let Some(entry) = self.registry.get_mut(&observer) {
            entry.label = Some(label.clone());
        }

        let key = (observer, room);
        if !self.enrichments.contains(&key) || !label.is_meaningful(key.1.as_ref()) {
            return;
        }
        let Some(cfg) = self.remote_config() else {
            return;
        };

        let text = enriched_text(&cfg.status_text, &label);
        match self
            .client
            .set_custom_status(&text, &cfg.emoji, cfg.status_duration_seconds)
            .await
        {
            Ok(()) => {
                self.enrichments.remove(&key);
                info!(%observer, %text, "status enriched with activity label");
            }
            Err(e) => self.report("enrich", &e),
        }
    }

    pub async fn on_left(&mut self, observer: ObserverId, room: Option<RoomId>) {
        let was_present = self
            .registry
            .get(&observer)
            .is_some_and(|entry| entry.present);
        self.enrichments.retain(|(id, _)| *id != observer);
        if let Some(entry) = self.registry.get_mut(&observer) {
            *entry = ObserverEntry::default();
        }
        if !was_present {
            return;
        }
        info!(%observer, room = ?room.as_ref().map(RoomId::as_str), "left");

        if self.registry.values().any(|e| e.present) {
            debug!(%observer, "other observers still present, keeping status");
            self.release_applied(observer).await;
            return;
        }

        self.clear_remote().await;
    }

    /// Best-effort cleanup for an observer that vanished without a clean leave.
    pub async fn on_forced_termination(
        &mut self,
        observer: ObserverId,
        room: Option<RoomId>,
        cause: TerminationCause,
    ) {
        warn!(%observer, %cause, "forced termination");
        self.on_left(observer, room).await;
    }

    /// Retry a clear that failed earlier, if nobody has become present since.
    pub async fn retry_pending(&mut self) {
        if !self.pending_clear || self.registry.values().any(|e| e.present) {
            return;
        }
        debug!("retrying pending clear");
        self.clear_remote().await;
    }

    /// A previous run died while present: put the baseline back.
    pub async fn recover_stale(&mut self) {
        let applied = self.load_applied().await;
        if applied.is_empty() {
            return;
        }
        warn!(
            rooms = ?applied.keys().collect::<Vec<_>>(),
            "status left applied by a previous run, clearing"
        );
        self.clear_remote().await;
    }

    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            observers: self.registry.clone(),
            present_count: self.registry.values().filter(|e| e.present).count(),
            pending_enrichments: self.enrichments.iter().cloned().collect(),
            pending_clear: self.pending_clear,
        }
    }

    async fn clear_remote(&mut self) {
        let Some(cfg) = self.remote_config() else {
            // Credentials are gone: remember the clear for when they come back.
            self.pending_clear = !self.config.credentials_valid();
            return;
        };

        let result = async {
            self.client.set_status(cfg.baseline_status).await?;
            self.client.clear_custom_status().await
        }
        .await;

        match result {
            Ok(()) => {
                self.pending_clear = false;
                if let Err(e) = self.store.remove(APPLIED_ROOMS_KEY).await {
                    warn!("failed to reset applied rooms: {e}");
                }
                info!(status = %cfg.baseline_status, "meeting status cleared");
            }
            Err(e) => {
                self.pending_clear = true;
                self.report("clear", &e);
            }
        }
    }

    /// Config snapshot if remote calls are currently allowed.
    fn remote_config(&self) -> Option<PresenceConfig> {
        let cfg = self.config.current();
        if !cfg.presence_integration_enabled {
            debug!("presence integration disabled, skipping remote call");
            return None;
        }
        if !self.config.credentials_valid() {
            debug!("credentials invalid, skipping remote call");
            return None;
        }
        Some(cfg)
    }

    fn report(&self, op: &str, e: &StatusError) {
        if e.is_auth_error() {
            error!(op, "status service auth failure: {e}");
            self.config.invalidate_credentials();
        } else {
            warn!(op, "status service call failed: {e}");
        }
    }

    async fn load_applied(&self) -> AppliedRooms {
        match self.store.get(APPLIED_ROOMS_KEY).await {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!("discarding unreadable applied rooms record: {e}");
                AppliedRooms::new()
            }),
            Ok(None) => AppliedRooms::new(),
            Err(e) => {
                warn!("failed to read applied rooms: {e}");
                AppliedRooms::new()
            }
        }
    }

    async fn save_applied(&self, applied: &AppliedRooms) {
        let result = match serde_json::to_value(applied) {
            Ok(value) => self.store.set(APPLIED_ROOMS_KEY, value).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!("failed to persist applied rooms: {e}");
        }
    }

    async fn record_applied(&self, observer: ObserverId, room: &RoomId) {
        let mut applied = self.load_applied().await;
        applied.insert(
            room.to_string(),
            AppliedRoom {
                observer,
                applied_at: Utc::now(),
            },
        );
        self.save_applied(&applied).await;
    }

    /// Hand rooms held by `observer` to another observer still present in the
    /// same room; drop the rest. The remote status stays applied for the heir,
    /// so the record must too.
    async fn release_applied(&self, observer: ObserverId) {
        let mut applied = self.load_applied().await;
        let mut changed = false;
        applied.retain(|room, entry| {
            if entry.observer != observer {
                return true;
            }
            changed = true;
            let heir = self
                .registry
                .iter()
                .find(|(id, e)| {
                    **id != observer
                        && e.present
                        && e.room.as_ref().is_some_and(|r| r.as_str() == room)
                })
                .map(|(id, _)| *id);
            match heir {
                Some(id) => {
                    debug!(%observer, heir = %id, room, "applied room handed over");
                    entry.observer = id;
                    true
                }
                None => false,
            }
        });
        if changed {
            self.save_applied(&applied).await;
        }
    }
}

/// `"In a meeting"` + `"Weekly Sync"` → `"In a meeting (Weekly Sync)"`.
pub fn enriched_text(base: &str, label: &ActivityLabel) -> String {
    format!("{base} ({})", label.text)
}

// ─── Actor ───────────────────────────────────────────────────────

#[derive(Debug)]
pub enum CoordinatorCommand {
    Register {
        observer: ObserverId,
    },
    Forget {
        observer: ObserverId,
    },
    Transition {
        observer: ObserverId,
        transition: Transition,
    },
    ForcedTermination {
        observer: ObserverId,
        room: Option<RoomId>,
        cause: TerminationCause,
    },
    RetryPending,
    Status {
        reply: oneshot::Sender<CoordinatorStatus>,
    },
}

/// Cheap, cloneable sender side of the coordinator actor.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<CoordinatorCommand>,
}

impl CoordinatorHandle {
    fn send(&self, command: CoordinatorCommand) {
        if self.tx.send(command).is_err() {
            debug!("coordinator stopped, dropping command");
        }
    }

    pub fn register(&self, observer: ObserverId) {
        self.send(CoordinatorCommand::Register { observer });
    }

    pub fn forget(&self, observer: ObserverId) {
        self.send(CoordinatorCommand::Forget { observer });
    }

    pub fn transition(&self, observer: ObserverId, transition: Transition) {
        self.send(CoordinatorCommand::Transition {
            observer,
            transition,
        });
    }

    /// Fire-and-forget: enqueues the cleanup and returns immediately.
    pub fn forced_termination(
        &self,
        observer: ObserverId,
        room: Option<RoomId>,
        cause: TerminationCause,
    ) {
        self.send(CoordinatorCommand::ForcedTermination {
            observer,
            room,
            cause,
        });
    }

    pub fn retry_pending(&self) {
        self.send(CoordinatorCommand::RetryPending);
    }

    /// Status after every command sent before this call has been handled.
    pub async fn status(&self) -> Option<CoordinatorStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(CoordinatorCommand::Status { reply });
        rx.await.ok()
    }
}

impl Coordinator {
    pub fn channel() -> (CoordinatorHandle, mpsc::UnboundedReceiver<CoordinatorCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CoordinatorHandle { tx }, rx)
    }

    /// Main event loop. Drains queued commands before honouring cancellation.
    pub async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<CoordinatorCommand>,
        cancel: CancellationToken,
    ) {
        info!("coordinator: event loop started");
        let mut retry = tokio::time::interval_at(
            tokio::time::Instant::now() + RETRY_INTERVAL,
            RETRY_INTERVAL,
        );
        retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                command = rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            info!("coordinator: channel closed, shutting down");
                            break;
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    info!("coordinator: cancellation requested, shutting down");
                    break;
                }
                _ = retry.tick() => self.retry_pending().await,
            }
        }
    }

    async fn handle_command(&mut self, command: CoordinatorCommand) {
        match command {
            CoordinatorCommand::Register { observer } => self.register(observer),
            CoordinatorCommand::Forget { observer } => self.forget(observer),
            CoordinatorCommand::Transition {
                observer,
                transition,
            } => self.handle_transition(observer, transition).await,
            CoordinatorCommand::ForcedTermination {
                observer,
                room,
                cause,
            } => self.on_forced_termination(observer, room, cause).await,
            CoordinatorCommand::RetryPending => self.retry_pending().await,
            CoordinatorCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────
