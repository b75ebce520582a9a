//! Per-observer driver task.
//!
//! Owns one detector, one state machine and one termination watch. Inputs
//! arrive over a channel from the control surface; the latest snapshot is
//! re-evaluated on every poll tick so the grace window can run out without
//! a fresh snapshot. Transitions go to the coordinator in detection order.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use meetsync_core::{
    EnvironmentSnapshot, ObserverId, ObserverPhase, ObserverStateMachine, RoomId, SignalDetector,
    TerminationCause, TerminationWatch, Transition, title,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::{DetectionConfig, MAX_DETECTION_MS};
use crate::coordinator::CoordinatorHandle;

#[derive(Debug)]
pub enum ObserverInput {
    Snapshot(EnvironmentSnapshot),
    /// The page changed; re-evaluate once it settles.
    Mutation,
    Unload,
    /// Replies once every earlier input has been handled.
    Flush(oneshot::Sender<()>),
    Teardown,
}

pub struct ObserverDriver {
    id: ObserverId,
    detector: SignalDetector,
    machine: ObserverStateMachine,
    watch: TerminationWatch,
    latest: Option<EnvironmentSnapshot>,
    /// Set after a forced termination; blocks rejoining while the cause persists.
    suspended: Option<TerminationCause>,
    coordinator: CoordinatorHandle,
    poll_interval: Duration,
    debounce: Duration,
    wall_origin: DateTime<Utc>,
    origin: Instant,
}

impl ObserverDriver {
    pub fn new(
        id: ObserverId,
        detection: &DetectionConfig,
        coordinator: CoordinatorHandle,
    ) -> Result<Self, meetsync_core::CoreError> {
        // Timings past a day are clipped so instant and delta arithmetic stays in range.
        let bounded = |ms: u64| ms.min(MAX_DETECTION_MS);
        Ok(Self {
            id,
            detector: SignalDetector::with_grace_ms(bounded(detection.grace_window_ms) as i64)?,
            machine: ObserverStateMachine::new(id),
            watch: TerminationWatch::new(TimeDelta::milliseconds(
                bounded(detection.hidden_timeout_ms) as i64,
            )),
            latest: None,
            suspended: None,
            coordinator,
            poll_interval: Duration::from_millis(bounded(detection.poll_interval_ms).max(1)),
            debounce: Duration::from_millis(bounded(detection.mutation_debounce_ms)),
            wall_origin: Utc::now(),
            origin: Instant::now(),
        })
    }

    pub fn phase(&self) -> ObserverPhase {
        self.machine.phase()
    }

    /// Wall-clock time derived from the tokio clock, so paused-time tests
    /// move detection time along with timers.
    fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.origin.elapsed()).unwrap_or(TimeDelta::zero());
        self.wall_origin + elapsed
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<ObserverInput>, cancel: CancellationToken) {
        debug!(observer = %self.id, "observer driver started");
        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let debounce = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(debounce);
        let mut debounce_armed = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.teardown();
                    break;
                }
                _ = &mut debounce, if debounce_armed => {
                    debounce_armed = false;
                    self.evaluate(self.now());
                }
                _ = poll.tick() => self.evaluate(self.now()),
                input = rx.recv() => match input {
                    Some(ObserverInput::Snapshot(snapshot)) => {
                        trace!(observer = %self.id, url = %snapshot.url, "snapshot");
                        self.latest = Some(snapshot);
                        self.evaluate(self.now());
                    }
                    Some(ObserverInput::Mutation) => {
                        debounce.as_mut().reset(Instant::now() + self.debounce);
                        debounce_armed = true;
                    }
                    Some(ObserverInput::Unload) => {
                        self.terminate(TerminationCause::Unload);
                        self.latest = None;
                    }
                    Some(ObserverInput::Flush(reply)) => {
                        let _ = reply.send(());
                    }
                    Some(ObserverInput::Teardown) | None => {
                        self.teardown();
                        break;
                    }
                },
            }
        }
        debug!(observer = %self.id, "observer driver stopped");
    }

    /// Evaluate the latest snapshot as of `now` and forward any transitions.
    pub fn evaluate(&mut self, now: DateTime<Utc>) {
        let Some(snapshot) = self.latest.as_ref() else {
            return;
        };

        if let Some(cause) = self.suspended {
            if cause.persists(snapshot) {
                return;
            }
            debug!(observer = %self.id, %cause, "termination cause cleared");
            self.suspended = None;
        }

        if self.machine.phase() == ObserverPhase::Present {
            let joined_room = self.machine.record().room_id.as_ref();
            if let Some(cause) = self.watch.check(snapshot, joined_room, now) {
                self.terminate(cause);
                return;
            }
        } else {
            self.watch.reset();
        }

        let verdict = self.detector.detect(snapshot, now);
        let room = RoomId::from_url(&snapshot.url);
        let label = title::extract(snapshot);
        trace!(observer = %self.id, present = verdict.present, reason = ?verdict.reason, "verdict");

        for transition in self.machine.step(&verdict, room, label) {
            info!(observer = %self.id, ?transition, "transition");
            self.coordinator.transition(self.id, transition);
        }
    }

    fn terminate(&mut self, cause: TerminationCause) {
        if let Some(Transition::Left { room }) = self.machine.teardown() {
            self.coordinator.forced_termination(self.id, room, cause);
        }
        self.detector.reset();
        self.watch.reset();
        self.suspended = Some(cause);
    }

    fn teardown(&mut self) {
        if let Some(left) = self.machine.teardown() {
            self.coordinator.transition(self.id, left);
        }
        self.coordinator.forget(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{Coordinator, CoordinatorCommand};
    use chrono::TimeDelta;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .expect("valid RFC3339")
            .with_timezone(&Utc)
    }

    fn in_call() -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            url: "https://meet.google.com/abc-defg-hij".into(),
            document_title: "Weekly Sync – Meet".into(),
            control_labels: vec!["Turn off microphone".into(), "Turn off camera".into()],
            controls_bar: true,
            visible: true,
            ..Default::default()
        }
    }

    fn driver_with(
        detection: DetectionConfig,
    ) -> (ObserverDriver, mpsc::UnboundedReceiver<CoordinatorCommand>) {
        let (handle, rx) = Coordinator::channel();
        let driver = ObserverDriver::new(ObserverId(1), &detection, handle).expect("driver");
        (driver, rx)
    }

    fn driver() -> (ObserverDriver, mpsc::UnboundedReceiver<CoordinatorCommand>) {
        driver_with(DetectionConfig {
            grace_window_ms: 2_000,
            hidden_timeout_ms: 5_000,
            ..DetectionConfig::default()
        })
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<CoordinatorCommand>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(command) = rx.try_recv() {
            out.push(match command {
                CoordinatorCommand::Transition { transition, .. } => match transition {
                    Transition::Joined { .. } => "joined".to_string(),
                    Transition::Left { .. } => "left".to_string(),
                    Transition::TitleChanged { .. } => "title_changed".to_string(),
                },
                CoordinatorCommand::ForcedTermination { cause, .. } => format!("forced:{cause}"),
                CoordinatorCommand::Forget { .. } => "forget".to_string(),
                other => format!("{other:?}"),
            });
        }
        out
    }

    // ── 1. Evaluation ────────────────────────────────────────────

    #[test]
    fn join_then_grace_expiry_leaves() {
        let (mut d, mut rx) = driver();
        d.latest = Some(in_call());
        d.evaluate(t0());
        assert_eq!(drain(&mut rx), vec!["joined"]);

        d.latest = Some(EnvironmentSnapshot {
            url: "https://meet.google.com/abc-defg-hij".into(),
            visible: true,
            ..Default::default()
        });
        d.evaluate(t0() + TimeDelta::seconds(1));
        assert!(drain(&mut rx).is_empty(), "inside grace");
        d.evaluate(t0() + TimeDelta::seconds(2));
        assert_eq!(drain(&mut rx), vec!["left"]);
    }

    #[test]
    fn no_snapshot_no_events() {
        let (mut d, mut rx) = driver();
        d.evaluate(t0());
        assert!(drain(&mut rx).is_empty());
    }

    // ── 2. Forced termination ────────────────────────────────────

    #[test]
    fn disconnect_text_forces_termination_once() {
        let (mut d, mut rx) = driver();
        d.latest = Some(in_call());
        d.evaluate(t0());
        drain(&mut rx);

        let mut ended = in_call();
        ended.body_text = "You left the meeting".into();
        d.latest = Some(ended);
        d.evaluate(t0() + TimeDelta::seconds(1));
        assert_eq!(drain(&mut rx), vec!["forced:disconnect_text"]);

        d.evaluate(t0() + TimeDelta::seconds(2));
        assert!(drain(&mut rx).is_empty(), "suspended while text persists");
    }

    #[test]
    fn hidden_tab_terminates_and_rejoins_when_visible() {
        let (mut d, mut rx) = driver();
        d.latest = Some(in_call());
        d.evaluate(t0());
        drain(&mut rx);

        let mut hidden = in_call();
        hidden.visible = false;
        d.latest = Some(hidden);
        d.evaluate(t0() + TimeDelta::seconds(1));
        d.evaluate(t0() + TimeDelta::seconds(6));
        assert_eq!(drain(&mut rx), vec!["forced:hidden_timeout"]);

        d.evaluate(t0() + TimeDelta::seconds(8));
        assert!(drain(&mut rx).is_empty());

        d.latest = Some(in_call());
        d.evaluate(t0() + TimeDelta::seconds(9));
        assert_eq!(drain(&mut rx), vec!["joined"]);
    }

    #[test]
    fn roomless_session_stays_joined() {
        let (mut d, mut rx) = driver();
        let mut snapshot = in_call();
        snapshot.url = "https://meet.google.com/lookup/team-standup".into();
        d.latest = Some(snapshot);

        d.evaluate(t0());
        d.evaluate(t0() + TimeDelta::seconds(2));
        d.evaluate(t0() + TimeDelta::seconds(4));
        assert_eq!(drain(&mut rx), vec!["joined"]);
        assert_eq!(d.phase(), ObserverPhase::Present);
    }

    #[test]
    fn leaving_joined_room_url_terminates() {
        let (mut d, mut rx) = driver();
        d.latest = Some(in_call());
        d.evaluate(t0());
        drain(&mut rx);

        let mut home = in_call();
        home.url = "https://meet.google.com/landing".into();
        d.latest = Some(home);
        d.evaluate(t0() + TimeDelta::seconds(1));
        assert_eq!(drain(&mut rx), vec!["forced:left_room_url"]);
    }

    #[test]
    fn teardown_leaves_then_forgets() {
        let (mut d, mut rx) = driver();
        d.latest = Some(in_call());
        d.evaluate(t0());
        drain(&mut rx);

        d.teardown();
        assert_eq!(drain(&mut rx), vec!["left", "forget"]);
    }

    // ── 3. Task loop ─────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn poll_expires_grace_without_new_snapshot() {
        let (d, mut crx) = driver();
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(d.run(rx, cancel.clone()));

        tx.send(ObserverInput::Snapshot(in_call())).await.expect("send");
        tx.send(ObserverInput::Snapshot(EnvironmentSnapshot {
            url: "https://meet.google.com/abc-defg-hij".into(),
            visible: true,
            ..Default::default()
        }))
        .await
        .expect("send");
        let (reply, done) = oneshot::channel();
        tx.send(ObserverInput::Flush(reply)).await.expect("send");
        done.await.expect("flush");
        assert_eq!(drain(&mut crx), vec!["joined"]);

        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(drain(&mut crx), vec!["left"]);

        cancel.cancel();
        task.await.expect("driver task");
        assert_eq!(drain(&mut crx), vec!["forget"]);
    }

    #[tokio::test(start_paused = true)]
    async fn extreme_timings_are_clipped_to_a_day() {
        let (d, mut crx) = driver_with(DetectionConfig {
            poll_interval_ms: u64::MAX,
            mutation_debounce_ms: u64::MAX,
            grace_window_ms: u64::MAX,
            hidden_timeout_ms: u64::MAX,
        });
        assert_eq!(d.debounce, Duration::from_millis(MAX_DETECTION_MS));
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(d.run(rx, CancellationToken::new()));

        tx.send(ObserverInput::Snapshot(in_call())).await.expect("send");
        tx.send(ObserverInput::Mutation).await.expect("send");
        let (reply, done) = oneshot::channel();
        tx.send(ObserverInput::Flush(reply)).await.expect("send");
        done.await.expect("flush");
        assert_eq!(drain(&mut crx), vec!["joined"]);

        tx.send(ObserverInput::Teardown).await.expect("send");
        task.await.expect("driver task");
        assert_eq!(drain(&mut crx), vec!["left", "forget"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unload_terminates_and_drops_snapshot() {
        let (d, mut crx) = driver();
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(d.run(rx, CancellationToken::new()));

        tx.send(ObserverInput::Snapshot(in_call())).await.expect("send");
        tx.send(ObserverInput::Unload).await.expect("send");
        let (reply, done) = oneshot::channel();
        tx.send(ObserverInput::Flush(reply)).await.expect("send");
        done.await.expect("flush");
        assert_eq!(drain(&mut crx), vec!["joined", "forced:unload"]);

        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(drain(&mut crx).is_empty(), "no rejoin from a stale snapshot");

        tx.send(ObserverInput::Teardown).await.expect("send");
        task.await.expect("driver task");
        assert_eq!(drain(&mut crx), vec!["forget"]);
    }
}
