//! Per-observer state machine: verdicts in, transition events out.
//!
//! - **Join**: `Idle → Present` on the first present verdict emits `Joined`.
//! - **Leave**: `Present → Idle` on an absent verdict emits `Left`. Flicker
//!   is already absorbed upstream by the detector grace window.
//! - **Retitle**: a label change while present in the same room emits
//!   `TitleChanged`. A synthetic label never replaces an extracted one.
//! - **Room switch**: a present verdict for a different room emits
//!   `Left(old)` then `Joined(new)` with no absent reading in between.
//! - **Re-entrancy guard**: `Joined` is suppressed when the record already
//!   shows the status applied for that room.

use serde::Serialize;

use crate::room::RoomId;
use crate::types::{ActivityLabel, ObserverId, PresenceVerdict, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObserverPhase {
    Idle,
    Present,
}

/// State owned by exactly one observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObserverRecord {
    pub observer_id: ObserverId,
    pub is_present: bool,
    pub label: Option<ActivityLabel>,
    pub room_id: Option<RoomId>,
    /// Room whose `Joined` has already been emitted and not yet left.
    pub status_applied_for_room: Option<RoomId>,
}

impl ObserverRecord {
    pub fn new(observer_id: ObserverId) -> Self {
        Self {
            observer_id,
            is_present: false,
            label: None,
            room_id: None,
            status_applied_for_room: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObserverStateMachine {
    record: ObserverRecord,
}

impl ObserverStateMachine {
    pub fn new(observer_id: ObserverId) -> Self {
        Self::from_record(ObserverRecord::new(observer_id))
    }

    /// Resume from an existing record (bridge reconnect for the same tab).
    pub fn from_record(record: ObserverRecord) -> Self {
        Self { record }
    }

    pub fn record(&self) -> &ObserverRecord {
        &self.record
    }

    pub fn phase(&self) -> ObserverPhase {
        if self.record.is_present {
            ObserverPhase::Present
        } else {
            ObserverPhase::Idle
        }
    }

    /// Feed one verdict with the room and label observed alongside it.
    ///
    /// Returns the transitions in the order they must be processed.
    pub fn step(
        &mut self,
        verdict: &PresenceVerdict,
        room: Option<RoomId>,
        label: ActivityLabel,
    ) -> Vec<Transition> {
        let mut out = Vec::new();

        if !verdict.present {
            if let Some(left) = self.leave() {
                out.push(left);
            }
            return out;
        }

        if !self.record.is_present {
            if let Some(joined) = self.join(room, label) {
                out.push(joined);
            }
            return out;
        }

        match (self.record.room_id.clone(), room) {
            (Some(current), Some(next)) if current != next => {
                if let Some(left) = self.leave() {
                    out.push(left);
                }
                if let Some(joined) = self.join(Some(next), label) {
                    out.push(joined);
                }
            }
            (None, Some(next)) => {
                // Room became known mid-session: adopt it, the status is already applied.
                self.record.status_applied_for_room = Some(next.clone());
                self.record.room_id = Some(next);
                out.extend(self.retitle(label));
            }
            // Same room, or the URL momentarily lost its code: stay put.
            _ => out.extend(self.retitle(label)),
        }

        out
    }

    /// Observer is going away gracefully. Emits `Left` if it was present.
    pub fn teardown(&mut self) -> Option<Transition> {
        self.leave()
    }

    fn join(&mut self, room: Option<RoomId>, label: ActivityLabel) -> Option<Transition> {
        self.record.is_present = true;
        self.record.label = Some(label.clone());
        self.record.room_id = room.clone();

        if room.is_some() && self.record.status_applied_for_room == room {
            return None;
        }
        self.record.status_applied_for_room = room.clone();
        Some(Transition::Joined { room, label })
    }

    fn leave(&mut self) -> Option<Transition> {
        if !self.record.is_present {
            return None;
        }
        let room = self.record.room_id.take();
        self.record.is_present = false;
        self.record.label = None;
        self.record.status_applied_for_room = None;
        Some(Transition::Left { room })
    }

    fn retitle(&mut self, label: ActivityLabel) -> Option<Transition> {
        if self.record.label.as_ref() == Some(&label) {
            return None;
        }
        // A re-rendering page briefly loses its title; keep the real one.
        if label.source.is_synthetic()
            && self
                .record
                .label
                .as_ref()
                .is_some_and(|current| !current.source.is_synthetic())
        {
            return None;
        }
        self.record.label = Some(label.clone());
        Some(Transition::TitleChanged {
            room: self.record.room_id.clone(),
            label,
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
