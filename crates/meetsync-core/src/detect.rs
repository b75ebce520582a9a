//! Presence detection: an ordered, OR-combined battery of heuristics with a
//! grace window since the last positive reading.
//!
//! Each heuristic is a cheap structural check over an [`EnvironmentSnapshot`].
//! The first one that fires makes the verdict present. When none fires, the
//! verdict stays present until `grace` has elapsed since the last positive,
//! absorbing re-render flicker without touching the observer state machine.

use chrono::{DateTime, TimeDelta, Utc};

use crate::room::RoomId;
use crate::types::{CoreError, EnvironmentSnapshot, PresenceVerdict, VerdictReason};

/// Default grace window (milliseconds).
pub const DEFAULT_GRACE_WINDOW_MS: i64 = 10_000;

// ─── Heuristics ──────────────────────────────────────────────────

/// One independent presence signal.
pub trait Heuristic: Send + Sync {
    /// Stable name used in verdict reasons and logs.
    fn name(&self) -> &'static str;

    fn fires(&self, snapshot: &EnvironmentSnapshot) -> bool;
}

/// Adapter so a plain function can sit in the battery.
pub struct FnHeuristic {
    name: &'static str,
    check: fn(&EnvironmentSnapshot) -> bool,
}

impl FnHeuristic {
    pub const fn new(name: &'static str, check: fn(&EnvironmentSnapshot) -> bool) -> Self {
        Self { name, check }
    }
}

impl Heuristic for FnHeuristic {
    fn name(&self) -> &'static str {
        self.name
    }

    fn fires(&self, snapshot: &EnvironmentSnapshot) -> bool {
        (self.check)(snapshot)
    }
}

/// Control-label tokens for the microphone / camera toggles.
const MIC_TOKENS: &[&str] = &["microphone", "mic"];
const CAMERA_TOKENS: &[&str] = &["camera", "video"];
/// Control-label tokens for the explicit end-of-call action.
const END_CALL_TOKENS: &[&str] = &["leave call", "end call", "hang up", "leave meeting"];

fn any_label_contains(snapshot: &EnvironmentSnapshot, tokens: &[&str]) -> bool {
    snapshot.control_labels.iter().any(|label| {
        let lower = label.to_ascii_lowercase();
        tokens.iter().any(|t| lower.contains(t))
    })
}

fn primary_controls(snapshot: &EnvironmentSnapshot) -> bool {
    any_label_contains(snapshot, MIC_TOKENS) && any_label_contains(snapshot, CAMERA_TOKENS)
}

fn controls_bar(snapshot: &EnvironmentSnapshot) -> bool {
    snapshot.controls_bar
}

fn end_call_control(snapshot: &EnvironmentSnapshot) -> bool {
    any_label_contains(snapshot, END_CALL_TOKENS)
}

fn participant_indicators(snapshot: &EnvironmentSnapshot) -> bool {
    snapshot.participant_count > 0 || snapshot.video_count > 0
}

// URL alone is never sufficient: the pre-join lobby carries the same URL.
// Require at least a few rendered controls as structural corroboration.
fn url_with_structure(snapshot: &EnvironmentSnapshot) -> bool {
    RoomId::from_url(&snapshot.url).is_some() && snapshot.control_labels.len() >= 3
}

/// The fixed battery, in evaluation order.
pub fn default_heuristics() -> Vec<Box<dyn Heuristic>> {
    vec![
        Box::new(FnHeuristic::new("primary_controls", primary_controls)),
        Box::new(FnHeuristic::new("controls_bar", controls_bar)),
        Box::new(FnHeuristic::new("end_call_control", end_call_control)),
        Box::new(FnHeuristic::new("participant_indicators", participant_indicators)),
        Box::new(FnHeuristic::new("url_with_structure", url_with_structure)),
    ]
}

// ─── Detector ────────────────────────────────────────────────────

/// Fuses the heuristic battery into a single verdict.
///
/// The only mutable state is the last-positive timestamp, local to the
/// owning observer.
pub struct SignalDetector {
    heuristics: Vec<Box<dyn Heuristic>>,
    grace: TimeDelta,
    last_positive: Option<DateTime<Utc>>,
}

impl SignalDetector {
    pub fn new(heuristics: Vec<Box<dyn Heuristic>>, grace: TimeDelta) -> Result<Self, CoreError> {
        if grace < TimeDelta::zero() {
            return Err(CoreError::InvalidSetting(format!(
                "grace window must not be negative, got {grace}"
            )));
        }
        Ok(Self {
            heuristics,
            grace,
            last_positive: None,
        })
    }

    /// Detector with the default battery and the given grace window.
    pub fn with_grace_ms(grace_ms: i64) -> Result<Self, CoreError> {
        Self::new(default_heuristics(), TimeDelta::milliseconds(grace_ms))
    }

    pub fn grace(&self) -> TimeDelta {
        self.grace
    }

    pub fn last_positive(&self) -> Option<DateTime<Utc>> {
        self.last_positive
    }

    /// Evaluate `snapshot` as of `now`.
    ///
    /// `now` is passed separately from `snapshot.captured_at` so a poll can
    /// re-evaluate the latest snapshot after the grace window has run out.
    pub fn detect(&mut self, snapshot: &EnvironmentSnapshot, now: DateTime<Utc>) -> PresenceVerdict {
        if let Some(h) = self.heuristics.iter().find(|h| h.fires(snapshot)) {
            self.last_positive = Some(now);
            return PresenceVerdict {
                present: true,
                observed_at: now,
                reason: VerdictReason::Heuristic(h.name()),
            };
        }

        // Strict: a reading exactly `grace` after the last positive is absent.
        let within_grace = self
            .last_positive
            .is_some_and(|last| now.signed_duration_since(last) < self.grace);

        PresenceVerdict {
            present: within_grace,
            observed_at: now,
            reason: if within_grace {
                VerdictReason::Grace
            } else {
                VerdictReason::Absent
            },
        }
    }

    /// Forget the last positive (observer navigated to a fresh document).
    pub fn reset(&mut self) {
        self.last_positive = None;
    }
}

impl std::fmt::Debug for SignalDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalDetector")
            .field(
                "heuristics",
                &self.heuristics.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .field("grace", &self.grace)
            .field("last_positive", &self.last_positive)
            .finish()
    }
}

// ─── Tests ──────────────────────────────────────────────────────
