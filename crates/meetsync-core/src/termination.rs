//! Forced-termination triggers: signs that an observer is gone (or about to
//! be) without a clean absent reading.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::room::RoomId;
use crate::types::EnvironmentSnapshot;

/// Default visibility-loss timeout (milliseconds).
pub const DEFAULT_HIDDEN_TIMEOUT_MS: i64 = 60_000;

/// Page text shown once the user is out of the call.
const DISCONNECT_PHRASES: &[&str] = &[
    "you left the meeting",
    "you've been removed from the meeting",
    "you have been removed from the meeting",
    "return to home screen",
    "the call ended",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCause {
    /// Bridge reported the document is unloading.
    Unload,
    /// Document hidden for longer than the visibility timeout.
    HiddenTimeout,
    /// Disconnect text rendered in the page.
    DisconnectText,
    /// URL no longer carries a room code.
    LeftRoomUrl,
}

impl TerminationCause {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unload => "unload",
            Self::HiddenTimeout => "hidden_timeout",
            Self::DisconnectText => "disconnect_text",
            Self::LeftRoomUrl => "left_room_url",
        }
    }

    /// Whether `snapshot` still shows the condition that caused the
    /// termination. While it does, the observer must not rejoin.
    pub fn persists(self, snapshot: &EnvironmentSnapshot) -> bool {
        match self {
            Self::Unload => false,
            Self::HiddenTimeout => !snapshot.visible,
            Self::DisconnectText => has_disconnect_text(&snapshot.body_text),
            Self::LeftRoomUrl => RoomId::from_url(&snapshot.url).is_none(),
        }
    }
}

impl std::fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks how long an observer has been hidden and checks the other triggers.
#[derive(Debug, Clone)]
pub struct TerminationWatch {
    hidden_timeout: TimeDelta,
    hidden_since: Option<DateTime<Utc>>,
}

impl TerminationWatch {
    pub fn new(hidden_timeout: TimeDelta) -> Self {
        Self {
            hidden_timeout,
            hidden_since: None,
        }
    }

    /// Check `snapshot` as of `now`. Only meaningful while the observer is present.
    ///
    /// `room` is the room the observer joined. A session joined without a
    /// room code never trips the room-URL trigger.
    pub fn check(
        &mut self,
        snapshot: &EnvironmentSnapshot,
        room: Option<&RoomId>,
        now: DateTime<Utc>,
    ) -> Option<TerminationCause> {
        if snapshot.visible {
            self.hidden_since = None;
        } else {
            let since = *self.hidden_since.get_or_insert(now);
            if now.signed_duration_since(since) >= self.hidden_timeout {
                return Some(TerminationCause::HiddenTimeout);
            }
        }

        if has_disconnect_text(&snapshot.body_text) {
            return Some(TerminationCause::DisconnectText);
        }

        if room.is_some() && RoomId::from_url(&snapshot.url).is_none() {
            return Some(TerminationCause::LeftRoomUrl);
        }

        None
    }

    pub fn reset(&mut self) {
        self.hidden_since = None;
    }
}

pub fn has_disconnect_text(body: &str) -> bool {
    let lower = body.to_lowercase().replace('\u{2019}', "'");
    DISCONNECT_PHRASES.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .expect("valid RFC3339")
            .with_timezone(&Utc)
    }

    fn joined() -> Option<&'static RoomId> {
        static ROOM: std::sync::LazyLock<RoomId> =
            std::sync::LazyLock::new(|| RoomId::parse("abc-defg-hij").expect("valid room"));
        Some(&ROOM)
    }

    fn in_room() -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            url: "https://meet.google.com/abc-defg-hij".into(),
            visible: true,
            ..Default::default()
        }
    }

    #[test]
    fn healthy_snapshot_has_no_cause() {
        let mut watch = TerminationWatch::new(TimeDelta::seconds(60));
        assert_eq!(watch.check(&in_room(), joined(), t0()), None);
    }

    #[test]
    fn hidden_beyond_timeout_terminates() {
        let mut watch = TerminationWatch::new(TimeDelta::seconds(60));
        let mut hidden = in_room();
        hidden.visible = false;

        assert_eq!(watch.check(&hidden, joined(), t0()), None);
        assert_eq!(watch.check(&hidden, joined(), t0() + TimeDelta::seconds(59)), None);
        assert_eq!(
            watch.check(&hidden, joined(), t0() + TimeDelta::seconds(60)),
            Some(TerminationCause::HiddenTimeout)
        );
    }

    #[test]
    fn becoming_visible_resets_hidden_clock() {
        let mut watch = TerminationWatch::new(TimeDelta::seconds(60));
        let mut hidden = in_room();
        hidden.visible = false;

        watch.check(&hidden, joined(), t0());
        watch.check(&in_room(), joined(), t0() + TimeDelta::seconds(30));
        assert_eq!(watch.check(&hidden, joined(), t0() + TimeDelta::seconds(70)), None);
    }

    #[test]
    fn disconnect_text_terminates() {
        let mut watch = TerminationWatch::new(TimeDelta::seconds(60));
        let mut snap = in_room();
        snap.body_text = "You\u{2019}ve been removed from the meeting".into();
        assert_eq!(
            watch.check(&snap, joined(), t0()),
            Some(TerminationCause::DisconnectText)
        );
    }

    #[test]
    fn hidden_cause_persists_until_visible() {
        let mut hidden = in_room();
        hidden.visible = false;
        assert!(TerminationCause::HiddenTimeout.persists(&hidden));
        assert!(!TerminationCause::HiddenTimeout.persists(&in_room()));
        assert!(!TerminationCause::Unload.persists(&hidden));
    }

    #[test]
    fn leaving_room_url_terminates() {
        let mut watch = TerminationWatch::new(TimeDelta::seconds(60));
        let snap = EnvironmentSnapshot {
            url: "https://meet.google.com/landing".into(),
            visible: true,
            ..Default::default()
        };
        assert_eq!(watch.check(&snap, joined(), t0()), Some(TerminationCause::LeftRoomUrl));
    }

    #[test]
    fn roomless_session_never_trips_room_url() {
        let mut watch = TerminationWatch::new(TimeDelta::seconds(60));
        let snap = EnvironmentSnapshot {
            url: "https://meet.google.com/lookup/team-standup".into(),
            visible: true,
            ..Default::default()
        };
        assert_eq!(watch.check(&snap, None, t0()), None);
        assert_eq!(watch.check(&snap, None, t0() + TimeDelta::seconds(4)), None);
    }
}
