use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─── Errors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("invalid room identifier: {0}")]
    InvalidRoom(String),
    #[error("invalid status value: {0}")]
    InvalidStatus(String),
    #[error("invalid detector setting: {0}")]
    InvalidSetting(String),
}

// ─── Remote status value ──────────────────────────────────────────

/// Presence value understood by the remote status service.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusValue {
    #[default]
    Online,
    Away,
    Dnd,
    Offline,
}

impl StatusValue {
    pub const ALL: [Self; 4] = [Self::Online, Self::Away, Self::Dnd, Self::Offline];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Away => "away",
            Self::Dnd => "dnd",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusValue {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "away" => Ok(Self::Away),
            "dnd" => Ok(Self::Dnd),
            "offline" => Ok(Self::Offline),
            _ => Err(CoreError::InvalidStatus(s.to_string())),
        }
    }
}

// ─── Observer identity ────────────────────────────────────────────

/// Identifier of one observation context (one browser tab).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObserverId(pub u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obs-{}", self.0)
    }
}

// ─── Verdict ──────────────────────────────────────────────────────

/// Why the detector reached its verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "heuristic", rename_all = "snake_case")]
pub enum VerdictReason {
    /// A heuristic fired on this snapshot.
    Heuristic(&'static str),
    /// No heuristic fired, but the last positive is still inside the grace window.
    Grace,
    /// No heuristic fired and the grace window has elapsed.
    Absent,
}

/// Single presence verdict for one snapshot. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PresenceVerdict {
    pub present: bool,
    pub observed_at: DateTime<Utc>,
    pub reason: VerdictReason,
}

// ─── Activity label ───────────────────────────────────────────────

/// Which extraction strategy produced a label, in priority order.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LabelSource {
    ExplicitElement,
    PageTitlePattern,
    StructuredAttribute,
    UrlParameter,
    RoomIdFallback,
    #[default]
    Default,
}

impl LabelSource {
    /// Labels from these sources carry no information beyond the room itself.
    pub fn is_synthetic(self) -> bool {
        matches!(self, Self::RoomIdFallback | Self::Default)
    }
}

/// Human-readable activity label. Equality is by text only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLabel {
    pub text: String,
    pub source: LabelSource,
}

impl ActivityLabel {
    pub fn new(text: impl Into<String>, source: LabelSource) -> Self {
        Self {
            text: text.into(),
            source,
        }
    }

    /// Whether this label says something the room code does not.
    pub fn is_meaningful(&self, room: Option<&crate::room::RoomId>) -> bool {
        if self.source.is_synthetic() || self.text.trim().is_empty() {
            return false;
        }
        if crate::room::is_room_code(self.text.trim()) {
            return false;
        }
        room.is_none_or(|r| !self.text.eq_ignore_ascii_case(r.as_str()))
    }
}

impl PartialEq for ActivityLabel {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for ActivityLabel {}

impl fmt::Display for ActivityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// ─── Environment snapshot ─────────────────────────────────────────

fn default_visible() -> bool {
    true
}

/// Read-only snapshot of one observer's environment, as pushed by the bridge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub url: String,
    #[serde(default)]
    pub document_title: String,
    /// Accessible labels of the visible controls (buttons, toggles).
    #[serde(default)]
    pub control_labels: Vec<String>,
    /// Whether the bottom controls bar is rendered.
    #[serde(default)]
    pub controls_bar: bool,
    #[serde(default)]
    pub video_count: u32,
    #[serde(default)]
    pub participant_count: u32,
    /// Text of the explicit meeting-title element, if rendered.
    #[serde(default)]
    pub label_element: Option<String>,
    /// Texts of nodes carrying a structured meeting-title attribute.
    #[serde(default)]
    pub structured_labels: Vec<String>,
    /// Visible page text (truncated by the bridge).
    #[serde(default)]
    pub body_text: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default = "Utc::now")]
    pub captured_at: DateTime<Utc>,
}

// ─── Transitions ──────────────────────────────────────────────────

/// Event emitted by an observer state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    Joined {
        room: Option<crate::room::RoomId>,
        label: ActivityLabel,
    },
    Left {
        room: Option<crate::room::RoomId>,
    },
    TitleChanged {
        room: Option<crate::room::RoomId>,
        label: ActivityLabel,
    },
}

impl Transition {
    pub fn room(&self) -> Option<&crate::room::RoomId> {
        match self {
            Self::Joined { room, .. } | Self::Left { room } | Self::TitleChanged { room, .. } => {
                room.as_ref()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::RoomId;

    #[test]
    fn status_value_round_trips_through_str() {
        for value in StatusValue::ALL {
            assert_eq!(value.as_str().parse::<StatusValue>(), Ok(value));
        }
        assert_eq!("DND".parse::<StatusValue>(), Ok(StatusValue::Dnd));
        assert!("busy".parse::<StatusValue>().is_err());
    }

    #[test]
    fn label_equality_ignores_source() {
        let a = ActivityLabel::new("Weekly Sync", LabelSource::PageTitlePattern);
        let b = ActivityLabel::new("Weekly Sync", LabelSource::ExplicitElement);
        assert_eq!(a, b);
        assert_ne!(a, ActivityLabel::new("Standup", LabelSource::PageTitlePattern));
    }

    #[test]
    fn room_code_label_is_not_meaningful() {
        let room = RoomId::parse("abc-defg-hij").expect("valid room");
        let code = ActivityLabel::new("abc-defg-hij", LabelSource::PageTitlePattern);
        assert!(!code.is_meaningful(Some(&room)));

        let fallback = ActivityLabel::new("Planning", LabelSource::RoomIdFallback);
        assert!(!fallback.is_meaningful(Some(&room)));

        let real = ActivityLabel::new("Planning", LabelSource::ExplicitElement);
        assert!(real.is_meaningful(Some(&room)));
        assert!(real.is_meaningful(None));
    }

    #[test]
    fn snapshot_defaults_fill_missing_fields() {
        let snapshot: EnvironmentSnapshot =
            serde_json::from_str(r#"{"url":"https://meet.google.com/abc-defg-hij"}"#)
                .expect("minimal snapshot parses");
        assert!(snapshot.visible);
        assert!(snapshot.control_labels.is_empty());
        assert_eq!(snapshot.video_count, 0);
    }

    #[test]
    fn observer_id_display() {
        assert_eq!(ObserverId(7).to_string(), "obs-7");
    }
}
