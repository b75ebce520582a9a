//! Room identifiers: the three-part meeting code carried in the observer URL.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::CoreError;

static ROOM_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z]{3}-[a-z]{4}-[a-z]{3}$").expect("room code pattern is valid")
});

/// Whether `text` is exactly a room code such as `abc-defg-hij`.
pub fn is_room_code(text: &str) -> bool {
    ROOM_CODE.is_match(text)
}

/// Stable identifier of one meeting session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Validate and wrap a room code. Case is folded before validation.
    pub fn parse(code: &str) -> Result<Self, CoreError> {
        let folded = code.trim().to_ascii_lowercase();
        if is_room_code(&folded) {
            Ok(Self(folded))
        } else {
            Err(CoreError::InvalidRoom(code.to_string()))
        }
    }

    /// Extract the room code from the first path segment of an observer URL.
    ///
    /// Returns `None` for landing pages, lobbies and anything unparsable.
    pub fn from_url(raw: &str) -> Option<Self> {
        let url = Url::parse(raw).ok()?;
        let first = url.path_segments()?.find(|s| !s.is_empty())?;
        Self::parse(first).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> Self {
        room.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_code_pattern_compiles() {
        LazyLock::force(&ROOM_CODE);
        assert!(is_room_code("abc-defg-hij"));
        assert!(!is_room_code("abc-defg-hijk"));
    }

    #[test]
    fn extracts_room_from_meeting_url() {
        let room = RoomId::from_url("https://meet.google.com/abc-defg-hij?authuser=0");
        assert_eq!(room.as_ref().map(RoomId::as_str), Some("abc-defg-hij"));
    }

    #[test]
    fn landing_page_has_no_room() {
        assert!(RoomId::from_url("https://meet.google.com/").is_none());
        assert!(RoomId::from_url("https://meet.google.com/landing").is_none());
        assert!(RoomId::from_url("not a url").is_none());
    }

    #[test]
    fn parse_folds_case_and_rejects_malformed() {
        assert_eq!(
            RoomId::parse("ABC-DEFG-HIJ").map(|r| r.to_string()),
            Ok("abc-defg-hij".to_string())
        );
        assert!(RoomId::parse("abc-defg").is_err());
        assert!(RoomId::parse("abc-defg-hij-klm").is_err());
        assert!(RoomId::parse("ab1-defg-hij").is_err());
    }

    #[test]
    fn serde_validates_on_deserialize() {
        let ok: Result<RoomId, _> = serde_json::from_str(r#""abc-defg-hij""#);
        assert!(ok.is_ok());
        let bad: Result<RoomId, _> = serde_json::from_str(r#""lobby""#);
        assert!(bad.is_err());
    }
}
