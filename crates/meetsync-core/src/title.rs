//! Activity labels: a priority chain over page signals, then cleanup and truncation.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::room::{RoomId, is_room_code};
use crate::types::{ActivityLabel, EnvironmentSnapshot, LabelSource};

/// Maximum label length in characters, ellipsis included.
pub const MAX_LABEL_CHARS: usize = 50;
/// Marker appended to truncated labels.
pub const ELLIPSIS: &str = "...";
/// Structured-attribute text longer than this is treated as body copy, not a title.
pub const MAX_STRUCTURED_CHARS: usize = 100;
/// Label used when every strategy comes up empty.
pub const DEFAULT_LABEL: &str = "Meeting";

/// Query parameters that may carry a meeting title.
const LABEL_PARAMS: &[&str] = &["title", "meeting_title", "subject"];

// "Weekly Sync – Meet", "Weekly Sync - Google Meet"
static TITLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<label>.+?)\s+[–—-]\s+(?:Google\s+)?Meet$").expect("title pattern is valid")
});

// Branding left over after any strategy, e.g. a label element rendered as "Sync | Google Meet".
static BRANDING_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*[–—|-]\s*(?:Google\s+)?Meet\s*$").expect("branding pattern is valid")
});

/// Extract the best activity label from `snapshot`.
///
/// Priority (highest to lowest):
/// 1. `ExplicitElement`: the rendered meeting-title element
/// 2. `PageTitlePattern`: document title matching `<label> – Meet`
/// 3. `StructuredAttribute`: short text on a title-bearing attribute
/// 4. `UrlParameter`: a title-bearing query parameter
/// 5. `RoomIdFallback`: the room code itself
/// 6. `Default`: [`DEFAULT_LABEL`]
///
/// Implausible candidates (empty after cleanup, over-long structured text,
/// a bare room code where a title was expected) fall through to the next tier.
pub fn extract(snapshot: &EnvironmentSnapshot) -> ActivityLabel {
    let room = RoomId::from_url(&snapshot.url);

    let candidates = [
        (LabelSource::ExplicitElement, from_explicit_element(snapshot)),
        (LabelSource::PageTitlePattern, from_page_title(snapshot)),
        (LabelSource::StructuredAttribute, from_structured(snapshot)),
        (LabelSource::UrlParameter, from_url_parameter(snapshot)),
        (
            LabelSource::RoomIdFallback,
            room.as_ref().map(|r| r.as_str().to_string()),
        ),
    ];

    for (source, candidate) in candidates {
        let Some(raw) = candidate else { continue };
        let cleaned = clean(&raw);
        if cleaned.is_empty() {
            continue;
        }
        if source != LabelSource::RoomIdFallback && is_room_code(&cleaned) {
            continue;
        }
        return ActivityLabel::new(truncate(&cleaned), source);
    }

    ActivityLabel::new(DEFAULT_LABEL, LabelSource::Default)
}

fn from_explicit_element(snapshot: &EnvironmentSnapshot) -> Option<String> {
    snapshot.label_element.clone()
}

fn from_page_title(snapshot: &EnvironmentSnapshot) -> Option<String> {
    let caps = TITLE_PATTERN.captures(snapshot.document_title.trim())?;
    let label = caps.name("label")?.as_str().trim();
    // "Meet – abc-defg-hij" style titles carry no label.
    if label.eq_ignore_ascii_case("meet") {
        return None;
    }
    Some(label.to_string())
}

fn from_structured(snapshot: &EnvironmentSnapshot) -> Option<String> {
    snapshot
        .structured_labels
        .iter()
        .map(|s| s.trim())
        .find(|s| !s.is_empty() && s.chars().count() <= MAX_STRUCTURED_CHARS)
        .map(str::to_string)
}

fn from_url_parameter(snapshot: &EnvironmentSnapshot) -> Option<String> {
    let url = Url::parse(&snapshot.url).ok()?;
    url.query_pairs()
        .find(|(k, v)| LABEL_PARAMS.contains(&k.as_ref()) && !v.trim().is_empty())
        .map(|(_, v)| v.into_owned())
}

/// Strip branding, collapse whitespace.
pub fn clean(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    BRANDING_SUFFIX.replace(&collapsed, "").trim().to_string()
}

/// Truncate to [`MAX_LABEL_CHARS`] characters, ending in [`ELLIPSIS`] when cut.
pub fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_LABEL_CHARS {
        return text.to_string();
    }
    let keep = MAX_LABEL_CHARS - ELLIPSIS.chars().count();
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}
