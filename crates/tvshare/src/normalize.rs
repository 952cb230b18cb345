//! Reference normalization.
//!
//! Turns raw user input (URL, bare video id, free text) into the canonical
//! string form used as the retry-tracking key everywhere else. Must stay a
//! pure function: the same raw input always normalizes to the same string.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

/// Prefix marking a free-text search to be interpreted by the resolver.
pub const SEARCH_PREFIX: &str = "search:";

const CANONICAL_WATCH: &str = "https://www.youtube.com/watch?v=";

/// Normalized form of a user-supplied media reference.
///
/// One of: a canonical `watch?v=<id>` URL, a passthrough `http(s)` URL, or
/// a `search:<query>` marker.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Reference(String);

impl Reference {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Whether this reference is a free-text search marker.
    pub fn is_search(&self) -> bool {
        self.0.starts_with(SEARCH_PREFIX)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn video_id_patterns() -> &'static [Regex; 4] {
    static PATTERNS: OnceLock<[Regex; 4]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"[?&]v=([A-Za-z0-9_-]{11})").expect("query pattern"),
            Regex::new(r"youtu\.be/([A-Za-z0-9_-]{11})").expect("short-link pattern"),
            Regex::new(r"/embed/([A-Za-z0-9_-]{11})").expect("embed pattern"),
            Regex::new(r"/v/([A-Za-z0-9_-]{11})").expect("legacy /v/ pattern"),
        ]
    })
}

fn bare_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("bare id pattern"))
}

/// Normalize a raw user reference.
///
/// Rules, first match wins:
/// 1. any of the four recognised YouTube URL shapes -> canonical watch URL
/// 2. a bare 11-character `[A-Za-z0-9_-]` id -> canonical watch URL
/// 3. an `http://`/`https://` URL -> passed through unchanged
/// 4. anything else -> `search:` marker for the resolver's search backend
pub fn normalize(raw: &str) -> Reference {
    let trimmed = raw.trim();

    for pattern in video_id_patterns() {
        if let Some(caps) = pattern.captures(trimmed) {
            if let Some(id) = caps.get(1) {
                return Reference(format!("{CANONICAL_WATCH}{}", id.as_str()));
            }
        }
    }

    if bare_id_pattern().is_match(trimmed) {
        return Reference(format!("{CANONICAL_WATCH}{trimmed}"));
    }

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Reference(trimmed.to_string());
    }

    Reference(format!("{SEARCH_PREFIX}{trimmed}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    #[test]
    fn watch_url_query_param() {
        assert_eq!(
            normalize("https://www.youtube.com/watch?v=dQw4w9WgXcQ").as_str(),
            CANONICAL
        );
        assert_eq!(
            normalize("https://www.youtube.com/watch?list=PL123&v=dQw4w9WgXcQ").as_str(),
            CANONICAL
        );
    }

    #[test]
    fn short_link_with_trailing_query() {
        assert_eq!(normalize("https://youtu.be/dQw4w9WgXcQ?t=5").as_str(), CANONICAL);
    }

    #[test]
    fn embed_and_legacy_shapes() {
        assert_eq!(
            normalize("https://www.youtube.com/embed/dQw4w9WgXcQ").as_str(),
            CANONICAL
        );
        assert_eq!(
            normalize("https://www.youtube.com/v/dQw4w9WgXcQ").as_str(),
            CANONICAL
        );
    }

    #[test]
    fn bare_id_expands() {
        assert_eq!(normalize("dQw4w9WgXcQ").as_str(), CANONICAL);
        assert_eq!(normalize("a-b_c123456").as_str(), "https://www.youtube.com/watch?v=a-b_c123456");
    }

    #[test]
    fn eleven_chars_with_whitespace_is_search() {
        let r = normalize("not an id!");
        assert!(r.is_search());
        assert_eq!(r.as_str(), "search:not an id!");
    }

    #[test]
    fn non_youtube_url_passes_through() {
        let raw = "https://vimeo.com/12345";
        assert_eq!(normalize(raw).as_str(), raw);
        let raw = "http://media.example/clip.mp4";
        assert_eq!(normalize(raw).as_str(), raw);
    }

    #[test]
    fn free_text_becomes_search() {
        assert_eq!(
            normalize("never gonna give you up").as_str(),
            "search:never gonna give you up"
        );
    }

    #[test]
    fn normalization_is_deterministic() {
        for raw in [
            "https://youtu.be/dQw4w9WgXcQ?t=5",
            "dQw4w9WgXcQ",
            "some search text",
            "https://vimeo.com/12345",
        ] {
            assert_eq!(normalize(raw), normalize(raw));
        }
    }
}
