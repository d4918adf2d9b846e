//! Parsing and dedup helpers for persisting scraped hashtag posts.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

static POST_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(?:p|reel)/([^/]+)/").unwrap());
static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"instagram\.com/([^/]+)").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static NON_WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s#@]").unwrap());

/// Extract the short post id from a permalink (`/p/<id>/` or `/reel/<id>/`).
pub fn extract_post_id(url: &str) -> Option<&str> {
    POST_ID_RE.captures(url).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Best-effort username recovery from a post URL.
pub fn username_from_url(url: &str) -> Option<&str> {
    USERNAME_RE.captures(url).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Canonicalize a caption for dedup: lowercase, collapsed whitespace, only
/// word characters plus # and @ kept.
pub fn normalize_caption(caption: &str) -> String {
    let lowered = caption.trim().to_lowercase();
    let collapsed = WHITESPACE_RE.replace_all(&lowered, " ");
    NON_WORD_RE.replace_all(&collapsed, "").into_owned()
}

/// SHA-256 of the normalized caption, used as a secondary dedup key across
/// reposted content.
pub fn caption_hash(caption: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_caption(caption).as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Parse a lenient count string like "1,234" into a number. Anything
/// unparseable counts as zero.
pub fn parse_count(value: &str) -> i64 {
    value.replace(',', "").trim().parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_post_and_reel_ids() {
        assert_eq!(
            extract_post_id("https://www.instagram.com/p/Cxyz123/"),
            Some("Cxyz123")
        );
        assert_eq!(
            extract_post_id("https://www.instagram.com/reel/Rabc456/?src=feed"),
            Some("Rabc456")
        );
        assert_eq!(extract_post_id("https://www.instagram.com/someuser"), None);
    }

    #[test]
    fn username_falls_back_to_url_segment() {
        assert_eq!(
            username_from_url("https://www.instagram.com/studiodev/p/Cxyz/"),
            Some("studiodev")
        );
    }

    #[test]
    fn caption_normalization_strips_noise() {
        assert_eq!(
            normalize_caption("  New DEMO out now!!  #indiedev @studio  "),
            "new demo out now #indiedev @studio"
        );
    }

    #[test]
    fn caption_hash_ignores_formatting_differences() {
        assert_eq!(
            caption_hash("New demo OUT now!"),
            caption_hash("new demo out   now")
        );
        assert_ne!(caption_hash("new demo"), caption_hash("old demo"));
    }

    #[test]
    fn counts_parse_leniently() {
        assert_eq!(parse_count("1,234"), 1234);
        assert_eq!(parse_count(" 56 "), 56);
        assert_eq!(parse_count("a lot"), 0);
        assert_eq!(parse_count(""), 0);
    }
}
