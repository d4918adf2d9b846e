//! Text normalization: strips markdown, masks PII, and detects
//! removed/deleted content before anything reaches storage or the chunker.

use regex::Regex;
use std::sync::LazyLock;

use playpulse_common::mask_pii;

static CODE_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static INDENTED_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(?: {4}|\t).+$").unwrap());
static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s+").unwrap());
static BOLD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());
static ITALIC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*(.+?)\*").unwrap());
static BOLD_UNDERSCORE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"__(.+?)__").unwrap());
static ITALIC_UNDERSCORE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_(.+?)_").unwrap());
static STRIKETHROUGH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"~~(.+?)~~").unwrap());
static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").unwrap());
static INLINE_CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]+)`").unwrap());
static BLOCKQUOTE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^>\s*").unwrap());
static HR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[-*_]{3,}$").unwrap());
static MULTI_NEWLINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static MULTI_SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"  +").unwrap());

/// Output of the normalization pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub text: String,
    pub is_removed: bool,
    pub is_deleted: bool,
}

/// Strip markdown formatting, keeping the visible text. Code blocks collapse
/// to a `[code block]` sentinel and indented code is dropped entirely.
pub fn normalize_markdown(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text = CODE_BLOCK_RE.replace_all(text, "[code block]");
    let text = INDENTED_CODE_RE.replace_all(&text, "");
    let text = HEADER_RE.replace_all(&text, "");
    let text = BOLD_RE.replace_all(&text, "$1");
    let text = ITALIC_RE.replace_all(&text, "$1");
    let text = BOLD_UNDERSCORE_RE.replace_all(&text, "$1");
    let text = ITALIC_UNDERSCORE_RE.replace_all(&text, "$1");
    let text = STRIKETHROUGH_RE.replace_all(&text, "$1");
    let text = LINK_RE.replace_all(&text, "$1");
    let text = INLINE_CODE_RE.replace_all(&text, "$1");
    let text = BLOCKQUOTE_RE.replace_all(&text, "");
    let text = HR_RE.replace_all(&text, "");
    let text = MULTI_NEWLINE_RE.replace_all(&text, "\n\n");
    let text = MULTI_SPACE_RE.replace_all(&text, " ");

    text.trim().to_string()
}

/// Detect whether content was removed by moderation or deleted by its author.
pub fn detect_removed_deleted(text: &str, author: &str) -> (bool, bool) {
    if text.is_empty() {
        return (false, false);
    }
    let lowered = text.trim().to_lowercase();
    let is_removed = lowered == "[removed]" || lowered == "[removed by reddit]";
    let is_deleted = lowered == "[deleted]" || author == "[deleted]";
    (is_removed, is_deleted)
}

/// Full normalization pipeline: removal detection, then markdown stripping,
/// then PII masking. Removed/deleted content collapses to empty text.
pub fn normalize_text(text: &str, author: &str) -> Normalized {
    let (is_removed, is_deleted) = detect_removed_deleted(text, author);
    if is_removed || is_deleted {
        return Normalized {
            text: String::new(),
            is_removed,
            is_deleted,
        };
    }

    Normalized {
        text: mask_pii(&normalize_markdown(text)),
        is_removed,
        is_deleted,
    }
}
