//! Retrieval chunking: wraps body text in untrusted-content sentinels,
//! prefixes a metadata header, splits on natural boundaries with overlap,
//! and hashes each chunk for deduplication.

use playpulse_common::ChunkConfig;
use sha2::{Digest, Sha256};

/// Delimiters that downstream prompts are instructed to treat as the
/// boundary of untrusted content.
pub const UNTRUSTED_START: &str = "!!! START UNTRUSTED CONTENT !!!";
pub const UNTRUSTED_END: &str = "!!! END UNTRUSTED CONTENT !!!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub hash: String,
}

/// Build the standard metadata header prepended to every chunk.
pub fn build_metadata_header(
    subreddit: &str,
    score: i64,
    created_utc: &str,
    url: &str,
    title: &str,
) -> String {
    let mut header = format!("[r/{subreddit} | {score} pts | {created_utc}]");
    if !title.is_empty() {
        header.push_str(&format!("\nTitle: {title}"));
    }
    header.push_str(&format!("\nURL: {url}"));
    header.push_str("\n---");
    header
}

/// Split text into hashed chunks with the metadata header prepended.
///
/// Character-based windows of `max_chars` with `overlap_percent` overlap.
/// Within each window the cut point prefers a paragraph break, then a line
/// break, then a space, each only when it lands past the window midpoint;
/// otherwise the window is cut hard at `max_chars`. Chunks shorter than
/// `min_chars` after trimming are dropped.
pub fn create_chunks(text: &str, metadata_header: &str, config: &ChunkConfig) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }

    let safe_text = format!("{UNTRUSTED_START}\n{text}\n{UNTRUSTED_END}");
    let full_text = format!("{metadata_header}\n{safe_text}");
    let chars: Vec<char> = full_text.chars().collect();

    let chunk_size = config.max_chars;
    let overlap = (chunk_size as f64 * config.overlap_percent) as usize;
    let step = chunk_size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + chunk_size).min(chars.len());

        if end < chars.len() {
            let midpoint = start + chunk_size / 2;
            if let Some(cut) = rfind_chars(&chars, start, end, &['\n', '\n']) {
                if cut > midpoint {
                    end = cut + 2;
                } else {
                    end = fallback_cut(&chars, start, end, midpoint);
                }
            } else {
                end = fallback_cut(&chars, start, end, midpoint);
            }
        }

        let chunk_text: String = chars[start..end].iter().collect();
        let trimmed = chunk_text.trim();
        if trimmed.chars().count() >= config.min_chars {
            chunks.push(Chunk {
                text: trimmed.to_string(),
                hash: sha256_hex(trimmed),
            });
        }

        start += step;
    }

    chunks
}

fn fallback_cut(chars: &[char], start: usize, end: usize, midpoint: usize) -> usize {
    if let Some(cut) = rfind_chars(chars, start, end, &['\n']) {
        if cut > midpoint {
            return cut + 1;
        }
    }
    if let Some(cut) = rfind_chars(chars, start, end, &[' ']) {
        if cut > midpoint {
            return cut + 1;
        }
    }
    end
}

/// Last index in `[start, end)` where `needle` begins, fully contained in
/// the window.
fn rfind_chars(chars: &[char], start: usize, end: usize, needle: &[char]) -> Option<usize> {
    if needle.is_empty() || end < start + needle.len() {
        return None;
    }
    let mut idx = end - needle.len();
    loop {
        if chars[idx..idx + needle.len()] == *needle {
            return Some(idx);
        }
        if idx == start {
            return None;
        }
        idx -= 1;
    }
}

pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
