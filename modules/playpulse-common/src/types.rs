use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Platforms ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Reddit,
    Instagram,
    TikTok,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Reddit => "reddit",
            Platform::Instagram => "instagram",
            Platform::TikTok => "tiktok",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "reddit" => Some(Platform::Reddit),
            "instagram" => Some(Platform::Instagram),
            "tiktok" => Some(Platform::TikTok),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// --- Sources ---

/// What a listener source points at: a subreddit's /new feed, or a search query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Subreddit,
    Keyword,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Subreddit => "subreddit",
            SourceKind::Keyword => "keyword",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "subreddit" => Some(SourceKind::Subreddit),
            "keyword" => Some(SourceKind::Keyword),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The pair every user-owned row is scoped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tenant {
    pub owner_id: i64,
    pub group_id: Option<i64>,
}

// --- Fetched records ---

/// A top-level post as yielded by a fetcher adapter, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedPost {
    /// Kind-prefixed id, e.g. "t3_abc123".
    pub external_id: String,
    pub external_url: String,
    pub subreddit: String,
    pub title: String,
    pub body: String,
    pub author: String,
    pub author_flair: Option<String>,
    pub score: i64,
    pub num_comments: i64,
    pub created_utc: DateTime<Utc>,
    pub nsfw: bool,
    pub removed: bool,
    pub raw_json: serde_json::Value,
}

/// A comment as yielded by a fetcher adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedComment {
    pub external_id: String,
    pub parent_external_id: Option<String>,
    pub body: String,
    pub author: String,
    pub author_flair: Option<String>,
    pub score: i64,
    pub created_utc: DateTime<Utc>,
    pub removed: bool,
    pub raw_json: serde_json::Value,
}
