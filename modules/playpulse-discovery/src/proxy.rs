//! Free-proxy pool backed by a JSON sidecar file. A periodic validation
//! pass fetches the public lists, checks every proxy concurrently, and
//! atomically replaces the verified file; scrapers then draw random proxies
//! from the verified list only.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::prelude::IndexedRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{info, warn};

const PROXY_SOURCES: &[(&str, &str)] = &[
    ("http", "https://raw.githubusercontent.com/proxifly/free-proxy-list/refs/heads/main/proxies/protocols/http/data.txt"),
    ("https", "https://raw.githubusercontent.com/proxifly/free-proxy-list/refs/heads/main/proxies/protocols/https/data.txt"),
    ("socks4", "https://raw.githubusercontent.com/proxifly/free-proxy-list/refs/heads/main/proxies/protocols/socks4/data.txt"),
    ("socks5", "https://raw.githubusercontent.com/proxifly/free-proxy-list/refs/heads/main/proxies/protocols/socks5/data.txt"),
];

const TEST_URL: &str = "http://httpbin.org/ip";
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_CONCURRENT_CHECKS: usize = 50;

/// How a caller wants proxying handled. `"DIRECT"` is a reserved value that
/// disables proxies entirely, distinct from "unspecified" which lets the
/// pool pick one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyMode {
    Direct,
    Explicit(String),
    Auto,
}

impl ProxyMode {
    pub fn from_caller_value(value: Option<&str>) -> Self {
        match value {
            Some("DIRECT") => ProxyMode::Direct,
            Some(url) if !url.is_empty() => ProxyMode::Explicit(url.to_string()),
            _ => ProxyMode::Auto,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct VerifiedFile {
    verified_at: DateTime<Utc>,
    count: usize,
    proxies: Vec<String>,
}

#[derive(Clone)]
pub struct ProxyPool {
    file_path: PathBuf,
    http: reqwest::Client,
}

impl ProxyPool {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
        }
    }

    /// A random proxy from the verified list, or None when the list is
    /// empty (callers fall back to a direct connection).
    pub fn get_working_proxy(&self) -> Option<String> {
        let verified = self.load_verified();
        if verified.is_empty() {
            warn!("No verified proxies available, falling back to direct connection");
            return None;
        }
        let proxy = verified.choose(&mut rand::rng()).cloned();
        if let Some(ref p) = proxy {
            info!(proxy = %p, pool_size = verified.len(), "Selected proxy");
        }
        proxy
    }

    /// Fetch the public lists, check every proxy concurrently, and replace
    /// the verified file with the survivors.
    pub async fn validate_all_proxies(&self) -> Result<Vec<String>> {
        let candidates = self.fetch_all_proxies().await;
        if candidates.is_empty() {
            warn!("No proxies fetched, nothing to validate");
            return Ok(Vec::new());
        }

        info!(total = candidates.len(), "Validating proxy list");

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_CHECKS));
        let mut handles = Vec::with_capacity(candidates.len());
        for proxy in candidates {
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.ok()?;
                check_proxy(&proxy).await.then_some(proxy)
            }));
        }

        let mut working = Vec::new();
        for handle in handles {
            if let Ok(Some(proxy)) = handle.await {
                working.push(proxy);
            }
        }

        info!(working = working.len(), "Proxy validation complete");
        self.save_verified(&working)?;
        Ok(working)
    }

    /// Delete the verified file so the next validation starts fresh.
    pub fn clear(&self) {
        if self.file_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.file_path) {
                warn!(error = %e, "Failed to clear verified proxies");
            }
        }
    }

    async fn fetch_all_proxies(&self) -> Vec<String> {
        let mut fetched = Vec::new();

        for (protocol, url) in PROXY_SOURCES.iter().copied() {
            match self.http.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    let body = response.text().await.unwrap_or_default();
                    let mut count = 0usize;
                    for line in body.lines() {
                        let line = line.trim();
                        if line.is_empty() || !line.contains(':') {
                            continue;
                        }
                        count += 1;
                        if line.starts_with("http") || line.starts_with("socks") {
                            fetched.push(line.to_string());
                        } else {
                            fetched.push(format!("{protocol}://{line}"));
                        }
                    }
                    info!(protocol, count, "Fetched proxy list");
                }
                Ok(response) => {
                    warn!(protocol, status = %response.status(), "Proxy list fetch failed");
                }
                Err(e) => {
                    warn!(protocol, error = %e, "Proxy list fetch failed");
                }
            }
        }

        fetched.sort();
        fetched.dedup();
        fetched
    }

    fn load_verified(&self) -> Vec<String> {
        match std::fs::read_to_string(&self.file_path) {
            Ok(contents) => match serde_json::from_str::<VerifiedFile>(&contents) {
                Ok(file) => file.proxies,
                Err(e) => {
                    warn!(error = %e, "Verified proxies file is corrupt");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        }
    }

    /// Write the verified list via a temp file and rename, so readers never
    /// observe a half-written pool.
    fn save_verified(&self, proxies: &[String]) -> Result<()> {
        let file = VerifiedFile {
            verified_at: Utc::now(),
            count: proxies.len(),
            proxies: proxies.to_vec(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let tmp_path = temp_path(&self.file_path);
        std::fs::write(&tmp_path, json).context("Failed to write verified proxies")?;
        std::fs::rename(&tmp_path, &self.file_path)
            .context("Failed to replace verified proxies file")?;
        info!(count = proxies.len(), path = %self.file_path.display(), "Saved verified proxies");
        Ok(())
    }
}

async fn check_proxy(proxy_url: &str) -> bool {
    let Ok(proxy) = reqwest::Proxy::all(proxy_url) else {
        return false;
    };
    let Ok(client) = reqwest::Client::builder()
        .proxy(proxy)
        .timeout(CHECK_TIMEOUT)
        .danger_accept_invalid_certs(true)
        .build()
    else {
        return false;
    };
    matches!(client.get(TEST_URL).send().await, Ok(r) if r.status().is_success())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
