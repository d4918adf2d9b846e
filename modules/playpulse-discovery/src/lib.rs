pub mod engine;
pub mod proxy;
pub mod scraper;
pub mod store;
pub mod uploader;

pub use engine::{DiscoveryEngine, DiscoveryReport, RecursiveReport};
pub use proxy::{ProxyMode, ProxyPool};
pub use scraper::{HashtagScraper, ScrapedPost, ScraperFactory};
pub use store::{DiscoveryStore, PgDiscoveryStore};

#[cfg(test)]
mod engine_tests;
