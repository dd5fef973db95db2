//! Per-platform crawlers and the manager that routes work to them.

mod error;
pub mod gate;
pub mod jd;
pub mod manager;
mod platform_crawler;
pub mod strategy;
pub mod taobao;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

pub use error::{CrawlerError, CrawlerResult};
pub use manager::{BatchError, BatchUpdateSummary, CrawlerManager, ManagerOptions};
pub use platform_crawler::PlatformCrawler;

use crate::browser::SessionFactory;
use crate::models::{Platform, ProductRecord, ProductSummary};

/// Turns URLs and keywords into product data for one platform.
#[async_trait]
pub trait Crawler: Send + Sync {
    fn platform(&self) -> Platform;

    /// Crawl a product page.
    async fn fetch_by_url(&self, url: &str) -> CrawlerResult<ProductRecord>;

    /// Crawl a keyword search page. No valid results is an empty list.
    async fn search_by_keyword(&self, keyword: &str) -> CrawlerResult<Vec<ProductSummary>>;
}

/// Crawlers keyed by the platform they serve.
pub type CrawlerRegistry = HashMap<Platform, Arc<dyn Crawler>>;

/// Registry with the built-in JD and Taobao crawlers sharing one session factory.
pub fn default_registry(sessions: Arc<dyn SessionFactory>) -> CrawlerRegistry {
    let mut registry: CrawlerRegistry = HashMap::new();
    registry.insert(
        Platform::Jd,
        Arc::new(PlatformCrawler::new(jd::JdStrategy, sessions.clone())),
    );
    registry.insert(
        Platform::Taobao,
        Arc::new(PlatformCrawler::new(taobao::TaobaoStrategy, sessions)),
    );
    registry
}
