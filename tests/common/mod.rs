//! Fake crawlers and wiring shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pricecrawl::cache::Cache;
use pricecrawl::crawler::{
    Crawler, CrawlerError, CrawlerManager, CrawlerRegistry, CrawlerResult, ManagerOptions,
};
use pricecrawl::models::{Platform, ProductRecord, ProductSummary};
use pricecrawl::repository::MemoryStore;
use pricecrawl::scheduler::Scheduler;

pub const JD_URL: &str = "https://item.jd.com/100012043978.html";
/// Stored id of the product behind [`JD_URL`].
pub const JD_ID: &str = "JD:100012043978";

/// Crawler returning canned data, optionally slow or failing.
pub struct FakeCrawler {
    pub platform: Platform,
    pub price: f64,
    pub delay: Duration,
    pub fail: bool,
    pub fetches: AtomicUsize,
    pub searches: AtomicUsize,
}

impl FakeCrawler {
    pub fn new(platform: Platform, price: f64) -> Self {
        Self {
            platform,
            price,
            delay: Duration::ZERO,
            fail: false,
            fetches: AtomicUsize::new(0),
            searches: AtomicUsize::new(0),
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn product_id(url: &str) -> String {
        url.rsplit('/')
            .next()
            .and_then(|last| last.strip_suffix(".html"))
            .or_else(|| url.rsplit("id=").next())
            .unwrap_or_default()
            .to_string()
    }
}

#[async_trait]
impl Crawler for FakeCrawler {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn fetch_by_url(&self, url: &str) -> CrawlerResult<ProductRecord> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(CrawlerError::AccessBlocked {
                platform: self.platform,
                reason: "slider captcha".to_string(),
            });
        }
        Ok(ProductRecord {
            id: Self::product_id(url),
            platform: self.platform,
            url: url.to_string(),
            name: "Wireless headphones".to_string(),
            description: "Noise cancelling".to_string(),
            image: "https://img.example/1.jpg".to_string(),
            category: "Audio".to_string(),
            brand: "Acme".to_string(),
            model: "X1".to_string(),
            price: self.price,
            original_price: self.price + 100.0,
            currency: "CNY".to_string(),
            in_stock: true,
            shop: None,
        })
    }

    async fn search_by_keyword(&self, keyword: &str) -> CrawlerResult<Vec<ProductSummary>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(CrawlerError::AccessBlocked {
                platform: self.platform,
                reason: "login wall".to_string(),
            });
        }
        Ok(vec![ProductSummary {
            external_id: "1".to_string(),
            platform: self.platform,
            name: format!("{} on {}", keyword, self.platform),
            image: String::new(),
            price: self.price,
            url: format!("https://item.{}/1", self.platform.domains()[0]),
            shop: Some("Flagship store".to_string()),
        }])
    }
}

pub fn registry(crawlers: Vec<Arc<FakeCrawler>>) -> CrawlerRegistry {
    let mut registry: CrawlerRegistry = HashMap::new();
    for crawler in crawlers {
        registry.insert(crawler.platform, crawler as Arc<dyn Crawler>);
    }
    registry
}

pub struct Harness {
    pub manager: Arc<CrawlerManager>,
    pub store: Arc<MemoryStore>,
    pub cache: Cache,
    pub scheduler: Arc<Scheduler>,
}

pub fn harness(crawlers: Vec<Arc<FakeCrawler>>, options: ManagerOptions) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let cache = Cache::in_memory();
    let scheduler = Arc::new(Scheduler::default());
    let manager = CrawlerManager::new(
        registry(crawlers),
        cache.clone(),
        store.clone(),
        scheduler.clone(),
        options,
    );
    Harness {
        manager,
        store,
        cache,
        scheduler,
    }
}
