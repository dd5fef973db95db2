//! Crawler manager: platform routing, caching, persistence and scheduling.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{CrawlerError, CrawlerRegistry, CrawlerResult};
use crate::cache::{Cache, LockState};
use crate::models::{NewPrice, Platform, Price, ProductRecord, ProductSummary, UpdateTask};
use crate::repository::ProductStore;
use crate::scheduler::{job_handler, Scheduler, Trigger};

/// Tag on every cached product.
pub const PRODUCTS_TAG: &str = "products";
/// Tag on every cached search result.
pub const SEARCH_TAG: &str = "search";

/// Tag on cache entries derived from one product.
pub fn product_tag(product_id: &str) -> String {
    format!("product:{}", product_id)
}

pub fn product_cache_key(platform: Platform, url: &str) -> String {
    format!("product:{}:{}", platform, url)
}

pub fn search_cache_key(keyword: &str, platforms: &[Platform]) -> String {
    let names: Vec<&str> = platforms.iter().map(Platform::as_str).collect();
    format!("search:{}:{}", keyword, names.join(","))
}

/// Resolve the platform serving `url` from its host.
pub fn identify_platform(url: &str) -> CrawlerResult<Platform> {
    let parsed = url::Url::parse(url)
        .map_err(|e| CrawlerError::UnsupportedPlatform(format!("{}: {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(CrawlerError::UnsupportedPlatform(url.to_string()));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| CrawlerError::UnsupportedPlatform(url.to_string()))?;
    Platform::ALL
        .into_iter()
        .find(|p| p.matches_host(host))
        .ok_or_else(|| CrawlerError::UnsupportedPlatform(host.to_string()))
}

/// Fail when `record` is not the product the caller asked for.
fn check_identity(record: &ProductRecord, expected: Option<&str>, url: &str) -> CrawlerResult<()> {
    match expected {
        Some(id) if record.id != id => Err(CrawlerError::Extraction(format!(
            "{} resolved to product {} instead of {}",
            url, record.id, id
        ))),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub product_ttl: Duration,
    pub search_ttl: Duration,
    /// Upper bound on simultaneous browser sessions.
    pub max_concurrent_crawls: usize,
    /// Collapse concurrent cache-miss fetches of one URL behind a cache lock.
    pub dedup_lock: bool,
    /// Lock lifetime; outlives the slowest crawl (three navigation attempts).
    pub lock_ttl: Duration,
    /// How long a caller that lost the lock waits for the winner's result.
    pub lock_wait: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            product_ttl: Duration::from_secs(3600),
            search_ttl: Duration::from_secs(1800),
            max_concurrent_crawls: 5,
            dedup_lock: true,
            lock_ttl: Duration::from_secs(120),
            lock_wait: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchError {
    pub product_id: String,
    pub error: String,
}

/// Outcome of a batch update. Failures never abort the batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateSummary {
    pub success_count: usize,
    pub failure_count: usize,
    pub errors: Vec<BatchError>,
}

const LOCK_POLL: Duration = Duration::from_millis(250);

pub struct CrawlerManager {
    crawlers: CrawlerRegistry,
    cache: Cache,
    store: Arc<dyn ProductStore>,
    scheduler: Arc<Scheduler>,
    crawl_slots: Semaphore,
    options: ManagerOptions,
    /// Handed to scheduled jobs so they do not keep the manager alive.
    me: Weak<CrawlerManager>,
}

impl CrawlerManager {
    pub fn new(
        crawlers: CrawlerRegistry,
        cache: Cache,
        store: Arc<dyn ProductStore>,
        scheduler: Arc<Scheduler>,
        options: ManagerOptions,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            crawlers,
            cache,
            store,
            scheduler,
            crawl_slots: Semaphore::new(options.max_concurrent_crawls.max(1)),
            options,
            me: me.clone(),
        })
    }

    /// Platforms with a registered crawler, in stable order.
    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.crawlers.keys().copied().collect();
        platforms.sort();
        platforms
    }

    /// Platform of `url`, which must also have a registered crawler.
    pub fn identify_platform(&self, url: &str) -> CrawlerResult<Platform> {
        let platform = identify_platform(url)?;
        if !self.crawlers.contains_key(&platform) {
            return Err(CrawlerError::UnsupportedPlatform(platform.to_string()));
        }
        Ok(platform)
    }

    /// Product data for `url`, from cache when fresh, otherwise crawled and stored.
    ///
    /// The returned id is platform-qualified, e.g. `JD:100012043978`.
    pub async fn get_product_info(&self, url: &str) -> CrawlerResult<ProductRecord> {
        self.fetch(url, None).await.map(|(record, _)| record)
    }

    /// Shared fetch path. The price is `Some` when this call crawled and stored one.
    ///
    /// With `expected` set, a page that resolves to another product fails
    /// before anything is written.
    async fn fetch(
        &self,
        url: &str,
        expected: Option<&str>,
    ) -> CrawlerResult<(ProductRecord, Option<Price>)> {
        let platform = self.identify_platform(url)?;
        let key = product_cache_key(platform, url);

        if let Some(record) = self.cache.get::<ProductRecord>(&key).await {
            debug!("Cache hit for {}", key);
            check_identity(&record, expected, url)?;
            return Ok((record, None));
        }

        if !self.options.dedup_lock {
            return self.crawl_and_store(platform, &key, url, expected).await;
        }

        match self.cache.try_lock(&key, Some(self.options.lock_ttl)).await {
            LockState::Acquired => {
                let result = self.crawl_and_store(platform, &key, url, expected).await;
                self.cache.unlock(&key).await;
                result
            }
            LockState::Held => {
                debug!("Waiting for in-flight crawl of {}", url);
                if let Some(record) = self.wait_for_cached(&key).await {
                    check_identity(&record, expected, url)?;
                    return Ok((record, None));
                }
                debug!("In-flight crawl of {} produced nothing, crawling", url);
                self.crawl_and_store(platform, &key, url, expected).await
            }
            LockState::Unavailable => self.crawl_and_store(platform, &key, url, expected).await,
        }
    }

    async fn wait_for_cached(&self, key: &str) -> Option<ProductRecord> {
        let deadline = tokio::time::Instant::now() + self.options.lock_wait;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(LOCK_POLL).await;
            if let Some(record) = self.cache.get::<ProductRecord>(key).await {
                return Some(record);
            }
            // Lock released or expired without a cached result.
            if self.cache.try_lock(key, Some(self.options.lock_ttl)).await == LockState::Acquired {
                self.cache.unlock(key).await;
                return None;
            }
        }
        None
    }

    async fn crawl_and_store(
        &self,
        platform: Platform,
        key: &str,
        url: &str,
        expected: Option<&str>,
    ) -> CrawlerResult<(ProductRecord, Option<Price>)> {
        let crawler = self
            .crawlers
            .get(&platform)
            .ok_or_else(|| CrawlerError::UnsupportedPlatform(platform.to_string()))?;

        let mut record = {
            let _slot = self
                .crawl_slots
                .acquire()
                .await
                .map_err(|e| CrawlerError::Initialization(e.to_string()))?;
            crawler.fetch_by_url(url).await?
        };

        if record.id.is_empty() || !(record.price.is_finite() && record.price > 0.0) {
            return Err(CrawlerError::Extraction(format!(
                "{} returned no id or price for {}",
                platform, url
            )));
        }
        record.id = platform.product_id(&record.id);
        record.platform = platform;
        check_identity(&record, expected, url)?;

        self.store.upsert_product(&record).await?;
        let price = self
            .store
            .insert_price(&record.id, record.to_new_price())
            .await?;

        let tags = [
            PRODUCTS_TAG.to_string(),
            platform.cache_tag(),
            product_tag(&record.id),
        ];
        self.cache.delete_by_tag(&product_tag(&record.id)).await;
        self.cache
            .set_with_tags(key, &record, &tags, Some(self.options.product_ttl))
            .await;

        info!("{}: {} now {} {}", platform, record.id, record.price, record.currency);
        Ok((record, Some(price)))
    }

    /// Search every platform in `platforms` (all registered when empty) in
    /// parallel. A failing platform contributes nothing.
    pub async fn search_products(
        &self,
        keyword: &str,
        platforms: &[Platform],
    ) -> CrawlerResult<Vec<ProductSummary>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(CrawlerError::InvalidInput("empty search keyword".to_string()));
        }

        let mut selected: Vec<Platform> = Vec::new();
        let requested = if platforms.is_empty() {
            self.platforms()
        } else {
            platforms.to_vec()
        };
        for platform in requested {
            if !self.crawlers.contains_key(&platform) {
                return Err(CrawlerError::UnsupportedPlatform(platform.to_string()));
            }
            if !selected.contains(&platform) {
                selected.push(platform);
            }
        }

        let key = search_cache_key(keyword, &selected);
        if let Some(results) = self.cache.get::<Vec<ProductSummary>>(&key).await {
            debug!("Cache hit for {}", key);
            return Ok(results);
        }

        let searches = selected.iter().map(|platform| async move {
            let crawler = &self.crawlers[platform];
            let outcome = match self.crawl_slots.acquire().await {
                Ok(_slot) => crawler.search_by_keyword(keyword).await,
                Err(e) => Err(CrawlerError::Initialization(e.to_string())),
            };
            (*platform, outcome)
        });

        let mut results = Vec::new();
        let mut any_failed = false;
        for (platform, outcome) in join_all(searches).await {
            match outcome {
                Ok(found) => results.extend(found),
                Err(e) => {
                    warn!("{} search for {:?} failed: {}", platform, keyword, e);
                    any_failed = true;
                }
            }
        }

        // Partial results are returned but not cached.
        if !any_failed {
            let mut tags = vec![SEARCH_TAG.to_string()];
            tags.extend(selected.iter().map(Platform::cache_tag));
            self.cache
                .set_with_tags(&key, &results, &tags, Some(self.options.search_ttl))
                .await;
        }

        Ok(results)
    }

    /// Re-crawl a product from its latest price's URL and append the observed price.
    pub async fn update_product_price(&self, product_id: &str) -> CrawlerResult<Price> {
        let product = self
            .store
            .load_product(product_id)
            .await?
            .ok_or_else(|| CrawlerError::ProductNotFound(product_id.to_string()))?;
        let latest = product.latest_price.ok_or_else(|| {
            CrawlerError::ProductNotFound(format!("{} has no price history", product_id))
        })?;

        // Drop cached entries so the fetch below crawls the live page.
        self.cache.delete_by_tag(&product_tag(product_id)).await;
        let (record, stored) = self.fetch(&latest.url, Some(product_id)).await?;
        let price = match stored {
            Some(price) => price,
            None => {
                self.store
                    .insert_price(
                        product_id,
                        NewPrice {
                            price: record.price,
                            original_price: Some(record.original_price),
                            currency: record.currency.clone(),
                            platform: latest.platform,
                            url: latest.url.clone(),
                            in_stock: record.in_stock,
                        },
                    )
                    .await?
            }
        };

        self.cache.delete_by_tag(&product_tag(product_id)).await;
        Ok(price)
    }

    /// Update every product independently.
    pub async fn batch_update_prices(&self, product_ids: &[String]) -> BatchUpdateSummary {
        let outcomes = join_all(
            product_ids
                .iter()
                .map(|id| async move { (id, self.update_product_price(id).await) }),
        )
        .await;

        let mut summary = BatchUpdateSummary::default();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(_) => summary.success_count += 1,
                Err(e) => {
                    warn!("Price update for {} failed: {}", id, e);
                    summary.failure_count += 1;
                    summary.errors.push(BatchError {
                        product_id: id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        summary
    }

    /// Re-crawl `product_id` every `interval_minutes`, replacing any existing task.
    pub async fn register_update_task(
        &self,
        product_id: &str,
        interval_minutes: u32,
    ) -> CrawlerResult<()> {
        if interval_minutes == 0 {
            return Err(CrawlerError::InvalidInput(
                "interval must be at least one minute".to_string(),
            ));
        }
        if self.store.load_product(product_id).await?.is_none() {
            return Err(CrawlerError::ProductNotFound(product_id.to_string()));
        }

        let task = UpdateTask {
            product_id: product_id.to_string(),
            interval_minutes,
        };
        self.schedule_task(&task).await;
        self.store.save_task(&task).await?;
        info!(
            "Scheduled price updates for {} every {} minute(s)",
            product_id, interval_minutes
        );
        Ok(())
    }

    /// Stop re-crawling `product_id`. Returns whether a task was scheduled.
    pub async fn unregister_update_task(&self, product_id: &str) -> CrawlerResult<bool> {
        let removed = self
            .scheduler
            .unregister_job(&UpdateTask::job_name(product_id))
            .await;
        self.store.delete_task(product_id).await?;
        Ok(removed)
    }

    /// Re-register every persisted update task. Returns how many were restored.
    pub async fn restore_update_tasks(&self) -> CrawlerResult<usize> {
        let tasks = self.store.load_tasks().await?;
        for task in &tasks {
            self.schedule_task(task).await;
        }
        if !tasks.is_empty() {
            info!("Restored {} scheduled price update(s)", tasks.len());
        }
        Ok(tasks.len())
    }

    async fn schedule_task(&self, task: &UpdateTask) {
        let manager = self.me.clone();
        let product_id = task.product_id.clone();
        let handler = job_handler(move || {
            let manager = manager.clone();
            let product_id = product_id.clone();
            async move {
                let manager = manager
                    .upgrade()
                    .ok_or_else(|| anyhow::anyhow!("crawler manager shut down"))?;
                let price = manager.update_product_price(&product_id).await?;
                debug!("Scheduled update of {} observed {}", product_id, price.price);
                Ok(())
            }
        });

        self.scheduler
            .register_job(
                &UpdateTask::job_name(&task.product_id),
                Trigger::every_minutes(task.interval_minutes),
                handler,
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::Crawler;
    use crate::repository::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubCrawler {
        platform: Platform,
        price: f64,
        fetches: AtomicUsize,
    }

    impl StubCrawler {
        fn new(platform: Platform, price: f64) -> Arc<Self> {
            Arc::new(Self {
                platform,
                price,
                fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Crawler for StubCrawler {
        fn platform(&self) -> Platform {
            self.platform
        }

        async fn fetch_by_url(&self, url: &str) -> CrawlerResult<ProductRecord> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(ProductRecord {
                id: "100012043978".to_string(),
                platform: self.platform,
                url: url.to_string(),
                name: "Headphones".to_string(),
                description: String::new(),
                image: String::new(),
                category: String::new(),
                brand: String::new(),
                model: String::new(),
                price: self.price,
                original_price: self.price,
                currency: "CNY".to_string(),
                in_stock: true,
                shop: None,
            })
        }

        async fn search_by_keyword(&self, keyword: &str) -> CrawlerResult<Vec<ProductSummary>> {
            Ok(vec![ProductSummary {
                external_id: "1".to_string(),
                platform: self.platform,
                name: keyword.to_string(),
                image: String::new(),
                price: self.price,
                url: "https://item.jd.com/1.html".to_string(),
                shop: None,
            }])
        }
    }

    const URL: &str = "https://item.jd.com/100012043978.html";
    const ID: &str = "JD:100012043978";

    fn manager(crawler: Arc<StubCrawler>) -> (Arc<CrawlerManager>, Arc<MemoryStore>, Arc<Scheduler>) {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Arc::new(Scheduler::default());
        let mut registry: CrawlerRegistry = HashMap::new();
        registry.insert(crawler.platform, crawler as Arc<dyn Crawler>);
        let manager = CrawlerManager::new(
            registry,
            Cache::in_memory(),
            store.clone(),
            scheduler.clone(),
            ManagerOptions::default(),
        );
        (manager, store, scheduler)
    }

    #[test]
    fn test_identify_platform() {
        assert_eq!(identify_platform(URL).unwrap(), Platform::Jd);
        assert_eq!(
            identify_platform("https://item.taobao.com/item.htm?id=1").unwrap(),
            Platform::Taobao
        );
        for bad in ["https://www.amazon.com/dp/B0", "not a url", "ftp://item.jd.com/1.html"] {
            assert!(matches!(
                identify_platform(bad),
                Err(CrawlerError::UnsupportedPlatform(_))
            ));
        }
    }

    #[test]
    fn test_search_cache_key_lists_platforms() {
        assert_eq!(
            search_cache_key("耳机", &[Platform::Jd, Platform::Taobao]),
            "search:耳机:JD,Taobao"
        );
    }

    #[tokio::test]
    async fn test_unregistered_platform_is_unsupported() {
        let (manager, _, _) = manager(StubCrawler::new(Platform::Jd, 10.0));

        let err = manager
            .get_product_info("https://item.taobao.com/item.htm?id=1")
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlerError::UnsupportedPlatform(_)));

        let err = manager
            .search_products("kettle", &[Platform::Taobao])
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlerError::UnsupportedPlatform(_)));
    }

    #[tokio::test]
    async fn test_fetch_persists_and_caches() {
        let crawler = StubCrawler::new(Platform::Jd, 299.0);
        let (manager, store, _) = manager(crawler.clone());

        let first = manager.get_product_info(URL).await.unwrap();
        let second = manager.get_product_info(URL).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(crawler.fetches.load(Ordering::SeqCst), 1);
        let history = store.price_history(ID, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].price, 299.0);
    }

    #[tokio::test]
    async fn test_update_appends_one_latest_price() {
        let crawler = StubCrawler::new(Platform::Jd, 199.0);
        let (manager, store, _) = manager(crawler.clone());
        manager.get_product_info(URL).await.unwrap();

        let price = manager.update_product_price(ID).await.unwrap();

        let history = store.price_history(ID, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], price);
        assert_eq!(crawler.fetches.load(Ordering::SeqCst), 2);
        let product = store.load_product(ID).await.unwrap().unwrap();
        assert_eq!(product.latest_price, Some(price));
    }

    #[tokio::test]
    async fn test_update_rejects_page_of_another_product() {
        let crawler = StubCrawler::new(Platform::Jd, 199.0);
        let (manager, store, _) = manager(crawler.clone());
        let url = "https://item.jd.com/555.html";
        let mut record = crawler.fetch_by_url(url).await.unwrap();
        record.id = "JD:555".to_string();
        store.upsert_product(&record).await.unwrap();
        store.insert_price("JD:555", record.to_new_price()).await.unwrap();

        let err = manager.update_product_price("JD:555").await.unwrap_err();

        assert!(matches!(err, CrawlerError::Extraction(_)));
        assert_eq!(store.price_history("JD:555", 10).await.unwrap().len(), 1);
        assert!(store.load_product(ID).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_of_unknown_product() {
        let (manager, _, _) = manager(StubCrawler::new(Platform::Jd, 10.0));

        let err = manager.update_product_price("missing").await.unwrap_err();

        assert!(matches!(err, CrawlerError::ProductNotFound(_)));
    }

    #[tokio::test]
    async fn test_search_rejects_blank_keyword() {
        let (manager, _, _) = manager(StubCrawler::new(Platform::Jd, 10.0));

        let err = manager.search_products("  ", &[]).await.unwrap_err();

        assert!(matches!(err, CrawlerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_update_tasks_are_scheduled_and_persisted() {
        let (manager, store, scheduler) = manager(StubCrawler::new(Platform::Jd, 10.0));
        manager.get_product_info(URL).await.unwrap();

        manager.register_update_task(ID, 60).await.unwrap();
        manager.register_update_task(ID, 30).await.unwrap();

        let status = scheduler.status().await;
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].name, "update-price:JD:100012043978");
        assert_eq!(status[0].schedule, "every 30m");
        assert_eq!(
            store.load_tasks().await.unwrap(),
            vec![UpdateTask {
                product_id: ID.to_string(),
                interval_minutes: 30,
            }]
        );

        assert!(manager.unregister_update_task(ID).await.unwrap());
        assert!(!scheduler.has_job("update-price:JD:100012043978").await);
        assert!(store.load_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_update_tasks() {
        let (manager, store, scheduler) = manager(StubCrawler::new(Platform::Jd, 10.0));
        store
            .save_task(&UpdateTask {
                product_id: "42".to_string(),
                interval_minutes: 15,
            })
            .await
            .unwrap();

        assert_eq!(manager.restore_update_tasks().await.unwrap(), 1);
        assert!(scheduler.has_job("update-price:42").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_update_records_price() {
        let (manager, store, _) = manager(StubCrawler::new(Platform::Jd, 10.0));
        manager.get_product_info(URL).await.unwrap();
        manager.register_update_task(ID, 5).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5 * 60 + 10)).await;

        assert_eq!(store.price_history(ID, 10).await.unwrap().len(), 2);
    }
}
