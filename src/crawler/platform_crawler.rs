//! Crawler that drives one page session per operation through a strategy.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::gate::clear_gates;
use super::strategy::ExtractionStrategy;
use super::{Crawler, CrawlerError, CrawlerResult};
use crate::browser::{close_quietly, PageSession, SessionFactory, DEFAULT_ELEMENT_TIMEOUT};
use crate::models::{Platform, ProductRecord, ProductSummary};

pub struct PlatformCrawler<S> {
    strategy: S,
    sessions: Arc<dyn SessionFactory>,
}

impl<S: ExtractionStrategy> PlatformCrawler<S> {
    pub fn new(strategy: S, sessions: Arc<dyn SessionFactory>) -> Self {
        Self { strategy, sessions }
    }

    async fn fetch_on(&self, page: &dyn PageSession, url: &str) -> CrawlerResult<ProductRecord> {
        let platform = self.strategy.platform();

        page.navigate(url).await?;
        clear_gates(page, platform, self.strategy.gates()).await?;

        let id = self
            .strategy
            .product_id(url)
            .ok_or_else(|| CrawlerError::Extraction(format!("product id not found in {}", url)))?;

        let stock = async {
            let in_stock = self.strategy.extract_stock(page).await.unwrap_or_else(|e| {
                warn!("{}: stock check failed for {}: {}", platform, id, e);
                false
            });
            Ok::<_, CrawlerError>(in_stock)
        };

        let (details, prices, in_stock) = tokio::try_join!(
            self.strategy.extract_details(page),
            self.strategy.extract_price(page),
            stock
        )?;

        debug!("{}: extracted {} at {}", platform, id, prices.price);

        Ok(ProductRecord {
            id,
            platform,
            url: url.to_string(),
            name: details.name,
            description: details.description,
            image: details.image,
            category: details.category,
            brand: details.brand,
            model: details.model,
            price: prices.price,
            original_price: prices.original_price,
            currency: self.strategy.currency().to_string(),
            in_stock,
            shop: details.shop,
        })
    }

    async fn search_on(
        &self,
        page: &dyn PageSession,
        keyword: &str,
    ) -> CrawlerResult<Vec<ProductSummary>> {
        let platform = self.strategy.platform();

        page.navigate(&self.strategy.search_url(keyword)).await?;
        clear_gates(page, platform, self.strategy.gates()).await?;

        let results = self
            .strategy
            .extract_search_results(page, DEFAULT_ELEMENT_TIMEOUT)
            .await?;
        info!(
            "{}: {} result(s) for {:?}",
            platform,
            results.len(),
            keyword
        );
        Ok(results)
    }
}

#[async_trait]
impl<S: ExtractionStrategy> Crawler for PlatformCrawler<S> {
    fn platform(&self) -> Platform {
        self.strategy.platform()
    }

    async fn fetch_by_url(&self, url: &str) -> CrawlerResult<ProductRecord> {
        let page = self.sessions.open().await?;
        let result = self.fetch_on(page.as_ref(), url).await;
        close_quietly(page).await;
        result
    }

    async fn search_by_keyword(&self, keyword: &str) -> CrawlerResult<Vec<ProductSummary>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(CrawlerError::InvalidInput("empty search keyword".to_string()));
        }

        let page = self.sessions.open().await?;
        let result = self.search_on(page.as_ref(), keyword).await;
        close_quietly(page).await;
        result
    }
}
