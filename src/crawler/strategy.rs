//! Per-platform extraction strategies.
//!
//! A strategy knows where a platform keeps each field on its pages. The
//! default methods drive a [`PageSession`] with the strategy's selectors;
//! platforms override a method only where their pages differ.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::gate::AccessGate;
use super::{CrawlerError, CrawlerResult};
use crate::browser::{js_string, PageSession, DEFAULT_ELEMENT_TIMEOUT};
use crate::models::{Platform, ProductSummary, ShopInfo};

/// Where the product page keeps each field.
#[derive(Debug, Clone)]
pub struct ProductSelectors {
    pub name: &'static str,
    pub description: &'static str,
    pub image: &'static str,
    pub category: &'static str,
    pub brand: &'static str,
    pub model: &'static str,
    /// Element whose appearance means prices have rendered.
    pub price_ready: &'static str,
    pub price: &'static str,
    pub original_price: &'static str,
    pub stock: &'static str,
    pub shop_name: Option<&'static str>,
    pub shop_rating: Option<&'static str>,
}

/// Where a search result page keeps each entry's fields, relative to the item.
#[derive(Debug, Clone)]
pub struct SearchSelectors {
    pub item: &'static str,
    pub link: &'static str,
    pub image: &'static str,
    pub name: &'static str,
    pub price: &'static str,
    pub shop: &'static str,
}

/// Descriptive fields of a product page. Absent fields are empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductDetails {
    pub name: String,
    pub description: String,
    pub image: String,
    pub category: String,
    pub brand: String,
    pub model: String,
    pub shop: Option<ShopInfo>,
}

/// Current and list price of a product page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceFields {
    pub price: f64,
    pub original_price: f64,
}

/// One search result as scraped, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawSearchItem {
    pub href: String,
    pub name: String,
    pub image: String,
    pub price: String,
    pub shop: String,
}

#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn platform(&self) -> Platform;

    fn product_selectors(&self) -> &ProductSelectors;

    fn search_selectors(&self) -> &SearchSelectors;

    /// Blocking elements checked after each navigation, in order.
    fn gates(&self) -> &[AccessGate];

    /// Product id encoded in a product URL.
    fn product_id(&self, url: &str) -> Option<String>;

    /// Search page URL for `keyword`.
    fn search_url(&self, keyword: &str) -> String;

    fn currency(&self) -> &'static str {
        "CNY"
    }

    /// Whether the stock prompt text means the product can be bought.
    fn in_stock(&self, stock_text: &str) -> bool {
        !stock_text.contains("无货")
    }

    async fn extract_details(&self, page: &dyn PageSession) -> CrawlerResult<ProductDetails> {
        let sel = self.product_selectors();

        if let Err(e) = page.wait_for(sel.name, DEFAULT_ELEMENT_TIMEOUT).await {
            debug!("{}: product name not rendered: {}", self.platform(), e);
        }

        let shop = match sel.shop_name {
            Some(shop_sel) => {
                let name = page.text(shop_sel).await?;
                let rating = match sel.shop_rating {
                    Some(rating_sel) => parse_price(&page.text(rating_sel).await?),
                    None => None,
                };
                (!name.is_empty()).then_some(ShopInfo { name, rating })
            }
            None => None,
        };

        Ok(ProductDetails {
            name: page.text(sel.name).await?,
            description: page.text(sel.description).await?,
            image: page.attribute(sel.image, "src").await?,
            category: page.text(sel.category).await?,
            brand: page.text(sel.brand).await?,
            model: page.text(sel.model).await?,
            shop,
        })
    }

    async fn extract_price(&self, page: &dyn PageSession) -> CrawlerResult<PriceFields> {
        let sel = self.product_selectors();

        page.wait_for(sel.price_ready, DEFAULT_ELEMENT_TIMEOUT)
            .await
            .map_err(|e| CrawlerError::Extraction(format!("price: {}", e)))?;

        let price_text = page.text(sel.price).await?;
        let price = parse_price(&price_text)
            .filter(|p| *p > 0.0)
            .ok_or_else(|| {
                CrawlerError::Extraction(format!("price: unparseable {:?}", price_text))
            })?;
        let original_price = parse_price(&page.text(sel.original_price).await?)
            .filter(|p| *p > 0.0)
            .unwrap_or(price);

        Ok(PriceFields {
            price,
            original_price,
        })
    }

    async fn extract_stock(&self, page: &dyn PageSession) -> CrawlerResult<bool> {
        let text = page.text(self.product_selectors().stock).await?;
        Ok(self.in_stock(&text))
    }

    /// Wait for result items and scrape all of them in one page evaluation.
    async fn extract_search_results(
        &self,
        page: &dyn PageSession,
        timeout: Duration,
    ) -> CrawlerResult<Vec<ProductSummary>> {
        let sel = self.search_selectors();

        if page.wait_for(sel.item, timeout).await.is_err() {
            debug!("{}: no search results rendered", self.platform());
            return Ok(Vec::new());
        }

        let value = page.evaluate(&search_script(sel)).await?;
        let rows: Vec<RawSearchItem> = serde_json::from_value(value)
            .map_err(|e| CrawlerError::Extraction(format!("search results: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|row| ProductSummary {
                external_id: self.product_id(&row.href).unwrap_or_default(),
                platform: self.platform(),
                name: row.name,
                image: row.image,
                price: parse_price(&row.price).unwrap_or(0.0),
                url: row.href,
                shop: (!row.shop.is_empty()).then_some(row.shop),
            })
            .filter(ProductSummary::is_valid)
            .collect())
    }
}

/// Parse a displayed price such as `¥1,299.00`.
///
/// Everything except digits and dots is dropped before parsing.
pub fn parse_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    cleaned.parse::<f64>().ok().filter(|p| p.is_finite())
}

fn search_script(sel: &SearchSelectors) -> String {
    format!(
        r#"Array.from(document.querySelectorAll({item})).map(item => {{
    const link = item.querySelector({link});
    const img = item.querySelector({image});
    const name = item.querySelector({name});
    const price = item.querySelector({price});
    const shop = item.querySelector({shop});
    return {{
        href: link ? (link.href || '') : '',
        name: name ? (name.innerText || name.textContent || '').trim() : '',
        image: img ? (img.src || img.getAttribute('data-src') || '') : '',
        price: price ? (price.innerText || price.textContent || '') : '',
        shop: shop ? (shop.innerText || shop.textContent || '').trim() : '',
    }};
}})"#,
        item = js_string(sel.item),
        link = js_string(sel.link),
        image = js_string(sel.image),
        name = js_string(sel.name),
        price = js_string(sel.price),
        shop = js_string(sel.shop),
    )
}
