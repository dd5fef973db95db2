//! JD (jd.com) extraction strategy.

use std::time::Duration;

use async_trait::async_trait;

use super::gate::AccessGate;
use super::strategy::{ExtractionStrategy, ProductSelectors, SearchSelectors};
use crate::models::Platform;

const SEARCH_BASE: &str = "https://search.jd.com/Search?keyword=";

static PRODUCT: ProductSelectors = ProductSelectors {
    name: ".sku-name",
    description: ".news",
    image: ".goods-intro-pic img",
    category: ".crumb-wrap .item:last-child",
    brand: ".brand-name",
    model: ".parameter2.p-parameter-list li:first-child",
    price_ready: ".price",
    price: ".price",
    original_price: ".original-price",
    stock: ".store-prompt",
    shop_name: None,
    shop_rating: None,
};

static SEARCH: SearchSelectors = SearchSelectors {
    item: ".gl-item",
    link: ".p-img a",
    image: ".p-img img",
    name: ".p-name em",
    price: ".p-price strong",
    shop: ".p-shop a",
};

static GATES: [AccessGate; 1] = [AccessGate::new(
    "captcha",
    "#captcha",
    Duration::from_secs(5),
)];

#[derive(Debug, Clone, Copy, Default)]
pub struct JdStrategy;

#[async_trait]
impl ExtractionStrategy for JdStrategy {
    fn platform(&self) -> Platform {
        Platform::Jd
    }

    fn product_selectors(&self) -> &ProductSelectors {
        &PRODUCT
    }

    fn search_selectors(&self) -> &SearchSelectors {
        &SEARCH
    }

    fn gates(&self) -> &[AccessGate] {
        &GATES
    }

    /// JD item pages look like `https://item.jd.com/100012043978.html`.
    fn product_id(&self, url: &str) -> Option<String> {
        let parsed = url::Url::parse(url).ok()?;
        parsed
            .path_segments()?
            .filter_map(|segment| segment.strip_suffix(".html"))
            .find(|stem| !stem.is_empty() && stem.bytes().all(|b| b.is_ascii_digit()))
            .map(str::to_string)
    }

    fn search_url(&self, keyword: &str) -> String {
        format!("{}{}", SEARCH_BASE, urlencoding::encode(keyword))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_id() {
        let jd = JdStrategy;
        assert_eq!(
            jd.product_id("https://item.jd.com/100012043978.html"),
            Some("100012043978".to_string())
        );
        assert_eq!(
            jd.product_id("https://item.jd.com/100012043978.html?spm=1"),
            Some("100012043978".to_string())
        );
        assert_eq!(jd.product_id("https://item.jd.com/abc.html"), None);
        assert_eq!(jd.product_id("not a url"), None);
    }

    #[test]
    fn test_search_url_encodes_keyword() {
        assert_eq!(
            JdStrategy.search_url("iPhone 15"),
            "https://search.jd.com/Search?keyword=iPhone%2015"
        );
    }

    #[test]
    fn test_stock_prompt() {
        assert!(JdStrategy.in_stock("有货"));
        assert!(!JdStrategy.in_stock("该地区无货"));
    }
}
