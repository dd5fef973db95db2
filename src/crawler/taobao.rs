//! Taobao (taobao.com) extraction strategy.

use std::time::Duration;

use async_trait::async_trait;

use super::gate::AccessGate;
use super::strategy::{ExtractionStrategy, ProductSelectors, SearchSelectors};
use crate::models::Platform;

const SEARCH_BASE: &str = "https://s.taobao.com/search?q=";

static PRODUCT: ProductSelectors = ProductSelectors {
    name: ".tb-main-title",
    description: ".tb-detail-hd",
    image: ".tb-booth img",
    category: ".tb-category",
    brand: ".tb-brand",
    model: ".tb-model",
    price_ready: ".tb-promo-price",
    price: ".tb-promo-price .tb-rmb-num",
    original_price: ".tb-original-price",
    stock: ".tb-stock",
    shop_name: Some(".shop-name"),
    shop_rating: Some(".shop-rating"),
};

static SEARCH: SearchSelectors = SearchSelectors {
    item: ".item",
    link: ".pic-link",
    image: ".pic img",
    name: ".title",
    price: ".price strong",
    shop: ".shop",
};

static GATES: [AccessGate; 2] = [
    AccessGate::new("slider verification", "#nc_1_n1z", Duration::from_secs(10)),
    AccessGate::new("login wall", ".login-info", Duration::from_secs(10)),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct TaobaoStrategy;

#[async_trait]
impl ExtractionStrategy for TaobaoStrategy {
    fn platform(&self) -> Platform {
        Platform::Taobao
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

    /// Taobao item pages carry the id in the query: `item.htm?id=5860...`.
    fn product_id(&self, url: &str) -> Option<String> {
        let parsed = url::Url::parse(url).ok()?;
        parsed
            .query_pairs()
            .find(|(key, _)| key == "id")
            .map(|(_, value)| value.into_owned())
            .filter(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
    }

    fn search_url(&self, keyword: &str) -> String {
        format!("{}{}", SEARCH_BASE, urlencoding::encode(keyword))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_id_from_query() {
        let tb = TaobaoStrategy;
        assert_eq!(
            tb.product_id("https://item.taobao.com/item.htm?spm=a1&id=586012345678"),
            Some("586012345678".to_string())
        );
        assert_eq!(tb.product_id("https://item.taobao.com/item.htm?itemid=5"), None);
        assert_eq!(tb.product_id("https://item.taobao.com/item.htm"), None);
    }

    #[test]
    fn test_search_url() {
        assert_eq!(
            TaobaoStrategy.search_url("电饭煲"),
            "https://s.taobao.com/search?q=%E7%94%B5%E9%A5%AD%E7%85%B2"
        );
    }
}
