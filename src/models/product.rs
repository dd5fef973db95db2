//! Products, price observations and crawl results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Platform;

/// A tracked product and its most recent price observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub latest_price: Option<Price>,
}

/// One immutable price observation.
///
/// Prices are append-only: a changed price is a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub id: String,
    pub product_id: String,
    pub price: f64,
    pub original_price: Option<f64>,
    pub currency: String,
    pub platform: Platform,
    pub url: String,
    pub in_stock: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields for a price observation about to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPrice {
    pub price: f64,
    pub original_price: Option<f64>,
    pub currency: String,
    pub platform: Platform,
    pub url: String,
    pub in_stock: bool,
}

/// Shop details some platforms expose on the product page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopInfo {
    pub name: String,
    pub rating: Option<f64>,
}

/// Structured product data extracted from a product page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub id: String,
    pub platform: Platform,
    pub url: String,
    pub name: String,
    pub description: String,
    pub image: String,
    pub category: String,
    pub brand: String,
    pub model: String,
    pub price: f64,
    pub original_price: f64,
    pub currency: String,
    pub in_stock: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop: Option<ShopInfo>,
}

impl ProductRecord {
    /// The price observation this record represents.
    pub fn to_new_price(&self) -> NewPrice {
        NewPrice {
            price: self.price,
            original_price: Some(self.original_price),
            currency: self.currency.clone(),
            platform: self.platform,
            url: self.url.clone(),
            in_stock: self.in_stock,
        }
    }
}

/// One entry of a keyword search result page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSummary {
    pub external_id: String,
    pub platform: Platform,
    pub name: String,
    pub image: String,
    pub price: f64,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop: Option<String>,
}

impl ProductSummary {
    /// Search entries without an id or name, or with a non-positive price, are dropped.
    pub fn is_valid(&self) -> bool {
        !self.external_id.is_empty()
            && !self.name.is_empty()
            && self.price.is_finite()
            && self.price > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str, name: &str, price: f64) -> ProductSummary {
        ProductSummary {
            external_id: id.to_string(),
            platform: Platform::Jd,
            name: name.to_string(),
            image: String::new(),
            price,
            url: String::new(),
            shop: None,
        }
    }

    #[test]
    fn test_summary_validity() {
        assert!(summary("1", "phone", 10.0).is_valid());
        assert!(!summary("", "phone", 10.0).is_valid());
        assert!(!summary("1", "", 10.0).is_valid());
        assert!(!summary("1", "phone", 0.0).is_valid());
        assert!(!summary("1", "phone", f64::NAN).is_valid());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = ProductRecord {
            id: "100".into(),
            platform: Platform::Taobao,
            url: "https://item.taobao.com/item.htm?id=100".into(),
            name: "Kettle".into(),
            description: String::new(),
            image: String::new(),
            category: String::new(),
            brand: String::new(),
            model: String::new(),
            price: 59.0,
            original_price: 79.0,
            currency: "CNY".into(),
            in_stock: true,
            shop: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["originalPrice"], 79.0);
        assert_eq!(json["inStock"], true);
        assert!(json.get("shop").is_none());
    }
}
