//! Diesel ORM models for database tables.

use diesel::prelude::*;

use super::{parse_timestamp, StoreError};
use crate::models::{AlertStatus, Platform, Price, Product, UpdateTask};
use crate::schema;

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::products)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProductRow {
    pub id: String,
    pub platform: String,
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ProductRow {
    pub fn into_product(self, latest_price: Option<Price>) -> Product {
        Product {
            id: self.id,
            name: self.name,
            description: self.description,
            image: self.image,
            category: self.category,
            brand: self.brand,
            model: self.model,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
            latest_price,
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::products)]
pub struct NewProductRow<'a> {
    pub id: &'a str,
    pub platform: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub image: Option<&'a str>,
    pub category: Option<&'a str>,
    pub brand: Option<&'a str>,
    pub model: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::prices)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PriceRow {
    pub seq: i32,
    pub id: String,
    pub product_id: String,
    pub price: f64,
    pub original_price: Option<f64>,
    pub currency: String,
    pub platform: String,
    pub url: String,
    pub in_stock: bool,
    pub created_at: String,
}

impl TryFrom<PriceRow> for Price {
    type Error = StoreError;

    fn try_from(row: PriceRow) -> Result<Self, Self::Error> {
        let platform = Platform::from_str(&row.platform).ok_or_else(|| {
            StoreError::Corrupt(format!("price {} has platform {:?}", row.id, row.platform))
        })?;
        Ok(Price {
            id: row.id,
            product_id: row.product_id,
            price: row.price,
            original_price: row.original_price,
            currency: row.currency,
            platform,
            url: row.url,
            in_stock: row.in_stock,
            created_at: parse_timestamp(&row.created_at),
        })
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::price_alerts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PriceAlertRow {
    pub id: String,
    pub user_id: String,
    pub product_id: String,
    pub target_price: f64,
    pub status: String,
    pub created_at: String,
}

impl PriceAlertRow {
    pub fn status(&self) -> Result<AlertStatus, StoreError> {
        AlertStatus::from_str(&self.status).ok_or_else(|| {
            StoreError::Corrupt(format!("alert {} has status {:?}", self.id, self.status))
        })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::notifications)]
pub struct NewNotificationRow<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub kind: &'a str,
    pub title: &'a str,
    pub body: &'a str,
    pub metadata: &'a str,
    pub read: bool,
    pub created_at: &'a str,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::scheduled_tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ScheduledTaskRow {
    pub product_id: String,
    pub interval_minutes: i32,
    pub created_at: String,
}

impl From<ScheduledTaskRow> for UpdateTask {
    fn from(row: ScheduledTaskRow) -> Self {
        UpdateTask {
            product_id: row.product_id,
            interval_minutes: row.interval_minutes.max(1) as u32,
        }
    }
}
