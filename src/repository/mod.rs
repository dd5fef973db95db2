//! Persistence and notification collaborators.
//!
//! The core talks to storage only through these traits. [`DieselStore`]
//! keeps everything in SQLite; [`MemoryStore`] keeps it in process for tests
//! and throwaway runs.

pub mod diesel_models;
pub mod diesel_store;
pub mod memory;
pub mod pool;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    ActiveAlert, AlertStatus, NewPrice, NotificationKind, Price, Product, ProductRecord,
    SearchTrend, UpdateTask,
};

pub use diesel_store::DieselStore;
pub use memory::MemoryStore;
pub use pool::{DbError, SqlitePool};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("Product not found: {0}")]
    ProductNotFound(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Products, their price history and persisted update tasks.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// A product with its most recent price attached.
    async fn load_product(&self, id: &str) -> StoreResult<Option<Product>>;

    /// Create the product or refresh its descriptive fields.
    async fn upsert_product(&self, record: &ProductRecord) -> StoreResult<()>;

    /// Append a price observation. Its timestamp is never earlier than the
    /// product's current latest price.
    async fn insert_price(&self, product_id: &str, price: NewPrice) -> StoreResult<Price>;

    /// Price history, newest first.
    async fn price_history(&self, product_id: &str, limit: usize) -> StoreResult<Vec<Price>>;

    async fn save_task(&self, task: &UpdateTask) -> StoreResult<()>;

    async fn delete_task(&self, product_id: &str) -> StoreResult<()>;

    async fn load_tasks(&self) -> StoreResult<Vec<UpdateTask>>;
}

/// Price alerts as seen by the alert job.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn create_alert(
        &self,
        user_id: &str,
        product_id: &str,
        target_price: f64,
    ) -> StoreResult<String>;

    /// Active alerts joined with their product's latest price.
    async fn load_active_alerts(&self) -> StoreResult<Vec<ActiveAlert>>;

    async fn update_alert_status(&self, id: &str, status: AlertStatus) -> StoreResult<()>;
}

/// Expiry sweeps and search statistics for the maintenance jobs.
#[async_trait]
pub trait HousekeepingStore: Send + Sync {
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    /// Delete read notifications created before `cutoff`.
    async fn delete_stale_notifications(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    async fn record_search(&self, query: &str, user_id: Option<&str>) -> StoreResult<()>;

    /// Most frequent queries since `since`, most frequent first.
    async fn top_searches(&self, since: DateTime<Utc>, limit: usize)
        -> StoreResult<Vec<SearchTrend>>;
}

/// Delivers user notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_id: &str,
        kind: NotificationKind,
        title: &str,
        body: &str,
        metadata: serde_json::Value,
    ) -> StoreResult<()>;
}

/// One store seen through each collaborator interface.
#[derive(Clone)]
pub struct StoreHandles {
    pub products: Arc<dyn ProductStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub housekeeping: Arc<dyn HousekeepingStore>,
    pub notifier: Arc<dyn Notifier>,
}

impl StoreHandles {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ProductStore + AlertStore + HousekeepingStore + Notifier + 'static,
    {
        Self {
            products: store.clone(),
            alerts: store.clone(),
            housekeeping: store.clone(),
            notifier: store,
        }
    }
}

/// Timestamp format used for every stored time. Fixed width, so text order
/// is time order.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Parse a stored timestamp, defaulting to Unix epoch on error.
pub fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}
