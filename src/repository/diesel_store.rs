//! SQLite store built on Diesel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Bool, Double, Nullable, Text};
use diesel::upsert::excluded;
use diesel_async::{RunQueryDsl, SimpleAsyncConnection};
use tracing::{debug, info};

use super::diesel_models::{
    NewNotificationRow, NewProductRow, PriceAlertRow, PriceRow, ProductRow, ScheduledTaskRow,
};
use super::pool::{SqliteConn, SqlitePool};
use super::{
    format_timestamp, AlertStore, HousekeepingStore, Notifier, ProductStore, StoreError,
    StoreResult,
};
use crate::models::{
    ActiveAlert, AlertStatus, NewPrice, NotificationKind, Price, Product, ProductRecord,
    SearchTrend, UpdateTask,
};
use crate::schema::{notifications, price_alerts, prices, products, scheduled_tasks, searches, sessions};
use crate::with_conn;

/// Tables created at startup. Matches `crate::schema`.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    id TEXT PRIMARY KEY NOT NULL,
    platform TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    image TEXT,
    category TEXT,
    brand TEXT,
    model TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS prices (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    product_id TEXT NOT NULL REFERENCES products(id),
    price DOUBLE NOT NULL,
    original_price DOUBLE,
    currency TEXT NOT NULL,
    platform TEXT NOT NULL,
    url TEXT NOT NULL,
    in_stock BOOLEAN NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_prices_product ON prices(product_id, seq);
CREATE TABLE IF NOT EXISTS price_alerts (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    product_id TEXT NOT NULL REFERENCES products(id),
    target_price DOUBLE NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_price_alerts_status ON price_alerts(status);
CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    metadata TEXT NOT NULL,
    read BOOLEAN NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS searches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    query TEXT NOT NULL,
    user_id TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_searches_created ON searches(created_at);
CREATE TABLE IF NOT EXISTS scheduled_tasks (
    product_id TEXT PRIMARY KEY NOT NULL,
    interval_minutes INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
"#;

/// Appends a price whose timestamp is clamped to the product's latest one,
/// in a single statement so concurrent writers cannot interleave.
const INSERT_PRICE_SQL: &str = "INSERT INTO prices \
    (id, product_id, price, original_price, currency, platform, url, in_stock, created_at) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, \
        MAX(?, COALESCE((SELECT MAX(created_at) FROM prices WHERE product_id = ?), '')))";

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

#[derive(Clone)]
pub struct DieselStore {
    pool: SqlitePool,
}

impl DieselStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the database at `url` and create missing tables.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let store = Self::new(SqlitePool::new(url));
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn init_schema(&self) -> StoreResult<()> {
        with_conn!(self.pool, conn, {
            conn.batch_execute("PRAGMA journal_mode = WAL;").await?;
            conn.batch_execute(SCHEMA_SQL).await?;
        });
        debug!("Schema ready at {}", self.pool.database_url());
        Ok(())
    }

    /// Record a login session. Sessions are otherwise owned by the auth layer.
    pub async fn insert_session(
        &self,
        id: &str,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let expires_at = format_timestamp(&expires_at);
        with_conn!(self.pool, conn, {
            diesel::insert_into(sessions::table)
                .values((
                    sessions::id.eq(id),
                    sessions::user_id.eq(user_id),
                    sessions::expires_at.eq(&expires_at),
                ))
                .execute(&mut conn)
                .await?;
        });
        Ok(())
    }

    async fn latest_price(conn: &mut SqliteConn, product_id: &str) -> StoreResult<Option<Price>> {
        let row = prices::table
            .filter(prices::product_id.eq(product_id))
            .order(prices::seq.desc())
            .select(PriceRow::as_select())
            .first(conn)
            .await
            .optional()?;
        row.map(Price::try_from).transpose()
    }
}

#[async_trait]
impl ProductStore for DieselStore {
    async fn load_product(&self, id: &str) -> StoreResult<Option<Product>> {
        with_conn!(self.pool, conn, {
            let row = products::table
                .find(id)
                .select(ProductRow::as_select())
                .first(&mut conn)
                .await
                .optional()?;
            match row {
                Some(row) => {
                    let latest = Self::latest_price(&mut conn, id).await?;
                    Ok(Some(row.into_product(latest)))
                }
                None => Ok(None),
            }
        })
    }

    async fn upsert_product(&self, record: &ProductRecord) -> StoreResult<()> {
        let now = format_timestamp(&Utc::now());
        let row = NewProductRow {
            id: &record.id,
            platform: record.platform.as_str(),
            name: &record.name,
            description: non_empty(&record.description),
            image: non_empty(&record.image),
            category: non_empty(&record.category),
            brand: non_empty(&record.brand),
            model: non_empty(&record.model),
            created_at: &now,
            updated_at: &now,
        };

        with_conn!(self.pool, conn, {
            diesel::insert_into(products::table)
                .values(&row)
                .on_conflict(products::id)
                .do_update()
                .set((
                    products::platform.eq(excluded(products::platform)),
                    products::name.eq(excluded(products::name)),
                    products::description.eq(excluded(products::description)),
                    products::image.eq(excluded(products::image)),
                    products::category.eq(excluded(products::category)),
                    products::brand.eq(excluded(products::brand)),
                    products::model.eq(excluded(products::model)),
                    products::updated_at.eq(excluded(products::updated_at)),
                ))
                .execute(&mut conn)
                .await?;
        });
        Ok(())
    }

    async fn insert_price(&self, product_id: &str, price: NewPrice) -> StoreResult<Price> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = format_timestamp(&Utc::now());

        with_conn!(self.pool, conn, {
            let exists: i64 = products::table
                .filter(products::id.eq(product_id))
                .count()
                .get_result(&mut conn)
                .await?;
            if exists == 0 {
                return Err(StoreError::ProductNotFound(product_id.to_string()));
            }

            diesel::sql_query(INSERT_PRICE_SQL)
                .bind::<Text, _>(&id)
                .bind::<Text, _>(product_id)
                .bind::<Double, _>(price.price)
                .bind::<Nullable<Double>, _>(price.original_price)
                .bind::<Text, _>(&price.currency)
                .bind::<Text, _>(price.platform.as_str())
                .bind::<Text, _>(&price.url)
                .bind::<Bool, _>(price.in_stock)
                .bind::<Text, _>(&now)
                .bind::<Text, _>(product_id)
                .execute(&mut conn)
                .await?;

            let row = prices::table
                .filter(prices::id.eq(&id))
                .select(PriceRow::as_select())
                .first(&mut conn)
                .await?;
            Price::try_from(row)
        })
    }

    async fn price_history(&self, product_id: &str, limit: usize) -> StoreResult<Vec<Price>> {
        with_conn!(self.pool, conn, {
            let rows = prices::table
                .filter(prices::product_id.eq(product_id))
                .order(prices::seq.desc())
                .limit(limit as i64)
                .select(PriceRow::as_select())
                .load(&mut conn)
                .await?;
            rows.into_iter().map(Price::try_from).collect()
        })
    }

    async fn save_task(&self, task: &UpdateTask) -> StoreResult<()> {
        let now = format_timestamp(&Utc::now());
        with_conn!(self.pool, conn, {
            diesel::replace_into(scheduled_tasks::table)
                .values((
                    scheduled_tasks::product_id.eq(&task.product_id),
                    scheduled_tasks::interval_minutes.eq(task.interval_minutes as i32),
                    scheduled_tasks::created_at.eq(&now),
                ))
                .execute(&mut conn)
                .await?;
        });
        Ok(())
    }

    async fn delete_task(&self, product_id: &str) -> StoreResult<()> {
        with_conn!(self.pool, conn, {
            diesel::delete(scheduled_tasks::table.find(product_id))
                .execute(&mut conn)
                .await?;
        });
        Ok(())
    }

    async fn load_tasks(&self) -> StoreResult<Vec<UpdateTask>> {
        with_conn!(self.pool, conn, {
            let rows = scheduled_tasks::table
                .order(scheduled_tasks::product_id.asc())
                .select(ScheduledTaskRow::as_select())
                .load(&mut conn)
                .await?;
            Ok(rows.into_iter().map(UpdateTask::from).collect())
        })
    }
}

#[async_trait]
impl AlertStore for DieselStore {
    async fn create_alert(
        &self,
        user_id: &str,
        product_id: &str,
        target_price: f64,
    ) -> StoreResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = format_timestamp(&Utc::now());
        with_conn!(self.pool, conn, {
            diesel::insert_into(price_alerts::table)
                .values((
                    price_alerts::id.eq(&id),
                    price_alerts::user_id.eq(user_id),
                    price_alerts::product_id.eq(product_id),
                    price_alerts::target_price.eq(target_price),
                    price_alerts::status.eq(AlertStatus::Active.as_str()),
                    price_alerts::created_at.eq(&now),
                ))
                .execute(&mut conn)
                .await?;
        });
        Ok(id)
    }

    async fn load_active_alerts(&self) -> StoreResult<Vec<ActiveAlert>> {
        with_conn!(self.pool, conn, {
            let rows: Vec<(PriceAlertRow, String)> = price_alerts::table
                .inner_join(products::table)
                .filter(price_alerts::status.eq(AlertStatus::Active.as_str()))
                .order(price_alerts::created_at.asc())
                .select((PriceAlertRow::as_select(), products::name))
                .load(&mut conn)
                .await?;

            let mut alerts = Vec::with_capacity(rows.len());
            for (row, product_name) in rows {
                let latest_price = Self::latest_price(&mut conn, &row.product_id).await?;
                alerts.push(ActiveAlert {
                    id: row.id,
                    user_id: row.user_id,
                    product_id: row.product_id,
                    product_name,
                    target_price: row.target_price,
                    latest_price,
                });
            }
            Ok(alerts)
        })
    }

    async fn update_alert_status(&self, id: &str, status: AlertStatus) -> StoreResult<()> {
        with_conn!(self.pool, conn, {
            diesel::update(price_alerts::table.find(id))
                .set(price_alerts::status.eq(status.as_str()))
                .execute(&mut conn)
                .await?;
        });
        Ok(())
    }
}

#[async_trait]
impl HousekeepingStore for DieselStore {
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let now = format_timestamp(&now);
        with_conn!(self.pool, conn, {
            let deleted = diesel::delete(sessions::table.filter(sessions::expires_at.lt(&now)))
                .execute(&mut conn)
                .await?;
            Ok(deleted as u64)
        })
    }

    async fn delete_stale_notifications(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let cutoff = format_timestamp(&cutoff);
        with_conn!(self.pool, conn, {
            let deleted = diesel::delete(
                notifications::table
                    .filter(notifications::read.eq(true))
                    .filter(notifications::created_at.lt(&cutoff)),
            )
            .execute(&mut conn)
            .await?;
            Ok(deleted as u64)
        })
    }

    async fn record_search(&self, query: &str, user_id: Option<&str>) -> StoreResult<()> {
        let now = format_timestamp(&Utc::now());
        with_conn!(self.pool, conn, {
            diesel::insert_into(searches::table)
                .values((
                    searches::query.eq(query),
                    searches::user_id.eq(user_id),
                    searches::created_at.eq(&now),
                ))
                .execute(&mut conn)
                .await?;
        });
        Ok(())
    }

    async fn top_searches(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<SearchTrend>> {
        use diesel::dsl::count_star;

        let since = format_timestamp(&since);
        with_conn!(self.pool, conn, {
            let rows: Vec<(String, i64)> = searches::table
                .filter(searches::created_at.ge(&since))
                .group_by(searches::query)
                .select((searches::query, count_star()))
                .order((count_star().desc(), searches::query.asc()))
                .limit(limit as i64)
                .load(&mut conn)
                .await?;
            Ok(rows
                .into_iter()
                .map(|(query, count)| SearchTrend {
                    query,
                    count: count as u64,
                })
                .collect())
        })
    }
}

#[async_trait]
impl Notifier for DieselStore {
    async fn notify(
        &self,
        user_id: &str,
        kind: NotificationKind,
        title: &str,
        body: &str,
        metadata: serde_json::Value,
    ) -> StoreResult<()> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = format_timestamp(&Utc::now());
        let metadata = metadata.to_string();
        let row = NewNotificationRow {
            id: &id,
            user_id,
            kind: kind.as_str(),
            title,
            body,
            metadata: &metadata,
            read: false,
            created_at: &now,
        };
        with_conn!(self.pool, conn, {
            diesel::insert_into(notifications::table)
                .values(&row)
                .execute(&mut conn)
                .await?;
        });
        info!("Notified {} ({}): {}", user_id, kind.as_str(), title);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Platform;
    use chrono::Duration;
    use tempfile::tempdir;

    async fn setup() -> (DieselStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = DieselStore::connect(&dir.path().join("test.db").display().to_string())
            .await
            .unwrap();
        (store, dir)
    }

    fn record(id: &str, price: f64) -> ProductRecord {
        ProductRecord {
            id: id.to_string(),
            platform: Platform::Jd,
            url: format!("https://item.jd.com/{}.html", id),
            name: "Apple iPhone 15".to_string(),
            description: String::new(),
            image: "https://img.jd.com/1.jpg".to_string(),
            category: "Phones".to_string(),
            brand: "Apple".to_string(),
            model: String::new(),
            price,
            original_price: price,
            currency: "CNY".to_string(),
            in_stock: true,
            shop: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_price_history() {
        let (store, _dir) = setup().await;
        let rec = record("1001", 5999.0);
        store.upsert_product(&rec).await.unwrap();
        let first = store.insert_price("1001", rec.to_new_price()).await.unwrap();
        let second = store
            .insert_price("1001", record("1001", 5799.0).to_new_price())
            .await
            .unwrap();

        let product = store.load_product("1001").await.unwrap().unwrap();
        assert_eq!(product.brand.as_deref(), Some("Apple"));
        assert_eq!(product.model, None);
        assert_eq!(product.latest_price.unwrap().id, second.id);

        let history = store.price_history("1001", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, second.id);
        assert_eq!(history[1].id, first.id);
        assert!(second.created_at >= first.created_at);
    }

    #[tokio::test]
    async fn test_upsert_refreshes_fields() {
        let (store, _dir) = setup().await;
        store.upsert_product(&record("1001", 1.0)).await.unwrap();
        let mut renamed = record("1001", 1.0);
        renamed.name = "Apple iPhone 15 Pro".to_string();
        store.upsert_product(&renamed).await.unwrap();

        let product = store.load_product("1001").await.unwrap().unwrap();
        assert_eq!(product.name, "Apple iPhone 15 Pro");
        assert!(product.latest_price.is_none());
    }

    #[tokio::test]
    async fn test_insert_price_for_unknown_product() {
        let (store, _dir) = setup().await;
        let err = store
            .insert_price("missing", record("missing", 1.0).to_new_price())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ProductNotFound(_)));
        assert!(store.load_product("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_alerts_join_latest_price() {
        let (store, _dir) = setup().await;
        store.upsert_product(&record("1001", 10.0)).await.unwrap();
        store
            .insert_price("1001", record("1001", 10.0).to_new_price())
            .await
            .unwrap();
        let alert_id = store.create_alert("user-1", "1001", 12.0).await.unwrap();

        let alerts = store.load_active_alerts().await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].product_name, "Apple iPhone 15");
        assert_eq!(alerts[0].latest_price.as_ref().unwrap().price, 10.0);

        store
            .update_alert_status(&alert_id, AlertStatus::Triggered)
            .await
            .unwrap();
        assert!(store.load_active_alerts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_housekeeping() {
        let (store, _dir) = setup().await;
        let now = Utc::now();
        store
            .insert_session("s1", "user-1", now - Duration::hours(1))
            .await
            .unwrap();
        store
            .insert_session("s2", "user-1", now + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(store.delete_expired_sessions(now).await.unwrap(), 1);

        store
            .notify("user-1", NotificationKind::System, "hi", "body", serde_json::json!({}))
            .await
            .unwrap();
        // Unread notifications survive any cutoff.
        assert_eq!(
            store
                .delete_stale_notifications(now + Duration::days(1))
                .await
                .unwrap(),
            0
        );

        for q in ["iphone", "iphone", "kettle"] {
            store.record_search(q, None).await.unwrap();
        }
        let trends = store
            .top_searches(now - Duration::hours(24), 10)
            .await
            .unwrap();
        assert_eq!(trends[0].query, "iphone");
        assert_eq!(trends[0].count, 2);
        assert_eq!(trends.len(), 2);
    }

    #[tokio::test]
    async fn test_tasks_persist() {
        let (store, _dir) = setup().await;
        let task = UpdateTask {
            product_id: "1001".to_string(),
            interval_minutes: 30,
        };
        store.save_task(&task).await.unwrap();
        store
            .save_task(&UpdateTask {
                interval_minutes: 45,
                ..task.clone()
            })
            .await
            .unwrap();

        let tasks = store.load_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].interval_minutes, 45);

        store.delete_task("1001").await.unwrap();
        assert!(store.load_tasks().await.unwrap().is_empty());
    }
}
