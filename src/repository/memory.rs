//! In-process store for tests and runs without a database.
//!
//! State is not persisted across restarts.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{AlertStore, HousekeepingStore, Notifier, ProductStore, StoreError, StoreResult};
use crate::models::{
    ActiveAlert, AlertStatus, NewPrice, Notification, NotificationKind, Price, PriceAlert,
    Product, ProductRecord, SearchTrend, UpdateTask,
};

#[derive(Default)]
struct State {
    products: HashMap<String, Product>,
    /// Append order is history order.
    prices: Vec<Price>,
    alerts: Vec<PriceAlert>,
    notifications: Vec<Notification>,
    sessions: HashMap<String, DateTime<Utc>>,
    searches: Vec<(String, DateTime<Utc>)>,
    tasks: BTreeMap<String, UpdateTask>,
}

impl State {
    fn latest_price(&self, product_id: &str) -> Option<&Price> {
        self.prices.iter().rev().find(|p| p.product_id == product_id)
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored notification, oldest first.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.read().await.notifications.clone()
    }

    pub async fn mark_notifications_read(&self, user_id: &str) {
        let mut state = self.state.write().await;
        for n in state.notifications.iter_mut().filter(|n| n.user_id == user_id) {
            n.read = true;
        }
    }

    pub async fn insert_session(&self, id: &str, expires_at: DateTime<Utc>) {
        self.state
            .write()
            .await
            .sessions
            .insert(id.to_string(), expires_at);
    }

    /// Insert a notification with an explicit creation time.
    pub async fn insert_notification(&self, notification: Notification) {
        self.state.write().await.notifications.push(notification);
    }

    pub async fn alert_status(&self, id: &str) -> Option<AlertStatus> {
        let state = self.state.read().await;
        state.alerts.iter().find(|a| a.id == id).map(|a| a.status)
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn load_product(&self, id: &str) -> StoreResult<Option<Product>> {
        let state = self.state.read().await;
        Ok(state.products.get(id).map(|p| Product {
            latest_price: state.latest_price(id).cloned(),
            ..p.clone()
        }))
    }

    async fn upsert_product(&self, record: &ProductRecord) -> StoreResult<()> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let created_at = state
            .products
            .get(&record.id)
            .map(|p| p.created_at)
            .unwrap_or(now);
        state.products.insert(
            record.id.clone(),
            Product {
                id: record.id.clone(),
                name: record.name.clone(),
                description: non_empty(&record.description),
                image: non_empty(&record.image),
                category: non_empty(&record.category),
                brand: non_empty(&record.brand),
                model: non_empty(&record.model),
                created_at,
                updated_at: now,
                latest_price: None,
            },
        );
        Ok(())
    }

    async fn insert_price(&self, product_id: &str, price: NewPrice) -> StoreResult<Price> {
        let mut state = self.state.write().await;
        if !state.products.contains_key(product_id) {
            return Err(StoreError::ProductNotFound(product_id.to_string()));
        }

        let now = Utc::now();
        let created_at = match state.latest_price(product_id) {
            Some(latest) if latest.created_at > now => latest.created_at,
            _ => now,
        };

        let price = Price {
            id: uuid::Uuid::new_v4().to_string(),
            product_id: product_id.to_string(),
            price: price.price,
            original_price: price.original_price,
            currency: price.currency,
            platform: price.platform,
            url: price.url,
            in_stock: price.in_stock,
            created_at,
        };
        state.prices.push(price.clone());
        Ok(price)
    }

    async fn price_history(&self, product_id: &str, limit: usize) -> StoreResult<Vec<Price>> {
        let state = self.state.read().await;
        Ok(state
            .prices
            .iter()
            .rev()
            .filter(|p| p.product_id == product_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn save_task(&self, task: &UpdateTask) -> StoreResult<()> {
        self.state
            .write()
            .await
            .tasks
            .insert(task.product_id.clone(), task.clone());
        Ok(())
    }

    async fn delete_task(&self, product_id: &str) -> StoreResult<()> {
        self.state.write().await.tasks.remove(product_id);
        Ok(())
    }

    async fn load_tasks(&self) -> StoreResult<Vec<UpdateTask>> {
        Ok(self.state.read().await.tasks.values().cloned().collect())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn create_alert(
        &self,
        user_id: &str,
        product_id: &str,
        target_price: f64,
    ) -> StoreResult<String> {
        let mut state = self.state.write().await;
        if !state.products.contains_key(product_id) {
            return Err(StoreError::ProductNotFound(product_id.to_string()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        state.alerts.push(PriceAlert {
            id: id.clone(),
            user_id: user_id.to_string(),
            product_id: product_id.to_string(),
            target_price,
            status: AlertStatus::Active,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn load_active_alerts(&self) -> StoreResult<Vec<ActiveAlert>> {
        let state = self.state.read().await;
        Ok(state
            .alerts
            .iter()
            .filter(|a| a.status == AlertStatus::Active)
            .map(|a| ActiveAlert {
                id: a.id.clone(),
                user_id: a.user_id.clone(),
                product_id: a.product_id.clone(),
                product_name: state
                    .products
                    .get(&a.product_id)
                    .map(|p| p.name.clone())
                    .unwrap_or_default(),
                target_price: a.target_price,
                latest_price: state.latest_price(&a.product_id).cloned(),
            })
            .collect())
    }

    async fn update_alert_status(&self, id: &str, status: AlertStatus) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(alert) = state.alerts.iter_mut().find(|a| a.id == id) {
            alert.status = status;
        }
        Ok(())
    }
}

#[async_trait]
impl HousekeepingStore for MemoryStore {
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let before = state.sessions.len();
        state.sessions.retain(|_, expires_at| *expires_at >= now);
        Ok((before - state.sessions.len()) as u64)
    }

    async fn delete_stale_notifications(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let before = state.notifications.len();
        state
            .notifications
            .retain(|n| !(n.read && n.created_at < cutoff));
        Ok((before - state.notifications.len()) as u64)
    }

    async fn record_search(&self, query: &str, _user_id: Option<&str>) -> StoreResult<()> {
        self.state
            .write()
            .await
            .searches
            .push((query.to_string(), Utc::now()));
        Ok(())
    }

    async fn top_searches(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<SearchTrend>> {
        let state = self.state.read().await;
        let mut counts: HashMap<&str, u64> = HashMap::new();
        for (query, at) in &state.searches {
            if *at >= since {
                *counts.entry(query.as_str()).or_default() += 1;
            }
        }
        let mut trends: Vec<SearchTrend> = counts
            .into_iter()
            .map(|(query, count)| SearchTrend {
                query: query.to_string(),
                count,
            })
            .collect();
        trends.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.query.cmp(&b.query)));
        trends.truncate(limit);
        Ok(trends)
    }
}

#[async_trait]
impl Notifier for MemoryStore {
    async fn notify(
        &self,
        user_id: &str,
        kind: NotificationKind,
        title: &str,
        body: &str,
        metadata: serde_json::Value,
    ) -> StoreResult<()> {
        self.state.write().await.notifications.push(Notification {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind,
            title: title.to_string(),
            body: body.to_string(),
            metadata,
            read: false,
            created_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Platform;
    use chrono::Duration;

    fn new_price(amount: f64) -> NewPrice {
        NewPrice {
            price: amount,
            original_price: None,
            currency: "CNY".to_string(),
            platform: Platform::Taobao,
            url: "https://item.taobao.com/item.htm?id=1".to_string(),
            in_stock: true,
        }
    }

    fn record() -> ProductRecord {
        ProductRecord {
            id: "1".to_string(),
            platform: Platform::Taobao,
            url: "https://item.taobao.com/item.htm?id=1".to_string(),
            name: "Kettle".to_string(),
            description: String::new(),
            image: String::new(),
            category: String::new(),
            brand: String::new(),
            model: String::new(),
            price: 59.0,
            original_price: 59.0,
            currency: "CNY".to_string(),
            in_stock: true,
            shop: None,
        }
    }

    #[tokio::test]
    async fn test_latest_price_is_last_appended() {
        let store = MemoryStore::new();
        store.upsert_product(&record()).await.unwrap();
        store.insert_price("1", new_price(59.0)).await.unwrap();
        let second = store.insert_price("1", new_price(49.0)).await.unwrap();

        let product = store.load_product("1").await.unwrap().unwrap();
        assert_eq!(product.latest_price, Some(second));
        assert_eq!(store.price_history("1", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_notifications_only_removes_read_and_old() {
        let store = MemoryStore::new();
        let old = Utc::now() - Duration::days(31);
        for (id, read, created_at) in [("a", true, old), ("b", false, old), ("c", true, Utc::now())] {
            store
                .insert_notification(Notification {
                    id: id.to_string(),
                    user_id: "u".to_string(),
                    kind: NotificationKind::System,
                    title: String::new(),
                    body: String::new(),
                    metadata: serde_json::Value::Null,
                    read,
                    created_at,
                })
                .await;
        }

        let removed = store
            .delete_stale_notifications(Utc::now() - Duration::days(30))
            .await
            .unwrap();

        assert_eq!(removed, 1);
        let left: Vec<String> = store.notifications().await.into_iter().map(|n| n.id).collect();
        assert_eq!(left, vec!["b", "c"]);
    }
}
