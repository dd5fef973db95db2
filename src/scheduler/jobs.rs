//! Always-on maintenance jobs registered once at startup.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use super::{job_handler, Scheduler, SchedulerError};
use crate::cache::Cache;
use crate::crawler::manager::PRODUCTS_TAG;
use crate::models::{AlertStatus, NotificationKind, SearchTrend};
use crate::repository::{AlertStore, HousekeepingStore, Notifier, StoreHandles};

pub const SESSION_CLEANUP_JOB: &str = "cleanup-expired-sessions";
pub const NOTIFICATION_CLEANUP_JOB: &str = "cleanup-read-notifications";
pub const PRICE_ALERT_JOB: &str = "check-price-alerts";
pub const CACHE_SWEEP_JOB: &str = "sweep-product-cache";
pub const SEARCH_TRENDS_JOB: &str = "aggregate-search-trends";

/// Cache key holding the latest search trends.
pub const TRENDING_KEY: &str = "search:trending";

const NOTIFICATION_RETENTION_DAYS: i64 = 30;
const TREND_WINDOW_HOURS: i64 = 24;
const TREND_LIMIT: usize = 10;
const TREND_TTL: Duration = Duration::from_secs(6 * 3600);

/// Register every maintenance job on `scheduler`.
pub async fn register_maintenance_jobs(
    scheduler: &Scheduler,
    stores: &StoreHandles,
    cache: &Cache,
) -> Result<(), SchedulerError> {
    let housekeeping = stores.housekeeping.clone();
    scheduler
        .register_cron(
            SESSION_CLEANUP_JOB,
            "0 0 * * *",
            job_handler(move || {
                let store = housekeeping.clone();
                async move {
                    cleanup_sessions(store.as_ref()).await?;
                    Ok(())
                }
            }),
        )
        .await?;

    let housekeeping = stores.housekeeping.clone();
    scheduler
        .register_cron(
            NOTIFICATION_CLEANUP_JOB,
            "0 0 * * *",
            job_handler(move || {
                let store = housekeeping.clone();
                async move {
                    cleanup_notifications(store.as_ref()).await?;
                    Ok(())
                }
            }),
        )
        .await?;

    let alerts = stores.alerts.clone();
    let notifier = stores.notifier.clone();
    scheduler
        .register_cron(
            PRICE_ALERT_JOB,
            "*/30 * * * *",
            job_handler(move || {
                let alerts = alerts.clone();
                let notifier = notifier.clone();
                async move {
                    check_price_alerts(alerts.as_ref(), notifier.as_ref()).await?;
                    Ok(())
                }
            }),
        )
        .await?;

    let sweep_cache = cache.clone();
    scheduler
        .register_cron(
            CACHE_SWEEP_JOB,
            "0 */6 * * *",
            job_handler(move || {
                let cache = sweep_cache.clone();
                async move {
                    sweep_product_cache(&cache).await;
                    Ok(())
                }
            }),
        )
        .await?;

    let housekeeping = stores.housekeeping.clone();
    let trends_cache = cache.clone();
    scheduler
        .register_cron(
            SEARCH_TRENDS_JOB,
            "0 */4 * * *",
            job_handler(move || {
                let store = housekeeping.clone();
                let cache = trends_cache.clone();
                async move {
                    aggregate_search_trends(store.as_ref(), &cache).await?;
                    Ok(())
                }
            }),
        )
        .await?;

    info!("Registered maintenance jobs");
    Ok(())
}

pub async fn cleanup_sessions(store: &dyn HousekeepingStore) -> anyhow::Result<u64> {
    let removed = store.delete_expired_sessions(Utc::now()).await?;
    info!("Removed {} expired session(s)", removed);
    Ok(removed)
}

/// Remove read notifications older than the retention window.
pub async fn cleanup_notifications(store: &dyn HousekeepingStore) -> anyhow::Result<u64> {
    let cutoff = Utc::now() - chrono::Duration::days(NOTIFICATION_RETENTION_DAYS);
    let removed = store.delete_stale_notifications(cutoff).await?;
    info!("Removed {} read notification(s)", removed);
    Ok(removed)
}

/// Notify every active alert whose product's latest price reached its target,
/// then mark it triggered. Returns how many alerts fired.
pub async fn check_price_alerts(
    alerts: &dyn AlertStore,
    notifier: &dyn Notifier,
) -> anyhow::Result<usize> {
    let mut fired = 0;
    for alert in alerts.load_active_alerts().await? {
        let Some(latest) = alert.latest_price.as_ref() else {
            continue;
        };
        if latest.price > alert.target_price {
            continue;
        }

        let metadata = json!({
            "productName": alert.product_name,
            "currentPrice": latest.price,
            "targetPrice": alert.target_price,
            "currency": latest.currency,
            "platform": latest.platform,
            "productUrl": latest.url,
        });
        let title = format!("Price alert: {}", alert.product_name);
        let body = format!(
            "{} is now {} {:.2}, at or below your target of {:.2}",
            alert.product_name, latest.currency, latest.price, alert.target_price
        );

        if let Err(e) = notifier
            .notify(&alert.user_id, NotificationKind::PriceAlert, &title, &body, metadata)
            .await
        {
            warn!("Could not notify {} for alert {}: {}", alert.user_id, alert.id, e);
            continue;
        }
        if let Err(e) = alerts
            .update_alert_status(&alert.id, AlertStatus::Triggered)
            .await
        {
            warn!("Could not mark alert {} triggered: {}", alert.id, e);
            continue;
        }
        fired += 1;
    }
    if fired > 0 {
        info!("Triggered {} price alert(s)", fired);
    }
    Ok(fired)
}

/// Drop every cached product and purge expired entries.
pub async fn sweep_product_cache(cache: &Cache) {
    let dropped = cache.delete_by_tag(PRODUCTS_TAG).await;
    let purged = cache.purge_expired().await;
    info!(
        "Cache sweep dropped {} product entr(ies), purged {} expired",
        dropped, purged
    );
}

/// Cache the most frequent queries of the last day under [`TRENDING_KEY`].
pub async fn aggregate_search_trends(
    store: &dyn HousekeepingStore,
    cache: &Cache,
) -> anyhow::Result<Vec<SearchTrend>> {
    let since = Utc::now() - chrono::Duration::hours(TREND_WINDOW_HOURS);
    let trends = store.top_searches(since, TREND_LIMIT).await?;
    cache.set(TRENDING_KEY, &trends, Some(TREND_TTL)).await;
    info!("Cached {} trending search(es)", trends.len());
    Ok(trends)
}
