//! Composition root: one instance of every long-lived service.
//!
//! Lifecycle: [`Services::build`] connects storage and cache and wires the
//! crawler manager. [`Services::start`] registers the maintenance jobs and
//! replays persisted update tasks. [`Services::shutdown`] stops every job.

use std::sync::Arc;

use tracing::{info, warn};

use crate::browser::{ChromiumFactory, SessionFactory};
use crate::cache::{Cache, CacheBackend, InMemoryCacheBackend};
use crate::config::Settings;
use crate::crawler::{default_registry, CrawlerManager, CrawlerRegistry};
use crate::repository::{DieselStore, MemoryStore, StoreHandles};
use crate::scheduler::{jobs, Scheduler};

pub struct Services {
    pub settings: Settings,
    pub cache: Cache,
    pub stores: StoreHandles,
    pub scheduler: Arc<Scheduler>,
    pub manager: Arc<CrawlerManager>,
}

impl Services {
    /// Connect the configured store and cache and wire the built-in crawlers.
    pub async fn build(settings: Settings) -> anyhow::Result<Self> {
        let stores = connect_store(&settings).await?;
        let cache = Cache::new(connect_cache(&settings).await).with_default_ttl(settings.cache_ttl);
        let sessions: Arc<dyn SessionFactory> =
            Arc::new(ChromiumFactory::new(settings.session_config()));
        Self::from_parts(settings, cache, stores, default_registry(sessions))
    }

    /// Wire services from already constructed parts.
    pub fn from_parts(
        settings: Settings,
        cache: Cache,
        stores: StoreHandles,
        crawlers: CrawlerRegistry,
    ) -> anyhow::Result<Self> {
        let scheduler = Arc::new(Scheduler::with_timezone_name(&settings.scheduler_timezone)?);
        let manager = CrawlerManager::new(
            crawlers,
            cache.clone(),
            stores.products.clone(),
            scheduler.clone(),
            settings.manager_options(),
        );
        Ok(Self {
            settings,
            cache,
            stores,
            scheduler,
            manager,
        })
    }

    /// Register maintenance jobs and restore persisted price update tasks.
    pub async fn start(&self) -> anyhow::Result<()> {
        jobs::register_maintenance_jobs(&self.scheduler, &self.stores, &self.cache).await?;
        let restored = self.manager.restore_update_tasks().await?;
        info!(
            "Scheduler running in {} with {} price update task(s)",
            self.scheduler.timezone(),
            restored
        );
        Ok(())
    }

    /// Stop every scheduled job. In-flight job runs finish on their own.
    pub async fn shutdown(&self) {
        self.scheduler.stop_all().await;
        info!("Services stopped");
    }
}

async fn connect_store(settings: &Settings) -> anyhow::Result<StoreHandles> {
    if settings.uses_memory_store() {
        warn!("Using in-memory store; nothing will be persisted");
        return Ok(StoreHandles::from_store(Arc::new(MemoryStore::new())));
    }

    if settings.database_url.is_none() {
        tokio::fs::create_dir_all(&settings.data_dir).await?;
    }
    let url = settings.database_url();
    let store = DieselStore::connect(&url).await?;
    info!("Connected to {}", url);
    Ok(StoreHandles::from_store(Arc::new(store)))
}

async fn connect_cache(settings: &Settings) -> Arc<dyn CacheBackend> {
    let Some(url) = settings.redis_url.as_deref() else {
        return Arc::new(InMemoryCacheBackend::new());
    };

    #[cfg(feature = "redis-backend")]
    {
        match crate::cache::RedisCacheBackend::new(url).await {
            Ok(backend) => return Arc::new(backend),
            Err(e) => warn!("Redis unavailable, using in-memory cache: {}", e),
        }
    }
    #[cfg(not(feature = "redis-backend"))]
    warn!(
        "REDIS_URL {} ignored: built without the redis-backend feature",
        url
    );

    Arc::new(InMemoryCacheBackend::new())
}
