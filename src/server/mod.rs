//! HTTP API over the crawler manager and scheduler.
//!
//! Every route except `/health` requires a configured bearer token (when any
//! are configured) and is rate limited per caller through the shared cache.

mod handlers;
mod middleware;
mod response;
mod routes;

pub use middleware::{ApiTokens, RateLimit};
pub use response::{ApiError, ApiResponse};
pub use routes::{create_router, CRAWLER_LIMIT, PRICE_UPDATE_LIMIT};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::app::Services;
use crate::cache::Cache;
use crate::crawler::CrawlerManager;
use crate::repository::HousekeepingStore;
use crate::scheduler::Scheduler;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CrawlerManager>,
    pub scheduler: Arc<Scheduler>,
    pub housekeeping: Arc<dyn HousekeepingStore>,
    pub cache: Cache,
    pub tokens: ApiTokens,
    pub rate_limit_window: Duration,
    pub rate_limit_max: u32,
    /// Update interval for schedule requests that give none, in minutes.
    pub default_interval: u32,
}

impl AppState {
    pub fn new(services: &Services) -> Self {
        let settings = &services.settings;
        Self {
            manager: services.manager.clone(),
            scheduler: services.scheduler.clone(),
            housekeeping: services.stores.housekeeping.clone(),
            cache: services.cache.clone(),
            tokens: ApiTokens::new(settings.api_tokens.clone()),
            rate_limit_window: settings.rate_limit_window,
            rate_limit_max: settings.rate_limit_max,
            default_interval: settings.crawler_interval_minutes,
        }
    }
}

/// Serve the API until Ctrl+C.
///
/// Without API tokens the server only binds to loopback addresses.
pub async fn serve(services: &Services, host: &str, port: u16) -> anyhow::Result<()> {
    let state = AppState::new(services);
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    check_exposure(&addr, &state.tokens)?;
    let app = create_router(state);

    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down server");
        })
        .await?;

    Ok(())
}

fn check_exposure(addr: &SocketAddr, tokens: &ApiTokens) -> anyhow::Result<()> {
    if tokens.is_empty() && !addr.ip().is_loopback() {
        anyhow::bail!(
            "Refusing to serve on {} without API tokens; set API_TOKENS or bind to 127.0.0.1",
            addr
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_api_stays_on_loopback() {
        let open = ApiTokens::default();
        let guarded = ApiTokens::new(vec!["t".to_string()]);
        let public: SocketAddr = "0.0.0.0:3030".parse().unwrap();
        let local: SocketAddr = "127.0.0.1:3030".parse().unwrap();
        let local_v6: SocketAddr = "[::1]:3030".parse().unwrap();

        assert!(check_exposure(&public, &open).is_err());
        assert!(check_exposure(&local, &open).is_ok());
        assert!(check_exposure(&local_v6, &open).is_ok());
        assert!(check_exposure(&public, &guarded).is_ok());
    }
}
