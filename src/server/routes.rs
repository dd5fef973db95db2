//! Router configuration for the API server.

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use super::handlers;
use super::middleware::{rate_limit, require_token, RateLimit};
use super::AppState;

/// Searches and product fetches per caller per window.
pub const CRAWLER_LIMIT: u32 = 10;
/// Price update requests per caller per window.
pub const PRICE_UPDATE_LIMIT: u32 = 5;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    let window = state.rate_limit_window;
    let limiter = |scope, limit| RateLimit::new(state.cache.clone(), scope, limit, window);

    let crawler = Router::new()
        .route(
            "/crawler",
            post(handlers::search).get(handlers::product_info),
        )
        .route_layer(from_fn_with_state(
            limiter("crawler", CRAWLER_LIMIT),
            rate_limit,
        ));

    let price_update = Router::new()
        .route(
            "/crawler/price-update",
            post(handlers::update_price)
                .put(handlers::batch_update)
                .patch(handlers::register_task)
                .delete(handlers::unregister_task),
        )
        .route_layer(from_fn_with_state(
            limiter("price-update", PRICE_UPDATE_LIMIT),
            rate_limit,
        ));

    let status = Router::new()
        .route("/scheduler/status", get(handlers::scheduler_status))
        .route_layer(from_fn_with_state(
            limiter("default", state.rate_limit_max),
            rate_limit,
        ));

    let api = Router::new()
        .merge(crawler)
        .merge(price_update)
        .merge(status)
        .route_layer(from_fn_with_state(state.tokens.clone(), require_token));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
