//! API endpoint handlers.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::response::{ApiError, ApiResponse};
use super::AppState;
use crate::models::Platform;

const MAX_KEYWORD_CHARS: usize = 100;
const MAX_BATCH: usize = 100;
const MIN_INTERVAL_MINUTES: u32 = 5;
const MAX_INTERVAL_MINUTES: u32 = 1440;

type ApiResult<T> = Result<T, ApiError>;

/// Health check endpoint for container orchestration.
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub keyword: String,
    #[serde(default)]
    pub platforms: Option<Vec<String>>,
}

/// Search products across platforms.
pub async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = body?;
    let keyword = request.keyword.trim();
    let length = keyword.chars().count();
    if length == 0 || length > MAX_KEYWORD_CHARS {
        return Err(ApiError::bad_request(format!(
            "keyword must be 1 to {} characters",
            MAX_KEYWORD_CHARS
        )));
    }
    let platforms = parse_platforms(request.platforms.as_deref().unwrap_or_default())?;

    let user = headers.get("x-user-id").and_then(|v| v.to_str().ok());
    if let Err(e) = state.housekeeping.record_search(keyword, user).await {
        warn!("Could not record search {:?}: {}", keyword, e);
    }

    let results = state.manager.search_products(keyword, &platforms).await?;
    Ok(ApiResponse::ok(json!({ "results": results })))
}

fn parse_platforms(names: &[String]) -> ApiResult<Vec<Platform>> {
    names
        .iter()
        .map(|name| {
            Platform::from_str(name)
                .ok_or_else(|| ApiError::bad_request(format!("Unsupported platform: {}", name)))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct ProductQuery {
    pub url: String,
}

/// Product details for a product page URL.
pub async fn product_info(
    State(state): State<AppState>,
    query: Result<Query<ProductQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(query) = query?;
    if url::Url::parse(&query.url).is_err() {
        return Err(ApiError::bad_request("url must be an absolute URL"));
    }

    let product = state.manager.get_product_info(&query.url).await?;
    Ok(ApiResponse::ok(json!({ "product": product })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRequest {
    pub product_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub product_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub product_id: String,
    /// Minutes between updates; the configured default when absent.
    #[serde(default)]
    pub interval: Option<u32>,
}

fn require_product_id(id: &str) -> ApiResult<&str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ApiError::bad_request("productId is required"));
    }
    Ok(id)
}

/// Re-crawl one product now.
pub async fn update_price(
    State(state): State<AppState>,
    body: Result<Json<ProductRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = body?;
    let product_id = require_product_id(&request.product_id)?;

    let price = state.manager.update_product_price(product_id).await?;
    Ok(ApiResponse::ok(json!({ "result": price })))
}

/// Re-crawl several products now.
pub async fn batch_update(
    State(state): State<AppState>,
    body: Result<Json<BatchRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = body?;
    if request.product_ids.is_empty() || request.product_ids.len() > MAX_BATCH {
        return Err(ApiError::bad_request(format!(
            "productIds must hold 1 to {} ids",
            MAX_BATCH
        )));
    }
    let ids = request
        .product_ids
        .iter()
        .map(|id| require_product_id(id).map(str::to_string))
        .collect::<ApiResult<Vec<String>>>()?;

    let summary = state.manager.batch_update_prices(&ids).await;
    Ok(ApiResponse::ok(json!({ "results": summary })))
}

/// Schedule recurring updates of one product.
pub async fn register_task(
    State(state): State<AppState>,
    body: Result<Json<ScheduleRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = body?;
    let product_id = require_product_id(&request.product_id)?;
    let interval = request.interval.unwrap_or(state.default_interval);
    if !(MIN_INTERVAL_MINUTES..=MAX_INTERVAL_MINUTES).contains(&interval) {
        return Err(ApiError::bad_request(format!(
            "interval must be {} to {} minutes",
            MIN_INTERVAL_MINUTES, MAX_INTERVAL_MINUTES
        )));
    }

    state
        .manager
        .register_update_task(product_id, interval)
        .await?;
    Ok(ApiResponse::ok(
        json!({ "productId": product_id, "interval": interval }),
    ))
}

/// Stop recurring updates of one product.
pub async fn unregister_task(
    State(state): State<AppState>,
    body: Result<Json<ProductRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = body?;
    let product_id = require_product_id(&request.product_id)?;

    let removed = state.manager.unregister_update_task(product_id).await?;
    Ok(ApiResponse::ok(
        json!({ "productId": product_id, "removed": removed }),
    ))
}

/// Every scheduled job with its next run time.
pub async fn scheduler_status(State(state): State<AppState>) -> impl IntoResponse {
    let jobs = state.scheduler.status().await;
    ApiResponse::ok(json!({ "timezone": state.scheduler.timezone().name(), "jobs": jobs }))
}
