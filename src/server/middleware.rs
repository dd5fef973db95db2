//! Bearer-token authentication and fixed-window rate limiting.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use super::response::ApiError;
use crate::cache::Cache;

/// Tokens accepted in `Authorization: Bearer <token>`. Empty accepts everyone.
#[derive(Clone, Default)]
pub struct ApiTokens(Arc<Vec<String>>);

impl ApiTokens {
    pub fn new(tokens: Vec<String>) -> Self {
        Self(Arc::new(tokens))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn accepts(&self, headers: &HeaderMap) -> bool {
        if self.is_empty() {
            return true;
        }
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| self.0.iter().any(|t| t == token.trim()))
    }
}

pub async fn require_token(
    State(tokens): State<ApiTokens>,
    request: Request,
    next: Next,
) -> Response {
    if !tokens.accepts(request.headers()) {
        return ApiError::new(StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    next.run(request).await
}

/// A request budget per caller per window, shared through the cache.
#[derive(Clone)]
pub struct RateLimit {
    cache: Cache,
    scope: &'static str,
    limit: u32,
    window: Duration,
}

impl RateLimit {
    pub fn new(cache: Cache, scope: &'static str, limit: u32, window: Duration) -> Self {
        Self {
            cache,
            scope,
            limit,
            window,
        }
    }

    fn key(&self, caller: &str) -> String {
        format!("rate-limit:{}:{}", self.scope, caller)
    }
}

/// Who the request counts against: the user header, else the client address.
fn caller_id(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty())
    };
    header("x-user-id")
        .or_else(|| header("x-forwarded-for"))
        .unwrap_or_else(|| "unknown".to_string())
}

fn set_limit_headers(headers: &mut HeaderMap, limit: u32, count: u64, reset_in: Duration) {
    let remaining = u64::from(limit).saturating_sub(count);
    let reset_at = chrono::Utc::now().timestamp() + reset_in.as_secs() as i64;
    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(reset_at));
}

/// Reject callers over budget with 429. A failing backend lets requests through.
pub async fn rate_limit(State(limit): State<RateLimit>, request: Request, next: Next) -> Response {
    let key = limit.key(&caller_id(request.headers()));
    let (count, reset_in) = match limit.cache.increment(&key, limit.window).await {
        Ok(counted) => counted,
        Err(e) => {
            warn!("Rate limiter unavailable, allowing request: {}", e);
            return next.run(request).await;
        }
    };

    let mut response = if count > u64::from(limit.limit) {
        ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            format!("Too many {} requests, try again later", limit.scope),
        )
        .into_response()
    } else {
        next.run(request).await
    };
    set_limit_headers(response.headers_mut(), limit.limit, count, reset_in);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_id_prefers_user_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(caller_id(&headers), "unknown");

        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1, 10.0.0.2"));
        assert_eq!(caller_id(&headers), "10.0.0.1");

        headers.insert("x-user-id", HeaderValue::from_static("u-1"));
        assert_eq!(caller_id(&headers), "u-1");
    }

    #[test]
    fn test_tokens() {
        let mut headers = HeaderMap::new();
        assert!(ApiTokens::default().accepts(&headers));

        let tokens = ApiTokens::new(vec!["secret".to_string()]);
        assert!(!tokens.accepts(&headers));
        headers.insert("authorization", HeaderValue::from_static("Bearer wrong"));
        assert!(!tokens.accepts(&headers));
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        assert!(tokens.accepts(&headers));
    }
}
