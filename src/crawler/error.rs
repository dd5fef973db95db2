//! Crawler error types.

use std::time::Duration;

use thiserror::Error;

use crate::models::Platform;
use crate::repository::StoreError;

/// Result type for crawler and manager operations.
pub type CrawlerResult<T> = Result<T, CrawlerError>;

/// Failures of a crawl, a search or a price update.
#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error("Browser session could not start: {0}")]
    Initialization(String),
    #[error("Navigation to {url} failed after {attempts} attempt(s): {reason}")]
    Navigation {
        url: String,
        attempts: u32,
        reason: String,
    },
    #[error("Timed out after {timeout:?} waiting for {selector}")]
    ElementTimeout { selector: String, timeout: Duration },
    #[error("Access blocked on {platform}: {reason}")]
    AccessBlocked { platform: Platform, reason: String },
    #[error("Required field missing: {0}")]
    Extraction(String),
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),
    #[error("Product not found: {0}")]
    ProductNotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Page session is closed: {0}")]
    PageClosed(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl CrawlerError {
    /// Whether the failure is the caller's fault rather than the platform's or ours.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedPlatform(_) | Self::InvalidInput(_) | Self::ProductNotFound(_)
        )
    }
}
