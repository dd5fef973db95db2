//! Page session controller.
//!
//! A [`PageSession`] is a single browser page driven through CDP. Crawlers
//! open one session per operation through a [`SessionFactory`] and close it
//! on every exit path; `close` consumes the session so it cannot run twice.

#[cfg(feature = "browser")]
mod chromium;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::crawler::{CrawlerError, CrawlerResult};

#[cfg(feature = "browser")]
pub use chromium::ChromiumFactory;

/// Desktop Chrome user agent sent by every session.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Default wait for an element to appear.
pub const DEFAULT_ELEMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// How a session is launched and how long its operations may take.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub headless: bool,
    pub viewport: (u32, u32),
    pub user_agent: String,
    /// Bound on a single navigation attempt.
    pub navigation_timeout: Duration,
    pub navigation_attempts: u32,
    pub retry_backoff: Duration,
    /// Explicit browser binary; detected when unset.
    pub chrome_path: Option<String>,
    /// Connect to an already running browser instead of launching one.
    pub remote_url: Option<String>,
    pub chrome_args: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: (1920, 1080),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            navigation_timeout: Duration::from_secs(30),
            navigation_attempts: 3,
            retry_backoff: Duration::from_secs(1),
            chrome_path: None,
            remote_url: None,
            chrome_args: Vec::new(),
        }
    }
}

/// A live browser page.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Load `url` and wait for network activity to settle, retrying on failure.
    async fn navigate(&self, url: &str) -> CrawlerResult<()>;

    /// Wait until `selector` matches an element.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> CrawlerResult<()>;

    /// Trimmed text content of the first match, or empty when absent.
    async fn text(&self, selector: &str) -> CrawlerResult<String>;

    /// Trimmed attribute of the first match, or empty when absent.
    async fn attribute(&self, selector: &str, name: &str) -> CrawlerResult<String>;

    /// Whether `selector` currently matches. Errors count as absent.
    async fn exists(&self, selector: &str) -> bool;

    /// Evaluate a script in the page and return its JSON result.
    async fn evaluate(&self, script: &str) -> CrawlerResult<serde_json::Value>;

    /// Tear down the page and its browser.
    async fn close(self: Box<Self>) -> CrawlerResult<()>;
}

/// Opens isolated page sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> CrawlerResult<Box<dyn PageSession>>;
}

/// Stand-in used when the crate is built without browser support.
#[cfg(not(feature = "browser"))]
pub struct ChromiumFactory;

#[cfg(not(feature = "browser"))]
impl ChromiumFactory {
    pub fn new(_config: SessionConfig) -> Self {
        Self
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl SessionFactory for ChromiumFactory {
    async fn open(&self) -> CrawlerResult<Box<dyn PageSession>> {
        Err(CrawlerError::Initialization(
            "Browser support not compiled. Rebuild with --features browser".to_string(),
        ))
    }
}

/// Close a session, logging rather than returning teardown failures.
pub async fn close_quietly(session: Box<dyn PageSession>) {
    if let Err(e) = session.close().await {
        warn!("Failed to close page session: {}", e);
    }
}

/// Retry `op` up to `attempts` times with a fixed pause between failures.
///
/// Returns the last error message when every attempt fails.
pub async fn retry_fixed<T, F, Fut>(
    attempts: u32,
    backoff: Duration,
    mut op: F,
) -> Result<T, (u32, String)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let attempts = attempts.max(1);
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!("Attempt {}/{} failed: {}", attempt, attempts, e);
                last_error = e;
                if attempt < attempts {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    Err((attempts, last_error))
}

/// Poll `session` until `selector` matches or `timeout` elapses.
pub async fn poll_for_selector(
    session: &dyn PageSession,
    selector: &str,
    timeout: Duration,
    interval: Duration,
) -> CrawlerResult<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if session.exists(selector).await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(CrawlerError::ElementTimeout {
                selector: selector.to_string(),
                timeout,
            });
        }
        tokio::time::sleep(interval).await;
    }
}

/// Quote a value as a JavaScript string literal.
pub(crate) fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Script returning the trimmed text of the first element matching `selector`.
pub(crate) fn text_script(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); return el ? (el.textContent || '').trim() : ''; }})()",
        js_string(selector)
    )
}

/// Script returning the trimmed attribute `name` of the first match.
pub(crate) fn attribute_script(selector: &str, name: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); return el ? (el.getAttribute({}) || '').trim() : ''; }})()",
        js_string(selector),
        js_string(name)
    )
}

/// Script returning whether `selector` matches.
pub(crate) fn exists_script(selector: &str) -> String {
    format!("document.querySelector({}) !== null", js_string(selector))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_retry_fixed_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = retry_fixed(3, Duration::from_secs(1), move |_| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("reset".to_string())
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_fixed_gives_up() {
        let result: Result<(), _> =
            retry_fixed(3, Duration::from_secs(1), |n| async move { Err(format!("fail {}", n)) })
                .await;
        assert_eq!(result, Err((3, "fail 3".to_string())));
    }

    #[test]
    fn test_scripts_escape_selectors() {
        let script = text_script(r#"a[title="x"]"#);
        assert!(script.contains(r#""a[title=\"x\"]""#));
        assert!(exists_script(".price").starts_with("document.querySelector(\".price\")"));
    }
}
