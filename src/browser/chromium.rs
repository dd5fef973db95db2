//! Chromium-backed page sessions over CDP.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetScriptExecutionDisabledParams,
};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    attribute_script, exists_script, poll_for_selector, retry_fixed, text_script, PageSession,
    SessionConfig, SessionFactory,
};
use crate::crawler::{CrawlerError, CrawlerResult};

/// Common Chrome executable paths to check.
const CHROME_PATHS: &[&str] = &[
    // Linux
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    // macOS
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/opt/google/chrome/google-chrome",
];

/// Executable names looked up on PATH when no known path exists.
const CHROME_COMMANDS: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
];

/// Polling interval for element waits.
const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Upper bound on waiting for the network to go quiet after load.
const NETWORK_IDLE_MAX: Duration = Duration::from_secs(10);

const NETWORK_PROBE_SCRIPT: &str =
    "[document.readyState, performance.getEntriesByType('resource').length]";

/// Launches one browser per session, or opens pages on a remote browser.
pub struct ChromiumFactory {
    config: SessionConfig,
}

impl ChromiumFactory {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    fn find_chrome(&self) -> CrawlerResult<PathBuf> {
        if let Some(ref path) = self.config.chrome_path {
            return Ok(PathBuf::from(shellexpand::tilde(path).as_ref()));
        }

        for path in CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                debug!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in CHROME_COMMANDS {
            if let Ok(path) = which::which(cmd) {
                debug!("Found Chrome in PATH: {}", path.display());
                return Ok(path);
            }
        }

        Err(CrawlerError::Initialization(
            "Chrome/Chromium not found; install it or set browser.chrome_path".to_string(),
        ))
    }

    async fn launch(&self) -> CrawlerResult<(Browser, JoinHandle<()>)> {
        let chrome_path = self.find_chrome()?;
        let (width, height) = self.config.viewport;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .window_size(width, height)
            .request_timeout(self.config.navigation_timeout);

        // with_head means NOT headless
        if !self.config.headless {
            builder = builder.with_head();
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--disable-gpu");

        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder.build().map_err(CrawlerError::Initialization)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| CrawlerError::Initialization(format!("Failed to launch browser: {}", e)))?;

        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok((browser, handle))
    }

    async fn connect_remote(&self, url: &str) -> CrawlerResult<(Browser, JoinHandle<()>)> {
        info!("Connecting to remote browser at {}", url);

        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .send()
            .await
            .map_err(|e| CrawlerError::Initialization(format!("Remote browser unreachable: {}", e)))?
            .json()
            .await
            .map_err(|e| CrawlerError::Initialization(format!("Bad browser version info: {}", e)))?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                CrawlerError::Initialization("No webSocketDebuggerUrl in response".to_string())
            })?;

        let (browser, mut handler) = Browser::connect(ws_url)
            .await
            .map_err(|e| CrawlerError::Initialization(format!("Failed to connect: {}", e)))?;

        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok((browser, handle))
    }

    async fn prepare_page(&self, page: &Page) -> Result<(), String> {
        let (width, height) = self.config.viewport;
        page.execute(SetDeviceMetricsOverrideParams::new(
            width as i64,
            height as i64,
            1.0,
            false,
        ))
        .await
        .map_err(|e| e.to_string())?;
        page.execute(SetUserAgentOverrideParams::new(self.config.user_agent.clone()))
            .await
            .map_err(|e| e.to_string())?;
        page.execute(SetScriptExecutionDisabledParams::new(false))
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[async_trait]
impl SessionFactory for ChromiumFactory {
    async fn open(&self) -> CrawlerResult<Box<dyn PageSession>> {
        let owned = self.config.remote_url.is_none();
        let (mut browser, handler) = match self.config.remote_url {
            Some(ref url) => self.connect_remote(url).await?,
            None => self.launch().await?,
        };

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                if owned {
                    let _ = browser.close().await;
                }
                handler.abort();
                return Err(CrawlerError::Initialization(format!(
                    "Failed to open page: {}",
                    e
                )));
            }
        };

        if let Err(e) = self.prepare_page(&page).await {
            let _ = page.close().await;
            if owned {
                let _ = browser.close().await;
            }
            handler.abort();
            return Err(CrawlerError::Initialization(format!(
                "Failed to configure page: {}",
                e
            )));
        }

        debug!("Opened browser page (owned={})", owned);
        Ok(Box::new(ChromiumSession {
            browser: Mutex::new(Some(browser)),
            page,
            handler: Some(handler),
            owned,
            config: self.config.clone(),
        }))
    }
}

/// One page plus the browser that hosts it.
///
/// Dropping a session without `close` aborts the CDP handler; chromiumoxide
/// kills a launched browser process when its `Browser` is dropped.
pub struct ChromiumSession {
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler: Option<JoinHandle<()>>,
    owned: bool,
    config: SessionConfig,
}

impl ChromiumSession {
    async fn wait_for_network_idle(page: &Page) {
        let deadline = tokio::time::Instant::now() + NETWORK_IDLE_MAX;
        let mut last_count: Option<u64> = None;
        while tokio::time::Instant::now() < deadline {
            let probe = match page.evaluate(NETWORK_PROBE_SCRIPT.to_string()).await {
                Ok(result) => result
                    .into_value::<(String, u64)>()
                    .unwrap_or_else(|_| (String::new(), 0)),
                Err(_) => return,
            };
            let (ready_state, count) = probe;
            if ready_state == "complete" && last_count == Some(count) {
                return;
            }
            last_count = Some(count);
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        debug!("Network still busy after {:?}, continuing", NETWORK_IDLE_MAX);
    }
}

#[async_trait]
impl PageSession for ChromiumSession {
    async fn navigate(&self, url: &str) -> CrawlerResult<()> {
        let page = &self.page;
        let timeout = self.config.navigation_timeout;

        retry_fixed(
            self.config.navigation_attempts,
            self.config.retry_backoff,
            |attempt| async move {
                debug!("Navigating to {} (attempt {})", url, attempt);
                let load = async {
                    page.goto(url).await.map_err(|e| e.to_string())?;
                    Self::wait_for_network_idle(page).await;
                    Ok::<(), String>(())
                };
                match tokio::time::timeout(timeout, load).await {
                    Ok(result) => result,
                    Err(_) => Err(format!("timed out after {:?}", timeout)),
                }
            },
        )
        .await
        .map_err(|(attempts, reason)| CrawlerError::Navigation {
            url: url.to_string(),
            attempts,
            reason,
        })
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> CrawlerResult<()> {
        poll_for_selector(self, selector, timeout, POLL_INTERVAL).await
    }

    async fn text(&self, selector: &str) -> CrawlerResult<String> {
        let value = self.evaluate(&text_script(selector)).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn attribute(&self, selector: &str, name: &str) -> CrawlerResult<String> {
        let value = self.evaluate(&attribute_script(selector, name)).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn exists(&self, selector: &str) -> bool {
        match self.evaluate(&exists_script(selector)).await {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn evaluate(&self, script: &str) -> CrawlerResult<serde_json::Value> {
        let result = self
            .page
            .evaluate(script.to_string())
            .await
            .map_err(|e| CrawlerError::PageClosed(e.to_string()))?;
        Ok(result
            .into_value::<serde_json::Value>()
            .unwrap_or(serde_json::Value::Null))
    }

    async fn close(mut self: Box<Self>) -> CrawlerResult<()> {
        let mut failure = None;

        if let Err(e) = self.page.clone().close().await {
            failure = Some(e.to_string());
        }

        if let Some(mut browser) = self.browser.lock().await.take() {
            if self.owned {
                if let Err(e) = browser.close().await {
                    failure.get_or_insert(e.to_string());
                }
                if let Err(e) = browser.wait().await {
                    warn!("Browser process did not exit cleanly: {}", e);
                }
            }
        }

        if let Some(handler) = self.handler.take() {
            handler.abort();
        }

        match failure {
            Some(reason) => Err(CrawlerError::PageClosed(reason)),
            None => Ok(()),
        }
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}
