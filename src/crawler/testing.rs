//! Scripted page sessions for crawler tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{CrawlerError, CrawlerResult};
use crate::browser::{poll_for_selector, PageSession, SessionFactory};

/// What every page opened by a [`ScriptedFactory`] contains.
#[derive(Debug, Clone, Default)]
pub struct PageScript {
    pub texts: HashMap<String, String>,
    pub attributes: HashMap<(String, String), String>,
    pub present: HashSet<String>,
    pub evaluate_result: serde_json::Value,
    pub navigation_error: Option<String>,
}

impl PageScript {
    pub fn text(mut self, selector: &str, value: &str) -> Self {
        self.texts.insert(selector.to_string(), value.to_string());
        self
    }

    pub fn attribute(mut self, selector: &str, name: &str, value: &str) -> Self {
        self.attributes
            .insert((selector.to_string(), name.to_string()), value.to_string());
        self
    }

    pub fn present(mut self, selector: &str) -> Self {
        self.present.insert(selector.to_string());
        self
    }

    pub fn evaluate(mut self, value: serde_json::Value) -> Self {
        self.evaluate_result = value;
        self
    }

    pub fn failing_navigation(mut self, reason: &str) -> Self {
        self.navigation_error = Some(reason.to_string());
        self
    }
}

#[derive(Default)]
pub struct ScriptedFactory {
    pub script: PageScript,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    pub visited: Arc<std::sync::Mutex<Vec<String>>>,
}

impl ScriptedFactory {
    pub fn new(script: PageScript) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn open(&self) -> CrawlerResult<Box<dyn PageSession>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedPage {
            script: self.script.clone(),
            closed: self.closed.clone(),
            visited: self.visited.clone(),
        }))
    }
}

struct ScriptedPage {
    script: PageScript,
    closed: Arc<AtomicUsize>,
    visited: Arc<std::sync::Mutex<Vec<String>>>,
}

#[async_trait]
impl PageSession for ScriptedPage {
    async fn navigate(&self, url: &str) -> CrawlerResult<()> {
        self.visited.lock().unwrap().push(url.to_string());
        match self.script.navigation_error {
            Some(ref reason) => Err(CrawlerError::Navigation {
                url: url.to_string(),
                attempts: 3,
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> CrawlerResult<()> {
        poll_for_selector(self, selector, timeout, Duration::from_millis(250)).await
    }

    async fn text(&self, selector: &str) -> CrawlerResult<String> {
        Ok(self.script.texts.get(selector).cloned().unwrap_or_default())
    }

    async fn attribute(&self, selector: &str, name: &str) -> CrawlerResult<String> {
        Ok(self
            .script
            .attributes
            .get(&(selector.to_string(), name.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn exists(&self, selector: &str) -> bool {
        self.script.present.contains(selector) || self.script.texts.contains_key(selector)
    }

    async fn evaluate(&self, _script: &str) -> CrawlerResult<serde_json::Value> {
        Ok(self.script.evaluate_result.clone())
    }

    async fn close(self: Box<Self>) -> CrawlerResult<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
