//! Scheduled update tasks and search statistics.

use serde::{Deserialize, Serialize};

/// A recurring re-crawl of one product's price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTask {
    pub product_id: String,
    pub interval_minutes: u32,
}

impl UpdateTask {
    /// Scheduler job name for a product's update task.
    pub fn job_name(product_id: &str) -> String {
        format!("update-price:{}", product_id)
    }
}

/// How often a keyword was searched in a time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchTrend {
    pub query: String,
    pub count: u64,
}
