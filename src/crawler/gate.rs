//! Captcha, slider and login gates.

use std::time::Duration;

use tracing::{info, warn};

use super::{CrawlerError, CrawlerResult};
use crate::browser::PageSession;
use crate::models::Platform;

const GATE_POLL: Duration = Duration::from_millis(500);

/// A blocking element and how long to wait for it to be cleared.
#[derive(Debug, Clone, Copy)]
pub struct AccessGate {
    pub name: &'static str,
    pub selector: &'static str,
    pub max_wait: Duration,
}

impl AccessGate {
    pub const fn new(name: &'static str, selector: &'static str, max_wait: Duration) -> Self {
        Self {
            name,
            selector,
            max_wait,
        }
    }
}

/// Check each gate in turn. A present gate is given `max_wait` to disappear
/// (solved by hand or by the page itself); one that is still present fails
/// the operation.
pub async fn clear_gates(
    page: &dyn PageSession,
    platform: Platform,
    gates: &[AccessGate],
) -> CrawlerResult<()> {
    for gate in gates {
        if !page.exists(gate.selector).await {
            continue;
        }

        warn!(
            "{}: {} detected, waiting up to {:?}",
            platform, gate.name, gate.max_wait
        );

        let deadline = tokio::time::Instant::now() + gate.max_wait;
        loop {
            tokio::time::sleep(GATE_POLL).await;
            if !page.exists(gate.selector).await {
                info!("{}: {} cleared", platform, gate.name);
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CrawlerError::AccessBlocked {
                    platform,
                    reason: format!("{} still present after {:?}", gate.name, gate.max_wait),
                });
            }
        }
    }
    Ok(())
}
