//! Shared helper functions for CLI commands.

use crate::models::Platform;

/// Truncate a string to at most `max` characters, marking the cut.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", kept)
}

/// Parse platform names given on the command line.
pub fn parse_platforms(names: &[String]) -> anyhow::Result<Vec<Platform>> {
    names
        .iter()
        .map(|name| {
            Platform::from_str(name).ok_or_else(|| anyhow::anyhow!("Unsupported platform: {}", name))
        })
        .collect()
}

/// Format a price with its currency.
pub fn format_price(price: f64, currency: &str) -> String {
    match currency {
        "CNY" => format!("¥{:.2}", price),
        _ => format!("{:.2} {}", price, currency),
    }
}
