//! Price alerts and user notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Price;

/// Lifecycle state of a price alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Active,
    Triggered,
    Disabled,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Triggered => "TRIGGERED",
            Self::Disabled => "DISABLED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "TRIGGERED" => Some(Self::Triggered),
            "DISABLED" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// A user's request to be told when a product drops to a target price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceAlert {
    pub id: String,
    pub user_id: String,
    pub product_id: String,
    pub target_price: f64,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
}

/// An active alert joined with what the alert job needs to evaluate it.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveAlert {
    pub id: String,
    pub user_id: String,
    pub product_id: String,
    pub product_name: String,
    pub target_price: f64,
    pub latest_price: Option<Price>,
}

/// Kind of notification delivered to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    PriceAlert,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriceAlert => "PRICE_ALERT",
            Self::System => "SYSTEM",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PRICE_ALERT" => Some(Self::PriceAlert),
            "SYSTEM" => Some(Self::System),
            _ => None,
        }
    }
}

/// A stored notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub metadata: serde_json::Value,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        for status in [AlertStatus::Active, AlertStatus::Triggered, AlertStatus::Disabled] {
            assert_eq!(AlertStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(AlertStatus::from_str("active"), None);
    }
}
