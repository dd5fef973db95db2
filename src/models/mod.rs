//! Data models for pricecrawl.

mod alert;
mod platform;
mod product;
mod task;

pub use alert::{ActiveAlert, AlertStatus, Notification, NotificationKind, PriceAlert};
pub use platform::Platform;
pub use product::{NewPrice, Price, Product, ProductRecord, ProductSummary, ShopInfo};
pub use task::{SearchTrend, UpdateTask};
