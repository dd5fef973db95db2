//! pricecrawl - cross-platform product price crawler.
//!
//! Crawls product pages and keyword searches on JD and Taobao through a
//! headless browser, caches results with tag-based invalidation, keeps an
//! append-only price history and re-crawls tracked products on a schedule.

pub mod app;
pub mod browser;
pub mod cache;
pub mod cli;
pub mod config;
pub mod crawler;
pub mod models;
pub mod repository;
pub mod scheduler;
pub mod schema;
pub mod server;
