//! One-shot crawl commands.

use console::style;

use crate::app::Services;
use crate::config::Settings;

use super::super::helpers::{format_price, parse_platforms, truncate};

/// Fetch one product and print it.
pub async fn cmd_fetch(settings: Settings, url: &str) -> anyhow::Result<()> {
    let services = Services::build(settings).await?;
    let product = services.manager.get_product_info(url).await?;

    println!("\n{}", style(&product.name).bold());
    println!("  {:<10} {} {}", "Platform", product.platform, product.id);
    println!(
        "  {:<10} {}",
        "Price",
        style(format_price(product.price, &product.currency)).green()
    );
    if product.original_price > product.price {
        println!(
            "  {:<10} {}",
            "Was",
            format_price(product.original_price, &product.currency)
        );
    }
    println!(
        "  {:<10} {}",
        "Stock",
        if product.in_stock {
            style("in stock").green()
        } else {
            style("out of stock").red()
        }
    );
    if let Some(shop) = product.shop {
        println!("  {:<10} {}", "Shop", shop.name);
    }
    println!("  {:<10} {}", "URL", product.url);
    Ok(())
}

/// Search platforms and print a result table.
pub async fn cmd_search(
    settings: Settings,
    keyword: &str,
    platforms: &[String],
) -> anyhow::Result<()> {
    let platforms = parse_platforms(platforms)?;
    let services = Services::build(settings).await?;
    let results = services.manager.search_products(keyword, &platforms).await?;

    if results.is_empty() {
        println!("{} No results for '{}'", style("!").yellow(), keyword);
        return Ok(());
    }

    println!("\n{}", style(format!("Results for '{}'", keyword)).bold());
    println!("{}", "-".repeat(78));
    println!("{:<8} {:<44} {:>12}  Shop", "Platform", "Name", "Price");
    println!("{}", "-".repeat(78));
    for item in &results {
        println!(
            "{:<8} {:<44} {:>12}  {}",
            item.platform.as_str(),
            truncate(&item.name, 43),
            format_price(item.price, "CNY"),
            item.shop.as_deref().map(|s| truncate(s, 20)).unwrap_or_default()
        );
    }
    println!("\n{} result(s)", results.len());
    Ok(())
}

/// Re-crawl stored products.
pub async fn cmd_update(settings: Settings, product_ids: &[String]) -> anyhow::Result<()> {
    let services = Services::build(settings).await?;
    let summary = services.manager.batch_update_prices(product_ids).await;

    println!(
        "{} {} updated, {} failed",
        if summary.failure_count == 0 {
            style("✓").green()
        } else {
            style("!").yellow()
        },
        summary.success_count,
        summary.failure_count
    );
    for failure in &summary.errors {
        println!(
            "  {} {}: {}",
            style("✗").red(),
            failure.product_id,
            failure.error
        );
    }
    Ok(())
}
