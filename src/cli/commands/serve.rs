//! API server command.

use console::style;

use crate::app::Services;
use crate::config::Settings;

/// Start the scheduler and the API server; stop the scheduler on exit.
pub async fn cmd_serve(settings: Settings, bind: &str) -> anyhow::Result<()> {
    let (host, port) = parse_bind_address(bind);

    println!("{} Connecting services...", style("→").cyan());
    let services = Services::build(settings).await?;
    services.start().await?;
    println!(
        "  {} Scheduler running ({} jobs)",
        style("✓").green(),
        services.scheduler.status().await.len()
    );
    if services.settings.api_tokens.is_empty() {
        println!(
            "  {} No API tokens configured, serving unauthenticated on loopback only",
            style("!").yellow()
        );
    }

    println!(
        "{} Starting pricecrawl server at http://{}:{}",
        style("→").cyan(),
        host,
        port
    );
    println!("  Press Ctrl+C to stop");

    let result = crate::server::serve(&services, &host, port).await;
    services.shutdown().await;
    result
}

/// Parse a bind address that can be:
/// - Just a port: "3030" -> 127.0.0.1:3030
/// - Just a host: "0.0.0.0" -> 0.0.0.0:3030
/// - Host and port: "0.0.0.0:3030" -> 0.0.0.0:3030
fn parse_bind_address(bind: &str) -> (String, u16) {
    if let Ok(port) = bind.parse::<u16>() {
        return ("127.0.0.1".to_string(), port);
    }

    if let Some((host, port_str)) = bind.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            return (host.to_string(), port);
        }
    }

    (bind.to_string(), 3030)
}
