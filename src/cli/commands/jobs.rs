//! Scheduler inspection command.

use console::style;

use crate::app::Services;
use crate::config::Settings;

/// Print every job the server would schedule.
pub async fn cmd_jobs(settings: Settings) -> anyhow::Result<()> {
    let services = Services::build(settings).await?;
    services.start().await?;
    let jobs = services.scheduler.status().await;
    services.shutdown().await;

    println!(
        "\n{} ({})",
        style("Scheduled jobs").bold(),
        services.scheduler.timezone()
    );
    println!("{}", "-".repeat(78));
    println!("{:<36} {:<16} Next run", "Name", "Schedule");
    println!("{}", "-".repeat(78));
    for job in jobs {
        let next = job
            .next_run_time
            .map(|t| {
                t.with_timezone(&services.scheduler.timezone())
                    .format("%Y-%m-%d %H:%M")
                    .to_string()
            })
            .unwrap_or_else(|| "-".to_string());
        println!("{:<36} {:<16} {}", job.name, job.schedule, next);
    }
    Ok(())
}
