//! Command handlers.

use anyhow::Context;
use cinder_core::ci_config::CiConfig;
use cinder_core::ports::EventBus;
use cinder_db::Database;
use cinder_nats::{LocalEventBus, NatsConfig, NatsEventBus};
use cinder_scheduler::{Scheduler, SchedulerConfig, Stores};
use console::style;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Validate a CI configuration file.
pub fn validate(path: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    match CiConfig::parse(&content) {
        Ok(config) => {
            println!("{} {} is valid", style("✓").green(), path.display());
            print!("{}", summarize(&config));
            Ok(())
        }
        Err(e) => {
            println!("{} {}", style("✗").red(), e);
            anyhow::bail!("{} is invalid", path.display())
        }
    }
}

/// Run one sweep and print its report as JSON.
pub async fn sweep(config: &SchedulerConfig) -> anyhow::Result<()> {
    let scheduler = connect(config).await?;
    let report = scheduler.worker().perform().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Run the worker loop until ctrl-c.
pub async fn worker(config: &SchedulerConfig, owner: Option<String>) -> anyhow::Result<()> {
    let scheduler = connect(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let scheduler = match owner {
        Some(owner) => scheduler.with_worker_owner(owner),
        None => scheduler,
    };
    scheduler.worker().run(shutdown_rx).await;
    Ok(())
}

/// Print the effective configuration.
pub fn show_config(config: &SchedulerConfig) -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}

async fn connect(config: &SchedulerConfig) -> anyhow::Result<Scheduler> {
    let stores = match &config.database_url {
        Some(url) => {
            let db = Database::connect(url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.ensure_schema().await?;
            Stores::postgres(&db)
        }
        None => {
            warn!("No database_url configured, using the in-memory store");
            Stores::in_memory()
        }
    };

    let events: Arc<dyn EventBus> = match &config.nats_url {
        Some(urls) => Arc::new(
            NatsEventBus::connect_with_config(nats_config(urls))
                .await
                .context("Failed to connect to NATS")?,
        ),
        None => Arc::new(LocalEventBus::new()),
    };

    Ok(Scheduler::new(stores, events, config)?)
}

/// `nats_url` may list several cluster members separated by commas.
fn nats_config(urls: &str) -> NatsConfig {
    NatsConfig::default().with_urls(
        urls.split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(String::from)
            .collect(),
    )
}

fn summarize(config: &CiConfig) -> String {
    let mut out = String::new();
    for stage in &config.stages {
        let jobs: Vec<_> = config.jobs.iter().filter(|job| &job.stage == stage).collect();
        if jobs.is_empty() {
            continue;
        }
        out.push_str(&format!("  {}\n", stage));
        for job in jobs {
            match &job.resource_group {
                Some(group) => out.push_str(&format!("    - {} (resource_group: {})\n", job.name, group)),
                None => out.push_str(&format!("    - {}\n", job.name)),
            }
        }
    }
    out
}
