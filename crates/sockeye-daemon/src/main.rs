//! Sockeye daemon binary entry point.

mod explainer;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sockeye_core::config::Config;
use sockeye_core::{LifecycleEvent, SourceHealth};
use sockeye_sensor::{Poller, SystemSource};

use crate::explainer::HttpExplainer;

/// Sockeye - live observer for the host's network connections.
#[derive(Parser, Debug)]
#[command(name = "sockeye", version, about)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, default_value = "~/.config/sockeye/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<DaemonCommand>,
}

#[derive(Subcommand, Debug)]
enum DaemonCommand {
    /// Run the observer (default).
    Run,
    /// Validate the configuration file and exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = expand_tilde(&args.config);
    let config = Config::load(&config_path).context("loading configuration")?;

    // Filter priority: SOCKEYE_LOG env var > log_level in config.toml > info.
    let env_filter = EnvFilter::try_from_env("SOCKEYE_LOG").unwrap_or_else(|_| {
        let fallback = config.log_level.as_deref().unwrap_or("info");
        EnvFilter::new(fallback)
    });
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(config = %config_path.display(), "sockeye starting");

    // Invalid configuration is fatal before any sampling begins.
    config
        .validate()
        .map_err(anyhow::Error::from)
        .context("invalid configuration")?;

    match args.command {
        Some(DaemonCommand::CheckConfig) => {
            println!("configuration ok: {}", config_path.display());
            println!("  poll interval : {} ms", config.poll_interval_ms);
            println!("  grace cycles  : {}", config.grace_cycles);
            println!("  rules         : {}", config.rules.enabled.join(", "));
            println!(
                "  explainer     : {}",
                if config.explainer.enabled { config.explainer.endpoint.as_str() } else { "disabled" }
            );
            Ok(())
        }
        Some(DaemonCommand::Run) | None => run(config).await,
    }
}

async fn run(config: Config) -> Result<()> {
    let explainer: Option<Arc<dyn sockeye_core::heuristics::explainer::Explainer>> =
        if config.explainer.enabled {
            Some(Arc::new(HttpExplainer::new(&config.explainer)?))
        } else {
            None
        };

    let (poller, handle) = Poller::new(config, Box::new(SystemSource::new()), explainer)
        .context("starting poller")?;
    let mut subscription = handle.subscribe();
    let (task, shutdown) = poller.spawn();

    let mut was_stale = false;
    loop {
        tokio::select! {
            changed = subscription.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = subscription.borrow_and_update().clone();
                report_health(&snapshot.health, &mut was_stale);
                for event in &snapshot.events {
                    report_event(event);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    let _ = shutdown.send(true);
    task.await.context("joining poller task")?;
    Ok(())
}

/// Log health transitions: one warning when the source goes stale, one
/// notice when it recovers.
fn report_health(health: &SourceHealth, was_stale: &mut bool) {
    match health {
        SourceHealth::Stale { last_success, failed_cycles, error } => {
            tracing::warn!(
                failed_cycles,
                last_success = last_success.as_ref().map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".into()),
                error = %error,
                "table is stale"
            );
            *was_stale = true;
        }
        SourceHealth::Fresh { .. } if *was_stale => {
            tracing::info!("snapshot source recovered");
            *was_stale = false;
        }
        SourceHealth::Fresh { .. } => {}
    }
}

fn report_event(event: &LifecycleEvent) {
    match event {
        LifecycleEvent::Appeared(record) => {
            let verdict = record
                .verdict
                .as_ref()
                .map(|v| format!("{} ({})", v.category, v.score))
                .unwrap_or_else(|| "unscored".into());
            tracing::info!(
                id = %record.id,
                key = %record.key,
                state = %record.state,
                process = %record.process,
                verdict = %verdict,
                "connection appeared"
            );
        }
        LifecycleEvent::Updated { id, old, new } => {
            tracing::info!(
                id = %id,
                key = %new.key,
                old_state = %old.state,
                new_state = %new.state,
                process = %new.process,
                "connection updated"
            );
        }
        LifecycleEvent::Vanished { id, last_state } => {
            tracing::info!(id = %id, last_state = %last_state, "connection vanished");
        }
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
        return PathBuf::from("/tmp").join(rest);
    }
    PathBuf::from(path)
}
