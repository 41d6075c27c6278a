//! feedwardend - Feedwarden camera supervision daemon
//!
//! This daemon:
//! 1. Loads and validates configuration (file + FEEDWARDEN_* overrides)
//! 2. Selects the analysis engine by name
//! 3. Starts every configured source under one orchestrator
//! 4. Logs admitted alerts and periodic per-source health
//! 5. Stops all sources and drains the alert pipeline on Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use feedwarden::{EngineRegistry, FeedwardenConfig, LogNotifier, Orchestrator, RtspBackend};

#[derive(Parser, Debug)]
#[command(author, version, about = "Supervise camera sources and fan out throttled alerts")]
struct Args {
    /// Configuration file (TOML when the extension is .toml, JSON otherwise).
    #[arg(long, env = "FEEDWARDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds between health log lines.
    #[arg(long, env = "FEEDWARDEN_HEALTH_SECS", default_value_t = 30)]
    health_secs: u64,

    /// List registered analysis engines and exit.
    #[arg(long)]
    list_engines: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let registry = EngineRegistry::with_builtin();
    if args.list_engines {
        for name in registry.list() {
            println!("{}", name);
        }
        return Ok(());
    }

    let cfg = FeedwardenConfig::load_from(args.config.as_deref())?;
    let engine = registry.select(&cfg.analysis.engine)?;
    log::info!(
        "feedwardend {} starting: engine={}, sources={}, cooldown={:?}, max_running={}",
        env!("CARGO_PKG_VERSION"),
        engine.name(),
        cfg.sources.len(),
        cfg.alerts.cooldown,
        cfg.supervisor.max_running_sources
    );
    if cfg.sources.is_empty() {
        log::warn!("no sources configured (set FEEDWARDEN_SOURCES or add [[sources]] to the config)");
    }

    let orchestrator = Orchestrator::new(cfg, Arc::new(RtspBackend::new()), engine);
    orchestrator.add_notifier(Arc::new(LogNotifier));
    orchestrator.start_all().await?;

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let mut health = tokio::time::interval(Duration::from_secs(args.health_secs.max(1)));
    health.tick().await;
    log::info!("feedwardend running, waiting for shutdown signal (Ctrl-C)...");
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = health.tick() => log_health(&orchestrator).await,
        }
    }

    log::info!("shutdown signal received, stopping sources...");
    orchestrator.shutdown().await;
    Ok(())
}

async fn log_health(orchestrator: &Orchestrator) {
    for record in orchestrator.sources().await {
        let stats = match orchestrator.stats(&record.id).await {
            Ok(stats) => stats,
            Err(_) => continue,
        };
        log::info!(
            "health: {} status={:?} frames={} misses={} analyses={} busy_skips={} alerts={} suppressed={} last_frame={}",
            record.name,
            record.status,
            stats.frames_ingested,
            stats.read_misses,
            stats.analyses_started,
            stats.analyses_skipped_busy,
            stats.alerts_admitted,
            stats.alerts_suppressed,
            record
                .last_frame_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        );
        if let Some(message) = &record.error_message {
            log::warn!("health: {} error: {}", record.name, message);
        }
    }
    log::info!("health: {} alert(s) in log", orchestrator.alert_count());
}
