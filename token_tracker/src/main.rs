/// main.rs — Tracker Entry Point
///
/// Runs the multi-user price tracker:
///   1. Load config from .env
///   2. Take the instance lock, load the user snapshot (refuse to start if
///      another tracker holds the lock or the snapshot is corrupt)
///   3. Prime the period cache from the price journal
///   4. Spawn the tracker service (poll loop + command channel)
///   5. Optionally read `<user_id> /command` lines from stdin
///   6. Ctrl-C → final snapshot save, exit
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use token_tracker::config::AppConfig;
use token_tracker::console;
use token_tracker::coordinator::TrackingCoordinator;
use token_tracker::journal::PriceJournal;
use token_tracker::lock::InstanceLock;
use token_tracker::notify::LogSink;
use token_tracker::price::DexScreenerClient;
use token_tracker::service::{TrackerHandle, TrackerService};
use token_tracker::snapshot;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════╗");
    info!("║        TOKEN TRACKER  —  PRICE ALERTS        ║");
    info!("╚══════════════════════════════════════════════╝");

    // ── Config ───────────────────────────────────────────────────────────
    let cfg = AppConfig::from_env()?;
    info!(
        "Config: threshold={}% interval={}s state={} data={}",
        cfg.default_global_threshold,
        cfg.check_interval_secs,
        cfg.state_file.display(),
        cfg.data_dir.display(),
    );

    // ── State ────────────────────────────────────────────────────────────
    let instance_lock = InstanceLock::acquire(&cfg.state_file)?;
    let store = snapshot::load(&cfg.state_file, cfg.default_global_threshold)
        .with_context(|| format!("Refusing to start: cannot load {}", cfg.state_file.display()))?;
    let mut coordinator = TrackingCoordinator::new(store);

    let journal = match PriceJournal::open(&cfg.data_dir) {
        Ok(j) => Some(j),
        Err(e) => {
            warn!("Price journal disabled: {e:#}");
            None
        }
    };
    if let Some(journal) = &journal {
        let tokens = coordinator.tokens_to_poll();
        let seeded = journal.latest_prices(&tokens);
        info!("Primed last prices for {}/{} tokens", seeded.len(), tokens.len());
        coordinator.seed_last_prices(seeded);
    }

    // ── Service ──────────────────────────────────────────────────────────
    let supplier = DexScreenerClient::new(
        &cfg.price_api_url,
        Duration::from_secs(cfg.request_timeout_secs),
        Duration::from_millis(cfg.request_spacing_ms),
    )?;
    let (service, handle) = TrackerService::new(
        coordinator,
        Arc::new(supplier),
        Arc::new(LogSink),
        journal,
        cfg.state_file.clone(),
        Duration::from_secs(cfg.check_interval_secs),
    );

    if cfg.enable_console {
        tokio::spawn(read_console(handle.clone(), cfg.max_user_threshold));
        info!("Console enabled: type `<user_id> /start` to register");
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Ctrl-C handler failed: {e}");
        }
    };
    let coordinator = service.run(shutdown).await;
    drop(handle);
    drop(instance_lock);

    info!(
        "Stopped with {} users, {} tokens tracked",
        coordinator.store().len(),
        coordinator.tokens_to_poll().len()
    );
    Ok(())
}

async fn read_console(handle: TrackerHandle, max_threshold: f64) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("stdin read failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let reply = match console::parse_line(&line, max_threshold) {
            Ok((user, cmd)) => console::execute(&handle, user, cmd).await,
            Err(usage) => usage,
        };
        println!("{reply}");
    }
    info!("Console closed");
}
