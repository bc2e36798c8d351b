/// inspect_main.rs — Snapshot inspection
///
/// Prints the persisted user state without touching the network.
use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use token_tracker::config::AppConfig;
use token_tracker::report::UserStatus;
use token_tracker::snapshot;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cfg = AppConfig::from_env()?;
    let store = snapshot::load(&cfg.state_file, cfg.default_global_threshold)
        .with_context(|| format!("Cannot read {}", cfg.state_file.display()))?;

    println!(
        "{} users ({} active), {} tokens tracked",
        store.len(),
        store.active_user_ids().len(),
        store.tracked_token_union().len()
    );
    for user in store.users() {
        print!("{}", UserStatus::from(user));
    }
    Ok(())
}
