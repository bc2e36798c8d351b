/// snapshot.rs — Persistence boundary
///
/// The whole user state is one JSON document:
///
///   { "version": 1, "users": [ UserRecord, ... ] }
///
/// Users are stored in registration order.  Writes go to a sibling temp file
/// which is then renamed over the target, so a crash mid-save leaves the
/// previous snapshot intact.
///
/// Older deployments kept a bare object keyed by chat id, some entries
/// holding only `active` / `registered_at`.  Those are migrated to default
/// records on load.  Anything else that does not parse is an error: the
/// caller must refuse to start rather than run with users missing.
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::SnapshotError;
use crate::models::{EntryPrice, ThresholdPolicy, TokenId, UserId, UserRecord};
use crate::store::UserStore;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    users:   Vec<UserRecord>,
}

#[derive(Debug, Deserialize)]
struct LegacyUser {
    #[serde(default = "legacy_active")]
    active:           bool,
    #[serde(default)]
    registered_at:    Option<String>,
    #[serde(default)]
    tracked_tokens:   Vec<TokenId>,
    #[serde(default)]
    global_threshold: Option<f64>,
    #[serde(default)]
    token_thresholds: BTreeMap<TokenId, ThresholdPolicy>,
    #[serde(default)]
    entry_prices:     BTreeMap<TokenId, LegacyEntry>,
}

#[derive(Debug, Deserialize)]
struct LegacyEntry {
    price:     f64,
    timestamp: Option<String>,
}

fn legacy_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SnapshotRepr {
    Current(SnapshotFile),
    Legacy(BTreeMap<UserId, LegacyUser>),
}

/// Read the snapshot at `path`.  A missing file is an empty store.
pub fn load(path: &Path, default_threshold: f64) -> Result<UserStore, SnapshotError> {
    if !path.exists() {
        info!("No snapshot at {}, starting with no users", path.display());
        return Ok(UserStore::new(default_threshold));
    }

    let raw = fs::read_to_string(path)?;
    let repr: SnapshotRepr = serde_json::from_str(&raw)?;
    let records = match repr {
        SnapshotRepr::Current(file) => {
            if file.version != SNAPSHOT_VERSION {
                return Err(SnapshotError::Invalid(format!(
                    "unsupported snapshot version {}",
                    file.version
                )));
            }
            file.users
        }
        SnapshotRepr::Legacy(map) => {
            warn!("Migrating legacy user file with {} users", map.len());
            migrate_legacy(map, default_threshold)
        }
    };

    let store = UserStore::from_snapshot(default_threshold, records)?;
    info!("Loaded {} users from {}", store.len(), path.display());
    Ok(store)
}

/// Atomically replace the snapshot at `path` with the store's export.
pub fn save(path: &Path, store: &UserStore) -> Result<(), SnapshotError> {
    let file = SnapshotFile {
        version: SNAPSHOT_VERSION,
        users:   store.export(),
    };
    let json = serde_json::to_string_pretty(&file)?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    {
        let mut out = fs::File::create(&tmp)?;
        out.write_all(json.as_bytes())?;
        out.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn parse_instant(raw: Option<&str>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(fallback)
}

fn migrate_legacy(map: BTreeMap<UserId, LegacyUser>, default_threshold: f64) -> Vec<UserRecord> {
    let now = Utc::now();
    map.into_iter()
        .map(|(user_id, legacy)| {
            let registered_at = parse_instant(legacy.registered_at.as_deref(), now);
            let mut record = UserRecord::new(
                user_id,
                legacy.global_threshold.unwrap_or(default_threshold),
                registered_at,
            );
            record.active = legacy.active;
            record.tracked_tokens = legacy.tracked_tokens.into_iter().collect();
            record.token_thresholds = legacy.token_thresholds;
            record.entry_prices = legacy
                .entry_prices
                .into_iter()
                .map(|(token, e)| {
                    let timestamp = parse_instant(e.timestamp.as_deref(), now);
                    (token, EntryPrice { price: e.price, timestamp })
                })
                .collect();
            record
        })
        .collect()
}
