/// journal.rs — Price and alert history
///
/// Append-only CSV files under the data directory:
///   <token>_prices.csv   timestamp,price,address
///   alerts_log.csv       one row per delivered alert
///
/// The journal is advisory.  Callers log its errors and carry on; the only
/// thing read back is the last price per token, used to prime the period
/// cache after a restart.
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{AlertEvent, Direction, TokenId, TokenObservation};

const ALERT_LOG: &str = "alerts_log.csv";

#[derive(Debug, Serialize, Deserialize)]
struct PriceRow {
    timestamp: DateTime<Utc>,
    price:     f64,
    address:   String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AlertRow {
    timestamp:            DateTime<Utc>,
    user_id:              String,
    token_address:        String,
    old_value:            f64,
    new_value:            f64,
    change_percent:       f64,
    total_change_percent: f64,
    threshold:            f64,
    direction:            Direction,
}

#[derive(Debug, Clone)]
pub struct PriceJournal {
    dir: PathBuf,
}

impl PriceJournal {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create data dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn price_file(&self, token: &TokenId) -> PathBuf {
        let safe = token.as_str().replace(['/', '\\'], "_");
        self.dir.join(format!("{safe}_prices.csv"))
    }

    /// Samples the engine would reject (non-positive, non-finite) are not
    /// recorded.
    pub fn record_prices(&self, observations: &[TokenObservation]) -> Result<()> {
        for obs in observations.iter().filter(|o| o.has_valid_price()) {
            let row = PriceRow {
                timestamp: obs.observed_at,
                price:     obs.price,
                address:   obs.token_id.0.clone(),
            };
            append_row(&self.price_file(&obs.token_id), &row)?;
        }
        Ok(())
    }

    pub fn record_alerts(&self, alerts: &[AlertEvent]) -> Result<()> {
        let path = self.dir.join(ALERT_LOG);
        for alert in alerts {
            let row = AlertRow {
                timestamp:            alert.observed_at,
                user_id:              alert.user_id.0.clone(),
                token_address:        alert.token_id.0.clone(),
                old_value:            alert.previous_price,
                new_value:            alert.current_price,
                change_percent:       alert.period_change_pct,
                total_change_percent: alert.total_change_pct,
                threshold:            alert.threshold_used,
                direction:            alert.direction_used,
            };
            append_row(&path, &row)?;
        }
        Ok(())
    }

    /// Last valid recorded price for each token that has history.
    pub fn latest_prices<'a, I>(&self, tokens: I) -> Vec<(TokenId, f64)>
    where
        I: IntoIterator<Item = &'a TokenId>,
    {
        tokens
            .into_iter()
            .filter_map(|token| match self.latest_price(token) {
                Ok(Some(price)) => Some((token.clone(), price)),
                Ok(None) => None,
                Err(e) => {
                    warn!("Ignoring price history for {token}: {e:#}");
                    None
                }
            })
            .collect()
    }

    fn latest_price(&self, token: &TokenId) -> Result<Option<f64>> {
        let path = self.price_file(token);
        if !path.exists() {
            return Ok(None);
        }
        let mut reader = csv::Reader::from_path(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let mut last = None;
        for row in reader.deserialize::<PriceRow>() {
            match row {
                Ok(r) if r.price.is_finite() && r.price > 0.0 => last = Some(r.price),
                Ok(r) => debug!("Ignoring price {} in {}", r.price, path.display()),
                Err(e) => warn!("Bad row in {}: {e}", path.display()),
            }
        }
        Ok(last)
    }
}

fn append_row<T: Serialize>(path: &Path, row: &T) -> Result<()> {
    let is_new = !path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(is_new)
        .from_writer(file);
    writer.serialize(row)?;
    writer.flush()?;
    Ok(())
}
