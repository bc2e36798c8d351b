/// config.rs — Centralised configuration loaded from .env
///
/// All parameters consumed by the tracker binaries are defined here.
/// Loading happens once at startup; the engine itself only ever sees the
/// default threshold, everything else belongs to the service around it.
use anyhow::{bail, Result};
use std::env;
use std::path::PathBuf;

/// Alert sensitivity given to newly registered users (percent)
pub const DEFAULT_GLOBAL_THRESHOLD: f64 = 20.0;
/// Seconds between two poll cycles
pub const DEFAULT_CHECK_INTERVAL: u64 = 60;
/// Upper bound accepted from users on the command interface
pub const DEFAULT_MAX_USER_THRESHOLD: f64 = 100.0;
pub const DEFAULT_PRICE_API_URL: &str = "https://api.dexscreener.com/latest/dex/";

#[derive(Debug, Clone)]
pub struct AppConfig {
    // ── Alerting ──────────────────────────────────────────────────────
    pub default_global_threshold: f64,
    pub max_user_threshold:       f64,

    // ── Polling ───────────────────────────────────────────────────────
    pub check_interval_secs: u64,

    // ── Storage ───────────────────────────────────────────────────────
    /// Price / alert CSV history
    pub data_dir:   PathBuf,
    /// User snapshot (JSON)
    pub state_file: PathBuf,

    // ── Price API ─────────────────────────────────────────────────────
    pub price_api_url:        String,
    pub request_timeout_secs: u64,
    /// Minimum gap between two API requests
    pub request_spacing_ms:   u64,

    // ── Command interface ─────────────────────────────────────────────
    pub enable_console: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_global_threshold: DEFAULT_GLOBAL_THRESHOLD,
            max_user_threshold:       DEFAULT_MAX_USER_THRESHOLD,
            check_interval_secs:      DEFAULT_CHECK_INTERVAL,
            data_dir:                 PathBuf::from("data"),
            state_file:               PathBuf::from("config/users.json"),
            price_api_url:            DEFAULT_PRICE_API_URL.into(),
            request_timeout_secs:     10,
            request_spacing_ms:       500,
            enable_console:           true,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables (after dotenv).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // ignore missing .env

        let defaults = Self::default();
        let cfg = Self {
            default_global_threshold: parse_env("PRICE_CHANGE_THRESHOLD", defaults.default_global_threshold)?,
            max_user_threshold:       parse_env("MAX_USER_THRESHOLD",     defaults.max_user_threshold)?,
            check_interval_secs:      parse_env("CHECK_INTERVAL",         defaults.check_interval_secs)?,

            data_dir:   env::var("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            state_file: env::var("STATE_FILE").map(PathBuf::from).unwrap_or(defaults.state_file),

            price_api_url:        env::var("PRICE_API_URL").unwrap_or(defaults.price_api_url),
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
            request_spacing_ms:   parse_env("REQUEST_SPACING_MS",   defaults.request_spacing_ms)?,

            enable_console: parse_env("ENABLE_CONSOLE", defaults.enable_console)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.default_global_threshold.is_finite() || self.default_global_threshold <= 0.0 {
            bail!("PRICE_CHANGE_THRESHOLD must be positive, got {}", self.default_global_threshold);
        }
        if self.max_user_threshold < self.default_global_threshold {
            bail!(
                "MAX_USER_THRESHOLD ({}) is below PRICE_CHANGE_THRESHOLD ({})",
                self.max_user_threshold, self.default_global_threshold
            );
        }
        if self.check_interval_secs == 0 {
            bail!("CHECK_INTERVAL must be at least 1 second");
        }
        Ok(())
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Config key {key}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.default_global_threshold, 20.0);
        assert_eq!(cfg.check_interval_secs, 60);
    }

    #[test]
    fn rejects_non_positive_threshold() {
        let cfg = AppConfig { default_global_threshold: 0.0, ..AppConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_interval() {
        let cfg = AppConfig { check_interval_secs: 0, ..AppConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parse_env_reports_key() {
        env::set_var("TOKEN_TRACKER_TEST_BAD_FLOAT", "abc");
        let err = parse_env("TOKEN_TRACKER_TEST_BAD_FLOAT", 1.0f64).unwrap_err();
        assert!(err.to_string().contains("TOKEN_TRACKER_TEST_BAD_FLOAT"));
        env::remove_var("TOKEN_TRACKER_TEST_BAD_FLOAT");

        assert_eq!(parse_env("TOKEN_TRACKER_TEST_UNSET", 7u64).unwrap(), 7);
    }
}
