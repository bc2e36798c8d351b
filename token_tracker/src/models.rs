/// models.rs — Core data model
///
/// Per-user tracking state (`UserRecord`), the per-token alert policy
/// (`ThresholdPolicy`), the ephemeral price sample handed in by the price
/// supplier (`TokenObservation`) and the alert handed out to the
/// notification sink (`AlertEvent`).
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

// ── Identifiers ───────────────────────────────────────────────────────────

/// Opaque, stable user key (chat or account id).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

/// Token address as understood by the price supplier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TokenId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `6MQpbiTC...3AEDpump` style display for long addresses.
    pub fn short(&self) -> String {
        let s = &self.0;
        if s.chars().count() <= 16 {
            return s.clone();
        }
        let head: String = s.chars().take(8).collect();
        let tail: String = s.chars().rev().take(8).collect::<Vec<_>>().into_iter().rev().collect();
        format!("{head}...{tail}")
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<&str> for TokenId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ── Alert policy ──────────────────────────────────────────────────────────

/// Which sign of period change may fire an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Both,
    Positive,
    Negative,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Both     => "both",
            Direction::Positive => "positive",
            Direction::Negative => "negative",
        }
    }

    /// Directional gate on the signed period change.
    pub fn admits(&self, change_pct: f64) -> bool {
        match self {
            Direction::Both     => true,
            Direction::Positive => change_pct > 0.0,
            Direction::Negative => change_pct < 0.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "both"     => Ok(Direction::Both),
            "positive" => Ok(Direction::Positive),
            "negative" => Ok(Direction::Negative),
            other => Err(EngineError::InvalidThreshold(format!(
                "direction must be both, positive or negative, got '{other}'"
            ))),
        }
    }
}

/// Threshold (percent) plus direction applied to one token.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    pub value:     f64,
    pub direction: Direction,
}

impl ThresholdPolicy {
    /// Rejects non-positive and non-finite values.
    pub fn new(value: f64, direction: Direction) -> Result<Self, EngineError> {
        validate_threshold(value)?;
        Ok(Self { value, direction })
    }
}

pub(crate) fn validate_threshold(value: f64) -> Result<(), EngineError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(EngineError::InvalidThreshold(format!(
            "threshold must be a positive percentage, got {value}"
        )));
    }
    Ok(())
}

/// Reference price for the "total change" figure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntryPrice {
    pub price:     f64,
    pub timestamp: DateTime<Utc>,
}

// ── User record ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id:          UserId,
    pub active:           bool,
    pub registered_at:    DateTime<Utc>,
    pub tracked_tokens:   BTreeSet<TokenId>,
    pub global_threshold: f64,
    #[serde(default)]
    pub token_thresholds: BTreeMap<TokenId, ThresholdPolicy>,
    #[serde(default)]
    pub entry_prices:     BTreeMap<TokenId, EntryPrice>,
}

impl UserRecord {
    pub fn new(user_id: UserId, global_threshold: f64, registered_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            active: true,
            registered_at,
            tracked_tokens:   BTreeSet::new(),
            global_threshold,
            token_thresholds: BTreeMap::new(),
            entry_prices:     BTreeMap::new(),
        }
    }

    pub fn is_tracking(&self, token: &TokenId) -> bool {
        self.tracked_tokens.contains(token)
    }

    /// Token override if present, else the global threshold in both directions.
    pub fn effective_policy(&self, token: &TokenId) -> ThresholdPolicy {
        self.token_thresholds
            .get(token)
            .copied()
            .unwrap_or(ThresholdPolicy {
                value:     self.global_threshold,
                direction: Direction::Both,
            })
    }

    /// Describes the first broken record invariant, if any.
    pub fn invariant_violation(&self) -> Option<String> {
        if !self.global_threshold.is_finite() || self.global_threshold <= 0.0 {
            return Some(format!("user {}: global threshold {} is not positive", self.user_id, self.global_threshold));
        }
        for token in &self.tracked_tokens {
            if !self.entry_prices.contains_key(token) {
                return Some(format!("user {}: tracked token {token} has no entry price", self.user_id));
            }
        }
        for (token, entry) in &self.entry_prices {
            if !self.tracked_tokens.contains(token) {
                return Some(format!("user {}: entry price for untracked token {token}", self.user_id));
            }
            if !entry.price.is_finite() || entry.price <= 0.0 {
                return Some(format!("user {}: entry price {} for {token} is not positive", self.user_id, entry.price));
            }
        }
        for (token, policy) in &self.token_thresholds {
            if !self.tracked_tokens.contains(token) {
                return Some(format!("user {}: threshold for untracked token {token}", self.user_id));
            }
            if !policy.value.is_finite() || policy.value <= 0.0 {
                return Some(format!("user {}: threshold {} for {token} is not positive", self.user_id, policy.value));
            }
        }
        None
    }
}

// ── Boundary values ───────────────────────────────────────────────────────

/// One price sample from the supplier.  Consumed once per pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenObservation {
    pub token_id:    TokenId,
    pub price:       f64,
    pub observed_at: DateTime<Utc>,
}

impl TokenObservation {
    pub fn new(token_id: TokenId, price: f64, observed_at: DateTime<Utc>) -> Self {
        Self { token_id, price, observed_at }
    }

    pub fn has_valid_price(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

/// A fired alert, addressed to one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub user_id:           UserId,
    pub token_id:          TokenId,
    pub period_change_pct: f64,
    pub total_change_pct:  f64,
    pub current_price:     f64,
    pub previous_price:    f64,
    pub entry_price:       f64,
    pub threshold_used:    f64,
    pub direction_used:    Direction,
    pub observed_at:       DateTime<Utc>,
}
