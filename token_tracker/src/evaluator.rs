/// evaluator.rs — Alert policy evaluation
///
/// Pure decision for one (user, token, observation) triple:
///
///   period_change = (P_now − P_prev)  / P_prev  × 100
///   total_change  = (P_now − P_entry) / P_entry × 100
///
///   fires  ⇔  direction admits sign(period_change)
///             ∧ |period_change| ≥ threshold          (inclusive)
///
/// The threshold/direction pair is the token override when present, else the
/// user's global threshold in both directions.  `total_change` is reported
/// alongside but never gates the decision.
use crate::error::EngineError;
use crate::models::{AlertEvent, TokenId, TokenObservation, UserRecord};

/// Slack on the magnitude gate so a move that is exactly the threshold in
/// decimal (1.1 → 1.21 at 10%) still fires despite binary rounding.
const BOUNDARY_EPSILON: f64 = 1e-9;

/// Percentage change from `from` to `to`.  Caller guarantees `from > 0`.
pub fn pct_change(from: f64, to: f64) -> f64 {
    (to - from) / from * 100.0
}

/// Decide whether `user` is alerted for `observation`.
///
/// Returns `Ok(None)` when there is no previous price for the period yet or
/// when either gate rejects the move.  Non-positive prices are reported as
/// `InvalidPrice` so the caller can log and skip the pair.
pub fn evaluate(
    user:        &UserRecord,
    token_id:    &TokenId,
    observation: &TokenObservation,
    last_price:  Option<f64>,
) -> Result<Option<AlertEvent>, EngineError> {
    let current = observation.price;
    if !observation.has_valid_price() {
        return Err(EngineError::InvalidPrice { token: token_id.clone(), price: current });
    }

    let entry = user
        .entry_prices
        .get(token_id)
        .ok_or_else(|| EngineError::NotTracked {
            user:  user.user_id.clone(),
            token: token_id.clone(),
        })?
        .price;
    if !entry.is_finite() || entry <= 0.0 {
        return Err(EngineError::InvalidPrice { token: token_id.clone(), price: entry });
    }

    let previous = match last_price {
        Some(p) if p.is_finite() && p > 0.0 => p,
        Some(p) => return Err(EngineError::InvalidPrice { token: token_id.clone(), price: p }),
        None => return Ok(None),
    };

    let policy        = user.effective_policy(token_id);
    let period_change = pct_change(previous, current);
    let total_change  = pct_change(entry, current);

    let magnitude_ok = period_change.abs() + BOUNDARY_EPSILON >= policy.value;
    if !policy.direction.admits(period_change) || !magnitude_ok {
        return Ok(None);
    }

    Ok(Some(AlertEvent {
        user_id:           user.user_id.clone(),
        token_id:          token_id.clone(),
        period_change_pct: period_change,
        total_change_pct:  total_change,
        current_price:     current,
        previous_price:    previous,
        entry_price:       entry,
        threshold_used:    policy.value,
        direction_used:    policy.direction,
        observed_at:       observation.observed_at,
    }))
}
