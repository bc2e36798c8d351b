/// coordinator.rs — Tracking coordinator
///
/// One evaluation pass over a batch of fresh observations:
///
///   observation ─▶ users_tracking(token) ─▶ evaluate(user, …, last_price)
///                                                   │
///                             AlertEvent | none  ◀──┘
///
/// The `last_price` cache is shared by every user of a token: it is the
/// period reference and moves to the current price after each valid
/// observation, whether or not anything fired.  Output order is observation
/// order, then user registration order.
use std::collections::BTreeSet;

use ahash::AHashMap;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::evaluator;
use crate::models::{AlertEvent, TokenId, TokenObservation};
use crate::store::UserStore;

#[derive(Debug)]
pub struct TrackingCoordinator {
    store:      UserStore,
    last_price: AHashMap<TokenId, f64>,
}

impl TrackingCoordinator {
    pub fn new(store: UserStore) -> Self {
        Self {
            store,
            last_price: AHashMap::new(),
        }
    }

    pub fn store(&self) -> &UserStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut UserStore {
        &mut self.store
    }

    /// Tokens the price supplier should be asked for.
    pub fn tokens_to_poll(&self) -> BTreeSet<TokenId> {
        self.store.tracked_token_union()
    }

    pub fn last_price(&self, token_id: &TokenId) -> Option<f64> {
        self.last_price.get(token_id).copied()
    }

    /// Prime the period cache, e.g. from recorded price history.
    /// Non-positive prices are ignored.
    pub fn seed_last_prices<I>(&mut self, prices: I)
    where
        I: IntoIterator<Item = (TokenId, f64)>,
    {
        for (token, price) in prices {
            if price.is_finite() && price > 0.0 {
                self.last_price.insert(token, price);
            }
        }
    }

    /// Evaluate every (observation, tracking user) pair and collect the
    /// alerts that fired.  Per-pair failures are logged and skipped.
    pub fn evaluate_batch(&mut self, observations: &[TokenObservation]) -> Vec<AlertEvent> {
        let polled = self.tokens_to_poll();
        self.last_price.retain(|token, _| polled.contains(token));

        let mut alerts = Vec::new();
        for observation in observations {
            let token = &observation.token_id;
            if !observation.has_valid_price() {
                let err = EngineError::InvalidPrice { token: token.clone(), price: observation.price };
                warn!("Skipping sample: {err}");
                continue;
            }

            let previous = self.last_price.get(token).copied();
            match previous {
                Some(p) => debug!("{} {:.8} → {:.8}", token, p, observation.price),
                None => info!("First price for {} this session: {:.8}", token, observation.price),
            }

            for user in self.store.users_tracking(token) {
                match evaluator::evaluate(user, token, observation, previous) {
                    Ok(Some(alert)) => {
                        info!(
                            "ALERT {} {} {:+.2}% (threshold {}% {}, total {:+.2}%)",
                            alert.user_id, token, alert.period_change_pct,
                            alert.threshold_used, alert.direction_used, alert.total_change_pct
                        );
                        alerts.push(alert);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Skipping {} / {}: {e}", user.user_id, token),
                }
            }

            self.last_price.insert(token.clone(), observation.price);
        }
        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, UserId};
    use chrono::Utc;

    fn obs(token: &str, price: f64) -> TokenObservation {
        TokenObservation::new(TokenId::from(token), price, Utc::now())
    }

    fn uid(s: &str) -> UserId {
        UserId::from(s)
    }

    /// Two users on one token: entries 0.0005 / 0.0008, thresholds 10% / 30%.
    fn two_user_setup() -> TrackingCoordinator {
        let mut store = UserStore::new(20.0);
        let token = TokenId::from("PUMP");
        store.register(uid("alice"));
        store.register(uid("bob"));
        store.add_token(&uid("alice"), token.clone(), 0.0005, Utc::now()).unwrap();
        store.add_token(&uid("bob"), token.clone(), 0.0008, Utc::now()).unwrap();
        store.set_token_threshold(&uid("alice"), &token, 10.0, Direction::Both).unwrap();
        store.set_token_threshold(&uid("bob"), &token, 30.0, Direction::Both).unwrap();
        TrackingCoordinator::new(store)
    }

    #[test]
    fn empty_batch_yields_nothing() {
        let mut coord = two_user_setup();
        assert!(coord.evaluate_batch(&[]).is_empty());
    }

    #[test]
    fn first_observation_only_primes_the_cache() {
        let mut coord = two_user_setup();
        assert!(coord.evaluate_batch(&[obs("PUMP", 0.0005)]).is_empty());
        assert_eq!(coord.last_price(&TokenId::from("PUMP")), Some(0.0005));
    }

    #[test]
    fn users_get_independent_decisions() {
        let mut coord = two_user_setup();
        coord.evaluate_batch(&[obs("PUMP", 0.0005)]);

        let alerts = coord.evaluate_batch(&[obs("PUMP", 0.00055)]);
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.user_id, uid("alice"));
        assert!((alert.period_change_pct - 10.0).abs() < 1e-9);
        assert!((alert.total_change_pct - 10.0).abs() < 1e-9);
        assert_eq!(alert.threshold_used, 10.0);
    }

    #[test]
    fn ties_follow_registration_order() {
        let mut coord = two_user_setup();
        coord.evaluate_batch(&[obs("PUMP", 1.0)]);
        let alerts = coord.evaluate_batch(&[obs("PUMP", 2.0)]);
        let ids: Vec<_> = alerts.iter().map(|a| a.user_id.clone()).collect();
        assert_eq!(ids, vec![uid("alice"), uid("bob")]);
    }

    #[test]
    fn cache_moves_even_without_alert() {
        let mut coord = two_user_setup();
        coord.evaluate_batch(&[obs("PUMP", 1.0)]);
        // +5%: below both thresholds, but becomes the new reference.
        assert!(coord.evaluate_batch(&[obs("PUMP", 1.05)]).is_empty());
        assert_eq!(coord.last_price(&TokenId::from("PUMP")), Some(1.05));
        // +5% again from 1.05, still quiet, although +10.25% from 1.0.
        assert!(coord.evaluate_batch(&[obs("PUMP", 1.1025)]).is_empty());
    }

    #[test]
    fn invalid_sample_is_skipped_without_aborting() {
        let mut coord = two_user_setup();
        let store = coord.store_mut();
        store.register(uid("carol"));
        store.add_token(&uid("carol"), TokenId::from("OTHER"), 1.0, Utc::now()).unwrap();
        store.set_global_threshold(&uid("carol"), 5.0).unwrap();

        coord.evaluate_batch(&[obs("PUMP", 1.0), obs("OTHER", 1.0)]);
        let alerts = coord.evaluate_batch(&[obs("PUMP", -3.0), obs("PUMP", 0.0), obs("OTHER", 2.0)]);

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].user_id, uid("carol"));
        // The rejected samples did not replace the reference.
        assert_eq!(coord.last_price(&TokenId::from("PUMP")), Some(1.0));
    }

    #[test]
    fn observations_in_supplied_order() {
        let mut coord = two_user_setup();
        coord.store_mut().register(uid("carol"));
        coord.store_mut().add_token(&uid("carol"), TokenId::from("OTHER"), 1.0, Utc::now()).unwrap();

        coord.evaluate_batch(&[obs("OTHER", 1.0), obs("PUMP", 1.0)]);
        let alerts = coord.evaluate_batch(&[obs("OTHER", 3.0), obs("PUMP", 3.0)]);
        let pairs: Vec<_> = alerts.iter().map(|a| (a.token_id.0.as_str(), a.user_id.0.as_str())).collect();
        assert_eq!(pairs, vec![("OTHER", "carol"), ("PUMP", "alice"), ("PUMP", "bob")]);
    }

    #[test]
    fn inactive_users_are_not_alerted() {
        let mut coord = two_user_setup();
        coord.store_mut().deactivate(&uid("alice")).unwrap();
        coord.evaluate_batch(&[obs("PUMP", 1.0)]);
        let alerts = coord.evaluate_batch(&[obs("PUMP", 2.0)]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].user_id, uid("bob"));
    }

    #[test]
    fn untracked_token_cache_is_pruned() {
        let mut coord = two_user_setup();
        coord.evaluate_batch(&[obs("PUMP", 1.0)]);
        coord.store_mut().remove_token(&uid("alice"), &TokenId::from("PUMP")).unwrap();
        coord.store_mut().remove_token(&uid("bob"), &TokenId::from("PUMP")).unwrap();

        coord.evaluate_batch(&[]);
        assert_eq!(coord.last_price(&TokenId::from("PUMP")), None);
    }

    #[test]
    fn seeded_prices_act_as_period_reference() {
        let mut coord = two_user_setup();
        coord.seed_last_prices(vec![(TokenId::from("PUMP"), 1.0), (TokenId::from("BAD"), 0.0)]);
        assert_eq!(coord.last_price(&TokenId::from("BAD")), None);

        let alerts = coord.evaluate_batch(&[obs("PUMP", 1.2)]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].user_id, uid("alice"));
    }
}
