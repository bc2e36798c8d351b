/// store.rs — UserStore
///
/// Owns every `UserRecord` and is the only place they are mutated.  Each
/// mutator either fully applies or returns an error with the record left
/// untouched, so the tracked-token / entry-price / threshold maps never
/// disagree.
///
/// Registration order is kept (records live in a `Vec`, indexed by an
/// `AHashMap`) because alert ordering for users sharing a token follows it.
use std::collections::BTreeSet;

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{EngineError, SnapshotError};
use crate::models::{
    validate_threshold, Direction, EntryPrice, ThresholdPolicy, TokenId, UserId, UserRecord,
};

#[derive(Debug, Clone)]
pub struct UserStore {
    /// Global threshold given to newly registered users
    default_threshold: f64,
    users: Vec<UserRecord>,
    index: AHashMap<UserId, usize>,
}

impl UserStore {
    pub fn new(default_threshold: f64) -> Self {
        Self {
            default_threshold,
            users: Vec::new(),
            index: AHashMap::new(),
        }
    }

    /// Rebuild a store from exported records, refusing anything that breaks
    /// the record invariants.
    pub fn from_snapshot(
        default_threshold: f64,
        records:           Vec<UserRecord>,
    ) -> Result<Self, SnapshotError> {
        let mut store = Self::new(default_threshold);
        for record in records {
            if let Some(problem) = record.invariant_violation() {
                return Err(SnapshotError::Invalid(problem));
            }
            if store.index.contains_key(&record.user_id) {
                return Err(SnapshotError::Invalid(format!(
                    "duplicate user id {}",
                    record.user_id
                )));
            }
            store.index.insert(record.user_id.clone(), store.users.len());
            store.users.push(record);
        }
        Ok(store)
    }

    /// Full-state export in registration order.
    pub fn export(&self) -> Vec<UserRecord> {
        self.users.clone()
    }

    pub fn default_threshold(&self) -> f64 {
        self.default_threshold
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn users(&self) -> impl Iterator<Item = &UserRecord> {
        self.users.iter()
    }

    pub fn get(&self, user_id: &UserId) -> Option<&UserRecord> {
        self.index.get(user_id).map(|&i| &self.users[i])
    }

    pub fn is_active(&self, user_id: &UserId) -> bool {
        self.get(user_id).is_some_and(|u| u.active)
    }

    pub fn active_user_ids(&self) -> Vec<UserId> {
        self.users
            .iter()
            .filter(|u| u.active)
            .map(|u| u.user_id.clone())
            .collect()
    }

    fn get_mut(&mut self, user_id: &UserId) -> Result<&mut UserRecord, EngineError> {
        match self.index.get(user_id) {
            Some(&i) => Ok(&mut self.users[i]),
            None => Err(EngineError::NotFound(user_id.clone())),
        }
    }

    fn tracked_mut(
        &mut self,
        user_id: &UserId,
        token_id: &TokenId,
    ) -> Result<&mut UserRecord, EngineError> {
        let user = self.get_mut(user_id)?;
        if !user.is_tracking(token_id) {
            return Err(EngineError::NotTracked {
                user:  user_id.clone(),
                token: token_id.clone(),
            });
        }
        Ok(user)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Create the user with defaults, or reactivate an existing one.
    pub fn register(&mut self, user_id: UserId) -> &UserRecord {
        let i = match self.index.get(&user_id) {
            Some(&i) => {
                if !self.users[i].active {
                    info!("Reactivated user {}", user_id);
                }
                self.users[i].active = true;
                i
            }
            None => {
                info!("Registered new user {}", user_id);
                let record = UserRecord::new(user_id.clone(), self.default_threshold, Utc::now());
                self.index.insert(user_id, self.users.len());
                self.users.push(record);
                self.users.len() - 1
            }
        };
        &self.users[i]
    }

    /// Soft delete: the record stays, alerts and polling stop.
    pub fn deactivate(&mut self, user_id: &UserId) -> Result<(), EngineError> {
        let user = self.get_mut(user_id)?;
        user.active = false;
        info!("Deactivated user {}", user_id);
        Ok(())
    }

    // ── Token tracking ────────────────────────────────────────────────────

    /// Start tracking `token_id`.  An existing entry price is kept.
    pub fn add_token(
        &mut self,
        user_id:     &UserId,
        token_id:    TokenId,
        entry_price: f64,
        observed_at: DateTime<Utc>,
    ) -> Result<&UserRecord, EngineError> {
        let user = self.get_mut(user_id)?;
        if !entry_price.is_finite() || entry_price <= 0.0 {
            return Err(EngineError::InvalidPrice { token: token_id, price: entry_price });
        }
        user.entry_prices
            .entry(token_id.clone())
            .or_insert(EntryPrice { price: entry_price, timestamp: observed_at });
        if user.tracked_tokens.insert(token_id.clone()) {
            debug!("User {} now tracking {} from {:.8}", user_id, token_id, entry_price);
        }
        Ok(user)
    }

    /// Drop the token together with its threshold and entry price.
    pub fn remove_token(&mut self, user_id: &UserId, token_id: &TokenId) -> Result<(), EngineError> {
        let user = self.tracked_mut(user_id, token_id)?;
        user.tracked_tokens.remove(token_id);
        user.token_thresholds.remove(token_id);
        user.entry_prices.remove(token_id);
        debug!("User {} stopped tracking {}", user_id, token_id);
        Ok(())
    }

    // ── Thresholds ────────────────────────────────────────────────────────

    pub fn set_global_threshold(&mut self, user_id: &UserId, value: f64) -> Result<(), EngineError> {
        validate_threshold(value)?;
        let user = self.get_mut(user_id)?;
        user.global_threshold = value;
        Ok(())
    }

    pub fn set_token_threshold(
        &mut self,
        user_id:   &UserId,
        token_id:  &TokenId,
        value:     f64,
        direction: Direction,
    ) -> Result<(), EngineError> {
        let policy = ThresholdPolicy::new(value, direction)?;
        let user = self.tracked_mut(user_id, token_id)?;
        user.token_thresholds.insert(token_id.clone(), policy);
        Ok(())
    }

    /// Overwrite the entry price unconditionally.
    pub fn reset_entry_price(
        &mut self,
        user_id:     &UserId,
        token_id:    &TokenId,
        new_price:   f64,
        observed_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let user = self.tracked_mut(user_id, token_id)?;
        if !new_price.is_finite() || new_price <= 0.0 {
            return Err(EngineError::InvalidPrice { token: token_id.clone(), price: new_price });
        }
        user.entry_prices.insert(
            token_id.clone(),
            EntryPrice { price: new_price, timestamp: observed_at },
        );
        Ok(())
    }

    // ── Queries for the coordinator ───────────────────────────────────────

    /// Tokens tracked by at least one active user.
    pub fn tracked_token_union(&self) -> BTreeSet<TokenId> {
        self.users
            .iter()
            .filter(|u| u.active)
            .flat_map(|u| u.tracked_tokens.iter().cloned())
            .collect()
    }

    /// Active users tracking `token_id`, in registration order.
    pub fn users_tracking(&self, token_id: &TokenId) -> Vec<&UserRecord> {
        self.users
            .iter()
            .filter(|u| u.active && u.is_tracking(token_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::from(s)
    }

    fn tok(s: &str) -> TokenId {
        TokenId::from(s)
    }

    fn assert_invariants(store: &UserStore) {
        for user in store.users() {
            assert_eq!(user.invariant_violation(), None);
        }
    }

    #[test]
    fn register_is_idempotent() {
        let mut store = UserStore::new(20.0);
        let first = store.register(uid("42")).clone();
        assert!(first.active);
        assert_eq!(first.global_threshold, 20.0);
        assert!(first.tracked_tokens.is_empty());

        assert_invariants(&store);
        let second = store.register(uid("42")).clone();
        assert!(second.active);
        assert_invariants(&store);
        assert_eq!(store.len(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn register_reactivates_without_touching_data() {
        let mut store = UserStore::new(20.0);
        store.register(uid("42"));
        store.add_token(&uid("42"), tok("A"), 1.0, Utc::now()).unwrap();
        assert_invariants(&store);
        store.deactivate(&uid("42")).unwrap();
        assert!(!store.is_active(&uid("42")));
        assert_invariants(&store);

        let user = store.register(uid("42"));
        assert!(user.active);
        assert!(user.is_tracking(&tok("A")));
        assert_invariants(&store);
    }

    #[test]
    fn unknown_user_is_not_found() {
        let mut store = UserStore::new(20.0);
        assert_eq!(store.deactivate(&uid("x")), Err(EngineError::NotFound(uid("x"))));
        assert!(matches!(
            store.add_token(&uid("x"), tok("A"), 1.0, Utc::now()),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn first_entry_price_wins() {
        let mut store = UserStore::new(20.0);
        store.register(uid("u"));
        store.add_token(&uid("u"), tok("A"), 0.0005, Utc::now()).unwrap();
        let user = store.add_token(&uid("u"), tok("A"), 0.0009, Utc::now()).unwrap();
        assert_eq!(user.entry_prices[&tok("A")].price, 0.0005);
        assert_eq!(user.tracked_tokens.len(), 1);
        assert_invariants(&store);
    }

    #[test]
    fn remove_then_readd_takes_new_entry_price() {
        let mut store = UserStore::new(20.0);
        store.register(uid("u"));
        store.add_token(&uid("u"), tok("A"), 0.0005, Utc::now()).unwrap();
        assert_invariants(&store);
        store.set_token_threshold(&uid("u"), &tok("A"), 10.0, Direction::Positive).unwrap();
        assert_invariants(&store);
        store.remove_token(&uid("u"), &tok("A")).unwrap();

        let user = store.get(&uid("u")).unwrap();
        assert!(!user.tracked_tokens.contains(&tok("A")));
        assert!(!user.entry_prices.contains_key(&tok("A")));
        assert!(!user.token_thresholds.contains_key(&tok("A")));
        assert_invariants(&store);

        let user = store.add_token(&uid("u"), tok("A"), 0.0008, Utc::now()).unwrap();
        assert_eq!(user.entry_prices[&tok("A")].price, 0.0008);
        assert!(!user.token_thresholds.contains_key(&tok("A")));
        assert_invariants(&store);
    }

    #[test]
    fn remove_untracked_token_fails() {
        let mut store = UserStore::new(20.0);
        store.register(uid("u"));
        assert_eq!(
            store.remove_token(&uid("u"), &tok("A")),
            Err(EngineError::NotTracked { user: uid("u"), token: tok("A") })
        );
    }

    #[test]
    fn thresholds_must_be_positive() {
        let mut store = UserStore::new(20.0);
        store.register(uid("u"));
        store.add_token(&uid("u"), tok("A"), 1.0, Utc::now()).unwrap();

        assert!(matches!(store.set_global_threshold(&uid("u"), 0.0), Err(EngineError::InvalidThreshold(_))));
        assert!(matches!(store.set_global_threshold(&uid("u"), -1.0), Err(EngineError::InvalidThreshold(_))));
        assert!(matches!(
            store.set_token_threshold(&uid("u"), &tok("A"), 0.0, Direction::Both),
            Err(EngineError::InvalidThreshold(_))
        ));

        assert_invariants(&store);
        store.set_global_threshold(&uid("u"), 15.0).unwrap();
        assert_eq!(store.get(&uid("u")).unwrap().global_threshold, 15.0);
        assert_invariants(&store);
    }

    #[test]
    fn token_threshold_requires_tracking() {
        let mut store = UserStore::new(20.0);
        store.register(uid("u"));
        assert!(matches!(
            store.set_token_threshold(&uid("u"), &tok("A"), 10.0, Direction::Both),
            Err(EngineError::NotTracked { .. })
        ));
        assert_invariants(&store);
    }

    #[test]
    fn reset_entry_price_overwrites() {
        let mut store = UserStore::new(20.0);
        store.register(uid("u"));
        store.add_token(&uid("u"), tok("A"), 1.0, Utc::now()).unwrap();
        store.reset_entry_price(&uid("u"), &tok("A"), 2.5, Utc::now()).unwrap();
        assert_eq!(store.get(&uid("u")).unwrap().entry_prices[&tok("A")].price, 2.5);
        assert_invariants(&store);

        assert!(matches!(
            store.reset_entry_price(&uid("u"), &tok("B"), 2.5, Utc::now()),
            Err(EngineError::NotTracked { .. })
        ));
        assert!(matches!(
            store.reset_entry_price(&uid("u"), &tok("A"), 0.0, Utc::now()),
            Err(EngineError::InvalidPrice { .. })
        ));
        assert_eq!(store.get(&uid("u")).unwrap().entry_prices[&tok("A")].price, 2.5);
        assert_invariants(&store);
    }

    #[test]
    fn invariants_hold_after_every_mutation() {
        let mut store = UserStore::new(20.0);
        let steps: Vec<Box<dyn Fn(&mut UserStore)>> = vec![
            Box::new(|s: &mut UserStore| { s.register(uid("a")); }),
            Box::new(|s: &mut UserStore| { s.register(uid("b")); }),
            Box::new(|s: &mut UserStore| { let _ = s.add_token(&uid("a"), tok("X"), 1.0, Utc::now()); }),
            Box::new(|s: &mut UserStore| { let _ = s.add_token(&uid("a"), tok("Y"), -1.0, Utc::now()); }),
            Box::new(|s: &mut UserStore| { let _ = s.add_token(&uid("b"), tok("X"), 2.0, Utc::now()); }),
            Box::new(|s: &mut UserStore| { let _ = s.set_token_threshold(&uid("a"), &tok("X"), 5.0, Direction::Negative); }),
            Box::new(|s: &mut UserStore| { let _ = s.set_token_threshold(&uid("a"), &tok("Z"), 5.0, Direction::Both); }),
            Box::new(|s: &mut UserStore| { let _ = s.set_global_threshold(&uid("b"), 12.0); }),
            Box::new(|s: &mut UserStore| { let _ = s.set_global_threshold(&uid("b"), f64::NAN); }),
            Box::new(|s: &mut UserStore| { let _ = s.reset_entry_price(&uid("b"), &tok("X"), 3.0, Utc::now()); }),
            Box::new(|s: &mut UserStore| { let _ = s.reset_entry_price(&uid("b"), &tok("X"), 0.0, Utc::now()); }),
            Box::new(|s: &mut UserStore| { let _ = s.deactivate(&uid("b")); }),
            Box::new(|s: &mut UserStore| { let _ = s.remove_token(&uid("a"), &tok("X")); }),
            Box::new(|s: &mut UserStore| { let _ = s.remove_token(&uid("a"), &tok("X")); }),
            Box::new(|s: &mut UserStore| { s.register(uid("b")); }),
        ];
        for step in &steps {
            step(&mut store);
            assert_invariants(&store);
        }
        let b = store.get(&uid("b")).unwrap();
        assert!(b.active);
        assert_eq!(b.global_threshold, 12.0);
        assert_eq!(b.entry_prices[&tok("X")].price, 3.0);
        assert!(store.get(&uid("a")).unwrap().tracked_tokens.is_empty());
    }

    #[test]
    fn union_and_lookup_skip_inactive_users() {
        let mut store = UserStore::new(20.0);
        store.register(uid("a"));
        store.register(uid("b"));
        store.add_token(&uid("a"), tok("X"), 1.0, Utc::now()).unwrap();
        store.add_token(&uid("b"), tok("X"), 1.0, Utc::now()).unwrap();
        store.add_token(&uid("b"), tok("Y"), 1.0, Utc::now()).unwrap();

        let union: Vec<_> = store.tracked_token_union().into_iter().collect();
        assert_eq!(union, vec![tok("X"), tok("Y")]);

        store.deactivate(&uid("b")).unwrap();
        let union: Vec<_> = store.tracked_token_union().into_iter().collect();
        assert_eq!(union, vec![tok("X")]);

        let ids: Vec<_> = store.users_tracking(&tok("X")).iter().map(|u| u.user_id.clone()).collect();
        assert_eq!(ids, vec![uid("a")]);
        assert!(store.users_tracking(&tok("Y")).is_empty());
    }

    #[test]
    fn users_tracking_follows_registration_order() {
        let mut store = UserStore::new(20.0);
        for id in ["c", "a", "b"] {
            store.register(uid(id));
            store.add_token(&uid(id), tok("X"), 1.0, Utc::now()).unwrap();
        }
        let ids: Vec<_> = store.users_tracking(&tok("X")).iter().map(|u| u.user_id.0.clone()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn export_round_trips_through_from_snapshot() {
        let mut store = UserStore::new(20.0);
        store.register(uid("b"));
        store.register(uid("a"));
        store.add_token(&uid("a"), tok("X"), 0.5, Utc::now()).unwrap();
        store.set_token_threshold(&uid("a"), &tok("X"), 7.5, Direction::Negative).unwrap();
        store.deactivate(&uid("b")).unwrap();

        let restored = UserStore::from_snapshot(20.0, store.export()).unwrap();
        assert_eq!(restored.export(), store.export());
        assert_eq!(restored.active_user_ids(), vec![uid("a")]);
    }

    #[test]
    fn from_snapshot_rejects_orphan_entry_price() {
        let mut record = UserRecord::new(uid("u"), 20.0, Utc::now());
        record.entry_prices.insert(tok("X"), EntryPrice { price: 1.0, timestamp: Utc::now() });
        let err = UserStore::from_snapshot(20.0, vec![record]).unwrap_err();
        assert!(matches!(err, SnapshotError::Invalid(_)));
    }

    #[test]
    fn from_snapshot_rejects_duplicates() {
        let a = UserRecord::new(uid("u"), 20.0, Utc::now());
        let b = a.clone();
        assert!(matches!(
            UserStore::from_snapshot(20.0, vec![a, b]),
            Err(SnapshotError::Invalid(_))
        ));
    }
}
