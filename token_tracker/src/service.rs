/// service.rs — Tracker service (single owner of engine state)
///
/// All state lives in one task.  Command handlers (chat front-end, console)
/// never touch it directly: they send a `Command` over an mpsc channel and
/// wait on a oneshot reply.  Poll cycles run in the same task, so a pass
/// always sees the store exactly as the last completed command left it.
///
/// LOOP
///   select!
///     tick      → fetch prices → journal → evaluate_batch → journal, notify
///     command   → apply to store → save snapshot (if mutated) → reply
///     shutdown  → save snapshot, return
use std::collections::BTreeSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::coordinator::TrackingCoordinator;
use crate::error::{CommandError, EngineError};
use crate::journal::PriceJournal;
use crate::models::{Direction, TokenId, UserId, UserRecord};
use crate::notify::{deliver_all, NotificationSink};
use crate::price::PriceSupplier;
use crate::snapshot;

type Reply<T> = oneshot::Sender<Result<T, CommandError>>;

#[derive(Debug)]
pub enum Command {
    Register {
        user_id: UserId,
        reply:   Reply<UserRecord>,
    },
    Deactivate {
        user_id: UserId,
        reply:   Reply<()>,
    },
    AddToken {
        user_id:     UserId,
        token_id:    TokenId,
        entry_price: Option<f64>,
        reply:       Reply<UserRecord>,
    },
    RemoveToken {
        user_id:  UserId,
        token_id: TokenId,
        reply:    Reply<()>,
    },
    SetGlobalThreshold {
        user_id: UserId,
        value:   f64,
        reply:   Reply<()>,
    },
    SetTokenThreshold {
        user_id:   UserId,
        token_id:  TokenId,
        value:     f64,
        direction: Direction,
        reply:     Reply<()>,
    },
    ResetEntryPrice {
        user_id:   UserId,
        token_id:  TokenId,
        new_price: Option<f64>,
        reply:     Reply<f64>,
    },
    Status {
        user_id: UserId,
        reply:   Reply<UserRecord>,
    },
    TrackedTokens {
        reply: Reply<BTreeSet<TokenId>>,
    },
}

// ── Handle ────────────────────────────────────────────────────────────────

/// Cloneable front door to a running `TrackerService`.
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    tx: mpsc::Sender<Command>,
}

impl TrackerHandle {
    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| CommandError::ServiceStopped)?;
        rx.await.map_err(|_| CommandError::ServiceStopped)?
    }

    pub async fn register(&self, user_id: UserId) -> Result<UserRecord, CommandError> {
        self.call(|reply| Command::Register { user_id, reply }).await
    }

    pub async fn deactivate(&self, user_id: UserId) -> Result<(), CommandError> {
        self.call(|reply| Command::Deactivate { user_id, reply }).await
    }

    /// Without `entry_price` the current market price is used.
    pub async fn add_token(
        &self,
        user_id:     UserId,
        token_id:    TokenId,
        entry_price: Option<f64>,
    ) -> Result<UserRecord, CommandError> {
        self.call(|reply| Command::AddToken { user_id, token_id, entry_price, reply }).await
    }

    pub async fn remove_token(&self, user_id: UserId, token_id: TokenId) -> Result<(), CommandError> {
        self.call(|reply| Command::RemoveToken { user_id, token_id, reply }).await
    }

    pub async fn set_global_threshold(&self, user_id: UserId, value: f64) -> Result<(), CommandError> {
        self.call(|reply| Command::SetGlobalThreshold { user_id, value, reply }).await
    }

    pub async fn set_token_threshold(
        &self,
        user_id:   UserId,
        token_id:  TokenId,
        value:     f64,
        direction: Direction,
    ) -> Result<(), CommandError> {
        self.call(|reply| Command::SetTokenThreshold { user_id, token_id, value, direction, reply })
            .await
    }

    /// Returns the entry price now in effect.
    pub async fn reset_entry_price(
        &self,
        user_id:   UserId,
        token_id:  TokenId,
        new_price: Option<f64>,
    ) -> Result<f64, CommandError> {
        self.call(|reply| Command::ResetEntryPrice { user_id, token_id, new_price, reply }).await
    }

    pub async fn status(&self, user_id: UserId) -> Result<UserRecord, CommandError> {
        self.call(|reply| Command::Status { user_id, reply }).await
    }

    pub async fn tracked_tokens(&self) -> Result<BTreeSet<TokenId>, CommandError> {
        self.call(|reply| Command::TrackedTokens { reply }).await
    }
}

// ── Service ───────────────────────────────────────────────────────────────

pub struct TrackerService {
    coordinator: TrackingCoordinator,
    supplier:    Arc<dyn PriceSupplier>,
    sink:        Arc<dyn NotificationSink>,
    journal:     Option<PriceJournal>,
    state_file:  PathBuf,
    poll_every:  Duration,
    commands:    mpsc::Receiver<Command>,
}

impl TrackerService {
    pub fn new(
        coordinator: TrackingCoordinator,
        supplier:    Arc<dyn PriceSupplier>,
        sink:        Arc<dyn NotificationSink>,
        journal:     Option<PriceJournal>,
        state_file:  PathBuf,
        poll_every:  Duration,
    ) -> (Self, TrackerHandle) {
        let (tx, commands) = mpsc::channel(64);
        let service = Self {
            coordinator,
            supplier,
            sink,
            journal,
            state_file,
            poll_every,
            commands,
        };
        (service, TrackerHandle { tx })
    }

    pub fn coordinator(&self) -> &TrackingCoordinator {
        &self.coordinator
    }

    /// Run until `shutdown` resolves (or every handle is dropped), then
    /// persist the final snapshot.
    pub async fn run<F>(mut self, shutdown: F) -> TrackingCoordinator
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.poll_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!("Tracker service started, polling every {:?}", self.poll_every);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => {
                        info!("All command handles dropped");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.poll_cycle().await;
                }
            }
        }

        self.persist();
        self.coordinator
    }

    /// One full poll: prices in, alerts out.  Returns the number of alerts.
    pub async fn poll_cycle(&mut self) -> usize {
        let tokens: Vec<TokenId> = self.coordinator.tokens_to_poll().into_iter().collect();
        if tokens.is_empty() {
            debug!("Nothing to poll");
            return 0;
        }

        let observations = self.supplier.fetch(&tokens).await;
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record_prices(&observations) {
                warn!("Price journal write failed: {e:#}");
            }
        }

        let alerts = self.coordinator.evaluate_batch(&observations);
        if alerts.is_empty() {
            return 0;
        }
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record_alerts(&alerts) {
                warn!("Alert journal write failed: {e:#}");
            }
        }
        let delivered = deliver_all(self.sink.as_ref(), &alerts).await;
        info!("Poll cycle: {} alerts, {} delivered", alerts.len(), delivered);
        alerts.len()
    }

    fn persist(&self) {
        if let Err(e) = snapshot::save(&self.state_file, self.coordinator.store()) {
            error!("Failed to save snapshot to {}: {e}", self.state_file.display());
        }
    }

    async fn current_price(&self, token: &TokenId) -> Result<f64, CommandError> {
        self.supplier
            .fetch(std::slice::from_ref(token))
            .await
            .into_iter()
            .find(|o| &o.token_id == token && o.has_valid_price())
            .map(|o| o.price)
            .ok_or_else(|| CommandError::PriceUnavailable(token.clone()))
    }

    /// Apply one command and answer it.  Mutations are persisted before the
    /// reply goes out.
    pub async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Register { user_id, reply } => {
                let record = self.coordinator.store_mut().register(user_id).clone();
                self.finish(reply, Ok(record), true);
            }
            Command::Deactivate { user_id, reply } => {
                let res = self.coordinator.store_mut().deactivate(&user_id).map_err(Into::into);
                self.finish(reply, res, true);
            }
            Command::AddToken { user_id, token_id, entry_price, reply } => {
                let res = self.add_token(user_id, token_id, entry_price).await;
                self.finish(reply, res, true);
            }
            Command::RemoveToken { user_id, token_id, reply } => {
                let res = self
                    .coordinator
                    .store_mut()
                    .remove_token(&user_id, &token_id)
                    .map_err(Into::into);
                self.finish(reply, res, true);
            }
            Command::SetGlobalThreshold { user_id, value, reply } => {
                let res = self
                    .coordinator
                    .store_mut()
                    .set_global_threshold(&user_id, value)
                    .map_err(Into::into);
                self.finish(reply, res, true);
            }
            Command::SetTokenThreshold { user_id, token_id, value, direction, reply } => {
                let res = self
                    .coordinator
                    .store_mut()
                    .set_token_threshold(&user_id, &token_id, value, direction)
                    .map_err(Into::into);
                self.finish(reply, res, true);
            }
            Command::ResetEntryPrice { user_id, token_id, new_price, reply } => {
                let res = self.reset_entry_price(user_id, token_id, new_price).await;
                self.finish(reply, res, true);
            }
            Command::Status { user_id, reply } => {
                let res: Result<UserRecord, CommandError> = match self.coordinator.store().get(&user_id) {
                    Some(record) => Ok(record.clone()),
                    None => Err(EngineError::NotFound(user_id).into()),
                };
                self.finish(reply, res, false);
            }
            Command::TrackedTokens { reply } => {
                self.finish(reply, Ok(self.coordinator.tokens_to_poll()), false);
            }
        }
    }

    fn finish<T>(&self, reply: Reply<T>, res: Result<T, CommandError>, mutating: bool) {
        match &res {
            Ok(_) if mutating => self.persist(),
            Ok(_) => {}
            Err(e) => debug!("Command rejected: {e}"),
        }
        // The caller may have given up waiting; nothing to do then.
        let _ = reply.send(res);
    }

    async fn add_token(
        &mut self,
        user_id:     UserId,
        token_id:    TokenId,
        entry_price: Option<f64>,
    ) -> Result<UserRecord, CommandError> {
        let store = self.coordinator.store();
        if store.get(&user_id).is_none() {
            return Err(EngineError::NotFound(user_id).into());
        }
        let existing = store
            .get(&user_id)
            .and_then(|u| u.entry_prices.get(&token_id))
            .map(|e| e.price);

        // Re-adding keeps the first entry price, so only price what is new.
        let price = match (entry_price, existing) {
            (Some(p), _) => p,
            (None, Some(p)) => p,
            (None, None) => self.current_price(&token_id).await?,
        };
        let record = self
            .coordinator
            .store_mut()
            .add_token(&user_id, token_id.clone(), price, Utc::now())?
            .clone();
        info!("User {} tracking {} (entry ${:.8})", user_id, token_id, record.entry_prices[&token_id].price);
        Ok(record)
    }

    async fn reset_entry_price(
        &mut self,
        user_id:   UserId,
        token_id:  TokenId,
        new_price: Option<f64>,
    ) -> Result<f64, CommandError> {
        let tracked = self
            .coordinator
            .store()
            .get(&user_id)
            .ok_or_else(|| EngineError::NotFound(user_id.clone()))?
            .is_tracking(&token_id);
        if !tracked {
            return Err(EngineError::NotTracked { user: user_id, token: token_id }.into());
        }

        let price = match new_price {
            Some(p) => p,
            None => self.current_price(&token_id).await?,
        };
        self.coordinator
            .store_mut()
            .reset_entry_price(&user_id, &token_id, price, Utc::now())?;
        info!("User {} reset entry for {} to ${:.8}", user_id, token_id, price);
        Ok(price)
    }
}
