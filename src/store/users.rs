//! User records and the in-memory store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::game::PlayerId;

use super::StoreError;

/// A player's balances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub player_id: PlayerId,
    pub username: String,
    /// Matches the player can still enter
    pub games_balance: i64,
    /// Prize money accrued and not yet withdrawn
    pub winnings: f64,
    /// Lifetime prize money
    pub total_earned: f64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl UserRecord {
    pub fn new(player_id: PlayerId, username: &str, games_balance: i64) -> Self {
        Self {
            player_id,
            username: username.to_string(),
            games_balance,
            winnings: 0.0,
            total_earned: 0.0,
            created_at: Some(Utc::now()),
        }
    }
}

/// Key-value store of user records. Balance changes are applied as atomic
/// deltas at the store rather than read-then-write by callers.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, player_id: PlayerId) -> Result<Option<UserRecord>, StoreError>;

    /// Fetch the record, creating it with `starting_balance` games if missing
    async fn create_if_absent(
        &self,
        player_id: PlayerId,
        username: &str,
        starting_balance: i64,
    ) -> Result<UserRecord, StoreError>;

    /// Debit `amount` games only if the balance covers it. Returns whether
    /// the debit happened.
    async fn try_debit_games(&self, player_id: PlayerId, amount: i64) -> Result<bool, StoreError>;

    async fn credit_games(&self, player_id: PlayerId, amount: i64)
        -> Result<UserRecord, StoreError>;

    /// Add prize money to winnings and the lifetime total
    async fn credit_winnings(
        &self,
        player_id: PlayerId,
        amount: f64,
    ) -> Result<UserRecord, StoreError>;

    /// Credit a verified deposit. Each `tx_id` is recorded together with the
    /// credit and is never credited again; returns None for a replay. A
    /// failed credit leaves the transaction unrecorded so it can be retried.
    async fn credit_deposit(
        &self,
        tx_id: &str,
        player_id: PlayerId,
        amount: i64,
    ) -> Result<Option<UserRecord>, StoreError>;
}

/// Process-local store, used in debug deployments and tests
#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<PlayerId, UserRecord>,
    /// Credited deposit transaction ids
    deposits: DashSet<String>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, player_id: PlayerId, f: F) -> Result<UserRecord, StoreError>
    where
        F: FnOnce(&mut UserRecord),
    {
        let mut record = self
            .users
            .get_mut(&player_id)
            .ok_or(StoreError::NotFound(player_id))?;
        f(&mut *record);
        Ok(record.value().clone())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get(&self, player_id: PlayerId) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.get(&player_id).map(|r| r.value().clone()))
    }

    async fn create_if_absent(
        &self,
        player_id: PlayerId,
        username: &str,
        starting_balance: i64,
    ) -> Result<UserRecord, StoreError> {
        match self.users.entry(player_id) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                info!(player_id, balance = starting_balance, "Created user record");
                let record = UserRecord::new(player_id, username, starting_balance);
                Ok(entry.insert(record).value().clone())
            }
        }
    }

    async fn try_debit_games(&self, player_id: PlayerId, amount: i64) -> Result<bool, StoreError> {
        let mut record = self
            .users
            .get_mut(&player_id)
            .ok_or(StoreError::NotFound(player_id))?;
        if record.games_balance < amount {
            return Ok(false);
        }
        record.games_balance -= amount;
        Ok(true)
    }

    async fn credit_games(
        &self,
        player_id: PlayerId,
        amount: i64,
    ) -> Result<UserRecord, StoreError> {
        self.update(player_id, |r| r.games_balance += amount)
    }

    async fn credit_winnings(
        &self,
        player_id: PlayerId,
        amount: f64,
    ) -> Result<UserRecord, StoreError> {
        self.update(player_id, |r| {
            r.winnings += amount;
            r.total_earned += amount;
        })
    }

    async fn credit_deposit(
        &self,
        tx_id: &str,
        player_id: PlayerId,
        amount: i64,
    ) -> Result<Option<UserRecord>, StoreError> {
        if !self.deposits.insert(tx_id.to_string()) {
            return Ok(None);
        }
        match self.update(player_id, |r| r.games_balance += amount) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                self.deposits.remove(tx_id);
                Err(e)
            }
        }
    }
}
