//! Matchmaking service - pairs waiting players and charges entry fees

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::game::{MatchRegistry, PlayerId};
use crate::store::{StoreError, UserStore};
use crate::ws::protocol::ServerMsg;
use crate::ws::session::SessionManager;

use super::queue::{MatchmakingQueue, WaitingPlayer};

/// Result of a `find_match` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRequest {
    /// Waiting for an opponent
    Queued,
    /// Paired immediately
    Matched { match_id: Uuid },
}

#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Not enough games to enter a match: have {balance}, need {required}")]
    InsufficientBalance { balance: i64, required: i64 },

    #[error("Already in a match")]
    AlreadyInMatch,

    #[error("Entry fee could not be collected")]
    EntryFeeFailed,

    #[error("User store unavailable: {0}")]
    Store(#[from] StoreError),
}

impl MatchmakingError {
    /// Wire code carried in the `error` event
    pub fn code(&self) -> &'static str {
        match self {
            MatchmakingError::InsufficientBalance { .. } => "insufficient_balance",
            MatchmakingError::AlreadyInMatch => "already_in_match",
            MatchmakingError::EntryFeeFailed => "entry_fee_failed",
            MatchmakingError::Store(_) => "store_unavailable",
        }
    }
}

/// Matchmaking service
pub struct MatchmakingService {
    /// Held across pairing and fee collection so a player is never paired twice
    queue: Mutex<MatchmakingQueue>,
    registry: Arc<MatchRegistry>,
    sessions: Arc<SessionManager>,
    users: Arc<dyn UserStore>,
}

impl MatchmakingService {
    pub fn new(
        registry: Arc<MatchRegistry>,
        sessions: Arc<SessionManager>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            queue: Mutex::new(MatchmakingQueue::new()),
            registry,
            sessions,
            users,
        }
    }

    /// Queue the player or pair them with a waiting opponent. The requester
    /// takes the first seat.
    pub async fn request_match(
        &self,
        player_id: PlayerId,
        username: String,
    ) -> Result<MatchRequest, MatchmakingError> {
        if self.registry.match_of(player_id).is_some() {
            return Err(MatchmakingError::AlreadyInMatch);
        }

        let mut queue = self.queue.lock().await;
        if queue.contains(player_id) {
            return Ok(MatchRequest::Queued);
        }

        let entry_cost = self.registry.config().entry_cost;
        let balance = self
            .users
            .get(player_id)
            .await?
            .map(|r| r.games_balance)
            .unwrap_or(0);
        if balance < entry_cost {
            info!(player_id, balance, entry_cost, "Match request rejected, balance too low");
            return Err(MatchmakingError::InsufficientBalance {
                balance,
                required: entry_cost,
            });
        }

        let Some(opponent) = queue.take_opponent(player_id) else {
            queue.enqueue(WaitingPlayer::new(player_id, username));
            info!(player_id, queue_size = queue.len(), "Player joined matchmaking queue");
            return Ok(MatchRequest::Queued);
        };

        self.collect_entry_fees(player_id, &opponent).await?;

        let match_id = self.registry.create_match(player_id, opponent.player_id);
        info!(
            match_id = %match_id,
            player_id,
            opponent_id = opponent.player_id,
            opponent = %opponent.username,
            waited_ms = opponent.wait_time().as_millis() as u64,
            "Players paired"
        );
        Ok(MatchRequest::Matched { match_id })
    }

    /// Debit both players or neither. On failure the waiting opponent is told
    /// too, and neither player goes back into the queue.
    async fn collect_entry_fees(
        &self,
        player_id: PlayerId,
        opponent: &WaitingPlayer,
    ) -> Result<(), MatchmakingError> {
        let entry_cost = self.registry.config().entry_cost;
        let fail = |reason: &str| {
            warn!(player_id, opponent_id = opponent.player_id, reason, "Entry fee collection failed");
            self.sessions.send(
                opponent.player_id,
                ServerMsg::error("entry_fee_failed", "Match could not be created, please search again"),
            );
            MatchmakingError::EntryFeeFailed
        };

        match self.users.try_debit_games(player_id, entry_cost).await {
            Ok(true) => {}
            Ok(false) => return Err(fail("requester balance")),
            Err(e) => {
                error!(player_id, "Entry fee debit failed: {}", e);
                return Err(fail("store error"));
            }
        }

        let second = self
            .users
            .try_debit_games(opponent.player_id, entry_cost)
            .await;
        if matches!(second, Ok(true)) {
            return Ok(());
        }
        if let Err(e) = &second {
            error!(player_id = opponent.player_id, "Entry fee debit failed: {}", e);
        }

        if let Err(e) = self.users.credit_games(player_id, entry_cost).await {
            error!(player_id, amount = entry_cost, "Entry fee refund failed: {}", e);
        }
        Err(fail("opponent balance"))
    }

    /// Leave the queue on request. Returns whether the player was waiting.
    pub async fn cancel(&self, player_id: PlayerId) -> bool {
        let removed = self.queue.lock().await.dequeue(player_id).is_some();
        if removed {
            info!(player_id, "Player left matchmaking queue");
        }
        removed
    }

    /// Disconnect cleanup. Waits for any pairing in flight, so a player that
    /// was just matched is seen as in-match afterwards.
    pub async fn remove(&self, player_id: PlayerId) -> bool {
        self.queue.lock().await.dequeue(player_id).is_some()
    }

    /// Get current queue size
    pub async fn queue_size(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Check if player is in queue
    #[cfg(test)]
    pub async fn is_in_queue(&self, player_id: PlayerId) -> bool {
        self.queue.lock().await.contains(player_id)
    }

    /// Empty the queue at shutdown
    pub async fn drain(&self) -> usize {
        self.queue.lock().await.clear()
    }
}
