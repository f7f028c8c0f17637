//! Matchmaking queue implementation

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::game::PlayerId;

/// Player in the matchmaking queue
#[derive(Debug, Clone)]
pub struct WaitingPlayer {
    pub player_id: PlayerId,
    pub username: String,
    pub queued_at: Instant,
}

impl WaitingPlayer {
    pub fn new(player_id: PlayerId, username: String) -> Self {
        Self {
            player_id,
            username,
            queued_at: Instant::now(),
        }
    }

    /// How long this player has been waiting
    pub fn wait_time(&self) -> Duration {
        self.queued_at.elapsed()
    }
}

/// Players waiting for an opponent, oldest first
#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    queue: VecDeque<WaitingPlayer>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a player to the queue. Returns false if the player is already
    /// waiting; their original position is kept.
    pub fn enqueue(&mut self, player: WaitingPlayer) -> bool {
        if self.contains(player.player_id) {
            return false;
        }
        self.queue.push_back(player);
        true
    }

    /// Remove a player from the queue
    pub fn dequeue(&mut self, player_id: PlayerId) -> Option<WaitingPlayer> {
        let pos = self.queue.iter().position(|p| p.player_id == player_id)?;
        self.queue.remove(pos)
    }

    /// Check if a player is in the queue
    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.queue.iter().any(|p| p.player_id == player_id)
    }

    /// Get queue length
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Take the longest-waiting player other than `requester`
    pub fn take_opponent(&mut self, requester: PlayerId) -> Option<WaitingPlayer> {
        let pos = self.queue.iter().position(|p| p.player_id != requester)?;
        self.queue.remove(pos)
    }

    pub fn clear(&mut self) -> usize {
        let count = self.queue.len();
        self.queue.clear();
        count
    }
}
