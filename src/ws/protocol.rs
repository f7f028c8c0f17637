//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::snapshot::GameStateView;
use crate::game::PlayerId;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Enter matchmaking, or pair with a waiting player
    FindMatch,

    /// Leave the waiting queue
    CancelSearch,

    /// Ready for the countdown to begin
    Ready,

    /// Buffered direction change; one of `up`, `down`, `left`, `right`
    Direction { direction: String },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Balance snapshot sent right after connecting
    UserData {
        player_id: PlayerId,
        username: String,
        games_balance: i64,
        winnings: f64,
        debug_mode: bool,
    },

    /// Queued, no opponent yet
    WaitingOpponent,

    /// Removed from the queue on request
    SearchCancelled,

    /// Paired with an opponent
    MatchFound {
        match_id: Uuid,
        /// 1 or 2
        seat: u8,
        opponent_id: PlayerId,
        field_width: i32,
        field_height: i32,
        state: GameStateView,
    },

    /// Ready acknowledgement with both seats' status
    ReadyConfirmed { you_ready: bool, opponent_ready: bool },

    /// Pre-start countdown, sent once per second
    Countdown {
        seconds_remaining: u32,
        /// Unix millis at which the match will start
        start_at: u64,
    },

    /// Simulation is running
    GameStart { match_id: Uuid, start_time: u64 },

    /// Per-tick state
    GameState(GameStateView),

    /// Match result
    GameEnd {
        match_id: Uuid,
        winner_id: Option<PlayerId>,
        prize: f64,
        duration_ms: u64,
        pool: i64,
    },

    /// Rejected action
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMsg::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
