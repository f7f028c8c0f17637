//! Per-player delivery of match state

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::ws::protocol::ServerMsg;
use crate::ws::session::SessionManager;

use super::r#match::{GameMatch, Seat};
use super::PlayerId;

/// Sends personalized views to both seats and skips snapshots that carry
/// nothing new since the last one sent for that match.
pub struct Broadcaster {
    sessions: Arc<SessionManager>,
    /// match -> fingerprint of the last broadcast snapshot
    last_sent: DashMap<Uuid, u64>,
}

impl Broadcaster {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            sessions,
            last_sent: DashMap::new(),
        }
    }

    /// Broadcast the current state of a live match. Returns false when the
    /// snapshot was suppressed as a duplicate. Finished matches go through
    /// [`Broadcaster::publish_terminal`] instead.
    pub fn publish(&self, game: &GameMatch) -> bool {
        if game.is_finished() {
            return false;
        }
        let snapshot = game.snapshot();
        let fingerprint = snapshot.fingerprint();
        if self.last_sent.insert(game.id, fingerprint) == Some(fingerprint) {
            debug!(match_id = %game.id, tick = snapshot.tick, "Unchanged snapshot skipped");
            return false;
        }
        for seat in [Seat::First, Seat::Second] {
            self.sessions.send(
                game.player(seat),
                ServerMsg::GameState(snapshot.encode_for(seat)),
            );
        }
        true
    }

    /// Send the finished snapshot. Never deduplicated; the caller guarantees
    /// it runs once per match.
    pub fn publish_terminal(&self, game: &GameMatch) {
        self.last_sent.remove(&game.id);
        let snapshot = game.snapshot();
        for seat in [Seat::First, Seat::Second] {
            self.sessions.send(
                game.player(seat),
                ServerMsg::GameState(snapshot.encode_for(seat)),
            );
        }
    }

    /// Tell one player about the match they are seated in.
    pub fn announce_to(&self, game: &GameMatch, player: PlayerId) -> bool {
        let Some(seat) = game.seat_of(player) else {
            return false;
        };
        let snake = game.snake(seat);
        let (field_width, field_height) = (game.field().width, game.field().height);
        debug!(match_id = %game.id, player_id = player, head = ?snake.head(), "Announcing match");
        self.sessions.send(
            player,
            ServerMsg::MatchFound {
                match_id: game.id,
                seat: seat.number(),
                opponent_id: game.player(seat.other()),
                field_width,
                field_height,
                state: game.snapshot().encode_for(seat),
            },
        )
    }

    pub fn announce(&self, game: &GameMatch) {
        for player in game.players() {
            self.announce_to(game, player);
        }
    }

    /// Send the same message to both seats.
    pub fn to_both(&self, game: &GameMatch, msg: ServerMsg) {
        let [first, second] = game.players();
        self.sessions.send(first, msg.clone());
        self.sessions.send(second, msg);
    }

    pub fn forget(&self, match_id: &Uuid) {
        self.last_sent.remove(match_id);
    }

    pub fn clear(&self) {
        self.last_sent.clear();
    }
}
