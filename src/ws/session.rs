//! Connection bookkeeping: which socket belongs to which player, and which
//! match (if any) each player is seated in

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::PlayerId;
use crate::ws::protocol::ServerMsg;

/// Outbound half of a connection. The socket writer task drains the receiver.
pub type Outbox = mpsc::UnboundedSender<ServerMsg>;

/// Live state for one connected player
#[derive(Debug, Clone)]
pub struct PlayerSession {
    /// Distinguishes a superseded socket from the current one
    pub connection_id: Uuid,
    pub outbox: Outbox,
}

/// Session manager
pub struct SessionManager {
    sessions: DashMap<PlayerId, PlayerSession>,
    /// player -> current match
    player_matches: DashMap<PlayerId, Uuid>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            player_matches: DashMap::new(),
        }
    }

    /// Bind a connection to a player. An existing connection for the same
    /// player is superseded: its outbox is dropped, which ends its writer.
    pub fn bind(&self, player_id: PlayerId, outbox: Outbox) -> Uuid {
        let connection_id = Uuid::new_v4();
        let previous = self.sessions.insert(
            player_id,
            PlayerSession {
                connection_id,
                outbox,
            },
        );
        if let Some(old) = previous {
            info!(
                player_id,
                old_connection = %old.connection_id,
                "Connection superseded by a new one"
            );
        }
        connection_id
    }

    /// Drop the binding if `connection_id` is still the current connection.
    /// Returns false for a superseded connection, which must not clean up.
    pub fn unbind(&self, player_id: PlayerId, connection_id: Uuid) -> bool {
        self.sessions
            .remove_if(&player_id, |_, s| s.connection_id == connection_id)
            .is_some()
    }

    /// Whether `connection_id` is still the player's live connection.
    /// Commands from any other connection are not acted on.
    pub fn is_current(&self, player_id: PlayerId, connection_id: Uuid) -> bool {
        self.sessions
            .get(&player_id)
            .is_some_and(|s| s.connection_id == connection_id)
    }

    #[cfg(test)]
    pub fn is_connected(&self, player_id: PlayerId) -> bool {
        self.sessions.contains_key(&player_id)
    }

    /// Queue a message for a player. Never blocks; returns false if the
    /// player is not connected or the writer is gone.
    pub fn send(&self, player_id: PlayerId, msg: ServerMsg) -> bool {
        let Some(session) = self.sessions.get(&player_id) else {
            return false;
        };
        if session.outbox.send(msg).is_err() {
            debug!(player_id, "Outbox closed, message dropped");
            return false;
        }
        true
    }

    pub fn match_of(&self, player_id: PlayerId) -> Option<Uuid> {
        self.player_matches.get(&player_id).map(|r| *r)
    }

    pub fn assign_match(&self, player_id: PlayerId, match_id: Uuid) {
        self.player_matches.insert(player_id, match_id);
    }

    /// Clear the player's match only if it still points at `match_id`.
    pub fn release_match(&self, player_id: PlayerId, match_id: Uuid) {
        self.player_matches.remove_if(&player_id, |_, m| *m == match_id);
    }

    pub fn connected_players(&self) -> usize {
        self.sessions.len()
    }

    /// Close every outbox so writer tasks wind down.
    pub fn drain(&self) {
        self.sessions.clear();
        self.player_matches.clear();
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superseded_connection_cannot_unbind() {
        let sessions = SessionManager::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();

        let first = sessions.bind(5, tx1);
        let second = sessions.bind(5, tx2);

        assert!(sessions.send(5, ServerMsg::WaitingOpponent));
        assert!(rx2.try_recv().is_ok());
        assert!(rx1.try_recv().is_err());

        assert!(!sessions.unbind(5, first));
        assert!(sessions.is_connected(5));
        assert!(sessions.unbind(5, second));
        assert!(!sessions.is_connected(5));
        assert!(!sessions.send(5, ServerMsg::WaitingOpponent));
    }

    #[test]
    fn test_only_latest_connection_is_current() {
        let sessions = SessionManager::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        let first = sessions.bind(5, tx1);
        assert!(sessions.is_current(5, first));

        let second = sessions.bind(5, tx2);
        assert!(!sessions.is_current(5, first));
        assert!(sessions.is_current(5, second));
        // The superseded writer sees its outbox close
        assert!(matches!(
            rx1.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        assert!(sessions.unbind(5, second));
        assert!(!sessions.is_current(5, second));
    }

    #[test]
    fn test_release_only_matching_match() {
        let sessions = SessionManager::new();
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();
        sessions.assign_match(1, new);
        sessions.release_match(1, old);
        assert_eq!(sessions.match_of(1), Some(new));
        sessions.release_match(1, new);
        assert_eq!(sessions.match_of(1), None);
    }
}
