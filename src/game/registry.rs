//! Registry of live matches and their lifecycle: creation, ready handshake,
//! countdown, termination, payout and disposal

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::store::UserStore;
use crate::util::time::unix_millis;
use crate::ws::protocol::ServerMsg;
use crate::ws::session::SessionManager;

use super::broadcast::Broadcaster;
use super::r#match::{GameMatch, MatchPhase, Seat};
use super::PlayerId;

/// A match shared between the tick loop and connection handlers
pub type SharedMatch = Arc<Mutex<GameMatch>>;

/// Everything the payout step needs once a match has been closed
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub match_id: Uuid,
    pub players: [PlayerId; 2],
    pub winner: Option<PlayerId>,
    /// Whether a win in this match pays out
    pub eligible: bool,
    pub duration_ms: u64,
}

impl Settlement {
    fn of(game: &GameMatch) -> Self {
        Self {
            match_id: game.id,
            players: game.players(),
            winner: game.winner(),
            eligible: game.prize_eligible(),
            duration_ms: game.duration_ms(),
        }
    }
}

pub struct MatchRegistry {
    config: GameConfig,
    matches: DashMap<Uuid, SharedMatch>,
    /// Timers owned by a match; aborted on disposal
    tasks: DashMap<Uuid, Vec<AbortHandle>>,
    sessions: Arc<SessionManager>,
    broadcaster: Arc<Broadcaster>,
    users: Arc<dyn UserStore>,
}

impl MatchRegistry {
    pub fn new(
        config: GameConfig,
        sessions: Arc<SessionManager>,
        broadcaster: Arc<Broadcaster>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            config,
            matches: DashMap::new(),
            tasks: DashMap::new(),
            sessions,
            broadcaster,
            users,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Seat two players in a new match and announce it to both.
    pub fn create_match(self: &Arc<Self>, first: PlayerId, second: PlayerId) -> Uuid {
        let id = Uuid::new_v4();
        let game = GameMatch::new(id, first, second, &self.config);

        let shared = Arc::new(Mutex::new(game));
        self.matches.insert(id, shared.clone());
        self.sessions.assign_match(first, id);
        self.sessions.assign_match(second, id);
        // Registered before announcing, so an immediate `ready` finds it
        self.broadcaster.announce(&shared.lock());

        info!(match_id = %id, first, second, "Match created");
        self.schedule_ready_timeout(id);
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<SharedMatch> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    /// The match a player is currently seated in
    pub fn match_of(&self, player: PlayerId) -> Option<SharedMatch> {
        self.sessions.match_of(player).and_then(|id| self.get(&id))
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn running_matches(&self) -> Vec<(Uuid, SharedMatch)> {
        self.matches
            .iter()
            .filter(|entry| entry.value().lock().is_running())
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Re-send `match_found` to a player who reconnected mid-match.
    pub fn reannounce(&self, player: PlayerId) -> bool {
        match self.match_of(player) {
            Some(shared) => {
                let game = shared.lock();
                !game.is_finished() && self.broadcaster.announce_to(&game, player)
            }
            None => false,
        }
    }

    /// Buffer a direction for the player's match. No match is a silent no-op.
    pub fn set_direction(&self, player: PlayerId, direction: super::engine::Direction) -> bool {
        match self.match_of(player) {
            Some(shared) => shared.lock().set_direction(player, direction),
            None => false,
        }
    }

    /// Record a ready signal, confirm it to both seats, and begin the countdown
    /// once both are ready.
    pub fn mark_ready(self: &Arc<Self>, player: PlayerId) {
        let Some(shared) = self.match_of(player) else {
            return;
        };
        let (id, both_ready) = {
            let mut game = shared.lock();
            if game.phase() != MatchPhase::Pairing {
                return;
            }
            let both_ready = game.mark_ready(player);
            for seat in [Seat::First, Seat::Second] {
                self.sessions.send(
                    game.player(seat),
                    ServerMsg::ReadyConfirmed {
                        you_ready: game.is_ready(seat),
                        opponent_ready: game.is_ready(seat.other()),
                    },
                );
            }
            (game.id, both_ready)
        };
        if both_ready {
            self.begin_countdown(id);
        }
    }

    /// Start the countdown unless it already began or the match ended.
    pub fn begin_countdown(self: &Arc<Self>, id: Uuid) -> bool {
        let Some(shared) = self.get(&id) else {
            return false;
        };
        if !shared.lock().begin_countdown() {
            return false;
        }
        let registry = Arc::clone(self);
        let task = tokio::spawn(async move { registry.run_countdown(id).await });
        self.track(id, task.abort_handle());
        true
    }

    async fn run_countdown(self: Arc<Self>, id: Uuid) {
        let secs = self.config.countdown_secs;
        let start_at = unix_millis() + secs as u64 * 1000;
        debug!(match_id = %id, secs, "Countdown started");

        for remaining in (1..=secs).rev() {
            let Some(shared) = self.get(&id) else {
                return;
            };
            {
                let game = shared.lock();
                if game.phase() != MatchPhase::Countdown {
                    return;
                }
                self.broadcaster.to_both(
                    &game,
                    ServerMsg::Countdown {
                        seconds_remaining: remaining,
                        start_at,
                    },
                );
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        let Some(shared) = self.get(&id) else {
            return;
        };
        let mut game = shared.lock();
        if let Some(start_time) = game.start() {
            info!(match_id = %id, "Match started");
            self.broadcaster.to_both(
                &game,
                ServerMsg::GameStart {
                    match_id: id,
                    start_time,
                },
            );
            self.broadcaster.publish(&game);
        }
    }

    fn schedule_ready_timeout(self: &Arc<Self>, id: Uuid) {
        let registry = Arc::clone(self);
        let timeout = Duration::from_secs(self.config.ready_timeout_secs);
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if registry.begin_countdown(id) {
                debug!(match_id = %id, "Ready timeout elapsed, countdown forced");
            }
        });
        self.track(id, task.abort_handle());
    }

    fn track(&self, id: Uuid, handle: AbortHandle) {
        self.tasks.entry(id).or_default().push(handle);
    }

    /// Finish the match (if not already) and release its final snapshot.
    /// Returns the settlement on the first call only.
    pub fn conclude(&self, game: &mut GameMatch, winner: Option<PlayerId>) -> Option<Settlement> {
        game.finish(winner);
        if game.outcome_settled {
            return None;
        }
        game.outcome_settled = true;
        self.broadcaster.publish_terminal(game);
        info!(
            match_id = %game.id,
            winner = ?game.winner(),
            tick = game.tick_number(),
            "Match finished"
        );
        Some(Settlement::of(game))
    }

    pub fn close(&self, id: &Uuid, winner: Option<PlayerId>) -> Option<Settlement> {
        let shared = self.get(id)?;
        let mut game = shared.lock();
        self.conclude(&mut game, winner)
    }

    /// Pay the winner, send `game_end` to both seats and schedule disposal.
    /// Returns the prize actually credited; a repeated call pays nothing.
    pub async fn settle(self: &Arc<Self>, settlement: Settlement) -> f64 {
        let Some(shared) = self.get(&settlement.match_id) else {
            return 0.0;
        };
        {
            let mut game = shared.lock();
            if game.terminal_event_sent {
                return 0.0;
            }
            game.terminal_event_sent = true;
        }

        let prize = match settlement.winner {
            Some(winner) if settlement.eligible => {
                let payout = self.config.winner_payout;
                match self.users.credit_winnings(winner, payout).await {
                    Ok(record) => {
                        info!(
                            match_id = %settlement.match_id,
                            player_id = winner,
                            prize = payout,
                            winnings = record.winnings,
                            "Prize credited"
                        );
                        payout
                    }
                    Err(e) => {
                        error!(
                            match_id = %settlement.match_id,
                            player_id = winner,
                            "Failed to credit prize: {}", e
                        );
                        0.0
                    }
                }
            }
            _ => 0.0,
        };

        {
            let game = shared.lock();
            self.broadcaster.to_both(
                &game,
                ServerMsg::GameEnd {
                    match_id: settlement.match_id,
                    winner_id: settlement.winner,
                    prize,
                    duration_ms: settlement.duration_ms,
                    pool: self.config.pool(),
                },
            );
        }

        for player in settlement.players {
            self.sessions.release_match(player, settlement.match_id);
        }
        self.schedule_dispose(settlement.match_id);
        prize
    }

    /// The player leaves their match; the opponent wins. Before the first tick
    /// nobody is paid.
    pub async fn forfeit(self: &Arc<Self>, player: PlayerId) -> Option<f64> {
        let shared = self.match_of(player)?;
        let settlement = {
            let mut game = shared.lock();
            let opponent = game.opponent_of(player);
            self.conclude(&mut game, opponent)
        };
        match settlement {
            Some(settlement) => {
                warn!(match_id = %settlement.match_id, player_id = player, "Player forfeited");
                Some(self.settle(settlement).await)
            }
            None => None,
        }
    }

    fn schedule_dispose(self: &Arc<Self>, id: Uuid) {
        let registry = Arc::clone(self);
        let retention = Duration::from_secs(self.config.retention_secs);
        let task = tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            registry.dispose(&id);
        });
        self.track(id, task.abort_handle());
    }

    /// Drop the match and every timer it owns.
    pub fn dispose(&self, id: &Uuid) {
        if let Some((_, handles)) = self.tasks.remove(id) {
            for handle in handles {
                handle.abort();
            }
        }
        self.broadcaster.forget(id);
        if let Some((_, shared)) = self.matches.remove(id) {
            for player in shared.lock().players() {
                self.sessions.release_match(player, *id);
            }
            debug!(match_id = %id, "Match disposed");
        }
    }

    /// Abort all timers and drop all matches.
    pub fn shutdown(&self) {
        let ids: Vec<Uuid> = self.matches.iter().map(|m| *m.key()).collect();
        for id in &ids {
            self.dispose(id);
        }
        self.broadcaster.clear();
        info!(disposed = ids.len(), "Match registry shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryUserStore, StoreError, UserRecord};
    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio_test::assert_ok;

    struct Harness {
        registry: Arc<MatchRegistry>,
        users: Arc<MemoryUserStore>,
        rx1: mpsc::UnboundedReceiver<ServerMsg>,
        rx2: mpsc::UnboundedReceiver<ServerMsg>,
    }

    async fn harness(config: GameConfig) -> Harness {
        let users = Arc::new(MemoryUserStore::new());
        assert_ok!(users.create_if_absent(1, "one", 5).await);
        assert_ok!(users.create_if_absent(2, "two", 5).await);
        let (registry, rx1, rx2) = registry_with(config, users.clone());
        Harness {
            registry,
            users,
            rx1,
            rx2,
        }
    }

    fn registry_with(
        config: GameConfig,
        users: Arc<dyn UserStore>,
    ) -> (
        Arc<MatchRegistry>,
        mpsc::UnboundedReceiver<ServerMsg>,
        mpsc::UnboundedReceiver<ServerMsg>,
    ) {
        let sessions = Arc::new(SessionManager::new());
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();
        sessions.bind(1, tx1);
        sessions.bind(2, tx2);
        let broadcaster = Arc::new(Broadcaster::new(sessions.clone()));
        let registry = Arc::new(MatchRegistry::new(config, sessions, broadcaster, users));
        (registry, rx1, rx2)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMsg>) -> Vec<ServerMsg> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn start_now(registry: &MatchRegistry, id: Uuid) {
        let shared = registry.get(&id).unwrap();
        let mut game = shared.lock();
        game.begin_countdown();
        game.start();
    }

    struct FailingStore;

    #[async_trait]
    impl UserStore for FailingStore {
        async fn get(&self, _: PlayerId) -> Result<Option<UserRecord>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn create_if_absent(&self, _: PlayerId, _: &str, _: i64) -> Result<UserRecord, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn try_debit_games(&self, _: PlayerId, _: i64) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn credit_games(&self, _: PlayerId, _: i64) -> Result<UserRecord, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn credit_winnings(&self, _: PlayerId, _: f64) -> Result<UserRecord, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn credit_deposit(&self, _: &str, _: PlayerId, _: i64) -> Result<Option<UserRecord>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_create_announces_to_both() {
        let mut h = harness(GameConfig::default()).await;
        let id = h.registry.create_match(1, 2);

        let first = drain(&mut h.rx1);
        let second = drain(&mut h.rx2);
        assert!(matches!(
            first.as_slice(),
            [ServerMsg::MatchFound { seat: 1, opponent_id: 2, match_id, .. }] if *match_id == id
        ));
        assert!(matches!(
            second.as_slice(),
            [ServerMsg::MatchFound { seat: 2, opponent_id: 1, .. }]
        ));
        assert_eq!(h.registry.active_matches(), 1);
        assert!(h.registry.running_matches().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_match_registered_before_announce() {
        let Harness { registry, mut rx1, .. } = harness(GameConfig::default()).await;
        let observer = {
            let registry = registry.clone();
            tokio::spawn(async move {
                match rx1.recv().await {
                    Some(ServerMsg::MatchFound { match_id, .. }) => {
                        let seated = registry.match_of(1).map(|m| {
                            let id = m.lock().id;
                            id
                        });
                        seated == Some(match_id)
                    }
                    _ => false,
                }
            })
        };

        registry.create_match(1, 2);
        assert!(observer.await.unwrap());
    }

    #[tokio::test]
    async fn test_close_settles_once_and_pays_once() {
        let mut h = harness(GameConfig::default()).await;
        let id = h.registry.create_match(1, 2);
        start_now(&h.registry, id);
        h.registry.get(&id).unwrap().lock().tick();

        let settlement = h.registry.close(&id, Some(1)).expect("first close settles");
        assert!(h.registry.close(&id, Some(2)).is_none());
        assert!(h.registry.close(&id, None).is_none());

        let prize = h.registry.settle(settlement.clone()).await;
        assert_eq!(prize, 1.5);
        // A repeated settle must not send a second game_end
        h.registry.settle(settlement).await;

        let record = assert_ok!(h.users.get(1).await).unwrap();
        assert_eq!(record.winnings, 1.5);
        let loser = assert_ok!(h.users.get(2).await).unwrap();
        assert_eq!(loser.winnings, 0.0);

        let msgs = drain(&mut h.rx1);
        let ends: Vec<_> = msgs
            .iter()
            .filter(|m| matches!(m, ServerMsg::GameEnd { .. }))
            .collect();
        assert_eq!(ends.len(), 1);
        let finished_state = msgs
            .iter()
            .position(|m| matches!(m, ServerMsg::GameState(s) if s.finished))
            .expect("terminal snapshot");
        let end = msgs
            .iter()
            .position(|m| matches!(m, ServerMsg::GameEnd { .. }))
            .unwrap();
        assert!(finished_state < end);
        assert!(matches!(
            ends[0],
            ServerMsg::GameEnd { winner_id: Some(1), pool: 2, .. }
        ));
        assert!(h.registry.match_of(1).is_none());
    }

    #[tokio::test]
    async fn test_forfeit_before_start_pays_nothing() {
        let mut h = harness(GameConfig::default()).await;
        h.registry.create_match(1, 2);

        let prize = h.registry.forfeit(1).await;
        assert_eq!(prize, Some(0.0));
        assert!(h.registry.forfeit(2).await.is_none());

        let record = assert_ok!(h.users.get(2).await).unwrap();
        assert_eq!(record.winnings, 0.0);
        assert!(drain(&mut h.rx2).iter().any(|m| matches!(
            m,
            ServerMsg::GameEnd { winner_id: Some(2), prize, .. } if *prize == 0.0
        )));
    }

    #[tokio::test]
    async fn test_forfeit_mid_match_pays_opponent() {
        let h = harness(GameConfig::default()).await;
        let id = h.registry.create_match(1, 2);
        start_now(&h.registry, id);
        h.registry.get(&id).unwrap().lock().tick();

        assert_eq!(h.registry.forfeit(2).await, Some(1.5));
        let record = assert_ok!(h.users.get(1).await).unwrap();
        assert_eq!(record.total_earned, 1.5);
    }

    #[tokio::test]
    async fn test_failed_payout_reports_zero_prize() {
        let (registry, mut rx1, _rx2) = registry_with(GameConfig::default(), Arc::new(FailingStore));
        let id = registry.create_match(1, 2);
        start_now(&registry, id);
        registry.get(&id).unwrap().lock().tick();

        let settlement = registry.close(&id, Some(1)).unwrap();
        assert_eq!(registry.settle(settlement).await, 0.0);
        assert!(drain(&mut rx1).iter().any(|m| matches!(
            m,
            ServerMsg::GameEnd { winner_id: Some(1), prize, .. } if *prize == 0.0
        )));
    }

    #[tokio::test]
    async fn test_draw_pays_nobody() {
        let h = harness(GameConfig::default()).await;
        let id = h.registry.create_match(1, 2);
        start_now(&h.registry, id);
        let settlement = {
            let shared = h.registry.get(&id).unwrap();
            let mut game = shared.lock();
            while !game.tick().terminated {}
            h.registry.conclude(&mut game, None).unwrap()
        };
        assert_eq!(settlement.winner, None);
        assert_eq!(h.registry.settle(settlement).await, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_handshake_runs_countdown() {
        let config = GameConfig {
            countdown_secs: 2,
            ..GameConfig::default()
        };
        let mut h = harness(config).await;
        let id = h.registry.create_match(1, 2);
        drain(&mut h.rx1);
        drain(&mut h.rx2);

        h.registry.mark_ready(1);
        assert!(matches!(
            drain(&mut h.rx2).as_slice(),
            [ServerMsg::ReadyConfirmed { you_ready: false, opponent_ready: true }]
        ));
        h.registry.mark_ready(2);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(h.registry.get(&id).unwrap().lock().is_running());

        let msgs = drain(&mut h.rx1);
        let countdowns: Vec<u32> = msgs
            .iter()
            .filter_map(|m| match m {
                ServerMsg::Countdown { seconds_remaining, .. } => Some(*seconds_remaining),
                _ => None,
            })
            .collect();
        assert_eq!(countdowns, vec![2, 1]);
        assert!(msgs.iter().any(|m| matches!(m, ServerMsg::GameStart { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_timeout_forces_countdown() {
        let config = GameConfig {
            countdown_secs: 0,
            ready_timeout_secs: 3,
            ..GameConfig::default()
        };
        let h = harness(config).await;
        let id = h.registry.create_match(1, 2);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.registry.get(&id).unwrap().lock().phase(), MatchPhase::Pairing);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(h.registry.get(&id).unwrap().lock().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_match_is_disposed_after_retention() {
        let h = harness(GameConfig::default()).await;
        let id = h.registry.create_match(1, 2);
        h.registry.forfeit(1).await;
        assert_eq!(h.registry.active_matches(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(h.registry.active_matches(), 0);
        assert!(h.registry.get(&id).is_none());
    }
}
