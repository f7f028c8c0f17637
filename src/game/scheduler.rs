//! Fixed-rate tick loop shared by all running matches

use std::sync::Arc;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::util::time::Timer;

use super::registry::MatchRegistry;

pub struct TickScheduler {
    registry: Arc<MatchRegistry>,
}

impl TickScheduler {
    pub fn new(registry: Arc<MatchRegistry>) -> Self {
        Self { registry }
    }

    /// Run the authoritative tick loop until the task is aborted
    pub async fn run(self) {
        let config = self.registry.config();
        let broadcast_every = config.broadcast_every();
        info!(
            tick_rate = config.tick_rate,
            broadcast_rate = config.broadcast_rate,
            "Tick scheduler started"
        );

        let tick_period = config.tick_period();
        let mut tick_interval = interval(tick_period);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks: u64 = 0;

        loop {
            tick_interval.tick().await;
            ticks = ticks.wrapping_add(1);

            let timer = Timer::new();
            self.tick_all(ticks % broadcast_every == 0);
            if timer.elapsed() > tick_period {
                warn!(elapsed_ms = timer.elapsed().as_millis() as u64, "Tick overran its period");
            }
        }
    }

    /// Advance every running match by one step. Matches that end are closed
    /// here and settled on a separate task. Returns how many matches ended.
    pub fn tick_all(&self, broadcast: bool) -> usize {
        let mut ended = 0;
        for (id, shared) in self.registry.running_matches() {
            let settlement = {
                let mut game = shared.lock();
                let report = game.tick();
                if report.terminated {
                    self.registry.conclude(&mut game, report.winner)
                } else {
                    if broadcast {
                        self.registry.broadcaster().publish(&game);
                    }
                    None
                }
            };

            if let Some(settlement) = settlement {
                debug!(match_id = %id, "Match ended on tick");
                ended += 1;
                let registry = Arc::clone(&self.registry);
                tokio::spawn(async move {
                    registry.settle(settlement).await;
                });
            }
        }
        ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::game::Broadcaster;
    use crate::store::{MemoryUserStore, UserStore};
    use crate::ws::protocol::ServerMsg;
    use crate::ws::session::SessionManager;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_straight_run_ends_in_draw() {
        let users = Arc::new(MemoryUserStore::new());
        assert_ok!(users.create_if_absent(1, "one", 1).await);
        assert_ok!(users.create_if_absent(2, "two", 1).await);

        let sessions = Arc::new(SessionManager::new());
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        sessions.bind(1, tx1);
        let broadcaster = Arc::new(Broadcaster::new(sessions.clone()));
        let registry = Arc::new(MatchRegistry::new(
            GameConfig::default(),
            sessions,
            broadcaster,
            users.clone(),
        ));

        let id = registry.create_match(1, 2);
        {
            let shared = registry.get(&id).unwrap();
            let mut game = shared.lock();
            game.begin_countdown();
            game.start();
        }

        let scheduler = TickScheduler::new(registry.clone());
        let mut ended = 0;
        let mut steps = 0;
        while ended == 0 {
            ended = scheduler.tick_all(true);
            steps += 1;
            assert!(steps <= 10);
        }
        assert_eq!(steps, 10);
        assert_eq!(scheduler.tick_all(true), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut states = 0;
        let mut end = None;
        while let Ok(msg) = rx1.try_recv() {
            match msg {
                ServerMsg::GameState(_) => states += 1,
                ServerMsg::GameEnd { winner_id, prize, .. } => end = Some((winner_id, prize)),
                _ => {}
            }
        }
        // nine live snapshots plus the terminal one
        assert_eq!(states, 10);
        assert_eq!(end, Some((None, 0.0)));
    }
}
