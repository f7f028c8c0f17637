//! Application state shared across routes

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::game::{Broadcaster, MatchRegistry};
use crate::matchmaking::MatchmakingService;
use crate::store::{MemoryUserStore, SupabaseClient, SupabaseUserStore, UserRecord, UserStore};
use crate::ws::protocol::ServerMsg;
use crate::ws::session::SessionManager;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<SessionManager>,
    pub registry: Arc<MatchRegistry>,
    pub matchmaking: Arc<MatchmakingService>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let users: Arc<dyn UserStore> = match &config.supabase {
            Some(supabase) => {
                info!(url = %supabase.url, "Using REST user store");
                Arc::new(SupabaseUserStore::new(SupabaseClient::new(supabase)))
            }
            None => {
                info!("Using in-memory user store");
                Arc::new(MemoryUserStore::new())
            }
        };
        Self::with_store(config, users)
    }

    pub fn with_store(config: Config, users: Arc<dyn UserStore>) -> Self {
        let config = Arc::new(config);

        let sessions = Arc::new(SessionManager::new());
        let broadcaster = Arc::new(Broadcaster::new(sessions.clone()));
        let registry = Arc::new(MatchRegistry::new(
            config.game.clone(),
            sessions.clone(),
            broadcaster,
            users.clone(),
        ));
        let matchmaking = Arc::new(MatchmakingService::new(
            registry.clone(),
            sessions.clone(),
            users.clone(),
        ));

        Self {
            config,
            users,
            sessions,
            registry,
            matchmaking,
        }
    }

    /// Balance snapshot message for a player
    pub fn user_data(&self, record: &UserRecord) -> ServerMsg {
        ServerMsg::UserData {
            player_id: record.player_id,
            username: record.username.clone(),
            games_balance: record.games_balance,
            winnings: record.winnings,
            debug_mode: self.config.debug_mode,
        }
    }
}
