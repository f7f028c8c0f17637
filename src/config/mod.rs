//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Gameplay and match lifecycle settings
#[derive(Clone, Debug, PartialEq)]
pub struct GameConfig {
    /// Grid width in cells
    pub field_width: i32,
    /// Grid height in cells
    pub field_height: i32,
    /// Fixed body length of every snake
    pub snake_length: usize,
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Snapshot broadcasts per second
    pub broadcast_rate: u32,
    /// Games deducted from each player when a match forms
    pub entry_cost: i64,
    /// Credited to the winner's winnings on a paid win
    pub winner_payout: f64,
    /// Length of the pre-start countdown
    pub countdown_secs: u32,
    /// Countdown starts after this long even without both ready signals
    pub ready_timeout_secs: u64,
    /// How long a finished match is kept before disposal
    pub retention_secs: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            field_width: 30,
            field_height: 30,
            snake_length: 5,
            tick_rate: 10,
            broadcast_rate: 10,
            entry_cost: 1,
            winner_payout: 1.5,
            countdown_secs: 3,
            ready_timeout_secs: 15,
            retention_secs: 5,
        }
    }
}

impl GameConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.tick_rate.max(1) as u64)
    }

    /// Broadcast on every n-th tick
    pub fn broadcast_every(&self) -> u64 {
        (self.tick_rate / self.broadcast_rate.max(1)).max(1) as u64
    }

    /// Both entry fees together
    pub fn pool(&self) -> i64 {
        self.entry_cost * 2
    }
}

/// Connection details for the REST user store
#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    pub url: String,
    /// Service role key (bypasses RLS - server only!)
    pub service_role_key: String,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    pub game: GameConfig,

    /// Games granted to a newly created user record
    pub starting_balance: i64,
    /// Test mode: free top-ups and unsigned identities
    pub debug_mode: bool,
    /// HMAC secret for signed identity tokens
    pub auth_secret: Option<String>,
    /// HMAC secret shared with the deposit verifier
    pub deposit_webhook_secret: Option<String>,

    /// REST user store; in-memory records when absent
    pub supabase: Option<SupabaseConfig>,

    /// Allowed client origins for CORS
    pub client_origin: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // PORT wins over SERVER_ADDR
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let defaults = GameConfig::default();
        let game = GameConfig {
            field_width: parse_var("FIELD_WIDTH", defaults.field_width)?,
            field_height: parse_var("FIELD_HEIGHT", defaults.field_height)?,
            snake_length: parse_var("SNAKE_LENGTH", defaults.snake_length)?,
            tick_rate: parse_var("TICK_RATE", defaults.tick_rate)?,
            broadcast_rate: parse_var("BROADCAST_RATE", defaults.broadcast_rate)?,
            entry_cost: parse_var("ENTRY_COST", defaults.entry_cost)?,
            winner_payout: parse_var("WINNER_PAYOUT", defaults.winner_payout)?,
            countdown_secs: parse_var("COUNTDOWN_SECS", defaults.countdown_secs)?,
            ready_timeout_secs: parse_var("READY_TIMEOUT_SECS", defaults.ready_timeout_secs)?,
            retention_secs: parse_var("RETENTION_SECS", defaults.retention_secs)?,
        };
        validate_game(&game)?;

        let debug_mode = parse_var("DEBUG_MODE", false)?;
        let default_balance = if debug_mode { 100 } else { 0 };

        let auth_secret = optional_var("AUTH_SECRET");
        if auth_secret.is_none() && !debug_mode {
            return Err(ConfigError::NoIdentitySource);
        }

        let supabase = match (optional_var("SUPABASE_URL"), optional_var("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(service_role_key)) => Some(SupabaseConfig {
                url,
                service_role_key,
            }),
            _ => None,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            game,
            starting_balance: parse_var("STARTING_BALANCE", default_balance)?,
            debug_mode,
            auth_secret,
            deposit_webhook_secret: optional_var("DEPOSIT_WEBHOOK_SECRET"),
            supabase,
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),
        })
    }
}

fn optional_var(var: &'static str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match optional_var(var) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(default),
    }
}

fn validate_game(game: &GameConfig) -> Result<(), ConfigError> {
    if game.field_width < 12 {
        return Err(ConfigError::OutOfRange("FIELD_WIDTH"));
    }
    if game.field_height < 12 {
        return Err(ConfigError::OutOfRange("FIELD_HEIGHT"));
    }
    if game.snake_length < 2 || game.snake_length > 6 {
        return Err(ConfigError::OutOfRange("SNAKE_LENGTH"));
    }
    if game.tick_rate == 0 {
        return Err(ConfigError::OutOfRange("TICK_RATE"));
    }
    if game.broadcast_rate == 0 || game.broadcast_rate > game.tick_rate {
        return Err(ConfigError::OutOfRange("BROADCAST_RATE"));
    }
    if game.entry_cost < 0 || game.winner_payout < 0.0 {
        return Err(ConfigError::OutOfRange("ENTRY_COST/WINNER_PAYOUT"));
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for environment variable {var}")]
    Invalid { var: &'static str, value: String },

    #[error("Value out of range: {0}")]
    OutOfRange(&'static str),

    #[error("Set AUTH_SECRET or enable DEBUG_MODE to accept connections")]
    NoIdentitySource,

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rates() {
        let game = GameConfig::default();
        assert_eq!(game.tick_period(), Duration::from_millis(100));
        assert_eq!(game.broadcast_every(), 1);
        assert_eq!(game.pool(), 2);
        assert!(validate_game(&game).is_ok());
    }

    #[test]
    fn test_slower_broadcast_skips_ticks() {
        let game = GameConfig {
            tick_rate: 20,
            broadcast_rate: 10,
            ..GameConfig::default()
        };
        assert_eq!(game.broadcast_every(), 2);
    }

    #[test]
    fn test_rejects_small_field() {
        let game = GameConfig {
            field_width: 8,
            ..GameConfig::default()
        };
        assert!(matches!(
            validate_game(&game),
            Err(ConfigError::OutOfRange("FIELD_WIDTH"))
        ));
    }

    #[test]
    fn test_rejects_broadcast_faster_than_ticks() {
        let game = GameConfig {
            broadcast_rate: 30,
            ..GameConfig::default()
        };
        assert!(validate_game(&game).is_err());
    }
}
