//! User record store: balances and winnings owned outside the game core

pub mod supabase;
pub mod users;

pub use supabase::{SupabaseClient, SupabaseUserStore};
pub use users::{MemoryUserStore, UserRecord, UserStore};

use crate::game::PlayerId;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("User {0} not found")]
    NotFound(PlayerId),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(reqwest::Error),

    #[error("No row returned")]
    NoRowReturned,

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
