//! Matchmaking: the waiting queue and pairing

pub mod queue;
pub mod service;

pub use service::{MatchRequest, MatchmakingService};
