//! Game simulation, match lifecycle and the tick loop

pub mod broadcast;
pub mod engine;
pub mod r#match;
pub mod registry;
pub mod scheduler;
pub mod snapshot;

pub use broadcast::Broadcaster;
pub use registry::MatchRegistry;
pub use scheduler::TickScheduler;

/// Player identity as issued by the identity provider
pub type PlayerId = i64;
