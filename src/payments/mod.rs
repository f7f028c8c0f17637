//! Payment integration: verified deposits credit games

pub mod deposit;

pub use deposit::deposit_webhook_handler;
