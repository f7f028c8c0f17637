//! WebSocket transport: wire protocol, connection handling and sessions

pub mod handler;
pub mod protocol;
pub mod session;
