//! HTTP surface: routes and identity verification

pub mod middleware;
pub mod routes;

pub use routes::build_router;
