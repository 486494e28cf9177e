//! Read-mostly HTTP status server for a running orchestrator.
//!
//! Lets operators inspect tracked entities and cycle history, feed observed
//! metrics and trigger a cycle by hand. See [`routes`] for the endpoints.

pub mod routes;

pub use routes::{app_router, AppState};
