//! Resilient playlist-generation pipeline over the Spotify Web API.
//!
//! The crate layers a converging recommendation engine on top of a set of
//! reusable resilience primitives: a per-user sliding-window rate limiter, a
//! per-dependency circuit breaker, a retrying executor for transient upstream
//! faults, and a fail-open Redis cache with background writes. Playlists that
//! get published upstream are also recorded in Postgres.
//!
//! [`services::PlaylistService`] is the top-level entry point; wire one up
//! from the environment with [`services::PlaylistService::connect`].

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod resilience;
pub mod services;

pub use config::Config;
pub use error::{AppError, AppResult};

/// Installs the global tracing subscriber, honoring `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
