//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the user and session stores behind trait objects, so the same
//! router runs on Postgres in production and on in-memory stores in tests
//! or when no `DATABASE_URL` is configured.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::AppConfig;
use crate::services::session::{MemorySessionStore, PgSessionStore, SessionStore};
use crate::services::throttle::SigninThrottle;
use crate::services::users::{MemoryUserStore, PgUserStore, UserStore};

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub config: Arc<AppConfig>,
    /// Per-username failed-signin counters.
    pub throttle: SigninThrottle,
}

impl AppState {
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>, sessions: Arc<dyn SessionStore>, config: AppConfig) -> Self {
        let throttle = SigninThrottle::new(config.throttle);
        Self { users, sessions, config: Arc::new(config), throttle }
    }

    /// State backed by the `users` and `sessions` tables.
    #[must_use]
    pub fn postgres(pool: PgPool, config: AppConfig) -> Self {
        Self::new(Arc::new(PgUserStore::new(pool.clone())), Arc::new(PgSessionStore::new(pool)), config)
    }

    /// State backed by process memory. Nothing survives a restart.
    #[must_use]
    pub fn in_memory(config: AppConfig) -> Self {
        Self::new(Arc::new(MemoryUserStore::new()), Arc::new(MemorySessionStore::new()), config)
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
