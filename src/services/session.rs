//! Server-side sessions keyed by an opaque cookie token.
//!
//! ARCHITECTURE
//! ============
//! The client holds a random 32-byte hex token. Stores only ever see its
//! SHA-256 digest, so a leaked sessions table cannot be replayed as cookies.
//! Session payload is a string-keyed JSON map; signin writes the user id
//! under [`AUTH_USER_ID_KEY`].
//!
//! TRADE-OFFS
//! ==========
//! Expired rows are filtered on read and swept by a periodic task rather
//! than deleted eagerly, so a token stays unusable even if the sweep lags.

use std::collections::HashMap;
use std::fmt::Write;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::throttle::SigninThrottle;

/// Session key under which the authenticated user's id is stored.
pub const AUTH_USER_ID_KEY: &str = "_auth_user_id";

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a cryptographically random 32-byte hex token.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// SHA-256 digest of a token, hex-encoded. This is what stores persist.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    bytes_to_hex(&hasher.finalize())
}

// =============================================================================
// SESSION DATA
// =============================================================================

/// String-keyed session payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionData(HashMap<String, serde_json::Value>);

impl SessionData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload for a freshly authenticated user.
    #[must_use]
    pub fn for_user(user_id: Uuid) -> Self {
        let mut data = Self::new();
        data.insert(AUTH_USER_ID_KEY, serde_json::Value::String(user_id.to_string()));
        data
    }

    pub fn insert(&mut self, key: &str, value: serde_json::Value) {
        self.0.insert(key.to_owned(), value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// The authenticated user id, if the payload carries a well-formed one.
    #[must_use]
    pub fn user_id(&self) -> Option<Uuid> {
        self.get(AUTH_USER_ID_KEY)
            .and_then(serde_json::Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

/// A live session as loaded from a store.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub data: SessionData,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Persistence capability for sessions. All methods take the raw token and
/// hash it internally.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Store `data` under a new token valid for `ttl`, returning the token.
    async fn create_session(&self, data: &SessionData, ttl: Duration) -> Result<String, SessionError>;

    /// Load an unexpired session.
    async fn load_session(&self, token: &str) -> Result<Option<SessionRecord>, SessionError>;

    /// Delete a session. Unknown tokens are not an error.
    async fn delete_session(&self, token: &str) -> Result<(), SessionError>;

    /// Remove expired sessions, returning how many were dropped.
    async fn purge_expired(&self) -> Result<u64, SessionError>;
}

// =============================================================================
// POSTGRES STORE
// =============================================================================

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SessionStore for PgSessionStore {
    async fn create_session(&self, data: &SessionData, ttl: Duration) -> Result<String, SessionError> {
        let token = generate_token();
        sqlx::query("INSERT INTO sessions (token_hash, data, expires_at) VALUES ($1, $2, $3)")
            .bind(hash_token(&token))
            .bind(Json(data))
            .bind(OffsetDateTime::now_utc() + ttl)
            .execute(&self.pool)
            .await?;
        Ok(token)
    }

    async fn load_session(&self, token: &str) -> Result<Option<SessionRecord>, SessionError> {
        let row = sqlx::query("SELECT data, expires_at FROM sessions WHERE token_hash = $1 AND expires_at > now()")
            .bind(hash_token(token))
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| {
            let Json(data): Json<SessionData> = r.get("data");
            SessionRecord { data, expires_at: r.get("expires_at") }
        }))
    }

    async fn delete_session(&self, token: &str) -> Result<(), SessionError> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
            .bind(hash_token(token))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, SessionError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions, expired ones included.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, data: &SessionData, ttl: Duration) -> Result<String, SessionError> {
        let token = generate_token();
        let record = SessionRecord { data: data.clone(), expires_at: OffsetDateTime::now_utc() + ttl };
        self.sessions.write().await.insert(hash_token(&token), record);
        Ok(token)
    }

    async fn load_session(&self, token: &str) -> Result<Option<SessionRecord>, SessionError> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .sessions
            .read()
            .await
            .get(&hash_token(token))
            .filter(|record| record.expires_at > now)
            .cloned())
    }

    async fn delete_session(&self, token: &str) -> Result<(), SessionError> {
        self.sessions.write().await.remove(&hash_token(token));
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, SessionError> {
        let now = OffsetDateTime::now_utc();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, record| record.expires_at > now);
        Ok((before - sessions.len()) as u64)
    }
}

// =============================================================================
// SWEEPER
// =============================================================================

/// Spawn the periodic sweep of expired sessions and drained signin-throttle
/// keys. Returns a handle for shutdown.
pub fn spawn_session_sweeper(store: std::sync::Arc<dyn SessionStore>, throttle: SigninThrottle) -> JoinHandle<()> {
    tracing::info!(interval_secs = DEFAULT_SWEEP_INTERVAL.as_secs(), "session sweeper configured");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(DEFAULT_SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "expired sessions purged"),
                Err(e) => tracing::warn!(error = %e, "session sweep failed"),
            }
            let dropped = throttle.purge_expired();
            if dropped > 0 {
                tracing::debug!(dropped, "stale signin throttle keys dropped");
            }
        }
    })
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
