//! User records and the stores that persist them.
//!
//! ARCHITECTURE
//! ============
//! Handlers and flows only see the `UserStore` trait. `PgUserStore` backs it
//! with the `users` table; `MemoryUserStore` keeps everything in a map for
//! tests and for running without `DATABASE_URL`. Both enforce username
//! uniqueness at insert time, so concurrent signups for the same name
//! resolve to exactly one winner.

use std::collections::HashMap;

use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::AuthPolicy;

pub const USERNAME_MAX_LEN: usize = 150;

/// Punctuation allowed in usernames besides letters and digits.
const USERNAME_EXTRA_CHARS: &[char] = &['@', '.', '+', '-', '_'];

/// A stored account. Mirrors the `users` table.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip)]
    pub password_hash: String,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub date_joined: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login: Option<OffsetDateTime>,
}

#[derive(Debug, thiserror::Error)]
pub enum UserStoreError {
    #[error("username already taken: {0}")]
    DuplicateUsername(String),
    #[error("user not found: {0}")]
    NotFound(Uuid),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Persistence capability for user accounts.
#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new active user. Fails with `DuplicateUsername` if the exact
    /// username already exists.
    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User, UserStoreError>;

    /// Case-sensitive lookup by username.
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserStoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserStoreError>;

    /// Stamp `last_login` with the current time.
    async fn record_login(&self, id: Uuid) -> Result<(), UserStoreError>;

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), UserStoreError>;
}

// =============================================================================
// USERNAME RULES
// =============================================================================

/// Apply the policy's whitespace handling to a submitted username.
#[must_use]
pub fn normalize_username(raw: &str, policy: &AuthPolicy) -> String {
    if policy.strip_username { raw.trim().to_owned() } else { raw.to_owned() }
}

/// Format problems with an already-normalised, non-empty username.
#[must_use]
pub fn validate_username(username: &str) -> Vec<String> {
    let mut problems = Vec::new();
    if username.chars().count() > USERNAME_MAX_LEN {
        problems.push(format!("Ensure this value has at most {USERNAME_MAX_LEN} characters."));
    }
    if !username
        .chars()
        .all(|c| c.is_alphanumeric() || USERNAME_EXTRA_CHARS.contains(&c))
    {
        problems.push(
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters."
                .to_owned(),
        );
    }
    problems
}

// =============================================================================
// POSTGRES STORE
// =============================================================================

const USER_COLUMNS: &str = "id, username, password_hash, is_active, date_joined, last_login";

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        password_hash: row.get("password_hash"),
        is_active: row.get("is_active"),
        date_joined: row.get("date_joined"),
        last_login: row.get("last_login"),
    }
}

#[async_trait::async_trait]
impl UserStore for PgUserStore {
    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User, UserStoreError> {
        let row = sqlx::query(&format!(
            r"INSERT INTO users (username, password_hash)
              VALUES ($1, $2)
              ON CONFLICT (username) DO NOTHING
              RETURNING {USER_COLUMNS}"
        ))
        .bind(username)
        .bind(password_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(user_from_row)
            .ok_or_else(|| UserStoreError::DuplicateUsername(username.to_owned()))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserStoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1"))
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserStoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn record_login(&self, id: Uuid) -> Result<(), UserStoreError> {
        let result = sqlx::query("UPDATE users SET last_login = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(UserStoreError::NotFound(id));
        }
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), UserStoreError> {
        let result = sqlx::query("UPDATE users SET is_active = $2 WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(UserStoreError::NotFound(id));
        }
        Ok(())
    }
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// Map-backed store keyed by username. Uniqueness is checked under the write lock.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<String, User>>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }

    async fn update<F>(&self, id: Uuid, apply: F) -> Result<(), UserStoreError>
    where
        F: FnOnce(&mut User) + Send,
    {
        let mut users = self.users.write().await;
        let user = users
            .values_mut()
            .find(|u| u.id == id)
            .ok_or(UserStoreError::NotFound(id))?;
        apply(user);
        Ok(())
    }
}

#[async_trait::async_trait]
impl UserStore for MemoryUserStore {
    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User, UserStoreError> {
        let mut users = self.users.write().await;
        if users.contains_key(username) {
            return Err(UserStoreError::DuplicateUsername(username.to_owned()));
        }
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_owned(),
            password_hash: password_hash.to_owned(),
            is_active: true,
            date_joined: OffsetDateTime::now_utc(),
            last_login: None,
        };
        users.insert(username.to_owned(), user.clone());
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserStoreError> {
        Ok(self.users.read().await.get(username).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserStoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.id == id)
            .cloned())
    }

    async fn record_login(&self, id: Uuid) -> Result<(), UserStoreError> {
        self.update(id, |u| u.last_login = Some(OffsetDateTime::now_utc()))
            .await
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), UserStoreError> {
        self.update(id, |u| u.is_active = active).await
    }
}

#[cfg(test)]
#[path = "users_test.rs"]
mod tests;
