//! Password hashing and strength validation.
//!
//! Hashes are Argon2id PHC strings (`$argon2id$v=19$...`) so parameters and
//! salt travel with the credential. Hashing is CPU-bound; async callers go
//! through [`hash_password_blocking`] / [`verify_password_blocking`].

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};

use crate::config::AuthPolicy;

/// Passwords rejected regardless of length. Compared case-insensitively.
const COMMON_PASSWORDS: &[&str] = &[
    "123456", "12345678", "123456789", "1234567890", "password", "password1", "password123", "qwerty",
    "qwerty123", "qwertyuiop", "abc123", "abcdef", "iloveyou", "letmein", "welcome", "welcome1", "monkey",
    "dragon", "football", "baseball", "sunshine", "princess", "trustno1", "passw0rd", "admin", "admin123",
    "changeme", "master", "shadow", "superman", "111111", "000000", "1q2w3e4r", "zaq12wsx", "mypassword",
];

/// Minimum username length before the similarity rule applies.
const SIMILARITY_MIN_USERNAME_LEN: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("hashing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Hash a plaintext password into an Argon2id PHC string.
///
/// # Errors
///
/// Returns an error if the hasher rejects its inputs.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Check a plaintext password against a stored PHC string.
///
/// A malformed stored hash verifies as `false` rather than erroring.
#[must_use]
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        tracing::warn!("stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// [`hash_password`] on the blocking pool.
pub async fn hash_password_blocking(password: String) -> Result<String, PasswordError> {
    tokio::task::spawn_blocking(move || hash_password(&password)).await?
}

/// [`verify_password`] on the blocking pool.
pub async fn verify_password_blocking(password: String, stored_hash: String) -> Result<bool, PasswordError> {
    Ok(tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash)).await?)
}

/// Run every strength rule and return the messages for the ones that fail.
/// An empty vector means the password is acceptable.
#[must_use]
pub fn validate_password(password: &str, username: &str, policy: &AuthPolicy) -> Vec<String> {
    let mut problems = Vec::new();

    if password.chars().count() < policy.password_min_length {
        problems.push(format!(
            "This password is too short. It must contain at least {} characters.",
            policy.password_min_length
        ));
    }
    if is_too_similar(password, username) {
        problems.push("The password is too similar to the username.".to_owned());
    }
    if is_common(password) {
        problems.push("This password is too common.".to_owned());
    }
    if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
        problems.push("This password is entirely numeric.".to_owned());
    }

    problems
}

fn is_common(password: &str) -> bool {
    let lowered = password.trim().to_lowercase();
    COMMON_PASSWORDS.iter().any(|common| *common == lowered)
}

fn is_too_similar(password: &str, username: &str) -> bool {
    let username = username.trim().to_lowercase();
    if username.chars().count() < SIMILARITY_MIN_USERNAME_LEN {
        return false;
    }
    let password = password.trim().to_lowercase();
    if password.is_empty() {
        return false;
    }
    password.contains(&username) || username.contains(&password)
}

#[cfg(test)]
#[path = "password_test.rs"]
mod tests;
