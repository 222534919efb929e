//! Signup, signin and logout flows.
//!
//! ARCHITECTURE
//! ============
//! Route handlers deserialize forms and translate results into responses;
//! everything that decides *whether* an account or session is created lives
//! here. Flows talk to the injected `UserStore` / `SessionStore` on
//! `AppState` and never persist anything on a failed submission.
//!
//! ERROR HANDLING
//! ==============
//! `AuthError::Validation` and `AuthError::InvalidCredentials` are user
//! errors rendered back into the form. Store and hashing failures are
//! infrastructure errors and surface as 500s.

use std::collections::BTreeMap;

use serde::Deserialize;
use uuid::Uuid;

use super::password::{self, PasswordError};
use super::session::{SessionData, SessionError};
use super::throttle::ThrottleError;
use super::users::{self, User, UserStoreError};
use crate::config::AuthPolicy;
use crate::state::AppState;

/// Key for errors that belong to the form as a whole.
pub const NON_FIELD_ERRORS: &str = "__all__";

const REQUIRED: &str = "This field is required.";
const PASSWORD_MISMATCH: &str = "The two password fields didn't match.";
const DUPLICATE_USERNAME: &str = "A user with that username already exists.";
const INVALID_LOGIN: &str =
    "Please enter a correct username and password. Note that both fields may be case-sensitive.";

// =============================================================================
// FORMS
// =============================================================================

/// `POST` body of the signup route. Missing fields deserialize as empty.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SignupForm {
    pub username: String,
    pub password1: String,
    pub password2: String,
}

/// `POST` body of the signin route.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SigninForm {
    pub username: String,
    pub password: String,
    /// Local path to continue to after signin.
    pub next: Option<String>,
}

/// Field name -> messages, in field-name order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormErrors(BTreeMap<String, Vec<String>>);

impl FormErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_owned()).or_default().push(message.into());
    }

    #[must_use]
    pub fn field(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or_default()
    }

    #[must_use]
    pub fn non_field(&self) -> &[String] {
        self.field(NON_FIELD_ERRORS)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn single(field: &str, message: &str) -> Self {
        let mut errors = Self::default();
        errors.add(field, message);
        errors
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("form validation failed")]
    Validation(FormErrors),
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error(transparent)]
    Throttled(#[from] ThrottleError),
    #[error("user store error: {0}")]
    Users(#[from] UserStoreError),
    #[error("session store error: {0}")]
    Sessions(#[from] SessionError),
    #[error(transparent)]
    Password(#[from] PasswordError),
}

impl AuthError {
    /// Form errors to show the user, or `None` for infrastructure failures.
    #[must_use]
    pub fn form_errors(&self) -> Option<FormErrors> {
        match self {
            Self::Validation(errors) => Some(errors.clone()),
            Self::InvalidCredentials => Some(FormErrors::single(NON_FIELD_ERRORS, INVALID_LOGIN)),
            Self::Throttled(e) => Some(FormErrors::single(
                NON_FIELD_ERRORS,
                &format!("Too many failed attempts. Try again in {} seconds.", e.retry_after_secs),
            )),
            Self::Users(_) | Self::Sessions(_) | Self::Password(_) => None,
        }
    }
}

/// Outcome of a successful signin.
#[derive(Debug)]
pub struct SignedIn {
    pub user: User,
    /// Raw session token for the cookie.
    pub token: String,
}

fn normalize_password(raw: &str, policy: &AuthPolicy) -> String {
    if policy.strip_password { raw.trim().to_owned() } else { raw.to_owned() }
}

// =============================================================================
// FLOWS
// =============================================================================

/// Hash `password` and store a new active user, skipping form validation.
///
/// # Errors
///
/// Returns `Users(DuplicateUsername)` if the name is taken, or an
/// infrastructure error.
pub async fn create_user(state: &AppState, username: &str, password: &str) -> Result<User, AuthError> {
    let hash = password::hash_password_blocking(password.to_owned()).await?;
    Ok(state.users.create_user(username, &hash).await?)
}

/// Validate a signup submission and create the account.
///
/// # Errors
///
/// `Validation` for any field problem (nothing is persisted), or an
/// infrastructure error.
pub async fn signup(state: &AppState, form: &SignupForm) -> Result<User, AuthError> {
    let policy = &state.config.policy;
    let username = users::normalize_username(&form.username, policy);
    let password1 = normalize_password(&form.password1, policy);
    let password2 = normalize_password(&form.password2, policy);

    let mut errors = FormErrors::default();
    if username.is_empty() {
        errors.add("username", REQUIRED);
    } else {
        for problem in users::validate_username(&username) {
            errors.add("username", problem);
        }
    }
    if password1.is_empty() {
        errors.add("password1", REQUIRED);
    }
    if password2.is_empty() {
        errors.add("password2", REQUIRED);
    }
    if !password1.is_empty() && !password2.is_empty() {
        if password1 == password2 {
            for problem in password::validate_password(&password2, &username, policy) {
                errors.add("password2", problem);
            }
        } else {
            errors.add("password2", PASSWORD_MISMATCH);
        }
    }

    if errors.field("username").is_empty() && state.users.find_by_username(&username).await?.is_some() {
        errors.add("username", DUPLICATE_USERNAME);
    }
    if !errors.is_empty() {
        return Err(AuthError::Validation(errors));
    }

    let user = match create_user(state, &username, &password1).await {
        Ok(user) => user,
        Err(AuthError::Users(UserStoreError::DuplicateUsername(_))) => {
            return Err(AuthError::Validation(FormErrors::single("username", DUPLICATE_USERNAME)));
        }
        Err(e) => return Err(e),
    };

    tracing::info!(user_id = %user.id, username = %user.username, "user signed up");
    Ok(user)
}

/// Verify credentials and open a fresh session.
///
/// Any session the client already presented (`previous_token`) is deleted so
/// the token always rotates on signin.
///
/// # Errors
///
/// `Validation` for empty fields, `Throttled` when the username has too many
/// recent failures, `InvalidCredentials` for unknown users, wrong passwords
/// and inactive accounts, or an infrastructure error.
pub async fn signin(state: &AppState, form: &SigninForm, previous_token: Option<&str>) -> Result<SignedIn, AuthError> {
    let policy = &state.config.policy;
    let username = users::normalize_username(&form.username, policy);
    let password = normalize_password(&form.password, policy);

    let mut errors = FormErrors::default();
    if username.is_empty() {
        errors.add("username", REQUIRED);
    }
    if password.is_empty() {
        errors.add("password", REQUIRED);
    }
    if !errors.is_empty() {
        return Err(AuthError::Validation(errors));
    }

    state.throttle.check(&username)?;

    let candidate = state.users.find_by_username(&username).await?;
    let verified = match &candidate {
        Some(user) => password::verify_password_blocking(password, user.password_hash.clone()).await?,
        None => {
            // Equalise timing with the known-user path.
            password::hash_password_blocking(password).await?;
            false
        }
    };

    let user = match candidate {
        Some(user) if verified && user.is_active => user,
        _ => {
            state.throttle.record_failure(&username);
            tracing::warn!(%username, "signin rejected");
            return Err(AuthError::InvalidCredentials);
        }
    };
    state.throttle.clear(&username);

    // Stamp the login first so a store failure leaves no orphaned session.
    state.users.record_login(user.id).await?;
    if let Some(previous) = previous_token {
        state.sessions.delete_session(previous).await?;
    }
    let token = state
        .sessions
        .create_session(&SessionData::for_user(user.id), state.config.session_ttl)
        .await?;

    tracing::info!(user_id = %user.id, username = %user.username, "user signed in");
    Ok(SignedIn { user, token })
}

/// Delete the session behind `token`. Unknown tokens are ignored.
///
/// # Errors
///
/// Returns an error if the session store fails.
pub async fn logout(state: &AppState, token: &str) -> Result<(), AuthError> {
    state.sessions.delete_session(token).await?;
    Ok(())
}

/// Resolve a session token to its active user.
///
/// # Errors
///
/// Returns an error if either store fails.
pub async fn current_user(state: &AppState, token: &str) -> Result<Option<User>, AuthError> {
    let Some(record) = state.sessions.load_session(token).await? else {
        return Ok(None);
    };
    let Some(user_id) = record.data.user_id() else {
        return Ok(None);
    };
    Ok(active_user(state, user_id).await?)
}

async fn active_user(state: &AppState, user_id: Uuid) -> Result<Option<User>, UserStoreError> {
    Ok(state
        .users
        .find_by_id(user_id)
        .await?
        .filter(|user| user.is_active))
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
