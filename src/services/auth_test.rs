use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::config::{AppConfig, ThrottleConfig};
use crate::services::session::{AUTH_USER_ID_KEY, MemorySessionStore, SessionStore};
use crate::services::users::{MemoryUserStore, UserStore};
use crate::state::test_helpers::{self, TestApp};

fn signup_form(username: &str, password1: &str, password2: &str) -> SignupForm {
    SignupForm { username: username.into(), password1: password1.into(), password2: password2.into() }
}

fn signin_form(username: &str, password: &str) -> SigninForm {
    SigninForm { username: username.into(), password: password.into(), next: None }
}

fn validation_errors(result: Result<impl std::fmt::Debug, AuthError>) -> FormErrors {
    match result {
        Err(AuthError::Validation(errors)) => errors,
        other => panic!("expected validation error, got {other:?}"),
    }
}

/// Memory store that can hide existing usernames from lookups (a signup
/// racing another for the same name) or fail to stamp `last_login`.
#[derive(Default)]
struct RacingUserStore {
    inner: MemoryUserStore,
    hide_existing: bool,
    fail_record_login: bool,
}

#[async_trait::async_trait]
impl UserStore for RacingUserStore {
    async fn create_user(&self, username: &str, password_hash: &str) -> Result<User, UserStoreError> {
        self.inner.create_user(username, password_hash).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserStoreError> {
        if self.hide_existing {
            return Ok(None);
        }
        self.inner.find_by_username(username).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserStoreError> {
        self.inner.find_by_id(id).await
    }

    async fn record_login(&self, id: Uuid) -> Result<(), UserStoreError> {
        if self.fail_record_login {
            return Err(UserStoreError::Db(sqlx::Error::PoolTimedOut));
        }
        self.inner.record_login(id).await
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), UserStoreError> {
        self.inner.set_active(id, active).await
    }
}

fn racing_state(users: RacingUserStore) -> (AppState, Arc<RacingUserStore>, Arc<MemorySessionStore>) {
    let users = Arc::new(users);
    let sessions = Arc::new(MemorySessionStore::new());
    let state = AppState::new(users.clone(), sessions.clone(), AppConfig::default());
    (state, users, sessions)
}

// =============================================================================
// signup
// =============================================================================

#[tokio::test]
async fn signup_strips_username_and_creates_user() {
    let TestApp { state, users, .. } = test_helpers::test_app();
    let form = signup_form(" newuser ", " strongpassword123 ", " strongpassword123 ");

    let user = signup(&state, &form).await.unwrap();

    assert_eq!(user.username, "newuser");
    assert_eq!(users.len().await, 1);
    assert!(state.users.find_by_username("newuser").await.unwrap().is_some());
}

#[tokio::test]
async fn signup_keeps_password_whitespace() {
    let TestApp { state, .. } = test_helpers::test_app();
    let user = signup(&state, &signup_form("newuser", " strongpassword123 ", " strongpassword123 "))
        .await
        .unwrap();
    assert!(password::verify_password(" strongpassword123 ", &user.password_hash));
    assert!(!password::verify_password("strongpassword123", &user.password_hash));
}

#[tokio::test]
async fn signup_without_stripping_rejects_padded_username() {
    let config = AppConfig {
        policy: AuthPolicy { strip_username: false, ..AuthPolicy::default() },
        ..AppConfig::default()
    };
    let TestApp { state, users, .. } = test_helpers::test_app_with_config(config);

    let errors = validation_errors(signup(&state, &signup_form(" newuser ", "strongpassword123", "strongpassword123")).await);
    assert_eq!(errors.field("username").len(), 1);
    assert!(users.is_empty().await);
}

#[tokio::test]
async fn signup_mismatched_passwords_creates_nothing() {
    let TestApp { state, users, .. } = test_helpers::test_app();
    let errors = validation_errors(signup(&state, &signup_form("newuser", "strongpassword123", "strongpassword124")).await);
    assert_eq!(errors.field("password2"), [PASSWORD_MISMATCH.to_owned()]);
    assert!(users.is_empty().await);
}

#[tokio::test]
async fn signup_weak_password_creates_nothing() {
    let TestApp { state, users, .. } = test_helpers::test_app();
    let errors = validation_errors(signup(&state, &signup_form("newuser", "123", "123")).await);
    assert!(!errors.field("password2").is_empty());
    assert!(users.is_empty().await);
}

#[tokio::test]
async fn signup_missing_fields_are_required() {
    let TestApp { state, .. } = test_helpers::test_app();
    let errors = validation_errors(signup(&state, &SignupForm::default()).await);
    for field in ["username", "password1", "password2"] {
        assert_eq!(errors.field(field), [REQUIRED.to_owned()], "field {field}");
    }
}

#[tokio::test]
async fn signup_whitespace_only_username_is_required() {
    let TestApp { state, .. } = test_helpers::test_app();
    let errors = validation_errors(signup(&state, &signup_form("   ", "strongpassword123", "strongpassword123")).await);
    assert_eq!(errors.field("username"), [REQUIRED.to_owned()]);
}

#[tokio::test]
async fn signup_duplicate_username_is_rejected() {
    let TestApp { state, users, .. } = test_helpers::test_app();
    create_user(&state, "existinguser", "mypassword").await.unwrap();

    let errors = validation_errors(signup(&state, &signup_form("existinguser", "strongpassword123", "strongpassword123")).await);
    assert_eq!(errors.field("username"), [DUPLICATE_USERNAME.to_owned()]);
    assert_eq!(users.len().await, 1);
}

#[tokio::test]
async fn signup_usernames_are_case_sensitive() {
    let TestApp { state, users, .. } = test_helpers::test_app();
    create_user(&state, "existinguser", "mypassword").await.unwrap();
    signup(&state, &signup_form("ExistingUser", "strongpassword123", "strongpassword123"))
        .await
        .unwrap();
    assert_eq!(users.len().await, 2);
}

// =============================================================================
// signin
// =============================================================================

#[tokio::test]
async fn signin_creates_session_with_user_id() {
    let TestApp { state, sessions, .. } = test_helpers::test_app();
    let user = create_user(&state, "existinguser", "mypassword").await.unwrap();

    let signed_in = signin(&state, &signin_form("existinguser", "mypassword"), None)
        .await
        .unwrap();

    assert_eq!(signed_in.user.id, user.id);
    let record = sessions.load_session(&signed_in.token).await.unwrap().unwrap();
    assert!(record.data.contains_key(AUTH_USER_ID_KEY));
    assert_eq!(record.data.user_id(), Some(user.id));

    let reloaded = state.users.find_by_id(user.id).await.unwrap().unwrap();
    assert!(reloaded.last_login.is_some());
}

#[tokio::test]
async fn signin_session_respects_configured_ttl() {
    let config = AppConfig { session_ttl: Duration::from_secs(120), ..AppConfig::default() };
    let TestApp { state, sessions, .. } = test_helpers::test_app_with_config(config);
    create_user(&state, "existinguser", "mypassword").await.unwrap();

    let signed_in = signin(&state, &signin_form("existinguser", "mypassword"), None)
        .await
        .unwrap();
    let record = sessions.load_session(&signed_in.token).await.unwrap().unwrap();
    let remaining = record.expires_at - time::OffsetDateTime::now_utc();
    assert!(remaining <= time::Duration::seconds(120));
    assert!(remaining > time::Duration::seconds(100));
}

#[tokio::test]
async fn signin_strips_username_but_not_password() {
    let TestApp { state, .. } = test_helpers::test_app();
    create_user(&state, "existinguser", "mypassword").await.unwrap();

    assert!(signin(&state, &signin_form(" existinguser ", "mypassword"), None).await.is_ok());
    assert!(matches!(
        signin(&state, &signin_form("existinguser", " mypassword "), None).await,
        Err(AuthError::InvalidCredentials)
    ));
}

#[tokio::test]
async fn signin_wrong_password_creates_no_session() {
    let TestApp { state, sessions, .. } = test_helpers::test_app();
    create_user(&state, "existinguser", "mypassword").await.unwrap();

    let result = signin(&state, &signin_form("existinguser", "wrongpassword"), None).await;
    assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    assert!(sessions.is_empty().await);
}

#[tokio::test]
async fn signin_unknown_user_creates_no_session() {
    let TestApp { state, sessions, .. } = test_helpers::test_app();
    let result = signin(&state, &signin_form("ghost", "mypassword"), None).await;
    assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    assert!(sessions.is_empty().await);
}

#[tokio::test]
async fn signin_inactive_user_is_rejected() {
    let TestApp { state, sessions, .. } = test_helpers::test_app();
    let user = create_user(&state, "existinguser", "mypassword").await.unwrap();
    state.users.set_active(user.id, false).await.unwrap();

    let result = signin(&state, &signin_form("existinguser", "mypassword"), None).await;
    assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    assert!(sessions.is_empty().await);
}

#[tokio::test]
async fn signin_empty_fields_are_required() {
    let TestApp { state, .. } = test_helpers::test_app();
    let errors = validation_errors(signin(&state, &SigninForm::default(), None).await);
    assert_eq!(errors.field("username"), [REQUIRED.to_owned()]);
    assert_eq!(errors.field("password"), [REQUIRED.to_owned()]);
}

#[tokio::test]
async fn signin_rotates_previous_session() {
    let TestApp { state, sessions, .. } = test_helpers::test_app();
    create_user(&state, "existinguser", "mypassword").await.unwrap();

    let first = signin(&state, &signin_form("existinguser", "mypassword"), None)
        .await
        .unwrap();
    let second = signin(&state, &signin_form("existinguser", "mypassword"), Some(&first.token))
        .await
        .unwrap();

    assert_ne!(first.token, second.token);
    assert!(sessions.load_session(&first.token).await.unwrap().is_none());
    assert!(sessions.load_session(&second.token).await.unwrap().is_some());
    assert_eq!(sessions.len().await, 1);
}

#[tokio::test]
async fn signin_throttles_after_repeated_failures() {
    let config = AppConfig {
        throttle: ThrottleConfig { limit: 2, window: Duration::from_secs(60) },
        ..AppConfig::default()
    };
    let TestApp { state, sessions, .. } = test_helpers::test_app_with_config(config);
    create_user(&state, "existinguser", "mypassword").await.unwrap();

    for _ in 0..2 {
        let result = signin(&state, &signin_form("existinguser", "nope-nope"), None).await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }
    let result = signin(&state, &signin_form("existinguser", "mypassword"), None).await;
    assert!(matches!(result, Err(AuthError::Throttled(_))));
    assert!(sessions.is_empty().await);
}

#[tokio::test]
async fn successful_signin_clears_failures() {
    let config = AppConfig {
        throttle: ThrottleConfig { limit: 2, window: Duration::from_secs(60) },
        ..AppConfig::default()
    };
    let TestApp { state, .. } = test_helpers::test_app_with_config(config);
    create_user(&state, "existinguser", "mypassword").await.unwrap();

    signin(&state, &signin_form("existinguser", "nope-nope"), None).await.unwrap_err();
    signin(&state, &signin_form("existinguser", "mypassword"), None).await.unwrap();
    signin(&state, &signin_form("existinguser", "nope-nope"), None).await.unwrap_err();
    assert!(signin(&state, &signin_form("existinguser", "mypassword"), None).await.is_ok());
}

// =============================================================================
// logout / current_user
// =============================================================================

#[tokio::test]
async fn current_user_follows_session_and_logout() {
    let TestApp { state, .. } = test_helpers::test_app();
    let user = create_user(&state, "existinguser", "mypassword").await.unwrap();
    let signed_in = signin(&state, &signin_form("existinguser", "mypassword"), None)
        .await
        .unwrap();

    let current = current_user(&state, &signed_in.token).await.unwrap().unwrap();
    assert_eq!(current.id, user.id);

    logout(&state, &signed_in.token).await.unwrap();
    assert!(current_user(&state, &signed_in.token).await.unwrap().is_none());
}

#[tokio::test]
async fn current_user_ignores_deactivated_accounts() {
    let TestApp { state, .. } = test_helpers::test_app();
    let user = create_user(&state, "existinguser", "mypassword").await.unwrap();
    let signed_in = signin(&state, &signin_form("existinguser", "mypassword"), None)
        .await
        .unwrap();
    state.users.set_active(user.id, false).await.unwrap();
    assert!(current_user(&state, &signed_in.token).await.unwrap().is_none());
}

#[tokio::test]
async fn current_user_unknown_token_is_none() {
    let TestApp { state, .. } = test_helpers::test_app();
    assert!(current_user(&state, "deadbeef").await.unwrap().is_none());
}

// =============================================================================
// AuthError::form_errors
// =============================================================================

#[test]
fn invalid_credentials_render_as_non_field_error() {
    let errors = AuthError::InvalidCredentials.form_errors().unwrap();
    assert_eq!(errors.non_field(), [INVALID_LOGIN.to_owned()]);
}

#[test]
fn throttled_message_includes_retry_after() {
    let err = AuthError::Throttled(ThrottleError { limit: 5, window_secs: 300, retry_after_secs: 42 });
    let errors = err.form_errors().unwrap();
    assert!(errors.non_field()[0].contains("42 seconds"));
}

#[test]
fn infrastructure_errors_have_no_form_errors() {
    let err = AuthError::Users(UserStoreError::NotFound(Uuid::nil()));
    assert!(err.form_errors().is_none());
}

#[tokio::test]
async fn signup_losing_insert_race_reports_duplicate_username() {
    let (state, users, _) = racing_state(RacingUserStore { hide_existing: true, ..RacingUserStore::default() });
    create_user(&state, "existinguser", "mypassword").await.unwrap();

    let errors = validation_errors(signup(&state, &signup_form("existinguser", "strongpassword123", "strongpassword123")).await);
    assert_eq!(errors.field("username"), [DUPLICATE_USERNAME.to_owned()]);
    assert_eq!(users.inner.len().await, 1);
}

#[tokio::test]
async fn signin_login_stamp_failure_leaves_no_session() {
    let (state, _, sessions) = racing_state(RacingUserStore { fail_record_login: true, ..RacingUserStore::default() });
    create_user(&state, "existinguser", "mypassword").await.unwrap();

    let err = signin(&state, &signin_form("existinguser", "mypassword"), None).await.unwrap_err();
    assert!(matches!(err, AuthError::Users(UserStoreError::Db(_))));
    assert!(err.form_errors().is_none());
    assert!(sessions.is_empty().await);
}
