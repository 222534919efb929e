//! Account routes: signup and signin forms, logout and the session user.

use axum::Form;
use axum::extract::{FromRef, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Json, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::{pages, paths};
use crate::services::auth::{self as auth_svc, AuthError, FormErrors, SigninForm, SignupForm};
use crate::services::users::{self, User};
use crate::state::AppState;

/// The session token presented by the client, if any.
pub(crate) fn session_token<'a>(jar: &'a CookieJar, state: &AppState) -> Option<&'a str> {
    jar.get(&state.config.session_cookie_name)
        .map(Cookie::value)
        .filter(|token| !token.is_empty())
}

fn session_cookie(state: &AppState, token: String) -> Cookie<'static> {
    let max_age = Duration::try_from(state.config.session_ttl).unwrap_or(Duration::MAX);
    Cookie::build((state.config.session_cookie_name.clone(), token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.cookie_secure)
        .max_age(max_age)
        .build()
}

fn cleared_session_cookie(state: &AppState) -> Cookie<'static> {
    Cookie::build((state.config.session_cookie_name.clone(), ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.cookie_secure)
        .max_age(Duration::ZERO)
        .build()
}

/// `302 Found` to `location`.
pub(crate) fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_owned())]).into_response()
}

/// Accept `next` only if it is a path on this site.
pub(crate) fn safe_next(next: Option<&str>) -> Option<&str> {
    let next = next?.trim();
    let local = next.starts_with('/')
        && !next.starts_with("//")
        && !next.contains('\\')
        && !next.chars().any(char::is_control);
    local.then_some(next)
}

/// Map a failed flow onto a response: form errors re-render the page,
/// infrastructure errors become a bare 500.
fn failure_response(err: &AuthError, render: impl FnOnce(&FormErrors) -> String) -> Response {
    let Some(errors) = err.form_errors() else {
        tracing::error!(error = %err, "auth flow failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let page = Html(render(&errors));
    match err {
        AuthError::Throttled(e) => {
            let retry_after = HeaderValue::from(e.retry_after_secs);
            (StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, retry_after)], page).into_response()
        }
        _ => (StatusCode::OK, page).into_response(),
    }
}

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Authenticated user extracted from the session cookie.
/// Use as a handler parameter to require authentication.
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);
        let token = session_token(&jar, &app_state).ok_or(StatusCode::UNAUTHORIZED)?;

        let user = auth_svc::current_user(&app_state, token)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "session lookup failed");
                StatusCode::INTERNAL_SERVER_ERROR
            })?
            .ok_or(StatusCode::UNAUTHORIZED)?;

        Ok(Self { user, token: token.to_owned() })
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `GET /accounts/signup/`: empty signup form.
pub async fn signup_page() -> Html<String> {
    Html(pages::signup_page("", &FormErrors::default()))
}

/// `POST /accounts/signup/`: create the account and redirect, or re-render with errors.
pub async fn signup(State(state): State<AppState>, Form(form): Form<SignupForm>) -> Response {
    match auth_svc::signup(&state, &form).await {
        Ok(_) => found(&state.config.signup_redirect),
        Err(e) => failure_response(&e, |errors| {
            pages::signup_page(&users::normalize_username(&form.username, &state.config.policy), errors)
        }),
    }
}

#[derive(Deserialize)]
pub struct NextQuery {
    next: Option<String>,
}

/// `GET /accounts/signin/`: empty signin form, carrying `?next=` through.
pub async fn signin_page(Query(query): Query<NextQuery>) -> Html<String> {
    Html(pages::signin_page("", safe_next(query.next.as_deref()), &FormErrors::default()))
}

/// `POST /accounts/signin/`: verify credentials, set the session cookie, redirect.
pub async fn signin(State(state): State<AppState>, jar: CookieJar, Form(form): Form<SigninForm>) -> Response {
    let previous = session_token(&jar, &state).map(str::to_owned);
    match auth_svc::signin(&state, &form, previous.as_deref()).await {
        Ok(signed_in) => {
            let target = safe_next(form.next.as_deref()).unwrap_or(&state.config.login_redirect);
            let jar = jar.add(session_cookie(&state, signed_in.token));
            (jar, found(target)).into_response()
        }
        Err(e) => failure_response(&e, |errors| {
            pages::signin_page(
                &users::normalize_username(&form.username, &state.config.policy),
                safe_next(form.next.as_deref()),
                errors,
            )
        }),
    }
}

/// `POST /accounts/logout/`: delete the session, clear the cookie, redirect to signin.
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> Response {
    if let Some(token) = session_token(&jar, &state) {
        if let Err(e) = auth_svc::logout(&state, token).await {
            tracing::error!(error = %e, "session delete failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }
    let jar = jar.add(cleared_session_cookie(&state));
    (jar, found(paths::SIGNIN)).into_response()
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: Uuid,
    pub username: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login: Option<OffsetDateTime>,
}

/// `GET /accounts/me`: return the session user.
pub async fn me(auth: AuthUser) -> Json<MeResponse> {
    Json(MeResponse { id: auth.user.id, username: auth.user.username, last_login: auth.user.last_login })
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
