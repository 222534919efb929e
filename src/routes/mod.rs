//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the account routes under `/accounts/` plus a landing
//! page and health check into a single Axum router. Route paths are named
//! in [`paths`] and resolvable by name through [`reverse`].

pub mod auth;
pub mod pages;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum_extra::extract::cookie::CookieJar;
use tower_http::trace::TraceLayer;

use crate::services::auth as auth_svc;
use crate::state::AppState;

/// Route paths.
pub mod paths {
    pub const HOME: &str = "/";
    pub const SIGNUP: &str = "/accounts/signup/";
    pub const SIGNIN: &str = "/accounts/signin/";
    pub const LOGOUT: &str = "/accounts/logout/";
    pub const ME: &str = "/accounts/me";
    pub const HEALTHZ: &str = "/healthz";
}

/// Resolve a route name to its path.
#[must_use]
pub fn reverse(name: &str) -> Option<&'static str> {
    match name {
        "home" => Some(paths::HOME),
        "signup" => Some(paths::SIGNUP),
        "signin" => Some(paths::SIGNIN),
        "logout" => Some(paths::LOGOUT),
        "me" => Some(paths::ME),
        "healthz" => Some(paths::HEALTHZ),
        _ => None,
    }
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route(paths::HOME, get(home))
        .route(paths::SIGNUP, get(auth::signup_page).post(auth::signup))
        .route(paths::SIGNIN, get(auth::signin_page).post(auth::signin))
        .route(paths::LOGOUT, post(auth::logout))
        .route(paths::ME, get(auth::me))
        .route(paths::HEALTHZ, get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /`: landing page.
async fn home(State(state): State<AppState>, jar: CookieJar) -> Response {
    let user = match auth::session_token(&jar, &state) {
        Some(token) => match auth_svc::current_user(&state, token).await {
            Ok(user) => user,
            Err(e) => {
                tracing::error!(error = %e, "session lookup failed");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        },
        None => None,
    };
    Html(pages::home_page(user.as_ref())).into_response()
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
