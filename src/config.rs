//! Service configuration parsed from environment variables.
//!
//! DESIGN
//! ======
//! `AppConfig::from_env` reads the process environment (after `dotenvy` has
//! loaded any `.env` file). Parsing goes through `from_lookup` so tests can
//! feed a plain map instead of mutating process-wide env vars.

use std::time::Duration;

use crate::routes::paths;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_SESSION_COOKIE_NAME: &str = "sessionid";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60 * 24 * 14;
pub const DEFAULT_PASSWORD_MIN_LENGTH: usize = 8;
pub const DEFAULT_SIGNIN_THROTTLE_LIMIT: usize = 5;
pub const DEFAULT_SIGNIN_THROTTLE_WINDOW_SECS: u64 = 300;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Input normalisation and password strength rules applied by the auth flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPolicy {
    /// Strip surrounding whitespace from submitted usernames.
    pub strip_username: bool,
    /// Strip surrounding whitespace from submitted passwords.
    pub strip_password: bool,
    pub password_min_length: usize,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self { strip_username: true, strip_password: false, password_min_length: DEFAULT_PASSWORD_MIN_LENGTH }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    pub limit: usize,
    pub window: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self { limit: DEFAULT_SIGNIN_THROTTLE_LIMIT, window: Duration::from_secs(DEFAULT_SIGNIN_THROTTLE_WINDOW_SECS) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    /// Postgres URL. `None` runs the service on in-memory stores.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub session_cookie_name: String,
    pub session_ttl: Duration,
    pub cookie_secure: bool,
    /// Where a successful signup redirects.
    pub signup_redirect: String,
    /// Where a successful signin redirects when no safe `next` was given.
    pub login_redirect: String,
    pub policy: AuthPolicy,
    pub throttle: ThrottleConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            session_cookie_name: DEFAULT_SESSION_COOKIE_NAME.to_owned(),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            cookie_secure: false,
            signup_redirect: paths::SIGNIN.to_owned(),
            login_redirect: "/".to_owned(),
            policy: AuthPolicy::default(),
            throttle: ThrottleConfig::default(),
        }
    }
}

impl AppConfig {
    /// Build typed config from the process environment.
    ///
    /// Optional:
    /// - `PORT`: default 3000
    /// - `DATABASE_URL`: in-memory stores when absent
    /// - `DB_MAX_CONNECTIONS`: default 5
    /// - `SESSION_COOKIE_NAME`: default `sessionid`
    /// - `SESSION_TTL_SECS`: default two weeks
    /// - `COOKIE_SECURE`: default false
    /// - `SIGNUP_REDIRECT_URL`: default the signin route
    /// - `LOGIN_REDIRECT_URL`: default `/`
    /// - `USERNAME_STRIP` / `PASSWORD_STRIP`: default true / false
    /// - `PASSWORD_MIN_LENGTH`: default 8
    /// - `SIGNIN_THROTTLE_LIMIT` / `SIGNIN_THROTTLE_WINDOW_SECS`: default 5 / 300
    ///
    /// # Errors
    ///
    /// Returns an error if a set variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build typed config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a present value cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = Lookup(&lookup);

        let database_url = env.string("DATABASE_URL").filter(|v| !v.trim().is_empty());
        let session_cookie_name = env
            .string("SESSION_COOKIE_NAME")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.session_cookie_name);

        let policy = AuthPolicy {
            strip_username: env.boolean("USERNAME_STRIP")?.unwrap_or(defaults.policy.strip_username),
            strip_password: env.boolean("PASSWORD_STRIP")?.unwrap_or(defaults.policy.strip_password),
            password_min_length: env
                .parse("PASSWORD_MIN_LENGTH")?
                .unwrap_or(defaults.policy.password_min_length),
        };
        let throttle = ThrottleConfig {
            limit: env.parse("SIGNIN_THROTTLE_LIMIT")?.unwrap_or(defaults.throttle.limit),
            window: env
                .parse("SIGNIN_THROTTLE_WINDOW_SECS")?
                .map_or(defaults.throttle.window, Duration::from_secs),
        };

        Ok(Self {
            port: env.parse("PORT")?.unwrap_or(defaults.port),
            database_url,
            db_max_connections: env.parse("DB_MAX_CONNECTIONS")?.unwrap_or(defaults.db_max_connections),
            session_cookie_name,
            session_ttl: env
                .parse("SESSION_TTL_SECS")?
                .map_or(defaults.session_ttl, Duration::from_secs),
            cookie_secure: env.boolean("COOKIE_SECURE")?.unwrap_or(defaults.cookie_secure),
            signup_redirect: env.string("SIGNUP_REDIRECT_URL").unwrap_or(defaults.signup_redirect),
            login_redirect: env.string("LOGIN_REDIRECT_URL").unwrap_or(defaults.login_redirect),
            policy,
            throttle,
        })
    }
}

struct Lookup<'a, F>(&'a F);

impl<F> Lookup<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        match self.string(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| ConfigError::Invalid { key, value: raw }),
        }
    }

    fn boolean(&self, key: &'static str) -> Result<Option<bool>, ConfigError> {
        match self.string(key) {
            None => Ok(None),
            Some(raw) => parse_bool(&raw).map(Some).ok_or(ConfigError::Invalid { key, value: raw }),
        }
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
