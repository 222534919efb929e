//! Domain services used by the HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own account rules and persistence so route handlers can
//! stay focused on form decoding, cookies and redirects.

pub mod auth;
pub mod password;
pub mod session;
pub mod throttle;
pub mod users;
