//! healthdash - session orchestration for a healthcare dashboard
//!
//! Bootstraps the session on load, runs sign-in and sign-out against a
//! remote identity service, reconciles OAuth redirects and picks landing
//! routes by role.

pub mod auth;
pub mod cli;
pub mod config;
pub mod config_validator;
pub mod observability;

pub use auth::{AuthError, AuthResult, SessionStore, User};
pub use config::AuthConfig;
