//! # Identity Service Contract
//!
//! What the session layer consumes from the remote identity backend.
//! The backend's own storage and consistency are not our concern; only
//! this surface is.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::errors::AuthResult;
use super::oauth::{AuthProvider, OAuthRedirect};
use super::user::Role;

// ==================
// Records
// ==================

/// Raw identity as issued by the identity service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    pub email: String,
    /// Provider-managed metadata (`provider`, `providers`)
    #[serde(default)]
    pub app_metadata: serde_json::Value,
    /// Metadata supplied at sign-up or by the OAuth provider
    /// (`full_name`, `name`, `role`, `avatar_url`, `picture`)
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

impl IdentityRecord {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            app_metadata: serde_json::json!({}),
            user_metadata: serde_json::json!({}),
        }
    }

    pub fn with_app_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.app_metadata = metadata;
        self
    }

    pub fn with_user_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.user_metadata = metadata;
        self
    }
}

/// Stored profile row keyed by identity id
///
/// Fields are raw strings: rows are written by other tools and may hold
/// values this layer does not recognize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

/// An authenticated session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub identity: IdentityRecord,
    pub expires_at: DateTime<Utc>,
}

/// Metadata attached to a new account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignUpMetadata {
    pub name: String,
    pub role: Role,
}

/// Result of a sign-up request
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpResponse {
    pub identity: IdentityRecord,
    /// Absent when the address must be confirmed before signing in
    pub session: Option<Session>,
}

impl SignUpResponse {
    pub fn confirmation_required(&self) -> bool {
        self.session.is_none()
    }
}

/// Auth state transitions pushed by the identity service
#[derive(Debug, Clone, PartialEq)]
pub enum AuthChangeEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
    UserUpdated(IdentityRecord),
}

impl AuthChangeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuthChangeEvent::SignedIn(_) => "SIGNED_IN",
            AuthChangeEvent::SignedOut => "SIGNED_OUT",
            AuthChangeEvent::TokenRefreshed(_) => "TOKEN_REFRESHED",
            AuthChangeEvent::UserUpdated(_) => "USER_UPDATED",
        }
    }
}

// ==================
// Service Trait
// ==================

/// Remote identity service
///
/// Every call is a suspension point. Failures carry the service's own
/// message; callers classify them.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Current session, if any
    async fn get_current_session(&self) -> AuthResult<Option<Session>>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Session>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> AuthResult<SignUpResponse>;

    /// Request a provider redirect. Does not produce a session.
    async fn sign_in_with_oauth(
        &self,
        provider: AuthProvider,
        redirect_to: &str,
    ) -> AuthResult<OAuthRedirect>;

    /// Exchange an authorization code from a callback for a session
    async fn exchange_code_for_session(&self, code: &str) -> AuthResult<Session>;

    async fn sign_out(&self) -> AuthResult<()>;

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> AuthResult<()>;

    /// Cheap reachability probe
    async fn check_connectivity(&self) -> AuthResult<()>;

    /// Stored profile row; `AuthError::ProfileNotFound` when none exists
    async fn fetch_profile(&self, id: &str) -> AuthResult<StoredProfile>;

    /// Subscribe to auth state changes. Dropping the receiver unsubscribes.
    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthChangeEvent>;
}
