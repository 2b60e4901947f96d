//! # Auth Errors
//!
//! Every failure the session layer can surface. Raw detail stays in the
//! variant (and in the logs); `user_message` is the only text meant for
//! the visitor.

use thiserror::Error;

/// Result type for auth operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Known OAuth misconfigurations reported by the identity service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderConfigIssue {
    /// The provider is switched off in the identity service
    ProviderNotEnabled,
    /// The provider is enabled but has no client secret configured
    MissingOAuthSecret,
    /// The callback URL is not on the provider's allow-list
    InvalidRedirectUrl,
}

impl std::fmt::Display for ProviderConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderConfigIssue::ProviderNotEnabled => write!(f, "provider_not_enabled"),
            ProviderConfigIssue::MissingOAuthSecret => write!(f, "missing_oauth_secret"),
            ProviderConfigIssue::InvalidRedirectUrl => write!(f, "invalid_redirect_url"),
        }
    }
}

/// Auth errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Identity service unreachable. Retried with backoff during bootstrap.
    #[error("Identity service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Session check exceeded its deadline
    #[error("Session check timed out after {0}ms")]
    Timeout(u64),

    /// OAuth provider misconfigured. Never retried.
    #[error("OAuth provider misconfigured ({issue}): {detail}")]
    ProviderConfig {
        issue: ProviderConfigIssue,
        detail: String,
    },

    /// Wrong email/password, surfaced verbatim
    #[error("{0}")]
    InvalidCredentials(String),

    /// No stored profile row for the identity
    #[error("Profile not found")]
    ProfileNotFound,

    /// OAuth callback never produced a session
    #[error("OAuth callback produced no session after {attempts} attempts")]
    CallbackTimeout { attempts: u32 },

    /// Provider sent the visitor back with an explicit error
    #[error("OAuth provider returned {code}: {description}")]
    OAuthDenied { code: String, description: String },

    /// Any other identity service failure
    #[error("Identity service error: {0}")]
    Service(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Local persisted state could not be read or written
    #[error("Storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            AuthError::Timeout(_) => "TIMEOUT",
            AuthError::ProviderConfig { .. } => "PROVIDER_CONFIG",
            AuthError::InvalidCredentials(_) => "INVALID_CREDENTIALS",
            AuthError::ProfileNotFound => "PROFILE_NOT_FOUND",
            AuthError::CallbackTimeout { .. } => "CALLBACK_TIMEOUT",
            AuthError::OAuthDenied { .. } => "OAUTH_DENIED",
            AuthError::Service(_) => "SERVICE_ERROR",
            AuthError::Validation(_) => "VALIDATION_ERROR",
            AuthError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Whether a retry can plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::ServiceUnavailable(_) | AuthError::Timeout(_))
    }

    /// Text shown to the visitor
    pub fn user_message(&self) -> String {
        match self {
            AuthError::ServiceUnavailable(_) | AuthError::Timeout(_) => {
                "The authentication service is currently unavailable. You can keep browsing signed out and try again later.".to_string()
            }
            AuthError::ProviderConfig { issue, .. } => match issue {
                ProviderConfigIssue::ProviderNotEnabled => {
                    "This sign-in provider is not enabled. Ask an administrator to enable it in the authentication settings.".to_string()
                }
                ProviderConfigIssue::MissingOAuthSecret => {
                    "This sign-in provider is missing its OAuth client secret. Ask an administrator to finish configuring it.".to_string()
                }
                ProviderConfigIssue::InvalidRedirectUrl => {
                    "The sign-in redirect URL is not allowed by the provider. Ask an administrator to add it to the allowed redirect URLs.".to_string()
                }
            },
            AuthError::InvalidCredentials(message) => message.clone(),
            AuthError::ProfileNotFound => "Your profile could not be found.".to_string(),
            AuthError::CallbackTimeout { .. } => {
                "Authentication failed. Please try signing in again.".to_string()
            }
            AuthError::OAuthDenied { code, description } => {
                if description.is_empty() {
                    format!("Sign-in was cancelled ({})", code)
                } else {
                    format!("Sign-in failed: {}", description)
                }
            }
            AuthError::Service(_) => "Something went wrong while signing in. Please try again.".to_string(),
            AuthError::Validation(message) => message.clone(),
            AuthError::Storage(_) => "Local session data could not be saved.".to_string(),
        }
    }
}

impl From<std::io::Error> for AuthError {
    fn from(err: std::io::Error) -> Self {
        AuthError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::Storage(err.to_string())
    }
}
