//! # OAuth Provider Support
//!
//! Sign-in providers, callback URL construction and classification of
//! OAuth failures reported by the identity service.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::OnceLock;

use super::errors::{AuthError, ProviderConfigIssue};

// ==================
// Providers
// ==================

/// Ways a visitor can authenticate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Email,
    Google,
    Facebook,
    Twitter,
    GitHub,
    Azure,
    Discord,
    GitLab,
}

impl AuthProvider {
    /// Every provider, email first
    pub const ALL: [AuthProvider; 8] = [
        AuthProvider::Email,
        AuthProvider::Google,
        AuthProvider::Facebook,
        AuthProvider::Twitter,
        AuthProvider::GitHub,
        AuthProvider::Azure,
        AuthProvider::Discord,
        AuthProvider::GitLab,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthProvider::Email => "email",
            AuthProvider::Google => "google",
            AuthProvider::Facebook => "facebook",
            AuthProvider::Twitter => "twitter",
            AuthProvider::GitHub => "github",
            AuthProvider::Azure => "azure",
            AuthProvider::Discord => "discord",
            AuthProvider::GitLab => "gitlab",
        }
    }

    /// Human-readable name for notices
    pub fn display_name(&self) -> &'static str {
        match self {
            AuthProvider::Email => "Email",
            AuthProvider::Google => "Google",
            AuthProvider::Facebook => "Facebook",
            AuthProvider::Twitter => "Twitter",
            AuthProvider::GitHub => "GitHub",
            AuthProvider::Azure => "Microsoft",
            AuthProvider::Discord => "Discord",
            AuthProvider::GitLab => "GitLab",
        }
    }

    /// Whether sign-in goes through an OAuth redirect
    pub fn is_social(&self) -> bool {
        !matches!(self, AuthProvider::Email)
    }
}

impl std::fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuthProvider {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        AuthProvider::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| AuthError::Validation(format!("Unknown auth provider: {}", s)))
    }
}

// ==================
// Redirects
// ==================

/// Redirect issued by the identity service for an OAuth sign-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthRedirect {
    pub provider: AuthProvider,
    /// Provider authorization URL the browser must visit
    pub url: String,
    /// Where the provider sends the visitor back to
    pub redirect_to: String,
}

/// Build the absolute callback URL for a provider from the site origin
pub fn callback_url(origin: &str, callback_path: &str, provider: AuthProvider) -> String {
    let path = if callback_path.starts_with('/') {
        callback_path.to_string()
    } else {
        format!("/{}", callback_path)
    };
    format!(
        "{}{}?provider={}",
        origin.trim_end_matches('/'),
        path,
        urlencoding::encode(provider.as_str())
    )
}

// ==================
// Failure Classification
// ==================

const CONFIG_ISSUE_PATTERNS: [(ProviderConfigIssue, &str); 3] = [
    (
        ProviderConfigIssue::ProviderNotEnabled,
        r"(?i)provider\s+is\s+not\s+enabled|unsupported\s+provider|provider\s+(is\s+)?disabled",
    ),
    (
        ProviderConfigIssue::MissingOAuthSecret,
        r"(?i)missing\s+oauth\s+(client\s+)?secret|client[_\s]secret",
    ),
    (
        ProviderConfigIssue::InvalidRedirectUrl,
        r"(?i)redirect[_\s]?(uri|url)|redirect\s+.*not\s+allowed",
    ),
];

fn config_issue_patterns() -> &'static [(ProviderConfigIssue, Regex)] {
    static PATTERNS: OnceLock<Vec<(ProviderConfigIssue, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        CONFIG_ISSUE_PATTERNS
            .iter()
            .filter_map(|(issue, pattern)| Regex::new(pattern).ok().map(|re| (*issue, re)))
            .collect()
    })
}

/// Match an identity service message against the known misconfigurations
pub fn match_config_issue(message: &str) -> Option<ProviderConfigIssue> {
    config_issue_patterns()
        .iter()
        .find(|(_, re)| re.is_match(message))
        .map(|(issue, _)| *issue)
}

/// Turn a failed OAuth request into a typed error
///
/// Known misconfigurations become `ProviderConfig`; anything else is a
/// generic service error.
pub fn classify_oauth_error(provider: AuthProvider, message: &str) -> AuthError {
    match match_config_issue(message) {
        Some(issue) => AuthError::ProviderConfig {
            issue,
            detail: format!("{}: {}", provider, message),
        },
        None => AuthError::Service(format!("{} sign-in failed: {}", provider, message)),
    }
}

// ==================
// Tests
// ==================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_round_trips_through_str() {
        for provider in AuthProvider::ALL {
            assert_eq!(provider.as_str().parse::<AuthProvider>().unwrap(), provider);
        }
        assert_eq!("GitHub".parse::<AuthProvider>().unwrap(), AuthProvider::GitHub);
        assert!("myspace".parse::<AuthProvider>().is_err());
    }

    #[test]
    fn test_provider_serde_is_lowercase() {
        let json = serde_json::to_string(&AuthProvider::GitLab).unwrap();
        assert_eq!(json, "\"gitlab\"");
    }

    #[test]
    fn test_email_is_not_social() {
        assert!(!AuthProvider::Email.is_social());
        assert!(AuthProvider::Google.is_social());
    }

    #[test]
    fn test_callback_url_is_absolute() {
        let url = callback_url("https://app.example.com/", "/auth/callback", AuthProvider::Google);
        assert_eq!(url, "https://app.example.com/auth/callback?provider=google");

        let url = callback_url("http://localhost:3000", "auth/callback", AuthProvider::Azure);
        assert_eq!(url, "http://localhost:3000/auth/callback?provider=azure");
    }

    #[test]
    fn test_all_patterns_compile() {
        assert_eq!(config_issue_patterns().len(), CONFIG_ISSUE_PATTERNS.len());
    }

    #[test]
    fn test_classify_provider_not_enabled() {
        let err = classify_oauth_error(
            AuthProvider::Google,
            "Unsupported provider: provider is not enabled",
        );
        assert!(matches!(
            err,
            AuthError::ProviderConfig {
                issue: ProviderConfigIssue::ProviderNotEnabled,
                ..
            }
        ));
    }

    #[test]
    fn test_classify_missing_secret() {
        let err = classify_oauth_error(AuthProvider::GitHub, "missing OAuth secret");
        assert!(matches!(
            err,
            AuthError::ProviderConfig {
                issue: ProviderConfigIssue::MissingOAuthSecret,
                ..
            }
        ));
    }

    #[test]
    fn test_classify_invalid_redirect() {
        let err = classify_oauth_error(AuthProvider::Discord, "Invalid redirect_uri parameter");
        assert!(matches!(
            err,
            AuthError::ProviderConfig {
                issue: ProviderConfigIssue::InvalidRedirectUrl,
                ..
            }
        ));
    }

    #[test]
    fn test_classify_unknown_is_generic() {
        let err = classify_oauth_error(AuthProvider::Google, "upstream exploded");
        assert!(matches!(err, AuthError::Service(ref m) if m.contains("upstream exploded")));
    }
}
