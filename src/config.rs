//! # Configuration
//!
//! Session layer settings, loaded from TOML. Every field has a default,
//! so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::config_validator::{format_validation_errors, ConfigValidationError, ConfigValidator};

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration:\n{}", format_validation_errors(.0))]
    Invalid(Vec<ConfigValidationError>),
}

/// Session layer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Origin the dashboard is served from; callback URLs are built on it
    pub site_origin: String,
    pub callback_path: String,
    pub reset_password_path: String,
    pub login_path: String,
    /// Where a signed-in visitor lands when the role is not known yet
    pub authenticated_landing: String,

    /// Deadline for one session check
    pub session_timeout_ms: u64,
    /// Session checks per bootstrap, first try included
    pub session_max_attempts: u32,
    /// Backoff after the first failed check; doubles each time
    pub session_backoff_base_ms: u64,

    /// Extra session polls after an OAuth code exchange
    pub callback_max_retries: u32,
    pub callback_retry_interval_ms: u64,
    /// Delay before sending the visitor back to login after a failed callback
    pub error_redirect_delay_ms: u64,

    pub demo_accounts_enabled: bool,
    /// File backing the demo-user slot; in memory when unset
    pub demo_cache_path: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            site_origin: "http://localhost:3000".to_string(),
            callback_path: "/auth/callback".to_string(),
            reset_password_path: "/reset-password".to_string(),
            login_path: "/login".to_string(),
            authenticated_landing: "/dashboard".to_string(),
            session_timeout_ms: 5_000,
            session_max_attempts: 3,
            session_backoff_base_ms: 1_000,
            callback_max_retries: 2,
            callback_retry_interval_ms: 2_000,
            error_redirect_delay_ms: 3_000,
            demo_accounts_enabled: true,
            demo_cache_path: None,
        }
    }
}

impl AuthConfig {
    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AuthConfig = toml::from_str(content)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Check every field, collecting all violations
    pub fn validate(&self) -> Result<(), Vec<ConfigValidationError>> {
        let mut v = ConfigValidator::new();
        v.validate_non_empty("site_origin", &self.site_origin)
            .validate_origin("site_origin", &self.site_origin)
            .validate_route("callback_path", &self.callback_path)
            .validate_route("reset_password_path", &self.reset_password_path)
            .validate_route("login_path", &self.login_path)
            .validate_route("authenticated_landing", &self.authenticated_landing)
            .validate_duration_ms("session_timeout_ms", self.session_timeout_ms, 100, 60_000)
            .validate_range("session_max_attempts", self.session_max_attempts as i64, 1, 10)
            .validate_duration_ms("session_backoff_base_ms", self.session_backoff_base_ms, 0, 30_000)
            .validate_range("callback_max_retries", self.callback_max_retries as i64, 0, 10)
            .validate_duration_ms(
                "callback_retry_interval_ms",
                self.callback_retry_interval_ms,
                0,
                30_000,
            )
            .validate_duration_ms("error_redirect_delay_ms", self.error_redirect_delay_ms, 0, 60_000);
        if let Some(path) = &self.demo_cache_path {
            v.validate_parent_is_directory("demo_cache_path", path);
        }
        v.finish()
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn session_backoff_base(&self) -> Duration {
        Duration::from_millis(self.session_backoff_base_ms)
    }

    pub fn callback_retry_interval(&self) -> Duration {
        Duration::from_millis(self.callback_retry_interval_ms)
    }

    pub fn error_redirect_delay(&self) -> Duration {
        Duration::from_millis(self.error_redirect_delay_ms)
    }

    /// Absolute URL of the password reset page
    pub fn reset_password_url(&self) -> String {
        format!(
            "{}{}",
            self.site_origin.trim_end_matches('/'),
            self.reset_password_path
        )
    }
}
