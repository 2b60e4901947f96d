//! Configuration Validation
//!
//! Validates configuration at startup and reports every invalid value
//! at once, each with an explicit message.

use std::path::Path;

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValidationError {
    pub field: String,
    pub value: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Invalid configuration for '{}': {} (value: {})",
            self.field, self.message, self.value
        )
    }
}

impl std::error::Error for ConfigValidationError {}

/// Result of config validation
pub type ConfigResult<T> = Result<T, Vec<ConfigValidationError>>;

/// Configuration validator
pub struct ConfigValidator {
    errors: Vec<ConfigValidationError>,
}

impl ConfigValidator {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    fn error(&mut self, field: &str, value: impl std::fmt::Display, message: &str) {
        self.errors.push(ConfigValidationError {
            field: field.to_string(),
            value: value.to_string(),
            message: message.to_string(),
        });
    }

    /// Validate range (inclusive)
    pub fn validate_range(&mut self, field: &str, value: i64, min: i64, max: i64) -> &mut Self {
        if value < min || value > max {
            self.error(field, value, &format!("Value must be between {} and {}", min, max));
        }
        self
    }

    /// Validate non-empty string
    pub fn validate_non_empty(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.error(field, value, "Value cannot be empty");
        }
        self
    }

    /// Validate an origin (scheme + host, no path)
    pub fn validate_origin(&mut self, field: &str, value: &str) -> &mut Self {
        if !value.starts_with("http://") && !value.starts_with("https://") {
            self.error(field, value, "URL must start with http:// or https://");
        } else if value
            .split_once("://")
            .map(|(_, rest)| rest.trim_end_matches('/').contains('/'))
            .unwrap_or(false)
        {
            self.error(field, value, "Origin must not contain a path");
        }
        self
    }

    /// Validate an in-app route
    pub fn validate_route(&mut self, field: &str, value: &str) -> &mut Self {
        if !value.starts_with('/') {
            self.error(field, value, "Route must start with '/'");
        } else if value.contains("://") {
            self.error(field, value, "Route must be relative to the site origin");
        }
        self
    }

    /// Validate duration in milliseconds
    pub fn validate_duration_ms(&mut self, field: &str, ms: u64, min_ms: u64, max_ms: u64) -> &mut Self {
        if ms < min_ms || ms > max_ms {
            self.error(
                field,
                format!("{}ms", ms),
                &format!("Duration must be between {}ms and {}ms", min_ms, max_ms),
            );
        }
        self
    }

    /// Validate that a file's parent is a directory, if it exists
    pub fn validate_parent_is_directory(&mut self, field: &str, path: &Path) -> &mut Self {
        if let Some(parent) = path.parent() {
            if parent.exists() && !parent.is_dir() {
                self.error(field, path.display(), "Parent path is not a directory");
            }
        }
        if path.is_dir() {
            self.error(field, path.display(), "Path is a directory, expected a file");
        }
        self
    }

    /// Finish validation and return result
    pub fn finish(self) -> ConfigResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }

    /// Check if any errors occurred
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Get current errors
    pub fn errors(&self) -> &[ConfigValidationError] {
        &self.errors
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Format validation errors for display
pub fn format_validation_errors(errors: &[ConfigValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_validation() {
        let mut v = ConfigValidator::new();
        v.validate_range("attempts", 3, 1, 10);
        assert!(v.finish().is_ok());

        let mut v = ConfigValidator::new();
        v.validate_range("attempts", 20, 1, 10);
        let err = v.finish().unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(err[0].message.contains("between"));
    }

    #[test]
    fn test_origin_validation() {
        let mut v = ConfigValidator::new();
        v.validate_origin("site_origin", "https://app.example.com")
            .validate_origin("site_origin", "http://localhost:3000/");
        assert!(!v.has_errors());

        let mut v = ConfigValidator::new();
        v.validate_origin("site_origin", "app.example.com")
            .validate_origin("site_origin", "https://app.example.com/dashboard");
        assert_eq!(v.errors().len(), 2);
    }

    #[test]
    fn test_route_validation() {
        let mut v = ConfigValidator::new();
        v.validate_route("login_path", "/login");
        assert!(v.finish().is_ok());

        let mut v = ConfigValidator::new();
        v.validate_route("login_path", "login")
            .validate_route("callback_path", "/https://evil.example");
        assert_eq!(v.finish().unwrap_err().len(), 2);
    }

    #[test]
    fn test_multiple_errors() {
        let mut v = ConfigValidator::new();
        v.validate_duration_ms("session_timeout_ms", 0, 100, 60_000)
            .validate_range("session_max_attempts", 0, 1, 10)
            .validate_non_empty("site_origin", "");

        let errors = v.finish().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(format_validation_errors(&errors).contains("session_timeout_ms"));
    }

    #[test]
    fn test_parent_directory_validation() {
        let dir = tempfile::tempdir().unwrap();

        let mut v = ConfigValidator::new();
        v.validate_parent_is_directory("demo_cache_path", &dir.path().join("demo_user.json"));
        assert!(v.finish().is_ok());

        let mut v = ConfigValidator::new();
        v.validate_parent_is_directory("demo_cache_path", dir.path());
        assert!(v.finish().is_err());
    }
}
