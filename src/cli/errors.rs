//! CLI errors and exit codes

use thiserror::Error;

use crate::auth::AuthError;
use crate::config::ConfigError;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{}", .0.user_message())]
    Auth(#[from] AuthError),

    #[error("Failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("Failed to encode config: {0}")]
    Encode(#[from] toml::ser::Error),
}

impl CliError {
    /// Process exit code
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => 2,
            CliError::Auth(_) => 1,
            CliError::Runtime(_) | CliError::Output(_) | CliError::Encode(_) => 3,
        }
    }

    /// Stable error code for scripts
    pub fn code(&self) -> &'static str {
        match self {
            CliError::Config(_) => "CONFIG_ERROR",
            CliError::Auth(e) => e.code(),
            CliError::Runtime(_) => "RUNTIME_ERROR",
            CliError::Output(_) | CliError::Encode(_) => "OUTPUT_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_errors_show_user_message() {
        let err = CliError::from(AuthError::InvalidCredentials("Invalid login credentials".to_string()));
        assert_eq!(err.to_string(), "Invalid login credentials");
        assert_eq!(err.code(), "INVALID_CREDENTIALS");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_config_errors_exit_with_two() {
        let err = CliError::from(ConfigError::Invalid(Vec::new()));
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
