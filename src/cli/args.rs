//! CLI argument definitions using clap
//!
//! Commands:
//! - healthdash login <email> --password <password> [--register]
//! - healthdash logout
//! - healthdash bootstrap [--restore <email>] [--fail-checks <n>]
//! - healthdash callback --query <query> [--simulate-email <email>]
//! - healthdash route --role <role>
//! - healthdash check-config
//!
//! Every command accepts `--config <path>` pointing at a TOML file.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Healthdash - session orchestration for the healthcare dashboard
#[derive(Parser, Debug)]
#[command(name = "healthdash")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file; defaults apply when omitted
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in with email and password
    ///
    /// Demo credentials are resolved locally; anything else goes to the
    /// in-process identity service.
    Login {
        email: String,

        #[arg(long)]
        password: String,

        /// Register the account with the identity service first
        #[arg(long)]
        register: bool,
    },

    /// Restore the session, then sign out and clear the demo cache
    Logout,

    /// Resolve the session the way a fresh page load does
    Bootstrap {
        /// Pretend a session for this email survived from an earlier visit
        #[arg(long)]
        restore: Option<String>,

        /// Fail this many session checks before answering
        #[arg(long, default_value = "0")]
        fail_checks: u32,
    },

    /// Reconcile an OAuth redirect query string
    Callback {
        /// Query string or full callback URL
        #[arg(long)]
        query: String,

        /// Issue an authorization code for this email and use it
        #[arg(long)]
        simulate_email: Option<String>,
    },

    /// Print the landing route for a role
    Route {
        #[arg(long)]
        role: String,
    },

    /// Validate the configuration and print the effective values
    CheckConfig,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
