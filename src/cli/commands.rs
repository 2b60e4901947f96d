//! CLI command implementations
//!
//! Each command wires a fresh session layer against the in-process
//! identity service, runs on a single-threaded runtime and prints its
//! result as JSON on stdout. Notices and navigation go to the log.
//!
//! With `demo_cache_path` configured the demo slot is a file, so a demo
//! `login` survives into a later `bootstrap` or `logout`.

use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::auth::demo::{DemoCache, DemoCredentialTable, FileDemoCache, InMemoryDemoCache};
use crate::auth::shell::{TracingNavigator, TracingNotifier};
use crate::auth::{
    route_for, route_for_role, AuthOperations, AuthProvider, BootstrapOutcome, BootstrapPolicy,
    InMemoryIdentityService, OAuthCallbackContext, OAuthCallbackReconciler, SessionBootstrapper,
    SessionStore,
};
use crate::config::AuthConfig;

use super::args::{Cli, Command};
use super::errors::CliResult;

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    run_command(cli)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cli: Cli) -> CliResult<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Login {
            email,
            password,
            register,
        } => login(config, &email, &password, register),
        Command::Logout => logout(config),
        Command::Bootstrap {
            restore,
            fail_checks,
        } => bootstrap(config, restore.as_deref(), fail_checks),
        Command::Callback {
            query,
            simulate_email,
        } => callback(config, &query, simulate_email.as_deref()),
        Command::Route { role } => route(&role),
        Command::CheckConfig => check_config(&config),
    }
}

fn load_config(path: Option<&Path>) -> CliResult<AuthConfig> {
    match path {
        Some(path) => Ok(AuthConfig::load(path)?),
        None => Ok(AuthConfig::default()),
    }
}

fn block_on<F: Future>(future: F) -> CliResult<F::Output> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(rt.block_on(future))
}

fn write_json(value: &impl Serialize) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ==================
// Wiring
// ==================

struct SessionLayer {
    config: AuthConfig,
    service: Arc<InMemoryIdentityService>,
    store: Arc<SessionStore>,
    cache: Arc<dyn DemoCache>,
    ops: Arc<AuthOperations>,
}

impl SessionLayer {
    fn new(config: AuthConfig) -> Self {
        let service = Arc::new(InMemoryIdentityService::new());
        let store = SessionStore::shared();
        let cache: Arc<dyn DemoCache> = match &config.demo_cache_path {
            Some(path) => Arc::new(FileDemoCache::new(path.clone())),
            None => Arc::new(InMemoryDemoCache::new()),
        };
        let ops = Arc::new(AuthOperations::new(
            service.clone(),
            store.clone(),
            cache.clone(),
            Arc::new(TracingNotifier),
            Arc::new(TracingNavigator),
            config.clone(),
        ));
        Self {
            config,
            service,
            store,
            cache,
            ops,
        }
    }

    fn bootstrapper(&self) -> Arc<SessionBootstrapper> {
        let demo_table = self
            .config
            .demo_accounts_enabled
            .then(DemoCredentialTable::standard);
        SessionBootstrapper::with_demo_table(
            self.service.clone(),
            self.store.clone(),
            self.cache.clone(),
            Arc::new(TracingNotifier),
            BootstrapPolicy::from_config(&self.config),
            demo_table,
        )
    }

    /// Run one bootstrap cycle and tear the bootstrapper down
    async fn bootstrap(&self) -> BootstrapOutcome {
        let bootstrapper = self.bootstrapper();
        let outcome = bootstrapper.mount().await.unwrap_or(BootstrapOutcome::Superseded);
        bootstrapper.unmount();
        outcome
    }
}

fn outcome_label(outcome: &BootstrapOutcome) -> &'static str {
    match outcome {
        BootstrapOutcome::DemoUser(_) => "demo_user",
        BootstrapOutcome::RemoteUser(_) => "remote_user",
        BootstrapOutcome::SignedOut => "signed_out",
        BootstrapOutcome::Unavailable(_) => "unavailable",
        BootstrapOutcome::Superseded => "superseded",
    }
}

// ==================
// Commands
// ==================

/// Sign in and print the user
pub fn login(config: AuthConfig, email: &str, password: &str, register: bool) -> CliResult<()> {
    let layer = SessionLayer::new(config);
    if register {
        layer
            .service
            .register_account(email, password, serde_json::json!({}));
    }

    let user = block_on(layer.ops.login(email, password))??;
    write_json(&json!({ "user": user, "route": route_for(user.role) }))
}

/// Bootstrap, then sign out
pub fn logout(config: AuthConfig) -> CliResult<()> {
    let layer = SessionLayer::new(config);
    let view = block_on(async {
        let outcome = layer.bootstrap().await;
        info!(outcome = outcome_label(&outcome), "session before sign-out");
        layer.ops.logout().await;
        layer.store.snapshot().legacy_view()
    })?;
    write_json(&view)
}

/// Resolve the session as a page load would
pub fn bootstrap(config: AuthConfig, restore: Option<&str>, fail_checks: u32) -> CliResult<()> {
    let layer = SessionLayer::new(config);
    if let Some(email) = restore {
        layer
            .service
            .register_account(email, "", serde_json::json!({}));
        layer.service.restore_session(email);
    }
    layer.service.fail_next_session_checks(fail_checks);

    let (outcome, state) = block_on(async {
        let outcome = layer.bootstrap().await;
        (outcome, layer.store.snapshot())
    })?;
    write_json(&json!({
        "outcome": outcome_label(&outcome),
        "retryCount": state.retry_count,
        "error": state.error.as_ref().map(|e| e.code()),
        "session": state.legacy_view(),
    }))
}

/// Reconcile an OAuth callback and print the terminal phase
pub fn callback(config: AuthConfig, query: &str, simulate_email: Option<&str>) -> CliResult<()> {
    let layer = SessionLayer::new(config);
    let mut ctx = OAuthCallbackContext::from_query(query);
    if let Some(email) = simulate_email {
        let provider = ctx.provider.unwrap_or(AuthProvider::Google);
        ctx.code = Some(
            layer
                .service
                .issue_oauth_code(provider, email, serde_json::json!({})),
        );
    }

    let reconciler = OAuthCallbackReconciler::new(
        layer.ops.clone(),
        layer.service.clone(),
        Arc::new(TracingNotifier),
        Arc::new(TracingNavigator),
    );
    let phase = block_on(async {
        let phase = reconciler.reconcile(&ctx).await;
        reconciler.cancel_pending_redirect();
        phase
    })?;
    write_json(&phase)
}

/// Print the landing route for a role
pub fn route(role: &str) -> CliResult<()> {
    write_json(&json!({ "role": role, "route": route_for_role(role) }))
}

/// Print the effective configuration
pub fn check_config(config: &AuthConfig) -> CliResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    info!("configuration OK");
    Ok(())
}
