//! # Auth Operations
//!
//! Login, signup, logout, password reset and social sign-in. Demo
//! credentials are handled locally and written straight to the store;
//! everything else goes through the identity service.
//!
//! Each failure the visitor can see produces exactly one notice. The
//! error itself is also returned so callers can decide what to render.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::demo::{synthesize_demo_user, CredentialResolver, DemoCache, DemoCredentialTable};
use super::errors::{AuthError, AuthResult};
use super::identity::{IdentityService, SignUpMetadata};
use super::oauth::{callback_url, classify_oauth_error, AuthProvider, OAuthRedirect};
use super::profile::resolve_user;
use super::shell::{Navigator, Notice, Notifier};
use super::store::SessionStore;
use super::user::{is_valid_email, Role, User};
use crate::config::AuthConfig;

/// How a password reset request ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetRequest {
    Sent,
    Failed(AuthError),
}

impl ResetRequest {
    pub fn is_sent(&self) -> bool {
        matches!(self, ResetRequest::Sent)
    }
}

/// Session-changing operations
pub struct AuthOperations {
    service: Arc<dyn IdentityService>,
    store: Arc<SessionStore>,
    cache: Arc<dyn DemoCache>,
    resolver: Option<Arc<dyn CredentialResolver>>,
    notifier: Arc<dyn Notifier>,
    navigator: Arc<dyn Navigator>,
    config: AuthConfig,
}

impl AuthOperations {
    /// Demo accounts are enabled when `config.demo_accounts_enabled` is set
    pub fn new(
        service: Arc<dyn IdentityService>,
        store: Arc<SessionStore>,
        cache: Arc<dyn DemoCache>,
        notifier: Arc<dyn Notifier>,
        navigator: Arc<dyn Navigator>,
        config: AuthConfig,
    ) -> Self {
        let resolver: Option<Arc<dyn CredentialResolver>> = if config.demo_accounts_enabled {
            Some(Arc::new(DemoCredentialTable::standard()))
        } else {
            None
        };
        Self {
            service,
            store,
            cache,
            resolver,
            notifier,
            navigator,
            config,
        }
    }

    /// Replace the demo credential resolver
    pub fn with_credential_resolver(mut self, resolver: Arc<dyn CredentialResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Send every credential pair to the identity service
    pub fn without_demo_accounts(mut self) -> Self {
        self.resolver = None;
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    // ==================
    // Password Sign-In
    // ==================

    /// Sign in with email and password
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<User> {
        let email = email.trim();
        if let Err(e) = validate_credentials(email, password) {
            return Err(self.fail("Sign in failed", e));
        }

        if let Some(account) = self
            .resolver
            .as_ref()
            .and_then(|r| r.resolve(email, password))
        {
            let user = synthesize_demo_user(&account);
            if let Err(e) = self.cache.store(&user) {
                warn!(error = %e, "failed to persist demo user");
            }
            self.store.set_user(Some(user.clone()));
            info!(email = %user.email, role = %user.role, "demo sign-in");
            self.notifier
                .notify(Notice::success("Signed in", format!("Welcome, {}", user.name)));
            return Ok(user);
        }

        let epoch = self.store.epoch();
        self.store.set_loading(true);
        let session = match self.service.sign_in_with_password(email, password).await {
            Ok(session) => session,
            Err(e) => {
                warn!(email = %email, error = %e, "sign-in rejected");
                self.store.set_error(e.clone());
                return Err(self.fail("Sign in failed", e));
            }
        };

        let user = resolve_user(self.service.as_ref(), &session.identity).await;
        self.clear_demo_cache();
        self.commit_user(epoch, &user);
        info!(email = %user.email, role = %user.role, "signed in");
        self.notifier
            .notify(Notice::success("Signed in", format!("Welcome back, {}", user.name)));
        Ok(user)
    }

    /// Create an account
    ///
    /// Returns `None` when the identity service wants the email confirmed
    /// first; the caller must not navigate in that case.
    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        name: &str,
        role: Role,
    ) -> AuthResult<Option<User>> {
        let email = email.trim();
        let name = name.trim();
        let validation = validate_credentials(email, password).and_then(|_| {
            if name.is_empty() {
                Err(AuthError::Validation("Name is required".to_string()))
            } else {
                Ok(())
            }
        });
        if let Err(e) = validation {
            return Err(self.fail("Sign up failed", e));
        }

        let metadata = SignUpMetadata {
            name: name.to_string(),
            role,
        };
        let epoch = self.store.epoch();
        self.store.set_loading(true);
        let response = match self.service.sign_up(email, password, &metadata).await {
            Ok(response) => response,
            Err(e) => {
                warn!(email = %email, error = %e, "sign-up rejected");
                self.store.set_error(e.clone());
                return Err(self.fail("Sign up failed", e));
            }
        };

        let Some(session) = response.session else {
            info!(email = %email, "sign-up awaiting email confirmation");
            self.store.set_loading(false);
            self.notifier.notify(Notice::info(
                "Check your email",
                "Confirm your email address to finish creating your account.",
            ));
            return Ok(None);
        };

        let user = resolve_user(self.service.as_ref(), &session.identity).await;
        self.clear_demo_cache();
        self.commit_user(epoch, &user);
        info!(email = %user.email, role = %user.role, "signed up");
        self.notifier
            .notify(Notice::success("Account created", format!("Welcome, {}", user.name)));
        Ok(Some(user))
    }

    // ==================
    // Sign-Out
    // ==================

    /// Sign out locally and remotely, then go to the login page
    ///
    /// Local state is cleared even when the remote call fails.
    pub async fn logout(&self) {
        self.sign_out().await;
        self.notifier
            .notify(Notice::success("Signed out", "You have been signed out."));
        self.navigator.navigate(&self.config.login_path);
    }

    async fn sign_out(&self) {
        let _guard = self.store.begin_logout();
        self.clear_demo_cache();

        match self.service.sign_out().await {
            Ok(()) => debug!("remote sign-out complete"),
            Err(e) => warn!(error = %e, "remote sign-out failed, local session cleared"),
        }
    }

    fn clear_demo_cache(&self) {
        if let Err(e) = self.cache.clear() {
            warn!(error = %e, "failed to clear demo cache");
        }
    }

    // ==================
    // Password Reset
    // ==================

    /// Ask for a reset link; never fails the caller
    pub async fn forgot_password(&self, email: &str) -> ResetRequest {
        let email = email.trim();
        if !is_valid_email(email) {
            let e = AuthError::Validation("Enter a valid email address".to_string());
            return ResetRequest::Failed(self.fail("Password reset failed", e));
        }

        let redirect_to = self.config.reset_password_url();
        match self.service.reset_password_for_email(email, &redirect_to).await {
            Ok(()) => {
                info!(email = %email, "password reset link requested");
                self.notifier.notify(Notice::success(
                    "Check your email",
                    "If an account exists for that address, a reset link is on its way.",
                ));
                ResetRequest::Sent
            }
            Err(e) => {
                warn!(email = %email, error = %e, "password reset request failed");
                ResetRequest::Failed(self.fail("Password reset failed", e))
            }
        }
    }

    // ==================
    // Social Sign-In
    // ==================

    /// Start an OAuth sign-in and send the browser to the provider
    pub async fn initiate_social_login(&self, provider: AuthProvider) -> AuthResult<OAuthRedirect> {
        let title = format!("{} sign-in failed", provider.display_name());

        if !provider.is_social() {
            let e = AuthError::Validation(format!("{} is not a social provider", provider));
            return Err(self.fail(&title, e));
        }

        if let Err(e) = self.service.check_connectivity().await {
            error!(provider = %provider, error = %e, "identity service unreachable");
            return Err(self.fail(&title, e));
        }

        if self.store.is_authenticated() {
            info!(provider = %provider, "signing out before social sign-in");
            self.sign_out().await;
        }

        let redirect_to = callback_url(&self.config.site_origin, &self.config.callback_path, provider);
        let redirect = match self.service.sign_in_with_oauth(provider, &redirect_to).await {
            Ok(redirect) => redirect,
            Err(e) => {
                let e = match e {
                    AuthError::Service(message) | AuthError::Validation(message) => {
                        classify_oauth_error(provider, &message)
                    }
                    other => other,
                };
                error!(provider = %provider, code = e.code(), error = %e, "OAuth request failed");
                return Err(self.fail(&title, e));
            }
        };

        info!(provider = %provider, redirect_to = %redirect.redirect_to, "redirecting to provider");
        self.navigator.navigate(&redirect.url);
        Ok(redirect)
    }

    /// Exchange an authorization code for a session and resolve the user
    ///
    /// Notices are left to the callback reconciler.
    pub async fn handle_oauth_callback(&self, code: &str) -> AuthResult<User> {
        let epoch = self.store.epoch();
        let session = self.service.exchange_code_for_session(code).await?;

        let user = resolve_user(self.service.as_ref(), &session.identity).await;
        self.clear_demo_cache();
        self.commit_user(epoch, &user);
        info!(email = %user.email, provider = %user.provider, "OAuth session established");
        Ok(user)
    }

    // ==================
    // Helpers
    // ==================

    /// Set the user unless a sign-out happened since `epoch`
    fn commit_user(&self, epoch: u64, user: &User) {
        if self.store.epoch() == epoch {
            self.store.set_user(Some(user.clone()));
        } else {
            debug!(email = %user.email, "sign-out during sign-in, dropping user");
            self.store.set_loading(false);
        }
    }

    fn fail(&self, title: &str, error: AuthError) -> AuthError {
        self.notifier.notify(Notice::error(title, error.user_message()));
        error
    }
}

fn validate_credentials(email: &str, password: &str) -> AuthResult<()> {
    if !is_valid_email(email) {
        return Err(AuthError::Validation("Enter a valid email address".to_string()));
    }
    if password.is_empty() {
        return Err(AuthError::Validation("Password is required".to_string()));
    }
    Ok(())
}

// ==================
// Tests
// ==================
