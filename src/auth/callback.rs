//! # OAuth Callback Reconciliation
//!
//! Turns the query string a provider redirects back with into a settled
//! session. The reconciler moves through `Verifying` to exactly one of
//! `Success` or `Error`:
//!
//! - an explicit provider error fails immediately, without touching the
//!   identity service
//! - a visitor who is already signed in is adding a provider; the link is
//!   confirmed and they go back to their dashboard
//! - otherwise the authorization code is exchanged and the current session
//!   polled a bounded number of times
//!
//! Every terminal phase emits one notice. `Error` also sends the visitor
//! back to the login page after a short delay.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::errors::AuthError;
use super::identity::IdentityService;
use super::oauth::AuthProvider;
use super::operations::AuthOperations;
use super::router::route_for;
use super::shell::{Navigator, Notice, Notifier};
use super::store::SessionStore;
use super::user::User;
use crate::config::AuthConfig;

// ==================
// Callback Context
// ==================

/// Parameters of one OAuth redirect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OAuthCallbackContext {
    pub provider: Option<AuthProvider>,
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl OAuthCallbackContext {
    /// Parse a query string, with or without the leading `?`
    ///
    /// A full callback URL is accepted too. Unknown keys are ignored and
    /// empty values count as absent.
    pub fn from_query(query: &str) -> Self {
        let query = match query.split_once('?') {
            Some((_, rest)) => rest,
            None => query,
        };
        let query = query.split('#').next().unwrap_or_default();

        let mut ctx = Self::default();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = decode_component(value);
            if value.is_empty() {
                continue;
            }
            match key {
                "provider" => match value.parse::<AuthProvider>() {
                    Ok(provider) => ctx.provider = Some(provider),
                    Err(_) => warn!(provider = %value, "unknown provider in callback"),
                },
                "code" => ctx.code = Some(value),
                "state" => ctx.state = Some(value),
                "error" => ctx.error = Some(value),
                "error_description" => ctx.error_description = Some(value),
                _ => {}
            }
        }
        ctx
    }

    /// Human name of the provider, or a generic label
    pub fn provider_label(&self) -> &'static str {
        self.provider
            .map(|p| p.display_name())
            .unwrap_or("OAuth provider")
    }
}

fn decode_component(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    match urlencoding::decode(&raw) {
        Ok(decoded) => decoded.trim().to_string(),
        Err(_) => raw.trim().to_string(),
    }
}

// ==================
// Phases
// ==================

/// Where the reconciler is
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum CallbackPhase {
    Verifying,
    Error { message: String },
    Success { route: String },
}

impl CallbackPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CallbackPhase::Verifying)
    }
}

/// Retry and redirect timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackPolicy {
    /// Session polls after the first one
    pub max_retries: u32,
    pub retry_interval: Duration,
    pub error_redirect_delay: Duration,
}

impl CallbackPolicy {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            max_retries: config.callback_max_retries,
            retry_interval: config.callback_retry_interval(),
            error_redirect_delay: config.error_redirect_delay(),
        }
    }
}

enum Step {
    Inspect,
    Exchange(String),
    Poll { attempt: u32 },
    Wait { attempt: u32 },
    Done(Terminal),
}

enum Terminal {
    Linked(User),
    SignedIn { route: String, user: Option<User> },
    Failed { message: String, error: AuthError },
}

// ==================
// Reconciler
// ==================

/// Drives one OAuth callback to a terminal phase
pub struct OAuthCallbackReconciler {
    ops: Arc<AuthOperations>,
    service: Arc<dyn IdentityService>,
    notifier: Arc<dyn Notifier>,
    navigator: Arc<dyn Navigator>,
    policy: CallbackPolicy,
    login_path: String,
    authenticated_landing: String,
    phase: watch::Sender<CallbackPhase>,
    started: AtomicBool,
    redirect: Mutex<Option<JoinHandle<()>>>,
}

impl OAuthCallbackReconciler {
    pub fn new(
        ops: Arc<AuthOperations>,
        service: Arc<dyn IdentityService>,
        notifier: Arc<dyn Notifier>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let config = ops.config();
        let policy = CallbackPolicy::from_config(config);
        let login_path = config.login_path.clone();
        let authenticated_landing = config.authenticated_landing.clone();
        let (phase, _) = watch::channel(CallbackPhase::Verifying);
        Self {
            ops,
            service,
            notifier,
            navigator,
            policy,
            login_path,
            authenticated_landing,
            phase,
            started: AtomicBool::new(false),
            redirect: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> CallbackPhase {
        self.phase.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallbackPhase> {
        self.phase.subscribe()
    }

    fn store(&self) -> &Arc<SessionStore> {
        self.ops.store()
    }

    /// Reconcile `ctx`; later calls wait for and return the first one's terminal phase
    pub async fn reconcile(&self, ctx: &OAuthCallbackContext) -> CallbackPhase {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("callback already being reconciled, waiting for its outcome");
            let mut rx = self.phase.subscribe();
            return match rx.wait_for(CallbackPhase::is_terminal).await {
                Ok(phase) => phase.clone(),
                Err(_) => self.phase(),
            };
        }

        let mut step = Step::Inspect;
        loop {
            step = match step {
                Step::Inspect => self.inspect(ctx),
                Step::Exchange(code) => {
                    if let Err(e) = self.ops.handle_oauth_callback(&code).await {
                        warn!(provider = ctx.provider_label(), error = %e, "code exchange failed, checking session");
                    }
                    Step::Poll { attempt: 1 }
                }
                Step::Poll { attempt } => self.poll(ctx, attempt).await,
                Step::Wait { attempt } => {
                    debug!(attempt, "no session yet, waiting");
                    tokio::time::sleep(self.policy.retry_interval).await;
                    Step::Poll {
                        attempt: attempt + 1,
                    }
                }
                Step::Done(terminal) => return self.finish(ctx, terminal),
            };
        }
    }

    fn inspect(&self, ctx: &OAuthCallbackContext) -> Step {
        if let Some(code) = &ctx.error {
            let description = ctx.error_description.clone().unwrap_or_default();
            let detail = if description.is_empty() {
                code.clone()
            } else {
                description.clone()
            };
            return Step::Done(Terminal::Failed {
                message: format!("{}: {}", ctx.provider_label(), detail),
                error: AuthError::OAuthDenied {
                    code: code.clone(),
                    description,
                },
            });
        }

        let state = self.store().snapshot();
        let ready = state.is_ready();
        if let Some(user) = state.user.filter(|_| ready) {
            return Step::Done(Terminal::Linked(user));
        }

        match &ctx.code {
            Some(code) => Step::Exchange(code.clone()),
            None => Step::Poll { attempt: 1 },
        }
    }

    async fn poll(&self, ctx: &OAuthCallbackContext, attempt: u32) -> Step {
        let session = match self.service.get_current_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!(attempt, error = %e, "session check failed during callback");
                None
            }
        };

        if session.is_some() {
            let state = self.store().snapshot();
            let ready = state.is_ready();
            return match state.user.filter(|_| ready) {
                Some(user) => Step::Done(Terminal::SignedIn {
                    route: route_for(user.role).to_string(),
                    user: Some(user),
                }),
                None => Step::Done(Terminal::SignedIn {
                    route: self.authenticated_landing.clone(),
                    user: None,
                }),
            };
        }

        let attempts = self.policy.max_retries + 1;
        if attempt < attempts {
            Step::Wait { attempt }
        } else {
            Step::Done(Terminal::Failed {
                message: AuthError::CallbackTimeout { attempts }.user_message(),
                error: AuthError::CallbackTimeout { attempts },
            })
        }
    }

    fn finish(&self, ctx: &OAuthCallbackContext, terminal: Terminal) -> CallbackPhase {
        let provider = ctx.provider_label();
        let phase = match terminal {
            Terminal::Linked(user) => {
                // The link itself is not recorded anywhere
                info!(provider, email = %user.email, "provider linked to signed-in account");
                self.notifier.notify(Notice::success(
                    "Account linked",
                    format!("{} is now linked to your account.", provider),
                ));
                let route = route_for(user.role).to_string();
                self.navigator.navigate(&route);
                CallbackPhase::Success { route }
            }
            Terminal::SignedIn { route, user } => {
                info!(provider, route = %route, resolved = user.is_some(), "OAuth sign-in complete");
                let message = match &user {
                    Some(user) => format!("Welcome, {}", user.name),
                    None => format!("Signed in with {}", provider),
                };
                self.notifier.notify(Notice::success("Signed in", message));
                self.navigator.navigate(&route);
                CallbackPhase::Success { route }
            }
            Terminal::Failed { message, error: e } => {
                error!(provider, code = e.code(), error = %e, "OAuth callback failed");
                self.notifier
                    .notify(Notice::error("Authentication failed", message.clone()));
                self.schedule_login_redirect();
                CallbackPhase::Error { message }
            }
        };

        self.phase.send_replace(phase.clone());
        phase
    }

    fn schedule_login_redirect(&self) {
        let navigator = Arc::clone(&self.navigator);
        let login_path = self.login_path.clone();
        let delay = self.policy.error_redirect_delay;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            navigator.navigate(&login_path);
        });
        let mut redirect = self.redirect.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = redirect.replace(handle) {
            previous.abort();
        }
    }

    /// Drop a pending redirect to the login page
    pub fn cancel_pending_redirect(&self) {
        if let Some(handle) = self
            .redirect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

// ==================
// Tests
// ==================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::demo::InMemoryDemoCache;
    use crate::auth::identity::StoredProfile;
    use crate::auth::memory::InMemoryIdentityService;
    use crate::auth::shell::{NoticeLevel, RecordingNavigator, RecordingNotifier};
    use crate::auth::user::Role;

    struct Harness {
        service: Arc<InMemoryIdentityService>,
        store: Arc<SessionStore>,
        ops: Arc<AuthOperations>,
        notifier: Arc<RecordingNotifier>,
        navigator: Arc<RecordingNavigator>,
        reconciler: OAuthCallbackReconciler,
    }

    fn harness() -> Harness {
        let service = Arc::new(InMemoryIdentityService::new());
        let store = SessionStore::shared();
        let notifier = Arc::new(RecordingNotifier::new());
        let navigator = Arc::new(RecordingNavigator::new());
        let ops = Arc::new(AuthOperations::new(
            service.clone(),
            store.clone(),
            Arc::new(InMemoryDemoCache::new()),
            notifier.clone(),
            navigator.clone(),
            AuthConfig::default(),
        ));
        let reconciler =
            OAuthCallbackReconciler::new(ops.clone(), service.clone(), notifier.clone(), navigator.clone());
        Harness {
            service,
            store,
            ops,
            notifier,
            navigator,
            reconciler,
        }
    }

    #[test]
    fn test_parse_success_query() {
        let ctx = OAuthCallbackContext::from_query("?provider=google&code=abc123&state=xyz");
        assert_eq!(ctx.provider, Some(AuthProvider::Google));
        assert_eq!(ctx.code.as_deref(), Some("abc123"));
        assert_eq!(ctx.state.as_deref(), Some("xyz"));
        assert!(ctx.error.is_none());
    }

    #[test]
    fn test_parse_error_query_from_url() {
        let ctx = OAuthCallbackContext::from_query(
            "http://localhost:3000/auth/callback?provider=github&error=access_denied&error_description=User+denied%20access#frag",
        );
        assert_eq!(ctx.provider, Some(AuthProvider::GitHub));
        assert_eq!(ctx.error.as_deref(), Some("access_denied"));
        assert_eq!(ctx.error_description.as_deref(), Some("User denied access"));
        assert!(ctx.code.is_none());
    }

    #[test]
    fn test_parse_ignores_empty_and_unknown() {
        let ctx = OAuthCallbackContext::from_query("provider=myspace&code=&foo=bar&&");
        assert_eq!(ctx, OAuthCallbackContext::default());
        assert_eq!(ctx.provider_label(), "OAuth provider");
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_error_fails_without_session_check() {
        let h = harness();
        let ctx = OAuthCallbackContext::from_query(
            "provider=google&error=access_denied&error_description=The+user+denied+access",
        );

        let phase = h.reconciler.reconcile(&ctx).await;
        assert_eq!(
            phase,
            CallbackPhase::Error {
                message: "Google: The user denied access".to_string()
            }
        );
        assert_eq!(h.service.calls().total(), 0);
        assert_eq!(h.notifier.errors().len(), 1);
        assert_eq!(h.notifier.notices().len(), 1);

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert!(h.navigator.visits().is_empty());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.navigator.last().as_deref(), Some("/login"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_code_exchange_routes_by_role() {
        let h = harness();
        let code = h.service.issue_oauth_code(AuthProvider::Google, "doc@clinic.org", serde_json::json!({}));

        let ctx = OAuthCallbackContext::from_query(&format!("provider=google&code={}", code));
        let phase = h.reconciler.reconcile(&ctx).await;

        assert_eq!(
            phase,
            CallbackPhase::Success {
                route: "/patient-dashboard".to_string()
            }
        );
        assert_eq!(h.service.calls().exchange_code, 1);
        assert_eq!(h.service.calls().get_current_session, 1);
        assert_eq!(h.navigator.last().as_deref(), Some("/patient-dashboard"));
        let notices = h.notifier.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Success);
        assert_eq!(h.reconciler.phase(), phase);
    }

    #[tokio::test(start_paused = true)]
    async fn test_staff_profile_routes_to_dashboard() {
        let h = harness();
        let code = h.service.issue_oauth_code(AuthProvider::Azure, "dr@clinic.org", serde_json::json!({}));
        let session = h.service.exchange_code_for_session(&code).await.unwrap();
        h.service.insert_profile(
            &session.identity.id,
            StoredProfile {
                role: Some("doctor".to_string()),
                ..Default::default()
            },
        );
        let code = h.service.issue_oauth_code(AuthProvider::Azure, "dr@clinic.org", serde_json::json!({}));

        let ctx = OAuthCallbackContext::from_query(&format!("provider=azure&code={}", code));
        let phase = h.reconciler.reconcile(&ctx).await;
        assert_eq!(
            phase,
            CallbackPhase::Success {
                route: "/dashboard".to_string()
            }
        );
        assert_eq!(h.store.current_user().map(|u| u.role), Some(Role::Doctor));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_session_times_out_after_retries() {
        let h = harness();
        let ctx = OAuthCallbackContext::from_query("provider=github&code=bogus");

        let start = tokio::time::Instant::now();
        let phase = h.reconciler.reconcile(&ctx).await;

        assert!(matches!(phase, CallbackPhase::Error { .. }));
        assert_eq!(h.service.calls().get_current_session, 3);
        assert!(start.elapsed() >= Duration::from_secs(4));
        assert_eq!(h.notifier.errors().len(), 1);
        assert!(!h.store.is_authenticated());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.navigator.last().as_deref(), Some("/login"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_user_goes_to_landing() {
        let h = harness();
        h.service.register_account("pat@clinic.org", "pw", serde_json::json!({}));
        h.service.restore_session("pat@clinic.org");

        let phase = h.reconciler.reconcile(&OAuthCallbackContext::default()).await;
        assert_eq!(
            phase,
            CallbackPhase::Success {
                route: "/dashboard".to_string()
            }
        );
        assert_eq!(h.service.calls().exchange_code, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_signed_in_is_account_linking() {
        let h = harness();
        h.ops.login("receptionist@demo.health", "reception123").await.unwrap();
        let before = h.notifier.notices().len();

        let ctx = OAuthCallbackContext::from_query("provider=github&code=whatever");
        let phase = h.reconciler.reconcile(&ctx).await;

        assert_eq!(
            phase,
            CallbackPhase::Success {
                route: "/dashboard".to_string()
            }
        );
        assert_eq!(h.service.calls().total(), 0);
        let notices = h.notifier.notices();
        assert_eq!(notices.len(), before + 1);
        assert_eq!(notices[before].title, "Account linked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_reconcile_is_a_no_op() {
        let h = harness();
        let ctx = OAuthCallbackContext::from_query("provider=google&error=server_error");

        let first = h.reconciler.reconcile(&ctx).await;
        let second = h.reconciler.reconcile(&ctx).await;
        assert_eq!(first, second);
        assert_eq!(h.notifier.notices().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reconciles_share_the_outcome() {
        let h = harness();
        let ctx = OAuthCallbackContext::from_query("provider=github&code=bogus");

        let (first, second) = tokio::join!(h.reconciler.reconcile(&ctx), h.reconciler.reconcile(&ctx));
        assert!(matches!(first, CallbackPhase::Error { .. }));
        assert_eq!(first, second);
        assert_eq!(h.service.calls().exchange_code, 1);
        assert_eq!(h.notifier.errors().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_redirect_never_fires() {
        let h = harness();
        let ctx = OAuthCallbackContext::from_query("error=access_denied");

        h.reconciler.reconcile(&ctx).await;
        h.reconciler.cancel_pending_redirect();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.navigator.visits().is_empty());
    }
}
