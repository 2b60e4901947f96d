//! # Session Bootstrap
//!
//! Resolves the session once per load: a cached demo user wins, then the
//! identity service's current session, otherwise signed out. Session
//! checks run under a deadline and are retried with exponential backoff;
//! when the last attempt fails the dashboard carries on signed out.
//!
//! The bootstrapper also listens to the identity service's auth state
//! changes for as long as it is mounted.
//!
//! Writes are dropped when any of these hold:
//!
//! - the bootstrapper has been unmounted
//! - a newer bootstrap cycle has started
//! - a sign-out happened while the cycle was in flight
//! - a login committed a user while the cycle was in flight

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use super::demo::{DemoCache, DemoCredentialTable};
use super::errors::AuthError;
use super::identity::{AuthChangeEvent, IdentityRecord, IdentityService};
use super::profile::resolve_user;
use super::shell::{Notice, Notifier};
use super::store::{SessionState, SessionStore};
use super::user::User;
use crate::config::AuthConfig;

// ==================
// Policy
// ==================

/// Timing for session checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapPolicy {
    pub session_timeout: Duration,
    /// Session checks per cycle, first try included
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl BootstrapPolicy {
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            session_timeout: config.session_timeout(),
            max_attempts: config.session_max_attempts.max(1),
            backoff_base: config.session_backoff_base(),
        }
    }

    /// Wait after failed attempt `attempt` (1-based): base, 2x base, 4x base...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}

impl Default for BootstrapPolicy {
    fn default() -> Self {
        Self::from_config(&AuthConfig::default())
    }
}

// ==================
// Outcome
// ==================

/// How a bootstrap cycle ended
#[derive(Debug, Clone, PartialEq)]
pub enum BootstrapOutcome {
    /// Restored from the demo cache without any remote call
    DemoUser(User),
    RemoteUser(User),
    SignedOut,
    /// Every attempt failed; continuing signed out
    Unavailable(AuthError),
    /// Unmounted, replaced by a newer cycle, or overtaken by a sign-out
    Superseded,
}

/// What a cycle must still match to write
#[derive(Debug, Clone, Copy)]
struct CycleToken {
    ticket: u64,
    epoch: u64,
    generation: u64,
}

enum Step {
    ReadDemoCache,
    CheckSession { attempt: u32 },
    Backoff { attempt: u32, error: AuthError },
    Done(BootstrapOutcome),
}

// ==================
// Bootstrapper
// ==================

/// Resolves and maintains the initial session
pub struct SessionBootstrapper {
    service: Arc<dyn IdentityService>,
    store: Arc<SessionStore>,
    cache: Arc<dyn DemoCache>,
    demo_table: Option<DemoCredentialTable>,
    notifier: Arc<dyn Notifier>,
    policy: BootstrapPolicy,
    mounted: AtomicBool,
    cycle: AtomicU64,
    listener: Mutex<Option<JoinHandle<()>>>,
    cycles: Mutex<Vec<AbortHandle>>,
}

impl SessionBootstrapper {
    pub fn new(
        service: Arc<dyn IdentityService>,
        store: Arc<SessionStore>,
        cache: Arc<dyn DemoCache>,
        notifier: Arc<dyn Notifier>,
        policy: BootstrapPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            service,
            store,
            cache,
            demo_table: Some(DemoCredentialTable::standard()),
            notifier,
            policy,
            mounted: AtomicBool::new(false),
            cycle: AtomicU64::new(0),
            listener: Mutex::new(None),
            cycles: Mutex::new(Vec::new()),
        })
    }

    /// Same, but with demo users resolved against `table` (or ignored when `None`)
    pub fn with_demo_table(
        service: Arc<dyn IdentityService>,
        store: Arc<SessionStore>,
        cache: Arc<dyn DemoCache>,
        notifier: Arc<dyn Notifier>,
        policy: BootstrapPolicy,
        demo_table: Option<DemoCredentialTable>,
    ) -> Arc<Self> {
        Arc::new(Self {
            service,
            store,
            cache,
            demo_table,
            notifier,
            policy,
            mounted: AtomicBool::new(false),
            cycle: AtomicU64::new(0),
            listener: Mutex::new(None),
            cycles: Mutex::new(Vec::new()),
        })
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    /// Start listening for auth changes and run a bootstrap cycle
    ///
    /// Mounting again starts a fresh cycle (superseding any in flight)
    /// but keeps the single existing listener.
    pub fn mount(self: &Arc<Self>) -> JoinHandle<BootstrapOutcome> {
        self.mounted.store(true, Ordering::SeqCst);
        self.ensure_listener();

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run().await });

        let mut cycles = self.cycles.lock().unwrap_or_else(PoisonError::into_inner);
        cycles.retain(|h| !h.is_finished());
        cycles.push(handle.abort_handle());
        handle
    }

    /// Stop listening and drop every in-flight cycle
    pub fn unmount(&self) {
        self.mounted.store(false, Ordering::SeqCst);

        if let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
        for cycle in self
            .cycles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            cycle.abort();
        }
        debug!("session bootstrapper unmounted");
    }

    fn ensure_listener(self: &Arc<Self>) {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("auth state listener already active");
            return;
        }

        let rx = self.service.on_auth_state_change();
        let this = Arc::clone(self);
        *listener = Some(tokio::spawn(async move { this.listen(rx).await }));
    }

    /// Run one bootstrap cycle to completion
    pub async fn run(&self) -> BootstrapOutcome {
        let cycle = CycleToken {
            ticket: self.cycle.fetch_add(1, Ordering::SeqCst) + 1,
            epoch: self.store.epoch(),
            generation: self.store.generation(),
        };

        self.commit(cycle, |s| {
            s.is_loading = true;
            s.retry_count = 0;
        });

        let mut step = Step::ReadDemoCache;
        loop {
            step = match step {
                Step::ReadDemoCache => match self.cached_demo_user() {
                    Some(user) => Step::Done(BootstrapOutcome::DemoUser(user)),
                    None => Step::CheckSession { attempt: 1 },
                },
                Step::CheckSession { attempt } => {
                    if !self.commit(cycle, |s| s.retry_count = attempt - 1) {
                        Step::Done(BootstrapOutcome::Superseded)
                    } else {
                        match self.check_session().await {
                            Ok(Some(user)) => Step::Done(BootstrapOutcome::RemoteUser(user)),
                            Ok(None) => Step::Done(BootstrapOutcome::SignedOut),
                            Err(error)
                                if error.is_retryable() && attempt < self.policy.max_attempts =>
                            {
                                Step::Backoff { attempt, error }
                            }
                            Err(error) => Step::Done(BootstrapOutcome::Unavailable(error)),
                        }
                    }
                }
                Step::Backoff { attempt, error } => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "session check failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    Step::CheckSession {
                        attempt: attempt + 1,
                    }
                }
                Step::Done(outcome) => return self.settle(cycle, outcome),
            };
        }
    }

    async fn check_session(&self) -> Result<Option<User>, AuthError> {
        let session = tokio::time::timeout(
            self.policy.session_timeout,
            self.service.get_current_session(),
        )
        .await
        .map_err(|_| AuthError::Timeout(self.policy.session_timeout.as_millis() as u64))??;

        match session {
            Some(session) => Ok(Some(resolve_user(self.service.as_ref(), &session.identity).await)),
            None => Ok(None),
        }
    }

    fn cached_demo_user(&self) -> Option<User> {
        let table = self.demo_table.as_ref()?;
        let entry = match self.cache.load() {
            Ok(entry) => entry?,
            Err(e) => {
                warn!(error = %e, "demo cache unreadable");
                return None;
            }
        };

        match entry.to_user(table) {
            Some(user) => {
                info!(email = %user.email, role = %user.role, "restored demo session");
                Some(user)
            }
            None => {
                warn!("demo cache entry lacks email or role, discarding");
                if let Err(e) = self.cache.clear() {
                    warn!(error = %e, "failed to clear demo cache");
                }
                None
            }
        }
    }

    fn settle(&self, cycle: CycleToken, outcome: BootstrapOutcome) -> BootstrapOutcome {
        let committed = match &outcome {
            BootstrapOutcome::DemoUser(user) | BootstrapOutcome::RemoteUser(user) => {
                let user = user.clone();
                self.commit(cycle, |s| {
                    s.user = Some(user);
                    s.is_loading = false;
                    s.error = None;
                })
            }
            BootstrapOutcome::SignedOut => self.commit(cycle, |s| {
                s.user = None;
                s.is_loading = false;
                s.error = None;
            }),
            BootstrapOutcome::Unavailable(error) => {
                let stored = error.clone();
                let committed = self.commit(cycle, |s| {
                    s.user = None;
                    s.is_loading = false;
                    s.error = Some(stored);
                });
                if committed {
                    error!(
                        code = error.code(),
                        error = %error,
                        "identity service unavailable, continuing signed out"
                    );
                    self.notifier
                        .notify(Notice::error("Service unavailable", error.user_message()));
                }
                committed
            }
            BootstrapOutcome::Superseded => false,
        };

        if committed {
            outcome
        } else {
            debug!(ticket = cycle.ticket, "bootstrap cycle superseded");
            BootstrapOutcome::Superseded
        }
    }

    fn is_current(&self, ticket: u64) -> bool {
        self.is_mounted() && self.cycle.load(Ordering::SeqCst) == ticket
    }

    /// Write to the store only while this cycle is still authoritative
    fn commit(&self, cycle: CycleToken, f: impl FnOnce(&mut SessionState)) -> bool {
        if !self.is_current(cycle.ticket) {
            return false;
        }
        if self.store.epoch() != cycle.epoch {
            debug!(ticket = cycle.ticket, "sign-out during bootstrap, dropping resolution");
            return false;
        }
        if self.store.generation() != cycle.generation {
            debug!(ticket = cycle.ticket, "user signed in during bootstrap, dropping resolution");
            return false;
        }
        self.store.update(f);
        true
    }

    // ==================
    // Auth State Listener
    // ==================

    async fn listen(self: Arc<Self>, mut rx: broadcast::Receiver<AuthChangeEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "auth state listener lagged");
                }
                Err(RecvError::Closed) => {
                    debug!("auth state stream closed");
                    break;
                }
            }
        }
    }

    async fn handle_event(&self, event: AuthChangeEvent) {
        debug!(event = event.name(), "auth state change");
        match event {
            AuthChangeEvent::SignedIn(session) => self.apply_identity(&session.identity).await,
            AuthChangeEvent::UserUpdated(identity) => {
                if self.store.is_authenticated() {
                    self.apply_identity(&identity).await;
                }
            }
            AuthChangeEvent::TokenRefreshed(_) => {}
            AuthChangeEvent::SignedOut => {
                if !self.is_mounted() {
                    return;
                }
                if let Err(e) = self.cache.clear() {
                    warn!(error = %e, "failed to clear demo cache on sign-out");
                }
                self.store.update(|s| {
                    s.user = None;
                    s.is_loading = false;
                });
            }
        }
    }

    async fn apply_identity(&self, identity: &IdentityRecord) {
        if !self.is_mounted() || self.store.snapshot().is_logging_out {
            return;
        }
        let epoch = self.store.epoch();
        let user = resolve_user(self.service.as_ref(), identity).await;

        if !self.is_mounted() || self.store.epoch() != epoch {
            return;
        }
        self.store.update(|s| {
            if !s.is_logging_out {
                s.user = Some(user);
                s.is_loading = false;
                s.error = None;
            }
        });
    }
}

// ==================
// Tests
// ==================
