//! # Session Store
//!
//! Process-wide holder of the session state and the single answer to
//! "is the visitor signed in". Only the bootstrapper and the auth
//! operations write; everything else reads a snapshot or watches for
//! changes.
//!
//! Three counters guard against stale writes:
//!
//! - `epoch` advances on every sign-out. A resolution that started in an
//!   older epoch must not resurrect a user.
//! - `generation` advances whenever an auth operation sets the user. A
//!   bootstrap cycle that started in an older generation must not
//!   overwrite that user.
//! - `writes` counts every committed change, for observing that nothing
//!   was written after teardown.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use super::errors::AuthError;
use super::user::User;

// ==================
// Session State
// ==================

/// Snapshot of the session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub user: Option<User>,
    /// Consumers must not redirect while this is set
    pub is_loading: bool,
    pub is_logging_out: bool,
    pub error: Option<AuthError>,
    /// Bootstrap attempts made in the current cycle
    pub retry_count: u32,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Settled enough to render and route
    pub fn is_ready(&self) -> bool {
        !self.is_loading && !self.is_logging_out
    }

    /// The shape older consumers read
    pub fn legacy_view(&self) -> LegacyAuthView {
        LegacyAuthView {
            user: self.user.clone(),
            loading: self.is_loading || self.is_logging_out,
            is_authenticated: self.is_authenticated(),
            is_logging_out: self.is_logging_out,
        }
    }
}

impl Default for SessionState {
    /// Every load starts out loading
    fn default() -> Self {
        Self {
            user: None,
            is_loading: true,
            is_logging_out: false,
            error: None,
            retry_count: 0,
        }
    }
}

/// Legacy auth context shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyAuthView {
    pub user: Option<User>,
    pub loading: bool,
    pub is_authenticated: bool,
    pub is_logging_out: bool,
}

// ==================
// Store
// ==================

/// Shared session store
pub struct SessionStore {
    state: watch::Sender<SessionState>,
    epoch: AtomicU64,
    generation: AtomicU64,
    writes: AtomicU64,
}

impl SessionStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            state,
            epoch: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receive every subsequent change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_ready()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    /// Sign-out generation
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Number of users set by auth operations
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Number of committed writes
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Apply a change and notify watchers
    pub fn update(&self, f: impl FnOnce(&mut SessionState)) {
        self.state.send_modify(f);
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    /// Set the user and settle loading
    ///
    /// Advances the generation, superseding any bootstrap cycle in flight.
    pub fn set_user(&self, user: Option<User>) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.update(|s| {
            s.user = user;
            s.is_loading = false;
            s.error = None;
        });
    }

    pub fn set_loading(&self, loading: bool) {
        self.update(|s| s.is_loading = loading);
    }

    /// Record an error and settle loading without touching the user
    pub fn set_error(&self, error: AuthError) {
        self.update(|s| {
            s.error = Some(error);
            s.is_loading = false;
        });
    }

    /// Enter the logging-out phase
    ///
    /// Advances the epoch and clears the user. The returned guard clears
    /// the logging-out flag when dropped, however the sign-out ends.
    pub fn begin_logout(self: &Arc<Self>) -> LogoutGuard {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.update(|s| {
            s.is_logging_out = true;
            s.user = None;
            s.error = None;
            s.is_loading = false;
        });
        LogoutGuard {
            store: Arc::clone(self),
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the logging-out flag for the duration of a sign-out
pub struct LogoutGuard {
    store: Arc<SessionStore>,
}

impl Drop for LogoutGuard {
    fn drop(&mut self) {
        self.store.update(|s| s.is_logging_out = false);
    }
}

// ==================
// Tests
// ==================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::oauth::AuthProvider;
    use crate::auth::user::Role;

    fn user() -> User {
        User {
            id: "u-1".to_string(),
            email: "doc@clinic.org".to_string(),
            name: "Doc".to_string(),
            role: Role::Doctor,
            provider: AuthProvider::Email,
            picture: None,
            patient_id: None,
        }
    }

    #[test]
    fn test_initial_state_is_loading() {
        let store = SessionStore::new();
        let state = store.snapshot();
        assert!(state.is_loading);
        assert!(!state.is_ready());
        assert!(!state.is_authenticated());
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn test_set_user_settles_loading() {
        let store = SessionStore::new();
        store.set_user(Some(user()));

        assert!(store.is_authenticated());
        assert!(store.is_ready());
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.generation(), 1);
    }

    #[test]
    fn test_plain_updates_keep_generation() {
        let store = SessionStore::new();
        store.update(|s| s.is_loading = false);
        store.set_loading(true);
        store.set_error(AuthError::Timeout(5000));

        assert_eq!(store.generation(), 0);
        assert_eq!(store.write_count(), 3);
    }

    #[test]
    fn test_set_error_keeps_user() {
        let store = SessionStore::new();
        store.set_user(Some(user()));
        store.set_error(AuthError::Timeout(5000));

        let state = store.snapshot();
        assert!(state.is_authenticated());
        assert_eq!(state.error, Some(AuthError::Timeout(5000)));
    }

    #[test]
    fn test_logout_guard_releases_on_drop() {
        let store = SessionStore::shared();
        store.set_user(Some(user()));
        let epoch = store.epoch();

        {
            let _guard = store.begin_logout();
            let state = store.snapshot();
            assert!(state.is_logging_out);
            assert!(!state.is_ready());
            assert!(!state.is_authenticated());
        }

        assert!(!store.snapshot().is_logging_out);
        assert_eq!(store.epoch(), epoch + 1);
    }

    #[tokio::test]
    async fn test_watchers_see_changes() {
        let store = SessionStore::new();
        let mut rx = store.subscribe();

        store.set_user(Some(user()));
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_authenticated());
    }

    #[test]
    fn test_legacy_view_shape() {
        let store = SessionStore::new();
        store.set_user(Some(user()));

        let value = serde_json::to_value(store.snapshot().legacy_view()).unwrap();
        assert_eq!(value["isAuthenticated"], true);
        assert_eq!(value["loading"], false);
        assert_eq!(value["isLoggingOut"], false);
        assert_eq!(value["user"]["email"], "doc@clinic.org");
    }
}
