//! # In-Memory Identity Service
//!
//! A complete `IdentityService` backed by process memory, with failure
//! injection and call counters. Used by tests and the CLI.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::errors::{AuthError, AuthResult};
use super::identity::{
    AuthChangeEvent, IdentityRecord, IdentityService, Session, SignUpMetadata, SignUpResponse,
    StoredProfile,
};
use super::oauth::{AuthProvider, OAuthRedirect};

const EVENT_CAPACITY: usize = 64;
const SESSION_TTL_HOURS: i64 = 1;
const AUTHORIZE_BASE: &str = "https://identity.local/auth/v1/authorize";

// ==================
// Call Counters
// ==================

#[derive(Debug, Default)]
struct CallCounters {
    get_current_session: AtomicU64,
    sign_in_with_password: AtomicU64,
    sign_up: AtomicU64,
    sign_in_with_oauth: AtomicU64,
    exchange_code: AtomicU64,
    sign_out: AtomicU64,
    reset_password: AtomicU64,
    check_connectivity: AtomicU64,
    fetch_profile: AtomicU64,
}

/// Number of calls made to each remote operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallSnapshot {
    pub get_current_session: u64,
    pub sign_in_with_password: u64,
    pub sign_up: u64,
    pub sign_in_with_oauth: u64,
    pub exchange_code: u64,
    pub sign_out: u64,
    pub reset_password: u64,
    pub check_connectivity: u64,
    pub fetch_profile: u64,
}

impl CallSnapshot {
    pub fn total(&self) -> u64 {
        self.get_current_session
            + self.sign_in_with_password
            + self.sign_up
            + self.sign_in_with_oauth
            + self.exchange_code
            + self.sign_out
            + self.reset_password
            + self.check_connectivity
            + self.fetch_profile
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::SeqCst);
}

// ==================
// Service
// ==================

#[derive(Debug, Clone)]
struct Account {
    password: String,
    identity: IdentityRecord,
}

/// In-memory identity service
pub struct InMemoryIdentityService {
    accounts: RwLock<HashMap<String, Account>>,
    profiles: RwLock<HashMap<String, StoredProfile>>,
    session: RwLock<Option<Session>>,
    codes: RwLock<HashMap<String, IdentityRecord>>,
    reset_requests: RwLock<Vec<(String, String)>>,
    events: broadcast::Sender<AuthChangeEvent>,
    session_failures: AtomicU32,
    session_failure: RwLock<AuthError>,
    session_latency: RwLock<Duration>,
    oauth_error: RwLock<Option<String>>,
    sign_out_error: RwLock<Option<String>>,
    profile_error: RwLock<Option<String>>,
    online: AtomicBool,
    require_confirmation: AtomicBool,
    calls: CallCounters,
}

impl InMemoryIdentityService {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            accounts: RwLock::new(HashMap::new()),
            profiles: RwLock::new(HashMap::new()),
            session: RwLock::new(None),
            codes: RwLock::new(HashMap::new()),
            reset_requests: RwLock::new(Vec::new()),
            events,
            session_failures: AtomicU32::new(0),
            session_failure: RwLock::new(outage()),
            session_latency: RwLock::new(Duration::ZERO),
            oauth_error: RwLock::new(None),
            sign_out_error: RwLock::new(None),
            profile_error: RwLock::new(None),
            online: AtomicBool::new(true),
            require_confirmation: AtomicBool::new(false),
            calls: CallCounters::default(),
        }
    }

    /// Register an email/password account
    pub fn register_account(
        &self,
        email: &str,
        password: &str,
        user_metadata: serde_json::Value,
    ) -> IdentityRecord {
        let identity = IdentityRecord::new(Uuid::new_v4().to_string(), email)
            .with_app_metadata(serde_json::json!({"provider": "email"}))
            .with_user_metadata(user_metadata);
        let mut accounts = self.accounts.write().unwrap();
        accounts.insert(
            email.to_lowercase(),
            Account {
                password: password.to_string(),
                identity: identity.clone(),
            },
        );
        identity
    }

    /// Store a profile row for an identity id
    pub fn insert_profile(&self, id: &str, profile: StoredProfile) {
        let mut profiles = self.profiles.write().unwrap();
        profiles.insert(id.to_string(), profile);
    }

    /// Issue an authorization code as if the provider redirected back
    ///
    /// Creates the identity on first use.
    pub fn issue_oauth_code(
        &self,
        provider: AuthProvider,
        email: &str,
        user_metadata: serde_json::Value,
    ) -> String {
        let identity = {
            let mut accounts = self.accounts.write().unwrap();
            accounts
                .entry(email.to_lowercase())
                .or_insert_with(|| Account {
                    password: String::new(),
                    identity: IdentityRecord::new(Uuid::new_v4().to_string(), email)
                        .with_app_metadata(serde_json::json!({"provider": provider.as_str()}))
                        .with_user_metadata(user_metadata),
                })
                .identity
                .clone()
        };

        let code = Uuid::new_v4().simple().to_string();
        let mut codes = self.codes.write().unwrap();
        codes.insert(code.clone(), identity);
        code
    }

    /// Make a registered account the current session without emitting events
    ///
    /// Simulates a session persisted from a previous visit.
    pub fn restore_session(&self, email: &str) -> Option<Session> {
        let identity = {
            let accounts = self.accounts.read().unwrap();
            accounts.get(&email.to_lowercase())?.identity.clone()
        };
        let session = issue_session(identity);
        *self.session.write().unwrap() = Some(session.clone());
        Some(session)
    }

    /// Push an auth state change to subscribers
    pub fn emit(&self, event: AuthChangeEvent) {
        let _ = self.events.send(event);
    }

    /// Fail the next `count` session checks with `ServiceUnavailable`
    pub fn fail_next_session_checks(&self, count: u32) {
        self.fail_next_session_checks_with(count, outage());
    }

    /// Fail the next `count` session checks with `error`
    pub fn fail_next_session_checks_with(&self, count: u32, error: AuthError) {
        *self.session_failure.write().unwrap() = error;
        self.session_failures.store(count, Ordering::SeqCst);
    }

    /// Delay every session check by `latency`
    pub fn set_session_latency(&self, latency: Duration) {
        *self.session_latency.write().unwrap() = latency;
    }

    /// Make OAuth redirect requests fail with this message
    pub fn set_oauth_error(&self, message: Option<String>) {
        *self.oauth_error.write().unwrap() = message;
    }

    pub fn set_sign_out_error(&self, message: Option<String>) {
        *self.sign_out_error.write().unwrap() = message;
    }

    /// Make profile lookups fail with an unexpected error
    pub fn set_profile_lookup_error(&self, message: Option<String>) {
        *self.profile_error.write().unwrap() = message;
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Withhold sessions from new sign-ups until the email is confirmed
    pub fn require_email_confirmation(&self, required: bool) {
        self.require_confirmation.store(required, Ordering::SeqCst);
    }

    pub fn current_session(&self) -> Option<Session> {
        self.session.read().unwrap().clone()
    }

    /// Password reset requests received, as (email, redirect_to)
    pub fn reset_requests(&self) -> Vec<(String, String)> {
        self.reset_requests.read().unwrap().clone()
    }

    pub fn calls(&self) -> CallSnapshot {
        let c = &self.calls;
        CallSnapshot {
            get_current_session: c.get_current_session.load(Ordering::SeqCst),
            sign_in_with_password: c.sign_in_with_password.load(Ordering::SeqCst),
            sign_up: c.sign_up.load(Ordering::SeqCst),
            sign_in_with_oauth: c.sign_in_with_oauth.load(Ordering::SeqCst),
            exchange_code: c.exchange_code.load(Ordering::SeqCst),
            sign_out: c.sign_out.load(Ordering::SeqCst),
            reset_password: c.reset_password.load(Ordering::SeqCst),
            check_connectivity: c.check_connectivity.load(Ordering::SeqCst),
            fetch_profile: c.fetch_profile.load(Ordering::SeqCst),
        }
    }

    fn ensure_online(&self) -> AuthResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AuthError::ServiceUnavailable(
                "Failed to fetch: network unreachable".to_string(),
            ))
        }
    }

    fn start_session(&self, identity: IdentityRecord) -> Session {
        let session = issue_session(identity);
        *self.session.write().unwrap() = Some(session.clone());
        self.emit(AuthChangeEvent::SignedIn(session.clone()));
        session
    }
}

impl Default for InMemoryIdentityService {
    fn default() -> Self {
        Self::new()
    }
}

fn issue_session(identity: IdentityRecord) -> Session {
    Session {
        access_token: Uuid::new_v4().to_string(),
        identity,
        expires_at: Utc::now() + ChronoDuration::hours(SESSION_TTL_HOURS),
    }
}

fn outage() -> AuthError {
    AuthError::ServiceUnavailable("simulated identity service outage".to_string())
}

#[async_trait]
impl IdentityService for InMemoryIdentityService {
    async fn get_current_session(&self) -> AuthResult<Option<Session>> {
        bump(&self.calls.get_current_session);
        self.ensure_online()?;

        let latency = *self.session_latency.read().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let failed = self
            .session_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(self.session_failure.read().unwrap().clone());
        }

        Ok(self.session.read().unwrap().clone())
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<Session> {
        bump(&self.calls.sign_in_with_password);
        self.ensure_online()?;

        let identity = {
            let accounts = self.accounts.read().unwrap();
            match accounts.get(&email.to_lowercase()) {
                Some(account) if !account.password.is_empty() && account.password == password => {
                    account.identity.clone()
                }
                _ => {
                    return Err(AuthError::InvalidCredentials(
                        "Invalid login credentials".to_string(),
                    ))
                }
            }
        };

        Ok(self.start_session(identity))
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> AuthResult<SignUpResponse> {
        bump(&self.calls.sign_up);
        self.ensure_online()?;

        if self.accounts.read().unwrap().contains_key(&email.to_lowercase()) {
            return Err(AuthError::Validation("User already registered".to_string()));
        }

        let identity = self.register_account(
            email,
            password,
            serde_json::json!({
                "full_name": metadata.name,
                "role": metadata.role.as_str(),
            }),
        );

        let session = if self.require_confirmation.load(Ordering::SeqCst) {
            None
        } else {
            Some(self.start_session(identity.clone()))
        };

        Ok(SignUpResponse { identity, session })
    }

    async fn sign_in_with_oauth(
        &self,
        provider: AuthProvider,
        redirect_to: &str,
    ) -> AuthResult<OAuthRedirect> {
        bump(&self.calls.sign_in_with_oauth);
        self.ensure_online()?;

        if let Some(message) = self.oauth_error.read().unwrap().clone() {
            return Err(AuthError::Service(message));
        }

        Ok(OAuthRedirect {
            provider,
            url: format!(
                "{}?provider={}&redirect_to={}",
                AUTHORIZE_BASE,
                provider.as_str(),
                urlencoding::encode(redirect_to)
            ),
            redirect_to: redirect_to.to_string(),
        })
    }

    async fn exchange_code_for_session(&self, code: &str) -> AuthResult<Session> {
        bump(&self.calls.exchange_code);
        self.ensure_online()?;

        let identity = self.codes.write().unwrap().remove(code).ok_or_else(|| {
            AuthError::Service("Invalid or expired authorization code".to_string())
        })?;

        Ok(self.start_session(identity))
    }

    async fn sign_out(&self) -> AuthResult<()> {
        bump(&self.calls.sign_out);
        self.ensure_online()?;

        if let Some(message) = self.sign_out_error.read().unwrap().clone() {
            return Err(AuthError::Service(message));
        }

        self.session.write().unwrap().take();
        self.emit(AuthChangeEvent::SignedOut);
        Ok(())
    }

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> AuthResult<()> {
        bump(&self.calls.reset_password);
        self.ensure_online()?;

        let mut requests = self.reset_requests.write().unwrap();
        requests.push((email.to_string(), redirect_to.to_string()));
        Ok(())
    }

    async fn check_connectivity(&self) -> AuthResult<()> {
        bump(&self.calls.check_connectivity);
        self.ensure_online()
    }

    async fn fetch_profile(&self, id: &str) -> AuthResult<StoredProfile> {
        bump(&self.calls.fetch_profile);

        if let Some(message) = self.profile_error.read().unwrap().clone() {
            return Err(AuthError::Service(message));
        }

        self.profiles
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(AuthError::ProfileNotFound)
    }

    fn on_auth_state_change(&self) -> broadcast::Receiver<AuthChangeEvent> {
        self.events.subscribe()
    }
}

// ==================
// Tests
// ==================
