//! # Healthdash Auth Module
//!
//! Session orchestration for the dashboard: bootstrapping the session on
//! load, password/social sign-in, sign-out, OAuth callback reconciliation
//! and role-based landing routes, all against an injected identity
//! service.

pub mod bootstrap;
pub mod callback;
pub mod demo;
pub mod errors;
pub mod identity;
pub mod memory;
pub mod oauth;
pub mod operations;
pub mod profile;
pub mod router;
pub mod shell;
pub mod store;
pub mod user;

pub use bootstrap::{BootstrapOutcome, BootstrapPolicy, SessionBootstrapper};
pub use callback::{CallbackPhase, OAuthCallbackContext, OAuthCallbackReconciler};
pub use demo::{CredentialResolver, DemoCache, DemoCredentialTable, FileDemoCache, InMemoryDemoCache};
pub use errors::{AuthError, AuthResult, ProviderConfigIssue};
pub use identity::{AuthChangeEvent, IdentityRecord, IdentityService, Session, StoredProfile};
pub use memory::InMemoryIdentityService;
pub use oauth::AuthProvider;
pub use operations::{AuthOperations, ResetRequest};
pub use profile::format_user;
pub use router::{route_for, route_for_role};
pub use shell::{Navigator, Notice, Notifier};
pub use store::{LegacyAuthView, SessionState, SessionStore};
pub use user::{Role, User};
