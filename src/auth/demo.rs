//! # Demo Accounts
//!
//! Fixed credential pairs that sign in without the identity service,
//! and the single persisted slot that remembers a demo user between
//! loads. Production builds drop the credential resolver entirely.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use super::errors::AuthResult;
use super::oauth::AuthProvider;
use super::user::{email_local_part, Role, User};

/// Name of the persisted demo-user slot
pub const DEMO_USER_SLOT: &str = "demo_user";

const AVATAR_BASE: &str = "https://ui-avatars.com/api/";

// ==================
// Credential Resolver
// ==================

/// A fixed demo credential pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoAccount {
    pub email: String,
    pub password: String,
    pub role: Role,
    pub display_name: String,
}

impl DemoAccount {
    pub fn new(email: &str, password: &str, role: Role, display_name: &str) -> Self {
        Self {
            email: email.to_string(),
            password: password.to_string(),
            role,
            display_name: display_name.to_string(),
        }
    }
}

/// Decides whether a credential pair is handled locally
pub trait CredentialResolver: Send + Sync {
    /// The demo account for an exact email/password match
    fn resolve(&self, email: &str, password: &str) -> Option<DemoAccount>;
}

/// Table of demo accounts, one per role
#[derive(Debug, Clone)]
pub struct DemoCredentialTable {
    accounts: Vec<DemoAccount>,
}

impl DemoCredentialTable {
    pub fn new(accounts: Vec<DemoAccount>) -> Self {
        Self { accounts }
    }

    /// The stock demo accounts shipped with the dashboard
    pub fn standard() -> Self {
        Self::new(vec![
            DemoAccount::new("doctor@demo.health", "doctor123", Role::Doctor, "Dr. Demo Physician"),
            DemoAccount::new("patient@demo.health", "patient123", Role::Patient, "Demo Patient"),
            DemoAccount::new(
                "receptionist@demo.health",
                "reception123",
                Role::Receptionist,
                "Demo Receptionist",
            ),
            DemoAccount::new("admin@demo.health", "admin123", Role::Admin, "Demo Administrator"),
        ])
    }

    pub fn accounts(&self) -> &[DemoAccount] {
        &self.accounts
    }

    fn display_name_for(&self, role: Role) -> Option<&str> {
        self.accounts
            .iter()
            .find(|a| a.role == role)
            .map(|a| a.display_name.as_str())
    }
}

impl Default for DemoCredentialTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl CredentialResolver for DemoCredentialTable {
    fn resolve(&self, email: &str, password: &str) -> Option<DemoAccount> {
        self.accounts
            .iter()
            .find(|a| a.email == email && a.password == password)
            .cloned()
    }
}

/// Deterministic avatar URL for a display name
pub fn avatar_url(name: &str) -> String {
    format!("{}?name={}&background=random", AVATAR_BASE, urlencoding::encode(name))
}

/// Build a demo user with a fresh unique id
pub fn synthesize_demo_user(account: &DemoAccount) -> User {
    let id = format!("demo-{}-{}", account.role, Uuid::new_v4());
    User {
        patient_id: (account.role == Role::Patient).then(|| id.clone()),
        id,
        email: account.email.clone(),
        name: account.display_name.clone(),
        role: account.role,
        provider: AuthProvider::Email,
        picture: Some(avatar_url(&account.display_name)),
    }
}

// ==================
// Cache Entry
// ==================

/// Persisted demo user, possibly partial or written by an older build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoCacheEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub patient_id: Option<String>,
}

impl DemoCacheEntry {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: Some(user.id.clone()),
            email: Some(user.email.clone()),
            name: Some(user.name.clone()),
            role: Some(user.role.as_str().to_string()),
            provider: Some(user.provider.as_str().to_string()),
            picture: user.picture.clone(),
            patient_id: user.patient_id.clone(),
        }
    }

    /// Complete user from this entry
    ///
    /// Needs an email and a recognized role; everything else is filled
    /// in deterministically.
    pub fn to_user(&self, table: &DemoCredentialTable) -> Option<User> {
        let email = present(&self.email)?;
        let role = present(&self.role)?.parse::<Role>().ok()?;

        let name = present(&self.name)
            .or_else(|| table.display_name_for(role).map(str::to_string))
            .unwrap_or_else(|| email_local_part(&email).to_string());
        let id = present(&self.id)
            .unwrap_or_else(|| format!("demo-{}-{}", role, email_local_part(&email)));
        let picture = present(&self.picture).or_else(|| Some(avatar_url(&name)));
        let provider = present(&self.provider)
            .and_then(|p| p.parse::<AuthProvider>().ok())
            .unwrap_or(AuthProvider::Email);
        let patient_id = (role == Role::Patient)
            .then(|| present(&self.patient_id).unwrap_or_else(|| id.clone()));

        Some(User {
            id,
            email,
            name,
            role,
            provider,
            picture,
            patient_id,
        })
    }
}

fn present(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ==================
// Cache Storage
// ==================

/// The single persisted demo-user slot
pub trait DemoCache: Send + Sync {
    /// Read the slot. Corrupt contents count as empty.
    fn load(&self) -> AuthResult<Option<DemoCacheEntry>>;

    fn store(&self, user: &User) -> AuthResult<()>;

    fn clear(&self) -> AuthResult<()>;
}

fn parse_slot(raw: &str) -> Option<DemoCacheEntry> {
    match serde_json::from_str::<DemoCacheEntry>(raw) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(slot = DEMO_USER_SLOT, error = %e, "discarding corrupt demo cache entry");
            None
        }
    }
}

/// Demo cache held in process memory
#[derive(Debug, Default)]
pub struct InMemoryDemoCache {
    slot: RwLock<Option<String>>,
}

impl InMemoryDemoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw slot contents
    pub fn raw(&self) -> Option<String> {
        self.slot.read().unwrap().clone()
    }

    /// Overwrite the raw slot contents
    pub fn set_raw(&self, raw: &str) {
        *self.slot.write().unwrap() = Some(raw.to_string());
    }
}

impl DemoCache for InMemoryDemoCache {
    fn load(&self) -> AuthResult<Option<DemoCacheEntry>> {
        let raw = self.raw();
        match raw.as_deref().map(parse_slot) {
            Some(None) => {
                self.clear()?;
                Ok(None)
            }
            Some(entry) => Ok(entry),
            None => Ok(None),
        }
    }

    fn store(&self, user: &User) -> AuthResult<()> {
        let raw = serde_json::to_string(&DemoCacheEntry::from_user(user))?;
        *self.slot.write().unwrap() = Some(raw);
        Ok(())
    }

    fn clear(&self) -> AuthResult<()> {
        self.slot.write().unwrap().take();
        Ok(())
    }
}

/// Demo cache persisted as one JSON file
#[derive(Debug, Clone)]
pub struct FileDemoCache {
    path: PathBuf,
}

impl FileDemoCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Slot file `demo_user.json` inside `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(format!("{}.json", DEMO_USER_SLOT)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DemoCache for FileDemoCache {
    fn load(&self) -> AuthResult<Option<DemoCacheEntry>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        match parse_slot(&raw) {
            Some(entry) => Ok(Some(entry)),
            None => {
                self.clear()?;
                Ok(None)
            }
        }
    }

    fn store(&self, user: &User) -> AuthResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_json::to_string_pretty(&DemoCacheEntry::from_user(user))?;
        fs::write(&self.path, raw)?;
        Ok(())
    }

    fn clear(&self) -> AuthResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ==================
// Tests
// ==================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table_covers_every_role() {
        let table = DemoCredentialTable::standard();
        for role in Role::ALL {
            assert!(table.accounts().iter().any(|a| a.role == role));
        }
    }

    #[test]
    fn test_resolve_requires_exact_match() {
        let table = DemoCredentialTable::standard();
        assert!(table.resolve("doctor@demo.health", "doctor123").is_some());
        assert!(table.resolve("doctor@demo.health", "wrong").is_none());
        assert!(table.resolve("Doctor@demo.health", "doctor123").is_none());
        assert!(table.resolve("doctor@demo.health", "patient123").is_none());
    }

    #[test]
    fn test_synthesized_ids_are_unique() {
        let table = DemoCredentialTable::standard();
        let account = table.resolve("patient@demo.health", "patient123").unwrap();

        let a = synthesize_demo_user(&account);
        let b = synthesize_demo_user(&account);
        assert_ne!(a.id, b.id);
        assert_eq!(a.role, Role::Patient);
        assert_eq!(a.patient_id.as_deref(), Some(a.id.as_str()));
        assert_eq!(a.name, "Demo Patient");
    }

    #[test]
    fn test_partial_entry_is_completed() {
        let table = DemoCredentialTable::standard();
        let entry = DemoCacheEntry {
            email: Some("doctor@demo.health".to_string()),
            role: Some("doctor".to_string()),
            ..Default::default()
        };

        let first = entry.to_user(&table).unwrap();
        let second = entry.to_user(&table).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.name, "Dr. Demo Physician");
        assert_eq!(first.id, "demo-doctor-doctor");
        assert!(first.picture.is_some());
        assert_eq!(first.provider, AuthProvider::Email);
    }

    #[test]
    fn test_entry_without_role_is_invalid() {
        let table = DemoCredentialTable::standard();
        let entry = DemoCacheEntry {
            email: Some("doctor@demo.health".to_string()),
            ..Default::default()
        };
        assert!(entry.to_user(&table).is_none());

        let entry = DemoCacheEntry {
            email: Some("x@demo.health".to_string()),
            role: Some("janitor".to_string()),
            ..Default::default()
        };
        assert!(entry.to_user(&table).is_none());
    }

    #[test]
    fn test_memory_cache_round_trip_and_clear() {
        let cache = InMemoryDemoCache::new();
        let table = DemoCredentialTable::standard();
        let user = synthesize_demo_user(&table.accounts()[0]);

        cache.store(&user).unwrap();
        let restored = cache.load().unwrap().unwrap().to_user(&table).unwrap();
        assert_eq!(restored, user);

        cache.clear().unwrap();
        assert!(cache.load().unwrap().is_none());
        assert!(cache.raw().is_none());
    }

    #[test]
    fn test_corrupt_slot_is_cleared() {
        let cache = InMemoryDemoCache::new();
        cache.set_raw("{not json");

        assert!(cache.load().unwrap().is_none());
        assert!(cache.raw().is_none());
    }

    #[test]
    fn test_file_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileDemoCache::in_dir(dir.path());
        let table = DemoCredentialTable::standard();
        let user = synthesize_demo_user(&table.accounts()[3]);

        assert!(cache.load().unwrap().is_none());
        cache.store(&user).unwrap();
        assert!(cache.path().ends_with("demo_user.json"));

        let entry = cache.load().unwrap().unwrap();
        assert_eq!(entry.role.as_deref(), Some("admin"));

        cache.clear().unwrap();
        assert!(!cache.path().exists());
        // Clearing an empty slot is fine
        cache.clear().unwrap();
    }

    #[test]
    fn test_file_cache_discards_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileDemoCache::in_dir(dir.path());
        fs::write(cache.path(), "garbage").unwrap();

        assert!(cache.load().unwrap().is_none());
        assert!(!cache.path().exists());
    }
}
