//! # Profile Formatting
//!
//! Turns a raw identity plus an optional stored profile row into a
//! normalized `User`. Each field is taken from the first source that
//! has a usable value:
//!
//! - name: profile → metadata full name → email local part
//! - role: profile → metadata → patient
//! - provider: profile → metadata (whitelisted) → email
//! - picture: profile → metadata avatar → none

use serde_json::Value;
use tracing::{debug, warn};

use super::errors::AuthError;
use super::identity::{IdentityRecord, IdentityService, StoredProfile};
use super::oauth::AuthProvider;
use super::user::{email_local_part, Role, User};

/// Build a `User` from an identity and its profile row, if any
pub fn format_user(identity: &IdentityRecord, profile: Option<&StoredProfile>) -> User {
    let name = profile
        .and_then(|p| non_empty(p.name.as_deref()))
        .or_else(|| metadata_str(&identity.user_metadata, &["full_name", "name"]))
        .unwrap_or_else(|| email_local_part(&identity.email).to_string());

    let role = profile
        .and_then(|p| parse_role(p.role.as_deref(), &identity.id))
        .or_else(|| {
            parse_role(
                metadata_str(&identity.user_metadata, &["role"]).as_deref(),
                &identity.id,
            )
        })
        .unwrap_or_default();

    let provider = profile
        .and_then(|p| parse_provider(p.provider.as_deref()))
        .or_else(|| {
            parse_provider(metadata_str(&identity.app_metadata, &["provider"]).as_deref())
        })
        .or_else(|| {
            parse_provider(metadata_str(&identity.user_metadata, &["provider"]).as_deref())
        })
        .unwrap_or(AuthProvider::Email);

    let picture = profile
        .and_then(|p| non_empty(p.picture.as_deref()))
        .or_else(|| metadata_str(&identity.user_metadata, &["avatar_url", "picture"]));

    let patient_id = (role == Role::Patient).then(|| identity.id.clone());

    User {
        id: identity.id.clone(),
        email: identity.email.clone(),
        name,
        role,
        provider,
        picture,
        patient_id,
    }
}

/// Look up the profile row and format the user
///
/// A missing row is the normal case for fresh accounts. Other lookup
/// failures are logged and the metadata-derived profile is used.
pub async fn resolve_user(service: &dyn IdentityService, identity: &IdentityRecord) -> User {
    match service.fetch_profile(&identity.id).await {
        Ok(profile) => format_user(identity, Some(&profile)),
        Err(AuthError::ProfileNotFound) => {
            debug!(user_id = %identity.id, "no stored profile, using identity metadata");
            format_user(identity, None)
        }
        Err(e) => {
            warn!(user_id = %identity.id, error = %e, "profile lookup failed, using identity metadata");
            format_user(identity, None)
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn metadata_str(metadata: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| non_empty(metadata.get(*key).and_then(Value::as_str)))
}

fn parse_role(value: Option<&str>, user_id: &str) -> Option<Role> {
    let raw = non_empty(value)?;
    match raw.parse::<Role>() {
        Ok(role) => Some(role),
        Err(_) => {
            warn!(user_id = %user_id, role = %raw, "ignoring unrecognized role");
            None
        }
    }
}

fn parse_provider(value: Option<&str>) -> Option<AuthProvider> {
    non_empty(value).and_then(|raw| raw.parse::<AuthProvider>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::memory::InMemoryIdentityService;
    use serde_json::json;

    fn identity() -> IdentityRecord {
        IdentityRecord::new("id-42", "jane.doe@clinic.org")
    }

    #[test]
    fn test_profile_takes_precedence() {
        let identity = identity()
            .with_user_metadata(json!({"full_name": "Meta Name", "role": "admin"}))
            .with_app_metadata(json!({"provider": "google"}));
        let profile = StoredProfile {
            name: Some("Dr. Jane".to_string()),
            role: Some("doctor".to_string()),
            picture: Some("https://img/jane.png".to_string()),
            provider: Some("github".to_string()),
        };

        let user = format_user(&identity, Some(&profile));
        assert_eq!(user.name, "Dr. Jane");
        assert_eq!(user.role, Role::Doctor);
        assert_eq!(user.provider, AuthProvider::GitHub);
        assert_eq!(user.picture.as_deref(), Some("https://img/jane.png"));
        assert_eq!(user.patient_id, None);
    }

    #[test]
    fn test_metadata_fallback() {
        let identity = identity()
            .with_user_metadata(json!({
                "full_name": "Jane Doe",
                "role": "receptionist",
                "avatar_url": "https://avatars/jane"
            }))
            .with_app_metadata(json!({"provider": "azure"}));

        let user = format_user(&identity, None);
        assert_eq!(user.name, "Jane Doe");
        assert_eq!(user.role, Role::Receptionist);
        assert_eq!(user.provider, AuthProvider::Azure);
        assert_eq!(user.picture.as_deref(), Some("https://avatars/jane"));
    }

    #[test]
    fn test_bare_identity_defaults() {
        let user = format_user(&identity(), None);
        assert_eq!(user.name, "jane.doe");
        assert_eq!(user.role, Role::Patient);
        assert_eq!(user.provider, AuthProvider::Email);
        assert_eq!(user.picture, None);
        assert_eq!(user.patient_id.as_deref(), Some("id-42"));
    }

    #[test]
    fn test_unknown_metadata_provider_falls_back_to_email() {
        let identity = identity().with_app_metadata(json!({"provider": "myspace"}));
        assert_eq!(format_user(&identity, None).provider, AuthProvider::Email);
    }

    #[test]
    fn test_blank_profile_fields_are_skipped() {
        let identity = identity().with_user_metadata(json!({"name": "From Meta"}));
        let profile = StoredProfile {
            name: Some("   ".to_string()),
            role: Some("superuser".to_string()),
            ..Default::default()
        };

        let user = format_user(&identity, Some(&profile));
        assert_eq!(user.name, "From Meta");
        assert_eq!(user.role, Role::Patient);
    }

    #[tokio::test]
    async fn test_resolve_user_without_profile_row() {
        let service = InMemoryIdentityService::new();
        let identity = identity().with_app_metadata(json!({"provider": "google"}));

        let user = resolve_user(&service, &identity).await;
        assert_eq!(user.role, Role::Patient);
        assert_eq!(user.provider, AuthProvider::Google);
        assert_eq!(user.patient_id.as_deref(), Some("id-42"));
    }

    #[tokio::test]
    async fn test_resolve_user_with_profile_row() {
        let service = InMemoryIdentityService::new();
        service.insert_profile(
            "id-42",
            StoredProfile {
                role: Some("doctor".to_string()),
                ..Default::default()
            },
        );

        let user = resolve_user(&service, &identity()).await;
        assert_eq!(user.role, Role::Doctor);
    }

    #[tokio::test]
    async fn test_resolve_user_survives_lookup_failure() {
        let service = InMemoryIdentityService::new();
        service.set_profile_lookup_error(Some("connection reset".to_string()));

        let user = resolve_user(&service, &identity()).await;
        assert_eq!(user.role, Role::Patient);
        assert_eq!(user.name, "jane.doe");
    }
}
