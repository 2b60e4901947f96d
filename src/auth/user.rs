//! # Users and Roles
//!
//! The normalized signed-in user shared by every part of the dashboard.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::errors::AuthError;
use super::oauth::AuthProvider;

// ==================
// Role
// ==================

/// Access level. Drives routing and which features are visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Doctor,
    Patient,
    Receptionist,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Doctor, Role::Patient, Role::Receptionist, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Doctor => "doctor",
            Role::Patient => "patient",
            Role::Receptionist => "receptionist",
            Role::Admin => "admin",
        }
    }
}

impl Default for Role {
    /// Least privilege
    fn default() -> Self {
        Role::Patient
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == normalized)
            .ok_or_else(|| AuthError::Validation(format!("Unknown role: {}", s)))
    }
}

// ==================
// User
// ==================

/// A signed-in dashboard user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub provider: AuthProvider,
    #[serde(default)]
    pub picture: Option<String>,
    /// Set for patients; equal to the user id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
}

impl User {
    pub fn is_patient(&self) -> bool {
        self.role == Role::Patient
    }
}

/// Basic email validation
pub fn is_valid_email(email: &str) -> bool {
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return false;
    }

    let local = parts[0];
    let domain = parts[1];

    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

/// Part of an email address before the `@`
pub fn email_local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}
