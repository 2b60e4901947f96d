//! # Role Routing
//!
//! Landing route for a resolved role. Unknown roles get the patient
//! dashboard, the least privileged landing page.

use tracing::warn;

use super::user::Role;

pub const STAFF_DASHBOARD: &str = "/dashboard";
pub const PATIENT_DASHBOARD: &str = "/patient-dashboard";

/// Landing route for a known role
pub fn route_for(role: Role) -> &'static str {
    match role {
        Role::Doctor | Role::Receptionist | Role::Admin => STAFF_DASHBOARD,
        Role::Patient => PATIENT_DASHBOARD,
    }
}

/// Landing route for a raw role string
///
/// Callers must only route once the session is no longer loading.
pub fn route_for_role(role: &str) -> &'static str {
    match role.parse::<Role>() {
        Ok(role) => route_for(role),
        Err(_) => {
            warn!(role = %role, "unrecognized role, routing to patient dashboard");
            PATIENT_DASHBOARD
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_roles() {
        assert_eq!(route_for_role("doctor"), "/dashboard");
        assert_eq!(route_for_role("patient"), "/patient-dashboard");
        assert_eq!(route_for_role("receptionist"), "/dashboard");
        assert_eq!(route_for_role("admin"), "/dashboard");
    }

    #[test]
    fn test_unknown_role_gets_least_privilege() {
        assert_eq!(route_for_role("unknown"), "/patient-dashboard");
        assert_eq!(route_for_role(""), "/patient-dashboard");
    }

    #[test]
    fn test_typed_and_raw_agree() {
        for role in Role::ALL {
            assert_eq!(route_for(role), route_for_role(role.as_str()));
        }
    }
}
