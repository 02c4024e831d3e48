use serde::{Deserialize, Serialize};
use std::fmt;

use crate::CoreResult;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Passenger,
    Driver,
    Admin,
}

impl Role {
    /// Map a role claim from the identity provider. Plain `user` accounts ride as passengers.
    pub fn from_claim(claim: &str) -> Option<Role> {
        match claim.to_ascii_lowercase().as_str() {
            "passenger" | "user" => Some(Role::Passenger),
            "driver" => Some(Role::Driver),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Passenger => "passenger",
            Role::Driver => "driver",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A caller whose token has already been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// The external token verifier. Implementations check signature and expiry and
/// return the verified user id with its role claim.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> CoreResult<Identity>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_claims() {
        assert_eq!(Role::from_claim("user"), Some(Role::Passenger));
        assert_eq!(Role::from_claim("DRIVER"), Some(Role::Driver));
        assert_eq!(Role::from_claim("admin"), Some(Role::Admin));
        assert_eq!(Role::from_claim("GUEST"), None);
    }
}
