//! Caller identity and role model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role the client believes the caller holds.
///
/// The backend may lag behind this value while a freshly assigned role
/// propagates, which is why the privileged read path can still fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerRole {
    /// Loan officer working their own book.
    Agent,
    Manager,
    Admin,
    SuperAdmin,
}

impl CallerRole {
    /// Elevated roles read the whole lead table on the direct path.
    pub fn is_elevated(self) -> bool {
        matches!(self, Self::Manager | Self::Admin | Self::SuperAdmin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Manager => "manager",
            Self::Admin => "admin",
            Self::SuperAdmin => "super_admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "agent" => Some(Self::Agent),
            "manager" => Some(Self::Manager),
            "admin" => Some(Self::Admin),
            "super_admin" => Some(Self::SuperAdmin),
            _ => None,
        }
    }
}

/// Authenticated caller on whose behalf leads are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerScope {
    pub user_id: Uuid,
    pub role: CallerRole,
}

impl OwnerScope {
    pub fn new(user_id: Uuid, role: CallerRole) -> Self {
        Self { user_id, role }
    }

    /// Owner filter for the direct path; `None` means unfiltered.
    pub fn owner_filter(&self) -> Option<Uuid> {
        if self.role.is_elevated() {
            None
        } else {
            Some(self.user_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CallerRole, OwnerScope};
    use uuid::Uuid;

    #[test]
    fn elevated_roles_drop_owner_filter() {
        let user = Uuid::new_v4();
        assert_eq!(
            OwnerScope::new(user, CallerRole::Agent).owner_filter(),
            Some(user)
        );
        for role in [CallerRole::Manager, CallerRole::Admin, CallerRole::SuperAdmin] {
            assert_eq!(OwnerScope::new(user, role).owner_filter(), None);
        }
    }

    #[test]
    fn role_text_roundtrips() {
        for role in [
            CallerRole::Agent,
            CallerRole::Manager,
            CallerRole::Admin,
            CallerRole::SuperAdmin,
        ] {
            assert_eq!(CallerRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(CallerRole::parse("owner"), None);
    }
}
