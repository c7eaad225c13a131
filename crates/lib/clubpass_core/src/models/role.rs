//! Club roles and the permission tier each one compiles to.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A member's role within a club.
///
/// Role strings that are not recognised are kept verbatim in
/// [`Role::Unrecognized`] and always compile to the viewer tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Viewer,
    Player,
    Editor,
    Admin,
    /// Any role string outside the catalogue. Least privilege.
    Unrecognized(String),
}

/// Permission template selected by a role.
///
/// Editor and admin share one template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PermissionTier {
    Viewer,
    Player,
    Editor,
}

impl Role {
    /// Parse a role string, keeping unknown values as [`Role::Unrecognized`].
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "viewer" => Role::Viewer,
            "player" => Role::Player,
            "editor" => Role::Editor,
            "admin" => Role::Admin,
            _ => Role::Unrecognized(value.to_string()),
        }
    }

    /// Canonical string form.
    pub fn as_str(&self) -> &str {
        match self {
            Role::Viewer => "viewer",
            Role::Player => "player",
            Role::Editor => "editor",
            Role::Admin => "admin",
            Role::Unrecognized(raw) => raw.as_str(),
        }
    }

    /// Whether the role is one of the catalogued tiers.
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Role::Unrecognized(_))
    }

    /// Template used by the permission compiler.
    pub fn tier(&self) -> PermissionTier {
        match self {
            Role::Viewer => PermissionTier::Viewer,
            Role::Player => PermissionTier::Player,
            Role::Editor | Role::Admin => PermissionTier::Editor,
            Role::Unrecognized(_) => PermissionTier::Viewer,
        }
    }

    /// Whether holding `self` is enough to act as `requested`.
    pub fn covers(&self, requested: &Role) -> bool {
        self.tier() >= requested.tier()
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Role::parse(&value)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_roles_case_insensitively() {
        assert_eq!(Role::parse("viewer"), Role::Viewer);
        assert_eq!(Role::parse("Player"), Role::Player);
        assert_eq!(Role::parse(" EDITOR "), Role::Editor);
        assert_eq!(Role::parse("admin"), Role::Admin);
    }

    #[test]
    fn unknown_role_is_kept_and_falls_back_to_viewer_tier() {
        let role = Role::parse("superuser");
        assert_eq!(role, Role::Unrecognized("superuser".into()));
        assert!(!role.is_recognized());
        assert_eq!(role.tier(), PermissionTier::Viewer);
    }

    #[test]
    fn editor_and_admin_share_a_tier() {
        assert_eq!(Role::Editor.tier(), Role::Admin.tier());
        assert!(Role::Editor.covers(&Role::Admin));
        assert!(Role::Admin.covers(&Role::Editor));
    }

    #[test]
    fn covers_follows_tier_order() {
        assert!(Role::Player.covers(&Role::Viewer));
        assert!(!Role::Viewer.covers(&Role::Player));
        assert!(!Role::Player.covers(&Role::Admin));
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&Role::Player).unwrap();
        assert_eq!(json, "\"player\"");
        let back: Role = serde_json::from_str("\"owner\"").unwrap();
        assert_eq!(back, Role::Unrecognized("owner".into()));
    }
}
