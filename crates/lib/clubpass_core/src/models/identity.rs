//! Identity domain models.
//!
//! An [`Identity`] is built fresh on every login, ticket and callout decision
//! and is never persisted as-is.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::role::Role;

/// A `(club, role)` pair carried inside identity claims.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClubRole {
    pub club_uuid: Uuid,
    pub role: Role,
}

/// Resolved identity at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Legacy external user ID (e.g. a chat platform account).
    pub external_id: String,
    /// Internal user UUID.
    pub user_uuid: Uuid,
    /// Legacy external guild ID of the active club, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
    /// Club the identity is currently acting in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_club_uuid: Option<Uuid>,
    /// Role requested for the active club.
    pub role: Role,
    /// Every club the identity belongs to.
    #[serde(default)]
    pub memberships: Vec<ClubRole>,
}

impl Identity {
    /// Whether `club_uuid` is the active club.
    pub fn is_active(&self, club_uuid: &Uuid) -> bool {
        self.active_club_uuid.as_ref() == Some(club_uuid)
    }
}

/// User record as seen by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub user_uuid: Uuid,
    pub external_id: String,
}

/// Club membership as seen by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub club_uuid: Uuid,
    /// Legacy external guild ID mapped to the club.
    pub guild_id: Option<String>,
    pub role: Role,
}

impl Membership {
    pub fn club_role(&self) -> ClubRole {
        ClubRole {
            club_uuid: self.club_uuid,
            role: self.role.clone(),
        }
    }
}
