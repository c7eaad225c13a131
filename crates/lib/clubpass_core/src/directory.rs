//! User and membership directory.
//!
//! The directory is owned by the profile service; this crate only reads it.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{DirectoryUser, Membership, Role};

/// Directory lookup errors.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),

    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

/// Resolves external identities and lists club memberships.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Resolve an external user ID to an internal user.
    async fn resolve_user(
        &self,
        external_id: &str,
    ) -> Result<Option<DirectoryUser>, DirectoryError>;

    /// Look up a user by internal UUID.
    async fn user(&self, user_uuid: Uuid) -> Result<Option<DirectoryUser>, DirectoryError>;

    /// Club memberships of a user, oldest first.
    async fn memberships(&self, user_uuid: Uuid) -> Result<Vec<Membership>, DirectoryError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL directory
// ---------------------------------------------------------------------------

/// Directory backed by the `users`, `clubs` and `club_memberships` tables.
#[derive(Debug, Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Directory for PgDirectory {
    async fn resolve_user(
        &self,
        external_id: &str,
    ) -> Result<Option<DirectoryUser>, DirectoryError> {
        let row = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT id, external_id FROM users WHERE external_id = $1",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(user_uuid, external_id)| DirectoryUser {
            user_uuid,
            external_id,
        }))
    }

    async fn user(&self, user_uuid: Uuid) -> Result<Option<DirectoryUser>, DirectoryError> {
        let row = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT id, external_id FROM users WHERE id = $1",
        )
        .bind(user_uuid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(user_uuid, external_id)| DirectoryUser {
            user_uuid,
            external_id,
        }))
    }

    async fn memberships(&self, user_uuid: Uuid) -> Result<Vec<Membership>, DirectoryError> {
        let rows = sqlx::query_as::<_, (Uuid, Option<String>, String)>(
            "SELECT m.club_id, c.guild_id, m.role \
             FROM club_memberships m \
             JOIN clubs c ON c.id = m.club_id \
             WHERE m.user_id = $1 \
             ORDER BY m.created_at, m.club_id",
        )
        .bind(user_uuid)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(club_uuid, guild_id, role)| Membership {
                club_uuid,
                guild_id,
                role: Role::parse(&role),
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Static directory
// ---------------------------------------------------------------------------

/// Fixed in-memory directory for tests and local development.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    users: HashMap<Uuid, DirectoryUser>,
    memberships: HashMap<Uuid, Vec<Membership>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user, returning its generated UUID.
    pub fn add_user(&mut self, external_id: &str) -> Uuid {
        let user_uuid = Uuid::new_v4();
        self.users.insert(
            user_uuid,
            DirectoryUser {
                user_uuid,
                external_id: external_id.to_string(),
            },
        );
        user_uuid
    }

    /// Add a membership for an existing user.
    pub fn add_membership(&mut self, user_uuid: Uuid, membership: Membership) {
        self.memberships
            .entry(user_uuid)
            .or_default()
            .push(membership);
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn resolve_user(
        &self,
        external_id: &str,
    ) -> Result<Option<DirectoryUser>, DirectoryError> {
        Ok(self
            .users
            .values()
            .find(|u| u.external_id == external_id)
            .cloned())
    }

    async fn user(&self, user_uuid: Uuid) -> Result<Option<DirectoryUser>, DirectoryError> {
        Ok(self.users.get(&user_uuid).cloned())
    }

    async fn memberships(&self, user_uuid: Uuid) -> Result<Vec<Membership>, DirectoryError> {
        Ok(self
            .memberships
            .get(&user_uuid)
            .cloned()
            .unwrap_or_default())
    }
}
