//! Refresh tokens: generation, hashing and the store abstraction.
//!
//! Raw tokens leave the service exactly once and are only ever stored as
//! SHA-256 hashes.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::{Rng, rng};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::StoreError;

/// Bytes of entropy in a raw refresh token.
const REFRESH_TOKEN_BYTES: usize = 32;

/// Generate a cryptographically random refresh token (256 bits, base64url).
pub fn generate_refresh_token() -> String {
    let bytes: [u8; REFRESH_TOKEN_BYTES] = rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hash a refresh token for storage.
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// New lineage identifier for a fresh login.
pub fn new_token_family() -> String {
    Uuid::now_v7().to_string()
}

/// Refresh token row. The raw token is never part of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub hash: String,
    pub user_uuid: Uuid,
    /// Lineage shared by rotated descendants of one login. Cleared when the
    /// row is revoked by logout or replay detection.
    pub token_family: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Result of an atomic rotation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    /// Old row revoked and successor stored.
    Rotated,
    /// Old row was already revoked (or gone); nothing was written.
    Stale,
}

/// Persistence for refresh token rows.
///
/// `rotate` must be atomic: revoke the old row only if it is still live and
/// store its successor in the same step.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), StoreError>;

    async fn find(&self, hash: &str) -> Result<Option<RefreshTokenRecord>, StoreError>;

    async fn rotate(
        &self,
        old_hash: &str,
        successor: &RefreshTokenRecord,
    ) -> Result<Rotation, StoreError>;

    /// Revoke a single row and clear its family. Unknown hashes are ignored.
    async fn revoke(&self, hash: &str) -> Result<(), StoreError>;

    /// Revoke every live row for a user and clear their families, returning
    /// how many were revoked.
    async fn revoke_all_for_user(&self, user_uuid: Uuid) -> Result<u64, StoreError>;

    /// Delete rows past their expiry, returning how many were deleted.
    async fn purge_expired(&self) -> Result<u64, StoreError>;
}

/// In-process store for tests and local development.
#[derive(Debug, Default)]
pub struct MemoryRefreshTokenStore {
    rows: RwLock<HashMap<String, RefreshTokenRecord>>,
}

impl MemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows held, revoked or not.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Live (non-revoked) rows for a user.
    pub async fn live_for_user(&self, user_uuid: Uuid) -> Vec<RefreshTokenRecord> {
        self.rows
            .read()
            .await
            .values()
            .filter(|r| r.user_uuid == user_uuid && !r.revoked)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn insert(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        self.rows
            .write()
            .await
            .insert(record.hash.clone(), record.clone());
        Ok(())
    }

    async fn find(&self, hash: &str) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(self.rows.read().await.get(hash).cloned())
    }

    async fn rotate(
        &self,
        old_hash: &str,
        successor: &RefreshTokenRecord,
    ) -> Result<Rotation, StoreError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(old_hash) {
            Some(old) if !old.revoked => old.revoked = true,
            _ => return Ok(Rotation::Stale),
        }
        rows.insert(successor.hash.clone(), successor.clone());
        Ok(Rotation::Rotated)
    }

    async fn revoke(&self, hash: &str) -> Result<(), StoreError> {
        if let Some(row) = self.rows.write().await.get_mut(hash) {
            row.revoked = true;
            row.token_family = None;
        }
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_uuid: Uuid) -> Result<u64, StoreError> {
        let mut revoked = 0;
        for row in self.rows.write().await.values_mut() {
            if row.user_uuid == user_uuid && !row.revoked {
                row.revoked = true;
                row.token_family = None;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, r| !r.is_expired(now));
        Ok((before - rows.len()) as u64)
    }
}
