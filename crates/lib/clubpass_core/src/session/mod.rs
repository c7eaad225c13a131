//! Session and ticket service.
//!
//! Owns the refresh-token lifecycle:
//!
//! ```text
//! login ──► ACTIVE ──ticket──► ACTIVE (successor) + old REVOKED
//!             │                   │
//!          logout          reuse of a revoked token
//!             ▼                   ▼
//!          REVOKED        every token of the identity REVOKED
//! ```

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nkeys::KeyPair;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::bus_jwt::{BusSigner, UserGrant};
use crate::auth::permissions;
use crate::auth::refresh::{
    RefreshTokenRecord, RefreshTokenStore, Rotation, generate_refresh_token, hash_refresh_token,
    new_token_family,
};
use crate::auth::session_token::SessionTokenCodec;
use crate::auth::{StoreError, TokenError};
use crate::config::AuthConfig;
use crate::directory::{Directory, DirectoryError};
use crate::models::{Identity, Membership, Role};

/// Session service errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid role: {0}")]
    InvalidRole(String),

    #[error("missing token")]
    MissingToken,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid session token: {0}")]
    InvalidToken(TokenError),

    #[error("invalid refresh token")]
    InvalidRefreshToken,

    #[error("session expired")]
    SessionExpired,

    #[error("session revoked")]
    SessionRevoked,

    #[error("not configured: {0}")]
    NotConfigured(&'static str),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        SessionError::Internal(format!("refresh store: {e}"))
    }
}

impl From<DirectoryError> for SessionError {
    fn from(e: DirectoryError) -> Self {
        SessionError::Internal(format!("directory: {e}"))
    }
}

/// A magic-link request: an external identity asking for a link into one
/// of its clubs.
#[derive(Debug, Clone)]
pub struct MagicLinkRequest {
    /// External user ID.
    pub user_id: String,
    /// External guild ID of the club the caller claims to act in.
    pub guild_id: String,
    /// Requested role.
    pub role: String,
}

/// A freshly minted magic link.
#[derive(Debug, Clone)]
pub struct MagicLink {
    pub url: String,
    pub user_uuid: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginGrant {
    /// Raw refresh token. Only ever exposed here.
    pub refresh_token: String,
    pub user_uuid: Uuid,
}

/// Result of a successful ticket request.
#[derive(Debug, Clone)]
pub struct TicketGrant {
    /// Bus sub-credential.
    pub ticket: String,
    /// Refresh token to use next time. Equal to the presented token only if
    /// the rotation write failed.
    pub refresh_token: String,
    pub user_uuid: Uuid,
}

/// Session/ticket service.
pub struct SessionService {
    config: AuthConfig,
    codec: Arc<SessionTokenCodec>,
    bus: Option<Arc<BusSigner>>,
    store: Arc<dyn RefreshTokenStore>,
    directory: Arc<dyn Directory>,
}

impl SessionService {
    /// Build the service. `bus` is `None` when bus credentials are disabled;
    /// ticket minting then fails with [`SessionError::NotConfigured`].
    pub fn new(
        config: AuthConfig,
        codec: Arc<SessionTokenCodec>,
        bus: Option<Arc<BusSigner>>,
        store: Arc<dyn RefreshTokenStore>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self {
            config,
            codec,
            bus,
            store,
            directory,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn codec(&self) -> &Arc<SessionTokenCodec> {
        &self.codec
    }

    pub fn bus_signer(&self) -> Option<&Arc<BusSigner>> {
        self.bus.as_ref()
    }

    // -----------------------------------------------------------------------
    // Magic links
    // -----------------------------------------------------------------------

    /// Mint a magic link for a directory-confirmed membership.
    ///
    /// The claimed club must be among the caller's memberships and must grant
    /// at least the requested role.
    pub async fn generate_magic_link(
        &self,
        request: &MagicLinkRequest,
    ) -> Result<MagicLink, SessionError> {
        let role = Role::parse(&request.role);
        if !role.is_recognized() {
            return Err(SessionError::InvalidRole(request.role.clone()));
        }

        let user = self
            .bounded("directory.resolve_user", self.directory.resolve_user(&request.user_id))
            .await?
            .ok_or_else(|| SessionError::Unauthorized("unknown user".into()))?;

        let memberships = self
            .bounded("directory.memberships", self.directory.memberships(user.user_uuid))
            .await?;

        let active = memberships
            .iter()
            .find(|m| m.guild_id.as_deref() == Some(request.guild_id.as_str()))
            .ok_or_else(|| SessionError::Unauthorized("not a member of this club".into()))?;

        if !active.role.covers(&role) {
            return Err(SessionError::Unauthorized(format!(
                "role {role} not held in this club"
            )));
        }

        let identity = Identity {
            external_id: user.external_id,
            user_uuid: user.user_uuid,
            guild_id: Some(request.guild_id.clone()),
            active_club_uuid: Some(active.club_uuid),
            role,
            memberships: memberships.iter().map(Membership::club_role).collect(),
        };

        let token = self
            .codec
            .generate(&identity, self.config.session_token_ttl)
            .map_err(|e| SessionError::Internal(e.to_string()))?;

        let mut url = self.config.magic_link_base_url.clone();
        url.query_pairs_mut().append_pair("t", &token);

        info!(
            user_uuid = %identity.user_uuid,
            club_uuid = %active.club_uuid,
            role = %identity.role,
            "magic link issued"
        );

        Ok(MagicLink {
            url: url.into(),
            user_uuid: identity.user_uuid,
            expires_at: Utc::now() + self.config.session_token_ttl,
        })
    }

    // -----------------------------------------------------------------------
    // Login / logout
    // -----------------------------------------------------------------------

    /// Exchange a one-time session token for a refresh token in a new family.
    pub async fn login_user(&self, session_token: &str) -> Result<LoginGrant, SessionError> {
        if session_token.is_empty() {
            return Err(SessionError::MissingToken);
        }
        let claims = self
            .codec
            .validate(session_token)
            .map_err(SessionError::InvalidToken)?;
        let user_uuid = claims.identity.user_uuid;

        let refresh_token = generate_refresh_token();
        let record = self.refresh_record(&refresh_token, user_uuid, Some(new_token_family()));
        self.bounded("store.insert", self.store.insert(&record))
            .await?;

        info!(user_uuid = %user_uuid, "login succeeded");
        Ok(LoginGrant {
            refresh_token,
            user_uuid,
        })
    }

    /// Revoke a single refresh token. An empty token is a no-op.
    pub async fn logout_user(&self, refresh_token: &str) -> Result<(), SessionError> {
        if refresh_token.is_empty() {
            return Ok(());
        }
        let hash = hash_refresh_token(refresh_token);
        self.bounded("store.revoke", self.store.revoke(&hash))
            .await?;
        debug!("refresh token revoked on logout");
        Ok(())
    }

    /// Revoke every live refresh token of an identity.
    pub async fn logout_all(&self, user_uuid: Uuid) -> Result<u64, SessionError> {
        let revoked = self
            .bounded("store.revoke_all", self.store.revoke_all_for_user(user_uuid))
            .await?;
        info!(user_uuid = %user_uuid, revoked, "all sessions revoked");
        Ok(revoked)
    }

    /// Drop refresh-token rows past their expiry.
    pub async fn purge_expired(&self) -> Result<u64, SessionError> {
        let purged = self
            .bounded("store.purge_expired", self.store.purge_expired())
            .await?;
        if purged > 0 {
            debug!(purged, "expired refresh tokens purged");
        }
        Ok(purged)
    }

    // -----------------------------------------------------------------------
    // Tickets
    // -----------------------------------------------------------------------

    /// Validate and rotate a refresh token, minting a bus ticket.
    ///
    /// Presenting a token that was already revoked revokes every token of
    /// the identity.
    pub async fn get_ticket(&self, refresh_token: &str) -> Result<TicketGrant, SessionError> {
        let bus = self
            .bus
            .as_ref()
            .ok_or(SessionError::NotConfigured("bus credentials are disabled"))?;

        if refresh_token.is_empty() {
            return Err(SessionError::InvalidRefreshToken);
        }

        let hash = hash_refresh_token(refresh_token);
        let record = self
            .bounded("store.find", self.store.find(&hash))
            .await?
            .ok_or(SessionError::InvalidRefreshToken)?;

        if record.revoked {
            self.revoke_identity(record.user_uuid).await;
            return Err(SessionError::SessionRevoked);
        }
        if record.is_expired(Utc::now()) {
            return Err(SessionError::SessionExpired);
        }

        let identity = self.current_identity(record.user_uuid).await?;
        let subject = KeyPair::new_user().public_key();
        let ticket = bus
            .mint_user(UserGrant {
                subject: &subject,
                name: Some(identity.external_id.as_str()),
                permissions: permissions::compile(&identity),
                identity: Some(identity.clone()),
                ttl: self.config.ticket_ttl,
            })
            .map_err(|e| SessionError::Internal(e.to_string()))?;

        let next_token = generate_refresh_token();
        let successor = self.refresh_record(&next_token, record.user_uuid, record.token_family);
        let refresh_token = match self
            .bounded("store.rotate", self.store.rotate(&hash, &successor))
            .await
        {
            Ok(Rotation::Rotated) => next_token,
            Ok(Rotation::Stale) => {
                // A concurrent request rotated this token first.
                warn!(user_uuid = %record.user_uuid, "refresh token rotation lost a race");
                return Err(SessionError::SessionRevoked);
            }
            Err(e) => {
                // Keep the presented token usable; the next ticket rotates again.
                error!(user_uuid = %record.user_uuid, error = %e, "refresh token rotation failed");
                refresh_token.to_string()
            }
        };

        info!(user_uuid = %record.user_uuid, "ticket issued");
        Ok(TicketGrant {
            ticket,
            refresh_token,
            user_uuid: record.user_uuid,
        })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Identity as the directory sees it now. The first membership is active.
    async fn current_identity(&self, user_uuid: Uuid) -> Result<Identity, SessionError> {
        let user = self
            .bounded("directory.user", self.directory.user(user_uuid))
            .await?
            .ok_or_else(|| SessionError::Unauthorized("unknown user".into()))?;
        let memberships = self
            .bounded("directory.memberships", self.directory.memberships(user_uuid))
            .await?;
        let active = memberships.first();

        Ok(Identity {
            external_id: user.external_id,
            user_uuid,
            guild_id: active.and_then(|m| m.guild_id.clone()),
            active_club_uuid: active.map(|m| m.club_uuid),
            role: active.map(|m| m.role.clone()).unwrap_or(Role::Viewer),
            memberships: memberships.iter().map(Membership::club_role).collect(),
        })
    }

    /// Replay response: revoke everything the identity holds.
    async fn revoke_identity(&self, user_uuid: Uuid) {
        match self
            .bounded("store.revoke_all", self.store.revoke_all_for_user(user_uuid))
            .await
        {
            Ok(revoked) => warn!(
                user_uuid = %user_uuid,
                revoked,
                "revoked refresh token presented; all sessions revoked"
            ),
            Err(e) => error!(
                user_uuid = %user_uuid,
                error = %e,
                "revoked refresh token presented; revoking sessions failed"
            ),
        }
    }

    fn refresh_record(
        &self,
        raw: &str,
        user_uuid: Uuid,
        token_family: Option<String>,
    ) -> RefreshTokenRecord {
        RefreshTokenRecord {
            hash: hash_refresh_token(raw),
            user_uuid,
            token_family,
            expires_at: Utc::now() + self.config.refresh_token_ttl,
            revoked: false,
        }
    }

    /// Run a collaborator call under the configured deadline.
    async fn bounded<T, E>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, SessionError>
    where
        SessionError: From<E>,
    {
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result.map_err(SessionError::from),
            Err(_) => {
                error!(op, "collaborator call timed out");
                Err(SessionError::Timeout(op))
            }
        }
    }
}
