//! Magic-link requests arriving over the bus.

use std::sync::Arc;

use clubpass_core::session::{MagicLinkRequest, SessionError, SessionService};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Request published by the chat integration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MagicLinkRequestPayload {
    pub user_id: String,
    pub guild_id: String,
    pub role: String,
    #[serde(default)]
    pub correlation_id: String,
}

/// Response published to the magic-link response subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MagicLinkResponsePayload {
    pub user_id: String,
    pub guild_id: String,
    pub correlation_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct MagicLinkHandler {
    sessions: Arc<SessionService>,
}

impl MagicLinkHandler {
    pub fn new(sessions: Arc<SessionService>) -> Self {
        Self { sessions }
    }

    /// Turn one raw request into its response. Failures become
    /// `success: false` payloads.
    pub async fn handle(&self, payload: &[u8]) -> MagicLinkResponsePayload {
        let request: MagicLinkRequestPayload = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "undecodable magic-link request");
                return MagicLinkResponsePayload {
                    error: Some("invalid request".into()),
                    ..Default::default()
                };
            }
        };

        let result = self
            .sessions
            .generate_magic_link(&MagicLinkRequest {
                user_id: request.user_id.clone(),
                guild_id: request.guild_id.clone(),
                role: request.role.clone(),
            })
            .await;

        let mut response = MagicLinkResponsePayload {
            user_id: request.user_id,
            guild_id: request.guild_id,
            correlation_id: request.correlation_id,
            ..Default::default()
        };
        match result {
            Ok(link) => {
                response.success = true;
                response.url = Some(link.url);
            }
            Err(e) => {
                info!(
                    correlation_id = %response.correlation_id,
                    error = %e,
                    "magic link refused"
                );
                response.error = Some(public_reason(&e));
            }
        }
        response
    }
}

/// Caller-facing text; infrastructure detail stays in the logs.
fn public_reason(e: &SessionError) -> String {
    match e {
        SessionError::InvalidRole(_)
        | SessionError::MissingToken
        | SessionError::Unauthorized(_) => e.to_string(),
        _ => "internal error".into(),
    }
}

#[cfg(test)]
mod tests {
    use clubpass_core::auth::refresh::MemoryRefreshTokenStore;
    use clubpass_core::auth::session_token::SessionTokenCodec;
    use clubpass_core::config::AuthConfig;
    use clubpass_core::directory::StaticDirectory;
    use clubpass_core::models::{Membership, Role};
    use url::Url;
    use uuid::Uuid;

    use super::*;

    fn handler() -> MagicLinkHandler {
        let mut directory = StaticDirectory::new();
        let user = directory.add_user("u1");
        directory.add_membership(
            user,
            Membership {
                club_uuid: Uuid::new_v4(),
                guild_id: Some("g1".into()),
                role: Role::Player,
            },
        );
        MagicLinkHandler::new(Arc::new(SessionService::new(
            AuthConfig::new(Url::parse("https://play.example.com/auth").unwrap()),
            Arc::new(SessionTokenCodec::new(b"bus-test-secret")),
            None,
            Arc::new(MemoryRefreshTokenStore::new()),
            Arc::new(directory),
        )))
    }

    fn payload(guild_id: &str, role: &str) -> Vec<u8> {
        serde_json::to_vec(&MagicLinkRequestPayload {
            user_id: "u1".into(),
            guild_id: guild_id.into(),
            role: role.into(),
            correlation_id: "c-42".into(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn member_gets_a_link() {
        let response = handler().handle(&payload("g1", "player")).await;
        assert!(response.success);
        assert_eq!(response.correlation_id, "c-42");
        assert_eq!(response.user_id, "u1");
        assert_eq!(response.guild_id, "g1");
        assert!(response.url.unwrap().contains("t="));
        assert_eq!(response.error, None);
    }

    #[tokio::test]
    async fn non_member_is_refused_without_a_link() {
        let response = handler().handle(&payload("g2", "player")).await;
        assert!(!response.success);
        assert_eq!(response.url, None);
        assert!(response.error.unwrap().starts_with("unauthorized"));
        assert_eq!(response.correlation_id, "c-42");
    }

    #[tokio::test]
    async fn unknown_role_is_refused() {
        let response = handler().handle(&payload("g1", "overlord")).await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("invalid role: overlord"));
    }

    #[tokio::test]
    async fn undecodable_request_gets_a_failure() {
        let response = handler().handle(b"{not json").await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("invalid request"));
    }
}
