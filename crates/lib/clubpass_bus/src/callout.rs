//! Authorization callout handler.
//!
//! The bus server sends a signed authorization request for every connection
//! attempt. The client's password carries either a bus ticket or a session
//! token; the reply is a signed authorization response embedding a user
//! credential scoped by the permission compiler, or a denial reason.

use std::sync::Arc;

use chrono::Duration;
use clubpass_core::auth::TokenError;
use clubpass_core::auth::bus_jwt::{
    BusClaims, BusSigner, UserGrant, decode_unverified, verify_self_issued,
};
use clubpass_core::auth::permissions;
use clubpass_core::auth::session_token::SessionTokenCodec;
use clubpass_core::models::Identity;
use clubpass_core::session::SessionService;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// `nats` section of an authorization request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationRequestNats {
    #[serde(default)]
    pub server_id: ServerId,
    /// Public key the bus server assigned to the connecting client.
    #[serde(default)]
    pub user_nkey: String,
    #[serde(default)]
    pub client_info: ClientInfo,
    #[serde(default)]
    pub connect_opts: ConnectOpts,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub version: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerId {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
    /// Server public key; the audience of the response.
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectOpts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
}

/// Reasons a connection is refused. The text is sent back to the bus.
#[derive(Debug, Error)]
enum Denial {
    #[error("invalid authorization request")]
    MalformedRequest,

    #[error("missing token")]
    MissingToken,

    #[error("token expired")]
    ExpiredToken,

    #[error("invalid token")]
    InvalidToken,

    #[error("internal error")]
    Internal,
}

impl From<TokenError> for Denial {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::ExpiredToken => Denial::ExpiredToken,
            _ => Denial::InvalidToken,
        }
    }
}

/// Answers authorization callouts.
pub struct CalloutHandler {
    codec: Arc<SessionTokenCodec>,
    signer: Option<Arc<BusSigner>>,
    credential_ttl: Duration,
}

impl CalloutHandler {
    pub fn new(
        codec: Arc<SessionTokenCodec>,
        signer: Option<Arc<BusSigner>>,
        credential_ttl: Duration,
    ) -> Self {
        Self {
            codec,
            signer,
            credential_ttl,
        }
    }

    /// Share the session service's codec, signer and credential lifetime.
    pub fn from_service(sessions: &SessionService) -> Self {
        Self::new(
            sessions.codec().clone(),
            sessions.bus_signer().cloned(),
            sessions.config().callout_credential_ttl,
        )
    }

    /// Produce the reply payload for one callout. Never fails; without a
    /// signer the reply is empty, which the bus treats as a refusal.
    pub fn handle(&self, payload: &[u8]) -> Vec<u8> {
        let Some(signer) = &self.signer else {
            error!("authorization callout received but bus credentials are disabled");
            return Vec::new();
        };

        let token = String::from_utf8_lossy(payload);
        let (subject, audience, outcome) =
            match verify_self_issued::<AuthorizationRequestNats>(&token) {
                Ok(request) => {
                    let outcome = self.authorize(signer, &request);
                    (
                        request.nats.user_nkey,
                        request.nats.server_id.id,
                        outcome,
                    )
                }
                Err(e) => {
                    warn!(error = %e, "unverifiable authorization request");
                    // Address the denial as well as we can.
                    let (subject, audience) =
                        decode_unverified::<AuthorizationRequestNats>(&token)
                            .map(|c| (c.nats.user_nkey, c.nats.server_id.id))
                            .unwrap_or_default();
                    (subject, audience, Err(Denial::MalformedRequest))
                }
            };

        if let Err(reason) = &outcome {
            info!(user_nkey = %subject, reason = %reason, "connection denied");
        }

        match signer.authorization_response(
            &subject,
            &audience,
            outcome.map_err(|reason| reason.to_string()),
        ) {
            Ok(response) => response.into_bytes(),
            Err(e) => {
                error!(error = %e, "signing authorization response failed");
                Vec::new()
            }
        }
    }

    fn authorize(
        &self,
        signer: &BusSigner,
        request: &BusClaims<AuthorizationRequestNats>,
    ) -> Result<String, Denial> {
        let nats = &request.nats;
        if nats.user_nkey.is_empty() {
            return Err(Denial::MalformedRequest);
        }
        let credential = nats
            .connect_opts
            .pass
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(Denial::MissingToken)?;

        let identity = self.identify(signer, credential)?;
        debug!(
            user_uuid = %identity.user_uuid,
            client_id = ?nats.client_info.id,
            client_host = ?nats.client_info.host,
            "authorizing bus connection"
        );

        signer
            .mint_user(UserGrant {
                subject: &nats.user_nkey,
                name: Some(identity.external_id.as_str()),
                permissions: permissions::compile(&identity),
                identity: Some(identity.clone()),
                ttl: self.credential_ttl,
            })
            .map_err(|e| {
                error!(error = %e, "minting user credential failed");
                Denial::Internal
            })
    }

    /// A ticket signed by our bus key, else a session token.
    fn identify(&self, signer: &BusSigner, credential: &str) -> Result<Identity, Denial> {
        let ticket_error = match signer.verify_ticket(credential) {
            Ok(identity) => return Ok(identity),
            Err(e) => e,
        };
        match self.codec.validate(credential) {
            Ok(claims) => Ok(claims.identity),
            Err(_) if ticket_error == TokenError::ExpiredToken => Err(Denial::ExpiredToken),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use clubpass_core::auth::bus_jwt::{AuthorizationResponseNats, BUS_CLAIMS_VERSION, UserNats};
    use clubpass_core::models::{ClubRole, Role};
    use nkeys::KeyPair;
    use uuid::Uuid;

    use super::*;

    struct Fixture {
        handler: CalloutHandler,
        signer: Arc<BusSigner>,
        codec: Arc<SessionTokenCodec>,
        server: BusSigner,
        user_nkey: String,
    }

    fn fixture() -> Fixture {
        let codec = Arc::new(SessionTokenCodec::new(b"callout-test-secret"));
        let signer = Arc::new(BusSigner::new(KeyPair::new_account(), None));
        Fixture {
            handler: CalloutHandler::new(codec.clone(), Some(signer.clone()), Duration::hours(1)),
            signer,
            codec,
            server: BusSigner::new(KeyPair::new_server(), None),
            user_nkey: KeyPair::new_user().public_key(),
        }
    }

    fn identity() -> Identity {
        let club = Uuid::new_v4();
        Identity {
            external_id: "u1".into(),
            user_uuid: Uuid::new_v4(),
            guild_id: Some("g1".into()),
            active_club_uuid: Some(club),
            role: Role::Player,
            memberships: vec![ClubRole {
                club_uuid: club,
                role: Role::Player,
            }],
        }
    }

    fn request(f: &Fixture, pass: Option<&str>) -> Vec<u8> {
        f.server
            .sign(BusClaims {
                jti: String::new(),
                iat: chrono::Utc::now().timestamp(),
                exp: None,
                iss: String::new(),
                sub: f.user_nkey.clone(),
                aud: Some("nats-authorization-request".into()),
                name: None,
                nats: AuthorizationRequestNats {
                    server_id: ServerId {
                        name: "bus-1".into(),
                        host: "0.0.0.0".into(),
                        id: f.server.public_key().to_string(),
                    },
                    user_nkey: f.user_nkey.clone(),
                    client_info: ClientInfo {
                        host: Some("127.0.0.1".into()),
                        id: Some(7),
                        name: Some("web".into()),
                    },
                    connect_opts: ConnectOpts {
                        user: None,
                        pass: pass.map(str::to_string),
                    },
                    kind: "authorization_request".into(),
                    version: BUS_CLAIMS_VERSION,
                },
            })
            .unwrap()
            .into_bytes()
    }

    fn response(f: &Fixture, reply: &[u8]) -> BusClaims<AuthorizationResponseNats> {
        f.signer
            .verify::<AuthorizationResponseNats>(std::str::from_utf8(reply).unwrap())
            .unwrap()
    }

    #[test]
    fn session_token_is_exchanged_for_a_scoped_credential() {
        let f = fixture();
        let id = identity();
        let token = f.codec.generate(&id, Duration::minutes(5)).unwrap();

        let reply = response(&f, &f.handler.handle(&request(&f, Some(&token))));
        assert_eq!(reply.sub, f.user_nkey);
        assert_eq!(reply.aud.as_deref(), Some(f.server.public_key()));
        assert_eq!(reply.nats.error, None);

        let user = f
            .signer
            .verify::<UserNats>(reply.nats.jwt.as_deref().unwrap())
            .unwrap();
        assert_eq!(user.sub, f.user_nkey);
        assert!(
            user.nats
                .permissions
                .can_subscribe(&permissions::inbox_pattern(id.user_uuid))
        );
        assert_eq!(user.nats.permissions, permissions::compile(&id));
    }

    #[test]
    fn ticket_is_accepted_as_password() {
        let f = fixture();
        let id = identity();
        let ticket = f
            .signer
            .mint_user(UserGrant {
                subject: &KeyPair::new_user().public_key(),
                name: None,
                permissions: permissions::compile(&id),
                identity: Some(id.clone()),
                ttl: Duration::minutes(10),
            })
            .unwrap();

        let reply = response(&f, &f.handler.handle(&request(&f, Some(&ticket))));
        let user = f
            .signer
            .verify::<UserNats>(reply.nats.jwt.as_deref().unwrap())
            .unwrap();
        // Rebound to the connecting client's key.
        assert_eq!(user.sub, f.user_nkey);
        assert_eq!(user.nats.identity, Some(id));
    }

    #[test]
    fn missing_password_is_denied() {
        let f = fixture();
        for pass in [None, Some(""), Some("   ")] {
            let reply = response(&f, &f.handler.handle(&request(&f, pass)));
            assert_eq!(reply.nats.jwt, None);
            assert_eq!(reply.nats.error.as_deref(), Some("missing token"));
        }
    }

    #[test]
    fn expired_and_foreign_tokens_are_denied() {
        let f = fixture();
        let expired = f.codec.generate(&identity(), Duration::seconds(-1)).unwrap();
        let reply = response(&f, &f.handler.handle(&request(&f, Some(&expired))));
        assert_eq!(reply.nats.error.as_deref(), Some("token expired"));

        let foreign = SessionTokenCodec::new(b"someone-else")
            .generate(&identity(), Duration::minutes(5))
            .unwrap();
        let reply = response(&f, &f.handler.handle(&request(&f, Some(&foreign))));
        assert_eq!(reply.nats.error.as_deref(), Some("invalid token"));
    }

    #[test]
    fn garbage_still_gets_a_signed_denial() {
        let f = fixture();
        let reply = response(&f, &f.handler.handle(b"\xff\xfenot a jwt"));
        assert_eq!(
            reply.nats.error.as_deref(),
            Some("invalid authorization request")
        );
    }

    #[test]
    fn forged_request_is_denied_but_addressed() {
        let f = fixture();
        let token = f.codec.generate(&identity(), Duration::minutes(5)).unwrap();
        let genuine = String::from_utf8(request(&f, Some(&token))).unwrap();
        let (signing_input, _) = genuine.rsplit_once('.').unwrap();
        let forged = format!("{signing_input}.AAAA");

        let reply = response(&f, &f.handler.handle(forged.as_bytes()));
        assert_eq!(reply.sub, f.user_nkey);
        assert_eq!(
            reply.nats.error.as_deref(),
            Some("invalid authorization request")
        );
    }

    #[test]
    fn disabled_bus_replies_empty() {
        let f = fixture();
        let handler = CalloutHandler::new(f.codec.clone(), None, Duration::hours(1));
        assert!(handler.handle(&request(&f, Some("x"))).is_empty());
    }
}
