//! Bus credentials: ed25519 nkey-signed JWTs in the bus server's format.
//!
//! `base64url(header).base64url(claims).base64url(signature)`, raw URL
//! alphabet without padding, signature over the first two segments.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Duration, Utc};
use nkeys::KeyPair;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::TokenError;
use super::permissions::PermissionSet;
use crate::models::Identity;

/// Algorithm name written into every bus token header.
pub const BUS_TOKEN_ALG: &str = "ed25519-nkey";

/// Claims schema version understood by the bus server.
pub const BUS_CLAIMS_VERSION: u8 = 2;

const TOKEN_TYPE: &str = "JWT";

/// Unlimited marker for subscription/data/payload limits.
const NO_LIMIT: i64 = -1;

#[derive(Debug, Serialize, Deserialize)]
struct BusHeader {
    typ: String,
    alg: String,
}

/// Registered claims shared by every bus token, with a typed `nats` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusClaims<T> {
    #[serde(default)]
    pub jti: String,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iss: String,
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub nats: T,
}

/// `nats` section of user claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserNats {
    #[serde(flatten)]
    pub permissions: PermissionSet,
    pub subs: i64,
    pub data: i64,
    pub payload: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_account: Option<String>,
    /// Resolved identity, present on tickets minted by this service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: u8,
}

/// `nats` section of an authorization-callout response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationResponseNats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_account: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: u8,
}

/// Parameters for a user credential.
#[derive(Debug, Clone)]
pub struct UserGrant<'a> {
    /// Public key of the client the credential is bound to.
    pub subject: &'a str,
    pub name: Option<&'a str>,
    pub permissions: PermissionSet,
    pub identity: Option<Identity>,
    pub ttl: Duration,
}

/// Holds the service's bus signing key.
///
/// Built once at bootstrap and passed to whatever needs to sign.
pub struct BusSigner {
    key: KeyPair,
    public_key: String,
    issuer_account: String,
}

impl BusSigner {
    /// Wrap a key pair. `issuer_account` defaults to the key's own public key.
    pub fn new(key: KeyPair, issuer_account: Option<String>) -> Self {
        let public_key = key.public_key();
        let issuer_account = issuer_account
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| public_key.clone());
        Self {
            key,
            public_key,
            issuer_account,
        }
    }

    /// Load a signer from an encoded nkey seed.
    pub fn from_seed(seed: &str, issuer_account: Option<String>) -> Result<Self, TokenError> {
        let key = KeyPair::from_seed(seed.trim())
            .map_err(|e| TokenError::KeyMaterial(e.to_string()))?;
        Ok(Self::new(key, issuer_account))
    }

    /// Public key written as `iss` on everything this signer produces.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Account users are placed into.
    pub fn issuer_account(&self) -> &str {
        &self.issuer_account
    }

    /// `issuer_account` claim value: only set when signing on behalf of an
    /// account with a separate signing key.
    fn delegated_account(&self) -> Option<String> {
        (self.issuer_account != self.public_key).then(|| self.issuer_account.clone())
    }

    /// Sign arbitrary bus claims. Overwrites `iss` and `jti`.
    pub fn sign<T: Serialize>(&self, mut claims: BusClaims<T>) -> Result<String, TokenError> {
        claims.iss = self.public_key.clone();
        claims.jti = String::new();
        let unsigned = serde_json::to_vec(&claims)
            .map_err(|e| TokenError::Signing(format!("claims encode: {e}")))?;
        claims.jti = format!("{:x}", Sha256::digest(&unsigned));

        let header = serde_json::to_vec(&BusHeader {
            typ: TOKEN_TYPE.to_string(),
            alg: BUS_TOKEN_ALG.to_string(),
        })
        .map_err(|e| TokenError::Signing(format!("header encode: {e}")))?;
        let body = serde_json::to_vec(&claims)
            .map_err(|e| TokenError::Signing(format!("claims encode: {e}")))?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(body)
        );
        let signature = self
            .key
            .sign(signing_input.as_bytes())
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        Ok(format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    /// Mint a permission-scoped user credential.
    pub fn mint_user(&self, grant: UserGrant<'_>) -> Result<String, TokenError> {
        let now = Utc::now();
        self.sign(BusClaims {
            jti: String::new(),
            iat: now.timestamp(),
            exp: Some((now + grant.ttl).timestamp()),
            iss: String::new(),
            sub: grant.subject.to_string(),
            aud: Some(self.issuer_account.clone()),
            name: grant.name.map(str::to_string),
            nats: UserNats {
                permissions: grant.permissions,
                subs: NO_LIMIT,
                data: NO_LIMIT,
                payload: NO_LIMIT,
                issuer_account: self.delegated_account(),
                identity: grant.identity,
                kind: "user".to_string(),
                version: BUS_CLAIMS_VERSION,
            },
        })
    }

    /// Sign a callout reply carrying either a user credential or an error.
    pub fn authorization_response(
        &self,
        subject: &str,
        audience: &str,
        outcome: Result<String, String>,
    ) -> Result<String, TokenError> {
        let (jwt, error) = match outcome {
            Ok(jwt) => (Some(jwt), None),
            Err(error) => (None, Some(error)),
        };
        self.sign(BusClaims {
            jti: String::new(),
            iat: Utc::now().timestamp(),
            exp: None,
            iss: String::new(),
            sub: subject.to_string(),
            aud: Some(audience.to_string()),
            name: None,
            nats: AuthorizationResponseNats {
                jwt,
                error,
                issuer_account: self.delegated_account(),
                kind: "authorization_response".to_string(),
                version: BUS_CLAIMS_VERSION,
            },
        })
    }

    /// Verify a token signed by this signer.
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<BusClaims<T>, TokenError> {
        let parsed = parse::<T>(token)?;
        if parsed.claims.iss != self.public_key {
            return Err(TokenError::InvalidSignature);
        }
        self.key
            .verify(parsed.signing_input.as_bytes(), &parsed.signature)
            .map_err(|_| TokenError::InvalidSignature)?;
        check_expiry(&parsed.claims)?;
        Ok(parsed.claims)
    }

    /// Verify a ticket minted by [`BusSigner::mint_user`] and return the
    /// identity it carries.
    pub fn verify_ticket(&self, token: &str) -> Result<Identity, TokenError> {
        let claims = self.verify::<UserNats>(token)?;
        if claims.nats.kind != "user" {
            return Err(TokenError::InvalidToken);
        }
        claims.nats.identity.ok_or(TokenError::InvalidToken)
    }
}

impl fmt::Debug for BusSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusSigner")
            .field("public_key", &self.public_key)
            .field("issuer_account", &self.issuer_account)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Verify a token against the public key named in its own `iss` claim.
///
/// Used for tokens signed by the bus server, such as callout requests.
pub fn verify_self_issued<T: DeserializeOwned>(token: &str) -> Result<BusClaims<T>, TokenError> {
    let parsed = parse::<T>(token)?;
    let issuer =
        KeyPair::from_public_key(&parsed.claims.iss).map_err(|_| TokenError::InvalidToken)?;
    issuer
        .verify(parsed.signing_input.as_bytes(), &parsed.signature)
        .map_err(|_| TokenError::InvalidSignature)?;
    check_expiry(&parsed.claims)?;
    Ok(parsed.claims)
}

/// Decode claims without checking the signature.
pub fn decode_unverified<T: DeserializeOwned>(token: &str) -> Result<BusClaims<T>, TokenError> {
    Ok(parse::<T>(token)?.claims)
}

struct Parsed<T> {
    claims: BusClaims<T>,
    signing_input: String,
    signature: Vec<u8>,
}

fn parse<T: DeserializeOwned>(token: &str) -> Result<Parsed<T>, TokenError> {
    let mut segments = token.trim().split('.');
    let (Some(header_b64), Some(body_b64), Some(signature_b64), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(TokenError::InvalidToken);
    };

    let header: BusHeader = decode_segment(header_b64)?;
    if !header.typ.eq_ignore_ascii_case(TOKEN_TYPE) {
        return Err(TokenError::InvalidToken);
    }
    if header.alg != BUS_TOKEN_ALG {
        return Err(TokenError::InvalidSignature);
    }

    let claims: BusClaims<T> = decode_segment(body_b64)?;
    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| TokenError::InvalidToken)?;

    Ok(Parsed {
        claims,
        signing_input: format!("{header_b64}.{body_b64}"),
        signature,
    })
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| TokenError::InvalidToken)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::InvalidToken)
}

fn check_expiry<T>(claims: &BusClaims<T>) -> Result<(), TokenError> {
    match claims.exp {
        Some(exp) if Utc::now().timestamp() >= exp => Err(TokenError::ExpiredToken),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::auth::permissions;
    use crate::models::{ClubRole, Role};

    fn signer() -> BusSigner {
        BusSigner::new(KeyPair::new_account(), None)
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

    fn grant<'a>(subject: &'a str, identity: &Identity, ttl: Duration) -> UserGrant<'a> {
        UserGrant {
            subject,
            name: Some("tester"),
            permissions: permissions::compile(identity),
            identity: Some(identity.clone()),
            ttl,
        }
    }

    #[test]
    fn token_has_three_unpadded_segments_and_fixed_header() {
        let signer = signer();
        let user = KeyPair::new_user().public_key();
        let token = signer
            .mint_user(grant(&user, &identity(), Duration::minutes(5)))
            .unwrap();

        let segments: Vec<_> = token.split('.').collect();
        assert_eq!(segments.len(), 3);
        assert!(!token.contains('='));

        let header: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segments[0]).unwrap()).unwrap();
        assert_eq!(header["typ"], "JWT");
        assert_eq!(header["alg"], BUS_TOKEN_ALG);
    }

    #[test]
    fn user_claims_carry_subject_issuer_and_permissions() {
        let signer = signer();
        let id = identity();
        let user = KeyPair::new_user().public_key();
        let token = signer
            .mint_user(grant(&user, &id, Duration::minutes(5)))
            .unwrap();

        let claims = signer.verify::<UserNats>(&token).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.iss, signer.public_key());
        assert_eq!(claims.aud.as_deref(), Some(signer.issuer_account()));
        assert!(!claims.jti.is_empty());
        assert_eq!(claims.nats.kind, "user");
        assert_eq!(claims.nats.issuer_account, None);
        assert!(
            claims
                .nats
                .permissions
                .can_subscribe(&permissions::inbox_pattern(id.user_uuid))
        );
        assert_eq!(signer.verify_ticket(&token).unwrap(), id);
    }

    #[test]
    fn delegated_account_is_written_when_it_differs() {
        let account = KeyPair::new_account().public_key();
        let signer = BusSigner::new(KeyPair::new_account(), Some(account.clone()));
        let user = KeyPair::new_user().public_key();
        let token = signer
            .mint_user(grant(&user, &identity(), Duration::minutes(5)))
            .unwrap();
        let claims = signer.verify::<UserNats>(&token).unwrap();
        assert_eq!(claims.nats.issuer_account, Some(account.clone()));
        assert_eq!(claims.aud, Some(account));
    }

    #[test]
    fn tampered_claims_fail_signature_check() {
        let signer = signer();
        let user = KeyPair::new_user().public_key();
        let token = signer
            .mint_user(grant(&user, &identity(), Duration::minutes(5)))
            .unwrap();
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        let mut claims: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(&parts[1]).unwrap()).unwrap();
        claims["nats"]["pub"]["allow"] = serde_json::json!([">"]);
        parts[1] = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let forged = parts.join(".");

        assert_eq!(
            signer.verify::<UserNats>(&forged).unwrap_err(),
            TokenError::InvalidSignature
        );
    }

    #[test]
    fn tokens_from_another_signer_are_rejected() {
        let ours = signer();
        let theirs = signer();
        let user = KeyPair::new_user().public_key();
        let token = theirs
            .mint_user(grant(&user, &identity(), Duration::minutes(5)))
            .unwrap();
        assert_eq!(
            ours.verify_ticket(&token).unwrap_err(),
            TokenError::InvalidSignature
        );
    }

    #[test]
    fn expired_ticket_is_rejected() {
        let signer = signer();
        let user = KeyPair::new_user().public_key();
        let token = signer
            .mint_user(grant(&user, &identity(), Duration::seconds(-1)))
            .unwrap();
        assert_eq!(
            signer.verify_ticket(&token).unwrap_err(),
            TokenError::ExpiredToken
        );
    }

    #[test]
    fn self_issued_tokens_verify_against_their_issuer() {
        let server = signer();
        let token = server
            .authorization_response("UABC", "SERVER", Err("nope".into()))
            .unwrap();
        let claims = verify_self_issued::<AuthorizationResponseNats>(&token).unwrap();
        assert_eq!(claims.nats.error.as_deref(), Some("nope"));
        assert_eq!(claims.nats.jwt, None);
        assert_eq!(claims.nats.kind, "authorization_response");
        assert_eq!(claims.aud.as_deref(), Some("SERVER"));
    }

    #[test]
    fn malformed_tokens_are_invalid() {
        let signer = signer();
        for input in ["", "a.b", "not.a.jwt.token", "e30.e30.@@@"] {
            assert_eq!(
                signer.verify::<UserNats>(input).unwrap_err(),
                TokenError::InvalidToken,
                "{input}"
            );
        }
    }

    #[test]
    fn bad_seed_is_key_material_error() {
        assert!(matches!(
            BusSigner::from_seed("SAnotaseed", None),
            Err(TokenError::KeyMaterial(_))
        ));
    }

    #[test]
    fn debug_output_hides_key() {
        let out = format!("{:?}", signer());
        assert!(out.contains("[REDACTED]"));
        assert!(!out.contains("seed"));
    }
}
