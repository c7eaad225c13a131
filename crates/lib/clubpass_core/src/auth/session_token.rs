//! Session tokens: HS256-signed JWTs carrying a fully resolved [`Identity`].
//!
//! Used for magic links and as a bus password. Validation is stateless.

use std::fmt;

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TokenError;
use crate::models::Identity;

/// Claims embedded in a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject: internal user UUID.
    pub sub: String,
    /// Unique token ID.
    pub jti: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
    #[serde(flatten)]
    pub identity: Identity,
}

/// Signs and verifies session tokens with a shared secret.
#[derive(Clone)]
pub struct SessionTokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl SessionTokenCodec {
    pub fn new(secret: &[u8]) -> Self {
        // Only HS256 is accepted; tokens declaring any other algorithm fail.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        // Expiry is checked below with `now >= exp` semantics.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Sign a session token for `identity` valid for `ttl`.
    ///
    /// A zero or negative `ttl` yields a token that is already expired.
    pub fn generate(&self, identity: &Identity, ttl: Duration) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: identity.user_uuid.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            identity: identity.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(format!("jwt encode: {e}")))
    }

    /// Verify a session token, returning its claims on success.
    pub fn validate(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let data =
            decode::<SessionClaims>(token, &self.decoding, &self.validation).map_err(classify)?;
        if Utc::now().timestamp() >= data.claims.exp {
            return Err(TokenError::ExpiredToken);
        }
        Ok(data.claims)
    }
}

impl fmt::Debug for SessionTokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionTokenCodec([REDACTED])")
    }
}

fn classify(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::ExpiredToken,
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenError::InvalidSignature,
        _ => TokenError::InvalidToken,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClubRole, Role};

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

    #[test]
    fn generate_then_validate_returns_identity() {
        let codec = SessionTokenCodec::new(b"secret-a");
        let id = identity();
        for ttl in [Duration::seconds(5), Duration::minutes(15), Duration::days(1)] {
            let token = codec.generate(&id, ttl).unwrap();
            let claims = codec.validate(&token).unwrap();
            assert_eq!(claims.identity, id);
            assert_eq!(claims.sub, id.user_uuid.to_string());
            assert!(claims.exp > claims.iat);
        }
    }

    #[test]
    fn each_token_has_a_unique_id() {
        let codec = SessionTokenCodec::new(b"secret-a");
        let id = identity();
        let a = codec.validate(&codec.generate(&id, Duration::minutes(1)).unwrap()).unwrap();
        let b = codec.validate(&codec.generate(&id, Duration::minutes(1)).unwrap()).unwrap();
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn non_positive_ttl_is_expired() {
        let codec = SessionTokenCodec::new(b"secret-a");
        for ttl in [Duration::zero(), Duration::seconds(-1), Duration::hours(-3)] {
            let token = codec.generate(&identity(), ttl).unwrap();
            assert_eq!(codec.validate(&token), Err(TokenError::ExpiredToken));
        }
    }

    #[test]
    fn other_secret_is_rejected() {
        let a = SessionTokenCodec::new(b"secret-a");
        let b = SessionTokenCodec::new(b"secret-b");
        let token = a.generate(&identity(), Duration::minutes(5)).unwrap();
        assert_eq!(b.validate(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn other_algorithm_is_rejected() {
        let codec = SessionTokenCodec::new(b"secret-a");
        let id = identity();
        let now = Utc::now();
        let claims = SessionClaims {
            sub: id.user_uuid.to_string(),
            jti: "x".into(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(5)).timestamp(),
            identity: id,
        };
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(b"secret-a"),
        )
        .unwrap();
        assert_eq!(codec.validate(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn malformed_input_is_invalid_token() {
        let codec = SessionTokenCodec::new(b"secret-a");
        for input in ["not.a.jwt.token", "", "abc", "a.b", "....", "%%%.%%%.%%%"] {
            assert_eq!(codec.validate(input), Err(TokenError::InvalidToken), "{input}");
        }
    }
}
