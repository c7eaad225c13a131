//! Session and ticket configuration.

use std::path::PathBuf;
use std::time::Duration as StdDuration;

use chrono::Duration;
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::info;
use url::Url;

/// Default session (magic link) token lifetime: 15 minutes.
pub const DEFAULT_SESSION_TOKEN_TTL_SECS: i64 = 15 * 60;

/// Refresh token lifetime: 30 days.
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 30;

/// Default bus ticket lifetime: 10 minutes.
pub const DEFAULT_TICKET_TTL_SECS: i64 = 10 * 60;

/// Default lifetime of credentials issued by the authorization callout: 1 hour.
pub const DEFAULT_CALLOUT_CREDENTIAL_TTL_SECS: i64 = 60 * 60;

/// Default bound on any single directory or store call.
pub const DEFAULT_CALL_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// Configuration for the session/ticket service.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Base URL magic links point at; the token is appended as `?t=`.
    pub magic_link_base_url: Url,
    pub session_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub ticket_ttl: Duration,
    pub callout_credential_ttl: Duration,
    /// Upper bound on every directory/store call.
    pub call_timeout: StdDuration,
}

impl AuthConfig {
    /// Defaults for everything except the magic-link base URL.
    pub fn new(magic_link_base_url: Url) -> Self {
        Self {
            magic_link_base_url,
            session_token_ttl: Duration::seconds(DEFAULT_SESSION_TOKEN_TTL_SECS),
            refresh_token_ttl: Duration::days(REFRESH_TOKEN_TTL_DAYS),
            ticket_ttl: Duration::seconds(DEFAULT_TICKET_TTL_SECS),
            callout_credential_ttl: Duration::seconds(DEFAULT_CALLOUT_CREDENTIAL_TTL_SECS),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Resolve the session signing secret: env var `SESSION_SECRET` →
/// `JWT_SECRET` → persisted file.
pub fn resolve_session_secret() -> String {
    for var in ["SESSION_SECRET", "JWT_SECRET"] {
        if let Ok(secret) = std::env::var(var)
            && !secret.is_empty()
        {
            return secret;
        }
    }
    let secret_path = session_secret_path();
    if let Ok(existing) = std::fs::read_to_string(&secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = secret_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(&secret_path, &secret);
    info!(path = %secret_path.display(), "generated new session secret");
    secret
}

/// Path to the persisted session secret file.
fn session_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clubpass")
        .join("session-secret")
}
