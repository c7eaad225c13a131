//! Clubpass server binary.
//!
//! Serves the HTTP login/ticket surface and, when a bus URL is configured,
//! the authorization callout and magic-link handlers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use clap::{ArgAction, Parser};
use clubpass_api::AppState;
use clubpass_api::config::{ApiConfig, RateLimitConfig};
use clubpass_bus::callout::CalloutHandler;
use clubpass_bus::magic_link::MagicLinkHandler;
use clubpass_bus::server::{BusConnectConfig, BusServer};
use clubpass_core::auth::TokenError;
use clubpass_core::auth::bus_jwt::BusSigner;
use clubpass_core::auth::queries::PgRefreshTokenStore;
use clubpass_core::auth::session_token::SessionTokenCodec;
use clubpass_core::config::{
    AuthConfig, DEFAULT_CALLOUT_CREDENTIAL_TTL_SECS, DEFAULT_SESSION_TOKEN_TTL_SECS,
    DEFAULT_TICKET_TTL_SECS, REFRESH_TOKEN_TTL_DAYS, resolve_session_secret,
};
use clubpass_core::directory::PgDirectory;
use clubpass_core::session::SessionService;
use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

const DEFAULT_LOG_FILTER: &str = "info,clubpass_api=debug,clubpass_core=debug,clubpass_bus=debug";

/// CLI arguments; every option can also come from the environment.
#[derive(Parser)]
#[command(
    name = "clubpass_server",
    version,
    about = "Clubpass session, ticket and bus-callout server"
)]
struct Args {
    /// Address for the HTTP listener.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3200")]
    bind_addr: String,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/clubpass"
    )]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 5)]
    max_connections: u32,

    /// Page magic links point at; the session token is appended as `?t=`.
    #[arg(
        long,
        env = "MAGIC_LINK_BASE_URL",
        default_value = "http://localhost:3000/auth"
    )]
    magic_link_base_url: Url,

    #[arg(long, env = "SESSION_TOKEN_TTL_SECS", default_value_t = DEFAULT_SESSION_TOKEN_TTL_SECS)]
    session_token_ttl_secs: i64,

    #[arg(long, env = "TICKET_TTL_SECS", default_value_t = DEFAULT_TICKET_TTL_SECS)]
    ticket_ttl_secs: i64,

    /// Lifetime of credentials issued by the authorization callout.
    #[arg(long, env = "CALLOUT_TTL_SECS", default_value_t = DEFAULT_CALLOUT_CREDENTIAL_TTL_SECS)]
    callout_ttl_secs: i64,

    /// Deadline for each directory or refresh-store call.
    #[arg(long, env = "CALL_TIMEOUT_MS", default_value_t = 5000)]
    call_timeout_ms: u64,

    /// Mark the refresh cookie `Secure`.
    #[arg(long, env = "COOKIE_SECURE", default_value_t = true, action = ArgAction::Set)]
    cookie_secure: bool,

    /// Rate-limit on the first `X-Forwarded-For` address instead of the peer.
    #[arg(long, env = "TRUST_FORWARDED_FOR", default_value_t = false, action = ArgAction::Set)]
    trust_forwarded_for: bool,

    #[arg(long, env = "RATE_LIMIT_RPS", default_value_t = 5)]
    rate_limit_rps: u32,

    #[arg(long, env = "RATE_LIMIT_BURST", default_value_t = 10)]
    rate_limit_burst: u32,

    /// Seconds between sweeps of expired refresh tokens (0 disables).
    #[arg(long, env = "PURGE_INTERVAL_SECS", default_value_t = 3600)]
    purge_interval_secs: u64,

    /// Bus server URL. Bus handlers are not started without it.
    #[arg(long, env = "BUS_URL")]
    bus_url: Option<String>,

    #[arg(long, env = "BUS_USER")]
    bus_user: Option<String>,

    #[arg(long, env = "BUS_PASSWORD", hide_env_values = true)]
    bus_password: Option<String>,

    /// Issue bus credentials. When off, tickets and callouts fail closed.
    #[arg(long, env = "BUS_AUTH_ENABLED", default_value_t = true, action = ArgAction::Set)]
    bus_auth_enabled: bool,

    /// nkey seed that signs bus credentials.
    #[arg(long, env = "BUS_SIGNING_SEED", hide_env_values = true)]
    bus_signing_seed: Option<String>,

    /// Account users are placed into (defaults to the seed's public key).
    #[arg(long, env = "BUS_ISSUER_ACCOUNT")]
    bus_issuer_account: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();

    info!(
        bind_addr = %args.bind_addr,
        max_connections = args.max_connections,
        "starting clubpass_server"
    );

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(StdDuration::from_secs(30))
        .connect(&args.database_url)
        .await?;

    info!("running database migrations");
    clubpass_core::migrate::migrate(&pool).await?;

    let auth_config = AuthConfig {
        magic_link_base_url: args.magic_link_base_url.clone(),
        session_token_ttl: Duration::seconds(args.session_token_ttl_secs),
        refresh_token_ttl: Duration::days(REFRESH_TOKEN_TTL_DAYS),
        ticket_ttl: Duration::seconds(args.ticket_ttl_secs),
        callout_credential_ttl: Duration::seconds(args.callout_ttl_secs),
        call_timeout: StdDuration::from_millis(args.call_timeout_ms),
    };
    let codec = Arc::new(SessionTokenCodec::new(resolve_session_secret().as_bytes()));
    let sessions = Arc::new(SessionService::new(
        auth_config,
        codec,
        bus_signer(&args)?,
        Arc::new(PgRefreshTokenStore::new(pool.clone())),
        Arc::new(PgDirectory::new(pool)),
    ));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C");
                return;
            }
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    let sweep = (args.purge_interval_secs > 0).then(|| {
        tokio::spawn(sweep_expired(
            sessions.clone(),
            StdDuration::from_secs(args.purge_interval_secs),
            shutdown.clone(),
        ))
    });

    let bus = match &args.bus_url {
        Some(url) => {
            let client = clubpass_bus::server::connect(&BusConnectConfig {
                url: url.clone(),
                user: args.bus_user.clone(),
                password: args.bus_password.clone(),
            })
            .await?;
            let server = BusServer::new(
                client,
                CalloutHandler::from_service(&sessions),
                MagicLinkHandler::new(sessions.clone()),
            );
            Some(tokio::spawn(server.run(shutdown.clone())))
        }
        None => {
            info!("BUS_URL not set, bus handlers disabled");
            None
        }
    };

    let api_config = ApiConfig {
        bind_addr: args.bind_addr.clone(),
        secure_cookies: args.cookie_secure,
        trust_forwarded_for: args.trust_forwarded_for,
        rate_limit: RateLimitConfig {
            requests_per_second: args.rate_limit_rps,
            burst: args.rate_limit_burst,
            ..RateLimitConfig::default()
        },
    };
    let app = clubpass_api::router(AppState::new(sessions, api_config));

    let listener = tokio::net::TcpListener::bind(&args.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP API listening");

    let api_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned())
    .await;

    // When the HTTP listener exits, stop everything else too.
    shutdown.cancel();
    if let Some(handle) = bus {
        match handle.await {
            Ok(Err(e)) => error!(error = %e, "bus handlers failed"),
            Err(e) => error!(error = %e, "bus task panicked"),
            Ok(Ok(())) => {}
        }
    }
    if let Some(handle) = sweep {
        join_logged("sweep", handle).await;
    }

    api_result?;
    info!("clubpass_server stopped");
    Ok(())
}

/// Load the bus signing key, or `None` when bus credentials are off.
fn bus_signer(args: &Args) -> Result<Option<Arc<BusSigner>>, TokenError> {
    if !args.bus_auth_enabled {
        warn!("bus credentials disabled; tickets and callouts will fail closed");
        return Ok(None);
    }
    let Some(seed) = args
        .bus_signing_seed
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    else {
        warn!("BUS_SIGNING_SEED not set; tickets and callouts will fail closed");
        return Ok(None);
    };
    let signer = BusSigner::from_seed(seed, args.bus_issuer_account.clone())?;
    info!(
        public_key = signer.public_key(),
        issuer_account = signer.issuer_account(),
        "bus signer loaded"
    );
    Ok(Some(Arc::new(signer)))
}

/// Wait for a background task, logging it if it panicked or was aborted.
async fn join_logged(task: &'static str, handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            error!(task, error = %e, "background task failed");
            false
        }
    }
}

async fn sweep_expired(
    sessions: Arc<SessionService>,
    every: StdDuration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = sessions.purge_expired().await {
                    warn!(error = %e, "expired refresh token sweep failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_logged_reports_panicked_tasks() {
        assert!(join_logged("ok", tokio::spawn(async {})).await);
        let failed: JoinHandle<()> = tokio::spawn(async { panic!("sweep blew up") });
        assert!(!join_logged("sweep", failed).await);
    }
}
