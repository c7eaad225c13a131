//! # clubpass_api
//!
//! HTTP surface for Clubpass: magic-link login, bus tickets and logout.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use clubpass_core::session::SessionService;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::handlers::{auth, bus, health};
use crate::services::rate_limit::IpRateLimiter;

/// Route paths.
pub mod routes {
    pub const GET_HEALTHZ: &str = "/healthz";
    pub const GET_LOGIN: &str = "/login";
    pub const GET_TICKET: &str = "/ticket";
    pub const POST_LOGOUT: &str = "/logout";
    pub const GET_BUS_ISSUER: &str = "/bus/issuer";
}

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session/ticket service.
    pub sessions: Arc<SessionService>,
    /// API configuration.
    pub config: ApiConfig,
    /// Per-address admission control.
    pub limiter: Arc<IpRateLimiter>,
}

impl AppState {
    pub fn new(sessions: Arc<SessionService>, config: ApiConfig) -> Self {
        let limiter = Arc::new(IpRateLimiter::new(&config.rate_limit));
        Self {
            sessions,
            config,
            limiter,
        }
    }
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    // Health checks bypass admission control.
    let public = Router::new().route(routes::GET_HEALTHZ, get(health::healthz));

    let limited = Router::new()
        .route(routes::GET_LOGIN, get(auth::login_handler))
        .route(routes::GET_TICKET, get(auth::ticket_handler))
        .route(routes::POST_LOGOUT, post(auth::logout_handler))
        .route(routes::GET_BUS_ISSUER, get(bus::issuer_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::limit_by_ip,
        ));

    Router::new()
        .merge(public)
        .merge(limited)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
