//! Admission control middleware.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::AppState;
use crate::error::AppError;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Axum middleware: rejects with 429 once the client address has used up its
/// bucket.
pub async fn limit_by_ip(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let addr = client_addr(&request, state.config.trust_forwarded_for);
    if !state.limiter.allow(addr) {
        debug!(%addr, "request rate limited");
        return Err(AppError::RateLimited);
    }
    Ok(next.run(request).await)
}

/// Client address: first `X-Forwarded-For` hop when trusted, else the peer
/// address. Requests with neither share the unspecified-address bucket.
fn client_addr(request: &Request, trust_forwarded_for: bool) -> IpAddr {
    if trust_forwarded_for
        && let Some(addr) = request
            .headers()
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok())
    {
        return addr;
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(peer)| peer.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;

    use super::*;

    fn request(forwarded: Option<&str>, peer: Option<SocketAddr>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/ticket");
        if let Some(value) = forwarded {
            builder = builder.header(X_FORWARDED_FOR, value);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            request.extensions_mut().insert(ConnectInfo(peer));
        }
        request
    }

    #[test]
    fn forwarded_header_only_counts_when_trusted() {
        let peer: SocketAddr = "10.1.1.1:4000".parse().unwrap();
        let req = request(Some("203.0.113.9, 10.0.0.1"), Some(peer));

        assert_eq!(
            client_addr(&req, true),
            "203.0.113.9".parse::<IpAddr>().unwrap()
        );
        assert_eq!(client_addr(&req, false), peer.ip());
    }

    #[test]
    fn garbage_forwarded_header_falls_back_to_peer() {
        let peer: SocketAddr = "10.1.1.1:4000".parse().unwrap();
        let req = request(Some("not-an-ip"), Some(peer));
        assert_eq!(client_addr(&req, true), peer.ip());
    }

    #[test]
    fn unknown_peer_is_unspecified() {
        let req = request(None, None);
        assert_eq!(client_addr(&req, false), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }
}
