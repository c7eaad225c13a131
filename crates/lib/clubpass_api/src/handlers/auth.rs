//! Login, ticket and logout handlers.

use axum::Json;
use axum::extract::{Query, State};
use axum_extra::extract::CookieJar;
use tracing::warn;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{LoginQuery, LoginResponse, StatusResponse, TicketResponse};
use crate::services::cookies::{REFRESH_COOKIE, clear_refresh_cookie, refresh_cookie};

/// `GET /login?t=<sessionToken>`: exchange a magic-link token for a refresh
/// cookie.
pub async fn login_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<LoginQuery>,
) -> AppResult<(CookieJar, Json<LoginResponse>)> {
    let token = query
        .t
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Validation("missing token".into()))?;

    let grant = state.sessions.login_user(&token).await?;
    let jar = jar.add(refresh_cookie(
        &grant.refresh_token,
        state.config.secure_cookies,
    ));
    Ok((
        jar,
        Json(LoginResponse {
            status: "ok".into(),
            user_uuid: grant.user_uuid,
        }),
    ))
}

/// `GET /ticket`: rotate the refresh cookie and mint a bus ticket.
pub async fn ticket_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<TicketResponse>)> {
    let raw = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Unauthorized("missing refresh token".into()))?;

    let grant = state.sessions.get_ticket(&raw).await?;
    let jar = jar.add(refresh_cookie(
        &grant.refresh_token,
        state.config.secure_cookies,
    ));
    Ok((
        jar,
        Json(TicketResponse {
            ticket: grant.ticket,
        }),
    ))
}

/// `POST /logout`: revoke the cookie's token and clear it. Always 200.
pub async fn logout_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<StatusResponse>) {
    if let Some(cookie) = jar.get(REFRESH_COOKIE)
        && let Err(e) = state.sessions.logout_user(cookie.value()).await
    {
        warn!(error = %e, "logout could not revoke refresh token");
    }
    let jar = jar.add(clear_refresh_cookie(state.config.secure_cookies));
    (
        jar,
        Json(StatusResponse {
            status: "ok".into(),
        }),
    )
}
