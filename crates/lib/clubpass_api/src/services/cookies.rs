//! Refresh-token cookie.

use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

/// Cookie carrying the raw refresh token.
pub const REFRESH_COOKIE: &str = "refresh_token";

/// Cookie lifetime, matching the refresh-token TTL.
const REFRESH_COOKIE_MAX_AGE: Duration = Duration::days(30);

fn base(value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .build()
}

/// Build the httpOnly refresh cookie.
pub fn refresh_cookie(token: &str, secure: bool) -> Cookie<'static> {
    let mut cookie = base(token.to_string(), secure);
    cookie.set_max_age(REFRESH_COOKIE_MAX_AGE);
    cookie
}

/// Build an expired refresh cookie to clear client state.
pub fn clear_refresh_cookie(secure: bool) -> Cookie<'static> {
    let mut cookie = base(String::new(), secure);
    cookie.set_max_age(Duration::ZERO);
    cookie
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_cookie_is_locked_down() {
        let cookie = refresh_cookie("abc", true);
        assert_eq!(cookie.name(), REFRESH_COOKIE);
        assert_eq!(cookie.value(), "abc");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Strict));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(Duration::days(30)));
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let cookie = clear_refresh_cookie(false);
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.secure(), Some(false));
        assert_eq!(cookie.max_age(), Some(Duration::ZERO));
    }
}
