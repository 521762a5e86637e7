//! Session cookie lookup and `Set-Cookie` construction.

use crate::{
    Error,
    directory::{CookiePolicy, Session},
};
use axum::http::{HeaderMap, HeaderValue, header::COOKIE};
use cookie::{Cookie, CookieBuilder, SameSite};
use time::Duration;

/// Find the value of the policy-named cookie. Empty values count as absent.
pub(crate) fn find(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| Cookie::split_parse(value))
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name && !cookie.value().is_empty())
        .map(|cookie| cookie.value().to_string())
}

fn base(policy: &CookiePolicy, value: String, secure: bool) -> CookieBuilder<'static> {
    let builder = Cookie::build((policy.name.clone(), value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure || policy.secure);

    // empty domain => host-only cookie
    if policy.domain.is_empty() {
        builder
    } else {
        builder.domain(policy.domain.clone())
    }
}

/// `Set-Cookie` value carrying the session token until the session expires.
pub(crate) fn session_header(
    policy: &CookiePolicy,
    session: &Session,
    secure: bool,
) -> Result<HeaderValue, Error> {
    let cookie = base(policy, session.token.clone(), secure)
        .expires(session.expires)
        .build();
    to_header(&cookie)
}

/// `Set-Cookie` value that makes the client drop the session cookie.
pub(crate) fn clear_header(policy: &CookiePolicy, secure: bool) -> Result<HeaderValue, Error> {
    let cookie = base(policy, String::new(), secure)
        .max_age(Duration::ZERO)
        .build();
    to_header(&cookie)
}

fn to_header(cookie: &Cookie<'_>) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(&cookie.to_string())
        .map_err(|e| Error::Service(format!("invalid session cookie: {e}")))
}
