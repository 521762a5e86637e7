//! Per-request authentication decision.
//!
//! Flow Overview:
//! - fetch the cookie policy (every pass, it can rotate server-side)
//! - no cookie: `GET`/`HEAD` show the login form, `POST` submits credentials,
//!   anything else gets `401`
//! - cookie: resolve the caller address and validate the token
//!   - valid: forward, with the `Session` in the request extensions
//!   - invalid or no address: clear the cookie and handle as "no cookie"
//!   - directory outage: `500`, cookie left alone
//!
//! A request is only forwarded after a successful validation.

use super::{Sso, cookie};
use crate::{Error, directory::CookiePolicy};
use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode, header::SET_COOKIE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, error, info, instrument, warn};

const AUTH_ERR: &str = "unauthorized, login required";
const SERVICE_ERR: &str = "service error";

/// Outcome of one authentication pass.
#[derive(Debug)]
pub enum Decision {
    /// Authenticated; hand the request to the protected handler.
    Forward(Request),
    /// Not authenticated; send this response instead.
    Respond(Response),
}

/// axum middleware; install with `middleware::from_fn_with_state(sso, require_session)`.
pub async fn require_session(State(sso): State<Sso>, request: Request, next: Next) -> Response {
    match sso.authenticate(request).await {
        Decision::Forward(request) => next.run(request).await,
        Decision::Respond(response) => response,
    }
}

pub(crate) fn service_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, SERVICE_ERR).into_response()
}

impl Sso {
    /// Run the authentication state machine for `request`.
    #[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
    pub async fn authenticate(&self, request: Request) -> Decision {
        let policy = match self.directory().cookie_policy().await {
            Ok(policy) => policy,
            Err(e) => {
                error!("could not fetch cookie policy: {}", e);
                return Decision::Respond(service_error());
            }
        };

        let Some(token) = cookie::find(request.headers(), &policy.name) else {
            return Decision::Respond(self.without_session(request).await);
        };

        let result = match self.resolve_address(&request) {
            Ok(origin) => self.directory().validate_session(&token, &origin).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(session) => {
                debug!(username = ?session.username, "session valid");
                let mut request = request;
                request.extensions_mut().insert(session);
                Decision::Forward(request)
            }
            Err(Error::AddressResolution(cause)) => {
                warn!("could not get remote addr, deleting cookie: {}", cause);
                let response = self.without_session(request).await;
                Decision::Respond(self.clear_cookie(response, &policy))
            }
            Err(Error::InvalidSession) => {
                info!("session rejected by directory, deleting cookie");
                let response = self.without_session(request).await;
                Decision::Respond(self.clear_cookie(response, &policy))
            }
            Err(e) => {
                // Transient outage: keep the cookie, it may still be valid.
                error!("could not validate session: {}", e);
                Decision::Respond(service_error())
            }
        }
    }

    /// No usable session on the request.
    async fn without_session(&self, request: Request) -> Response {
        let method = request.method().clone();

        if method == Method::GET || method == Method::HEAD {
            self.login_flow().handle(request, self).await.response
        } else if method == Method::POST {
            let outcome = self.login_flow().handle(request, self).await;
            if !outcome.authenticated {
                warn!("authentication failed");
            }
            outcome.response
        } else {
            (StatusCode::UNAUTHORIZED, AUTH_ERR).into_response()
        }
    }

    /// Put the clearing `Set-Cookie` ahead of any cookie the login flow issued,
    /// so a fresh session set in the same response wins.
    fn clear_cookie(&self, mut response: Response, policy: &CookiePolicy) -> Response {
        let value = match cookie::clear_header(policy, self.inner.secure_cookies) {
            Ok(value) => value,
            Err(e) => {
                error!("could not build clearing cookie: {}", e);
                return response;
            }
        };

        let headers = response.headers_mut();
        let issued: Vec<HeaderValue> = headers.get_all(SET_COOKIE).iter().cloned().collect();
        headers.remove(SET_COOKIE);
        headers.append(SET_COOKIE, value);
        for cookie in issued {
            headers.append(SET_COOKIE, cookie);
        }
        response
    }
}
