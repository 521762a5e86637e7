//! Cookie-based SSO against the directory.
//!
//! `Sso` bundles the directory client with the two replaceable strategies
//! (`LoginFlow`, `AddressResolver`). It is immutable after construction and
//! cheap to clone; every request handler gets its own clone.

pub mod address;
mod cookie;
pub mod login;
pub mod middleware;

pub use self::address::{AddressResolver, PeerAddress};
pub use self::login::{FormLogin, LoginFlow, LoginOutcome};
pub use self::middleware::{Decision, require_session};

use crate::{
    Error,
    directory::{DirectoryClient, Session},
};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Redirect, Response},
};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{error, instrument, warn};

#[derive(Clone)]
pub struct Sso {
    inner: Arc<Inner>,
}

struct Inner {
    directory: DirectoryClient,
    login_flow: Arc<dyn LoginFlow>,
    address_resolver: Arc<dyn AddressResolver>,
    secure_cookies: bool,
}

pub struct SsoBuilder {
    directory: DirectoryClient,
    login_flow: Arc<dyn LoginFlow>,
    address_resolver: Arc<dyn AddressResolver>,
    secure_cookies: bool,
}

impl SsoBuilder {
    #[must_use]
    pub fn login_flow(mut self, login_flow: impl LoginFlow + 'static) -> Self {
        self.login_flow = Arc::new(login_flow);
        self
    }

    #[must_use]
    pub fn address_resolver(mut self, address_resolver: impl AddressResolver + 'static) -> Self {
        self.address_resolver = Arc::new(address_resolver);
        self
    }

    /// Mark session cookies `Secure`. Off by default; the directory's cookie
    /// policy can also turn it on.
    #[must_use]
    pub fn secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn build(self) -> Sso {
        Sso {
            inner: Arc::new(Inner {
                directory: self.directory,
                login_flow: self.login_flow,
                address_resolver: self.address_resolver,
                secure_cookies: self.secure_cookies,
            }),
        }
    }
}

impl Sso {
    /// SSO with the default form login and peer address resolver.
    #[must_use]
    pub fn new(directory: DirectoryClient) -> Self {
        Self::builder(directory).build()
    }

    #[must_use]
    pub fn builder(directory: DirectoryClient) -> SsoBuilder {
        SsoBuilder {
            directory,
            login_flow: Arc::new(FormLogin::default()),
            address_resolver: Arc::new(PeerAddress),
            secure_cookies: false,
        }
    }

    #[must_use]
    pub fn directory(&self) -> &DirectoryClient {
        &self.inner.directory
    }

    pub(crate) fn login_flow(&self) -> &dyn LoginFlow {
        self.inner.login_flow.as_ref()
    }

    /// Resolve the caller origin with the configured resolver.
    /// # Errors
    /// Returns `Error::AddressResolution` when the resolver cannot find one.
    pub fn resolve_address(&self, request: &Request) -> Result<String, Error> {
        self.inner.address_resolver.resolve(request)
    }

    /// Exchange credentials for a session bound to `origin`.
    /// # Errors
    /// Returns `Error::AuthFailed` on rejected credentials, `Error::Service` otherwise.
    pub async fn login(
        &self,
        username: &str,
        password: &SecretString,
        origin: &str,
    ) -> Result<Session, Error> {
        self.directory()
            .create_session(username, password, origin)
            .await
    }

    /// Attach the session cookie to `headers`, named and scoped by the
    /// current cookie policy.
    /// # Errors
    /// Returns `Error::Service` if the policy cannot be fetched; no cookie is set then.
    #[instrument(skip_all)]
    pub async fn start_session(&self, headers: &mut HeaderMap, session: &Session) -> Result<(), Error> {
        let policy = self.directory().cookie_policy().await?;
        let value = cookie::session_header(&policy, session, self.inner.secure_cookies)?;
        headers.append(SET_COOKIE, value);
        Ok(())
    }
}

/// Logout handler: invalidates the remote session (best effort) and clears
/// the cookie, then sends the caller back to `/`.
pub async fn logout(State(sso): State<Sso>, headers: HeaderMap) -> Response {
    let policy = match sso.directory().cookie_policy().await {
        Ok(policy) => policy,
        Err(e) => {
            error!("could not fetch cookie policy: {}", e);
            return middleware::service_error();
        }
    };

    if let Some(token) = cookie::find(&headers, &policy.name) {
        if let Err(e) = sso.directory().invalidate_session(&token).await {
            warn!("could not invalidate session: {}", e);
        }
    }

    let mut response = Redirect::to("/").into_response();
    match cookie::clear_header(&policy, sso.inner.secure_cookies) {
        Ok(value) => {
            response.headers_mut().append(SET_COOKIE, value);
        }
        Err(e) => {
            error!("could not build clearing cookie: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }
    response
}
