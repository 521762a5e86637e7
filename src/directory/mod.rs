//! Client for the directory's session REST API.
//!
//! One `DirectoryClient` is built at startup and shared (cloned) by every
//! request. All calls authenticate as the application with HTTP basic auth;
//! the end-user credentials only ever appear in the create-session payload.
//!
//! Flow Overview:
//! - `cookie_policy` tells the gateway which cookie carries the SSO token.
//! - `create_session` exchanges username/password/address for a token.
//! - `validate_session` confirms a token for the caller's address.
//! - `invalidate_session` is the remote logout.
//!
//! Every response status goes through `classify`, so each code maps to
//! exactly one outcome per operation.

pub mod model;

pub use self::model::{CookiePolicy, Session, User};

use crate::{APP_USER_AGENT, Error};
use anyhow::{Context, anyhow};
use reqwest::{Client, Method, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{Instrument, Span, debug, info_span, instrument, warn};
use url::Url;

use self::model::SessionPayload;

const DIRECTORY_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DIRECTORY_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const REST_PREFIX: &str = "rest/usermanagement/1/";
const REMOTE_ADDRESS_FACTOR: &str = "remote_address";

/// How a directory response status is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
    Success,
    NotFound,
    /// The directory refused the application itself (bad app credentials or
    /// address not allowed). Never the end-user's fault.
    Denied,
    Rejected,
    Unexpected,
}

pub(crate) fn classify(status: StatusCode) -> Reply {
    match status.as_u16() {
        200..=299 => Reply::Success,
        404 => Reply::NotFound,
        401 | 403 => Reply::Denied,
        400..=499 => Reply::Rejected,
        _ => Reply::Unexpected,
    }
}

#[derive(Clone)]
pub struct DirectoryClient {
    client: Client,
    base_url: Url,
    app_name: String,
    app_password: SecretString,
}

impl std::fmt::Debug for DirectoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryClient")
            .field("base_url", &self.base_url.as_str())
            .field("app_name", &self.app_name)
            .finish_non_exhaustive()
    }
}

impl DirectoryClient {
    /// Build a client for the directory at `base_url`.
    /// # Errors
    /// Returns an error if `base_url` is not an http(s) URL or the HTTP client cannot be built.
    pub fn new(app_name: &str, app_password: SecretString, base_url: &str) -> anyhow::Result<Self> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        let url = Url::parse(&base).with_context(|| format!("invalid directory URL: {base}"))?;
        match url.scheme() {
            "http" | "https" => {}
            scheme => return Err(anyhow!("Error parsing URL: unsupported scheme {scheme}")),
        }
        let base_url = url
            .join(REST_PREFIX)
            .context("could not build directory REST URL")?;

        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .connect_timeout(DIRECTORY_CONNECT_TIMEOUT)
            .timeout(DIRECTORY_REQUEST_TIMEOUT)
            .build()?;

        debug!("directory REST URL: {}", base_url);

        Ok(Self {
            client,
            base_url,
            app_name: app_name.to_string(),
            app_password,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Service(format!("invalid directory endpoint {path}: {e}")))
    }

    fn session_url(&self, token: &str) -> Result<Url, Error> {
        let mut url = self.endpoint("session")?;
        url.path_segments_mut()
            .map_err(|()| Error::Service("directory URL cannot be a base".to_string()))?
            .push(token);
        Ok(url)
    }

    async fn call(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
        span: Span,
    ) -> Result<Response, Error> {
        let mut request = self
            .client
            .request(method, url)
            .basic_auth(&self.app_name, Some(self.app_password.expose_secret()))
            .header(reqwest::header::ACCEPT, "application/json");

        if let Some(body) = body {
            request = request.json(&body);
        }

        Ok(request.send().instrument(span).await?)
    }

    /// Fetch the SSO cookie name and domain.
    /// # Errors
    /// Returns `Error::Service` on transport failure or any non-2xx status.
    #[instrument(skip(self))]
    pub async fn cookie_policy(&self) -> Result<CookiePolicy, Error> {
        let url = self.endpoint("config/cookie")?;
        let span = info_span!("directory.cookie_policy", http.method = "GET", url = %url);
        let response = self.call(Method::GET, url, None, span).await?;

        let status = response.status();
        match classify(status) {
            Reply::Success => decode(response).await,
            Reply::Denied => Err(denied(status)),
            Reply::NotFound | Reply::Rejected | Reply::Unexpected => Err(Error::Service(format!(
                "cookie config - {}",
                failure_detail(response).await
            ))),
        }
    }

    /// Exchange end-user credentials for a session bound to `origin`.
    /// # Errors
    /// Returns `Error::AuthFailed` when the credentials are rejected and
    /// `Error::Service` on transport, decoding, or server failures.
    #[instrument(skip(self, username, password))]
    pub async fn create_session(
        &self,
        username: &str,
        password: &SecretString,
        origin: &str,
    ) -> Result<Session, Error> {
        let url = self.endpoint("session")?;
        let payload = json!({
            "username": username,
            "password": password.expose_secret(),
            "validation-factors": validation_factors(origin),
        });

        let span = info_span!("directory.create_session", http.method = "POST", url = %url);
        let response = self.call(Method::POST, url, Some(payload), span).await?;

        let status = response.status();
        match classify(status) {
            Reply::Success => decode::<SessionPayload>(response).await?.try_into(),
            Reply::NotFound | Reply::Rejected => {
                debug!("credentials rejected: {}", failure_detail(response).await);
                Err(Error::AuthFailed)
            }
            Reply::Denied => Err(denied(status)),
            Reply::Unexpected => Err(Error::Service(format!(
                "create session - {}",
                failure_detail(response).await
            ))),
        }
    }

    /// Validate `token` for a caller at `origin`.
    /// # Errors
    /// Returns `Error::InvalidSession` when the directory rejects the token and
    /// `Error::Service` for everything else.
    #[instrument(skip(self, token))]
    pub async fn validate_session(&self, token: &str, origin: &str) -> Result<Session, Error> {
        let url = self.session_url(token)?;
        let payload = validation_factors(origin);

        // url carries the token
        let span = info_span!(
            "directory.validate_session",
            http.method = "POST",
            endpoint = "session/{token}"
        );
        let response = self.call(Method::POST, url, Some(payload), span).await?;

        let status = response.status();
        match classify(status) {
            Reply::Success => decode::<SessionPayload>(response).await?.try_into(),
            Reply::NotFound | Reply::Rejected => {
                debug!("session rejected: {}", failure_detail(response).await);
                Err(Error::InvalidSession)
            }
            Reply::Denied => Err(denied(status)),
            Reply::Unexpected => Err(Error::Service(format!(
                "validate session - {}",
                failure_detail(response).await
            ))),
        }
    }

    /// Remote logout. A token the directory no longer knows counts as done.
    /// # Errors
    /// Returns `Error::Service` when the directory cannot be reached or refuses.
    #[instrument(skip(self, token))]
    pub async fn invalidate_session(&self, token: &str) -> Result<(), Error> {
        let url = self.session_url(token)?;
        let span = info_span!(
            "directory.invalidate_session",
            http.method = "DELETE",
            endpoint = "session/{token}"
        );
        let response = self.call(Method::DELETE, url, None, span).await?;

        let status = response.status();
        match classify(status) {
            Reply::Success => Ok(()),
            Reply::NotFound => {
                debug!("session already gone");
                Ok(())
            }
            Reply::Denied => Err(denied(status)),
            Reply::Rejected | Reply::Unexpected => Err(Error::Service(format!(
                "invalidate session - {}",
                failure_detail(response).await
            ))),
        }
    }

    /// Look up a user by name.
    /// # Errors
    /// Returns `Error::NotFound` when no such user exists and `Error::Service` otherwise.
    #[instrument(skip(self))]
    pub async fn user(&self, username: &str) -> Result<User, Error> {
        let mut url = self.endpoint("user")?;
        url.query_pairs_mut().append_pair("username", username);

        let span = info_span!("directory.user", http.method = "GET", url = %url);
        let response = self.call(Method::GET, url, None, span).await?;

        let status = response.status();
        match classify(status) {
            Reply::Success => decode(response).await,
            Reply::NotFound => Err(Error::NotFound),
            Reply::Denied => Err(denied(status)),
            Reply::Rejected | Reply::Unexpected => Err(Error::Service(format!(
                "user lookup - {}",
                failure_detail(response).await
            ))),
        }
    }
}

fn validation_factors(origin: &str) -> Value {
    json!({
        "validationFactors": [
            {"name": REMOTE_ADDRESS_FACTOR, "value": origin}
        ]
    })
}

fn denied(status: StatusCode) -> Error {
    warn!("directory denied application credentials: {}", status);
    Error::Service(format!("directory denied application access ({status})"))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, Error> {
    response
        .json::<T>()
        .await
        .map_err(|e| Error::Service(format!("Error parsing JSON response: {}", e.without_url())))
}

fn directory_error_message(json_response: &Value) -> String {
    let reason = json_response
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("");
    let message = json_response
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("");

    match (reason.is_empty(), message.is_empty()) {
        (false, false) => format!("{reason}: {message}"),
        (false, true) => reason.to_string(),
        _ => message.to_string(),
    }
}

async fn failure_detail(response: Response) -> String {
    let status = response.status();
    let json_response: Value = response.json().await.unwrap_or(Value::Null);
    format!("{}, {}", status, directory_error_message(&json_response))
}
