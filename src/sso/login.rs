//! Login flow invoked when a request has no valid session.

use super::Sso;
use async_trait::async_trait;
use axum::{
    Form,
    extract::{FromRequest, OriginalUri, Request},
    http::{Method, StatusCode, uri::PathAndQuery},
    response::{Html, IntoResponse, Redirect, Response},
};
use secrecy::SecretString;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of one login flow pass.
#[derive(Debug)]
pub struct LoginOutcome {
    pub authenticated: bool,
    pub response: Response,
}

impl LoginOutcome {
    #[must_use]
    pub fn authenticated(response: Response) -> Self {
        Self {
            authenticated: true,
            response,
        }
    }

    #[must_use]
    pub fn rejected(response: Response) -> Self {
        Self {
            authenticated: false,
            response,
        }
    }
}

/// Renders the login presentation and handles credential submissions.
///
/// The middleware only calls this for `GET`/`HEAD` (presentation) and `POST`
/// (submission) requests without a valid session. The returned response is
/// always sent as-is; the request never reaches the protected handler.
#[async_trait]
pub trait LoginFlow: Send + Sync {
    async fn handle(&self, request: Request, sso: &Sso) -> LoginOutcome;
}

const DEFAULT_LOGIN_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Sign in</title>
</head>
<body>
  <form method="post">
    <label for="username">Username</label>
    <input id="username" name="username" type="text" autocomplete="username" required>
    <label for="password">Password</label>
    <input id="password" name="password" type="password" autocomplete="current-password" required>
    <button type="submit">Sign in</button>
  </form>
</body>
</html>
"#;

#[derive(Deserialize)]
struct Credentials {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

/// Default HTML form login.
#[derive(Debug, Clone)]
pub struct FormLogin {
    template: Arc<str>,
}

impl Default for FormLogin {
    fn default() -> Self {
        Self::with_template(DEFAULT_LOGIN_PAGE)
    }
}

impl FormLogin {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use custom markup. The page must post `username` and `password` as
    /// `application/x-www-form-urlencoded` to the same URL.
    #[must_use]
    pub fn with_template(template: &str) -> Self {
        Self {
            template: Arc::from(template),
        }
    }

    fn page(&self) -> Response {
        (StatusCode::OK, Html(self.template.to_string())).into_response()
    }

    fn retry(&self) -> LoginOutcome {
        LoginOutcome::rejected(self.page())
    }

    async fn submit(&self, request: Request, sso: &Sso) -> LoginOutcome {
        let origin = match sso.resolve_address(&request) {
            Ok(origin) => origin,
            Err(e) => {
                warn!("could not get remote addr: {}", e);
                return self.retry();
            }
        };

        let target = redirect_target(&request);

        let credentials = match Form::<Credentials>::from_request(request, &()).await {
            Ok(Form(credentials)) => credentials,
            Err(e) => {
                warn!("malformed login submission: {}", e);
                return self.retry();
            }
        };

        if credentials.username.is_empty() || credentials.password.is_empty() {
            warn!("login submission without username or password");
            return self.retry();
        }

        let password = SecretString::from(credentials.password);
        let session = match sso.login(&credentials.username, &password, &origin).await {
            Ok(session) => session,
            Err(e) => {
                warn!("login/new session failed: {}", e);
                return self.retry();
            }
        };

        // Post/Redirect/Get: the browser comes back with the cookie set.
        let mut response = Redirect::to(&target).into_response();
        if let Err(e) = sso.start_session(response.headers_mut(), &session).await {
            warn!("could not start session: {}", e);
            return self.retry();
        }

        info!(username = %credentials.username, "session started");

        LoginOutcome::authenticated(response)
    }
}

#[async_trait]
impl LoginFlow for FormLogin {
    async fn handle(&self, request: Request, sso: &Sso) -> LoginOutcome {
        match *request.method() {
            Method::GET | Method::HEAD => self.retry(),
            Method::POST => self.submit(request, sso).await,
            _ => LoginOutcome::rejected(StatusCode::UNAUTHORIZED.into_response()),
        }
    }
}

/// Where to send the browser after login: the URI as the client sent it
/// (before any `nest` prefix stripping), restricted to local paths.
fn redirect_target(request: &Request) -> String {
    let uri = request
        .extensions()
        .get::<OriginalUri>()
        .map_or_else(|| request.uri(), |OriginalUri(uri)| uri);
    let target = uri.path_and_query().map_or("/", PathAndQuery::as_str);

    if is_local_path(target) {
        target.to_string()
    } else {
        "/".to_string()
    }
}

// `//host` and `/\host` are read by browsers as another origin
fn is_local_path(target: &str) -> bool {
    target.starts_with('/') && !target.starts_with("//") && !target.starts_with("/\\")
}
