//! # Portero (Crowd SSO Gateway)
//!
//! `portero` puts a cookie-based single sign-on check in front of any axum
//! application. Sessions are owned by a remote Crowd-style directory; the
//! gateway only carries the opaque session token in a cookie and asks the
//! directory, on every request, whether that token is still good.
//!
//! ## Request Flow
//!
//! 1. Fetch the cookie policy (name and domain) from the directory.
//! 2. Look for that cookie on the request.
//! 3. No cookie: show the login form (`GET`) or exchange the submitted
//!    credentials for a session (`POST`). Nothing is forwarded.
//! 4. Cookie present: resolve the caller address and validate the token with
//!    the directory. Valid tokens are forwarded, invalid ones are cleared and
//!    the caller is sent back to the login form.
//!
//! ## Origin Binding
//!
//! Sessions are created and validated with the caller's IP address as a
//! `remote_address` validation factor. The comparison happens in the
//! directory; the gateway fails closed when it cannot determine an address.
//!
//! ```no_run
//! use axum::{middleware, routing::get, Router};
//! use portero::{directory::DirectoryClient, sso::{require_session, Sso}};
//! use secrecy::SecretString;
//!
//! # fn app() -> anyhow::Result<Router> {
//! let directory = DirectoryClient::new(
//!     "my-app",
//!     SecretString::from("app-password".to_string()),
//!     "https://crowd.example.com/crowd",
//! )?;
//! let sso = Sso::new(directory);
//!
//! Ok(Router::new()
//!     .route("/", get(|| async { "protected" }))
//!     .layer(middleware::from_fn_with_state(sso, require_session)))
//! # }
//! ```

pub mod cli;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod sso;

pub use self::error::Error;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
