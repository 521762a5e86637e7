use thiserror::Error;

/// Failures talking to the directory or resolving the caller.
///
/// The SSO middleware converts every variant into one of: login form,
/// `500 service error`, or `401 unauthorized`. None of them reach the
/// protected handler.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport, decoding, application denial, or unexpected status.
    /// Treated as a transient outage.
    #[error("directory service error: {0}")]
    Service(String),
    /// The directory rejected the end-user credentials.
    #[error("authentication failed")]
    AuthFailed,
    /// The session token is unknown, expired, or bound to another address.
    #[error("invalid session")]
    InvalidSession,
    /// The caller's network address could not be determined.
    #[error("could not resolve client address: {0}")]
    AddressResolution(String),
    /// A directory lookup matched nothing.
    #[error("not found")]
    NotFound,
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        // Session tokens travel in the URL path; keep them out of messages.
        Self::Service(err.without_url().to_string())
    }
}
