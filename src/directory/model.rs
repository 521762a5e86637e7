//! Payloads exchanged with the directory's session and user endpoints.

use crate::Error;
use serde::Deserialize;
use std::fmt;
use time::OffsetDateTime;

/// Cookie naming policy as configured on the directory server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CookiePolicy {
    pub name: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub secure: bool,
}

/// An SSO session issued by the directory.
///
/// `token` is an opaque bearer credential, only ever forwarded back to the
/// directory.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub expires: OffsetDateTime,
    pub username: Option<String>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"[REDACTED]")
            .field("expires", &self.expires)
            .field("username", &self.username)
            .finish()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct SessionPayload {
    token: String,
    expiry_date: i64,
    #[serde(default)]
    user: Option<UserRef>,
}

#[derive(Deserialize)]
struct UserRef {
    name: String,
}

impl TryFrom<SessionPayload> for Session {
    type Error = Error;

    fn try_from(payload: SessionPayload) -> Result<Self, Self::Error> {
        if payload.token.is_empty() {
            return Err(Error::Service("session response has an empty token".to_string()));
        }

        // expiry-date is epoch milliseconds
        let expires =
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(payload.expiry_date) * 1_000_000)
                .map_err(|e| Error::Service(format!("invalid session expiry-date: {e}")))?;

        Ok(Self {
            token: payload.token,
            expires,
            username: payload.user.map(|u| u.name),
        })
    }
}

/// A directory user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct User {
    pub name: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub key: String,
}
