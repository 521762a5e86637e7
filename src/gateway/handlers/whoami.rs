use crate::directory::Session;
use axum::{extract::Extension, http::StatusCode, response::IntoResponse};
use tracing::instrument;

// protected handler; only reachable through the SSO middleware
#[instrument(skip(session))]
pub async fn whoami(Extension(session): Extension<Session>) -> impl IntoResponse {
    let name = session.username.as_deref().unwrap_or("anonymous");
    (StatusCode::OK, format!("Hello, {name}!\n"))
}
