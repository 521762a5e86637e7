//! Health probe handlers.
//!
//! - `/live`: process liveness only
//! - `/health`: directory-aware status with JSON payload

use crate::{GIT_COMMIT_HASH, sso::Sso};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, timeout};
use tracing::{debug, error, warn};

const HEALTH_DIRECTORY_TIMEOUT_SECONDS: u64 = 2;

#[derive(Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    directory: String,
}

/// Report process liveness without checking external dependencies.
pub async fn live() -> impl IntoResponse {
    StatusCode::OK
}

/// Report status including whether the directory answers the cookie config call.
pub async fn health(method: Method, State(sso): State<Sso>) -> impl IntoResponse {
    let directory_healthy = probe_directory(&sso).await;

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        directory: if directory_healthy {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .unwrap_or_else(|err| {
            debug!("Failed to parse X-App header: {}", err);
            HeaderMap::new()
        });

    if directory_healthy {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

async fn probe_directory(sso: &Sso) -> bool {
    match timeout(
        Duration::from_secs(HEALTH_DIRECTORY_TIMEOUT_SECONDS),
        sso.directory().cookie_policy(),
    )
    .await
    {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            error!("Directory health check failed: {}", e);
            false
        }
        Err(_) => {
            warn!("Directory health check timed out");
            false
        }
    }
}
