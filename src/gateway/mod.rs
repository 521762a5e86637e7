use crate::sso::{self, Sso, require_session};
use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware,
    routing::get,
};
use std::net::{Ipv6Addr, SocketAddr};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, debug_span, info};
use ulid::Ulid;

pub mod handlers;

/// Build the gateway router.
///
/// `/live`, `/health` and `/logout` are public; every other path goes through
/// the SSO middleware before reaching the protected handler.
pub fn router(sso: Sso) -> Router {
    let protected = Router::new()
        .fallback(handlers::whoami)
        .layer(middleware::from_fn_with_state(sso.clone(), require_session));

    Router::new()
        .route("/live", get(handlers::live))
        .route("/health", get(handlers::health).options(handlers::health))
        .route("/logout", get(sso::logout).post(sso::logout))
        .with_state(sso)
        .merge(protected)
}

/// Serve the gateway until Ctrl-C.
/// # Errors
/// Returns an error if the listener cannot bind or the server fails
pub async fn new(port: u16, sso: Sso) -> Result<()> {
    let app = router(sso).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span)),
    );

    let listener = TcpListener::bind(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port))).await?;

    info!("Listening on [::]:{}", port);

    // connect info feeds the peer address resolver
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            info!("Could not listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Gracefully shutdown");
    })
    .await?;

    Ok(())
}

// span; headers are left out since they carry the session cookie
fn make_span(request: &Request<Body>) -> Span {
    let method = request.method();
    let path = request.uri().path();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", %method, path, request_id)
}
