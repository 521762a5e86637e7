//! Client address resolution used as the session origin.

use crate::Error;
use axum::extract::{ConnectInfo, Request};
use std::net::SocketAddr;

/// Resolves the caller's network address for origin binding.
///
/// Any error is treated as a failed validation by the middleware.
pub trait AddressResolver: Send + Sync {
    /// # Errors
    /// Returns `Error::AddressResolution` when no usable address is available.
    fn resolve(&self, request: &Request) -> Result<String, Error>;
}

impl<F> AddressResolver for F
where
    F: Fn(&Request) -> Result<String, Error> + Send + Sync,
{
    fn resolve(&self, request: &Request) -> Result<String, Error> {
        self(request)
    }
}

/// Uses the transport peer address, without the port.
///
/// Requires the server to be started with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerAddress;

impl AddressResolver for PeerAddress {
    fn resolve(&self, request: &Request) -> Result<String, Error> {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            // dual-stack listeners report IPv4 peers as ::ffff:a.b.c.d
            .map(|ConnectInfo(addr)| addr.ip().to_canonical().to_string())
            .ok_or_else(|| Error::AddressResolution("request has no peer address".to_string()))
    }
}
