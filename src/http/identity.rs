//! Client identity extraction.
//!
//! The identity is the key a client's requests are counted under. Which part
//! of a request identifies a client depends on the deployment, so the
//! middleware takes the policy as an injected [`IdentityExtractor`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderName, Request};
use serde::{Deserialize, Serialize};

/// Bucket used when no identity can be derived from a request.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Derives the rate limit key for a request.
///
/// Returning `None` (or an empty string) sends the request to the
/// [`UNKNOWN_IDENTITY`] bucket.
pub trait IdentityExtractor: Send + Sync {
    /// Extract the client identity from `request`.
    fn extract(&self, request: &Request<Body>) -> Option<String>;
}

impl<F> IdentityExtractor for F
where
    F: Fn(&Request<Body>) -> Option<String> + Send + Sync,
{
    fn extract(&self, request: &Request<Body>) -> Option<String> {
        self(request)
    }
}

/// Keys clients by the IP of the connected socket.
///
/// Requires the server to be started with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerAddress;

impl IdentityExtractor for PeerAddress {
    fn extract(&self, request: &Request<Body>) -> Option<String> {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    }
}

/// Keys clients by the left-most `X-Forwarded-For` hop, falling back to the
/// peer address.
///
/// Only safe behind a proxy that overwrites the header.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardedFor;

impl IdentityExtractor for ForwardedFor {
    fn extract(&self, request: &Request<Body>) -> Option<String> {
        request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .map(str::to_string)
            .or_else(|| PeerAddress.extract(request))
    }
}

/// Keys clients by the value of a request header, such as an API key.
#[derive(Debug, Clone)]
pub struct HeaderValueKey {
    name: HeaderName,
}

impl HeaderValueKey {
    /// Key on the header called `name`.
    pub fn new(name: HeaderName) -> Self {
        Self { name }
    }
}

impl IdentityExtractor for HeaderValueKey {
    fn extract(&self, request: &Request<Body>) -> Option<String> {
        request
            .headers()
            .get(&self.name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

/// Built-in identity policies selectable from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentitySource {
    /// See [`PeerAddress`]
    #[default]
    PeerAddress,
    /// See [`ForwardedFor`]
    ForwardedFor,
    /// See [`HeaderValueKey`]
    Header { name: String },
}

impl IdentitySource {
    /// Build the extractor this source names.
    pub fn build(&self) -> crate::error::Result<Arc<dyn IdentityExtractor>> {
        let extractor: Arc<dyn IdentityExtractor> = match self {
            IdentitySource::PeerAddress => Arc::new(PeerAddress),
            IdentitySource::ForwardedFor => Arc::new(ForwardedFor),
            IdentitySource::Header { name } => {
                let name = HeaderName::try_from(name.as_str()).map_err(|e| {
                    crate::error::WindowGuardError::Config(format!(
                        "Invalid identity header {:?}: {}",
                        name, e
                    ))
                })?;
                Arc::new(HeaderValueKey::new(name))
            }
        };
        Ok(extractor)
    }
}
