//! HTTP admission control: identity extraction, rate limit headers, the tower
//! middleware, and a server hosting protected routes.

mod headers;
mod identity;
mod middleware;
mod server;

pub use headers::{
    rate_limit_headers, RATELIMIT_LIMIT, RATELIMIT_POLICY, RATELIMIT_REMAINING, RATELIMIT_RESET,
    X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use identity::{
    ForwardedFor, HeaderValueKey, IdentityExtractor, IdentitySource, PeerAddress,
    UNKNOWN_IDENTITY,
};
pub use middleware::{AdmissionControl, AdmissionLayer, AdmissionService, Decision, Rejection};
pub use server::{router, HttpServer};
