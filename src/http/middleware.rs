//! Admission control middleware.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::headers::rate_limit_headers;
use super::identity::{IdentityExtractor, PeerAddress, UNKNOWN_IDENTITY};
use crate::ratelimit::RateLimiter;

/// A `429 Too Many Requests` answer.
#[derive(Debug, Clone)]
pub struct Rejection {
    /// Always `429 Too Many Requests`
    pub status: StatusCode,
    /// Rate limit headers, `Remaining` is zero
    pub headers: HeaderMap,
    /// Configured rejection message
    pub body: String,
    /// `Content-Type` of the body
    pub content_type: &'static str,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.headers, self.body).into_response();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        response
    }
}

/// What to do with a request.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Pass the request on; these headers go on the downstream response
    Forward(HeaderMap),
    /// Answer immediately without calling downstream
    Reject(Rejection),
}

impl Decision {
    /// Whether the request is let through.
    pub fn is_forward(&self) -> bool {
        matches!(self, Decision::Forward(_))
    }

    /// The rate limit headers attached to either outcome.
    pub fn headers(&self) -> &HeaderMap {
        match self {
            Decision::Forward(headers) => headers,
            Decision::Reject(rejection) => &rejection.headers,
        }
    }
}

/// Decides, per request, whether a client is still within its quota.
pub struct AdmissionControl {
    /// Policy and counters
    limiter: Arc<RateLimiter>,
    /// How requests map to client identities
    extractor: Arc<dyn IdentityExtractor>,
}

impl AdmissionControl {
    /// Create admission control over `limiter`, keying clients with `extractor`.
    pub fn new(limiter: Arc<RateLimiter>, extractor: Arc<dyn IdentityExtractor>) -> Self {
        Self { limiter, extractor }
    }

    /// Count `request` against its client and decide its fate.
    ///
    /// Counts exactly once per call and never blocks.
    pub fn handle(&self, request: &Request<Body>) -> Decision {
        let identity = self.identify(request);
        let status = self.limiter.check(&identity);
        let config = self.limiter.config();
        let headers = rate_limit_headers(config, &status);

        if status.is_ok() {
            return Decision::Forward(headers);
        }

        debug!(
            identity = %identity,
            path = %request.uri().path(),
            limit = status.limit,
            "Rejecting request over rate limit"
        );

        Decision::Reject(Rejection {
            status: StatusCode::TOO_MANY_REQUESTS,
            headers,
            body: config.rejection_message.clone(),
            content_type: config.rejection_format.content_type(),
        })
    }

    fn identify(&self, request: &Request<Body>) -> String {
        match self.extractor.extract(request) {
            Some(identity) if !identity.is_empty() => identity,
            _ => {
                warn!(
                    path = %request.uri().path(),
                    fallback = UNKNOWN_IDENTITY,
                    "Could not derive client identity, using fallback bucket"
                );
                UNKNOWN_IDENTITY.to_string()
            }
        }
    }

    /// The limiter behind this admission control.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

impl Default for AdmissionControl {
    fn default() -> Self {
        Self::new(Arc::new(RateLimiter::default()), Arc::new(PeerAddress))
    }
}

/// Tower layer applying [`AdmissionControl`] in front of a service.
#[derive(Clone, Default)]
pub struct AdmissionLayer {
    admission: Arc<AdmissionControl>,
}

impl AdmissionLayer {
    /// Wrap services with `admission`.
    pub fn new(admission: Arc<AdmissionControl>) -> Self {
        Self { admission }
    }

    /// Layer with its own limiter for `limiter`'s policy, keyed by peer address.
    pub fn from_limiter(limiter: RateLimiter) -> Self {
        Self::new(Arc::new(AdmissionControl::new(
            Arc::new(limiter),
            Arc::new(PeerAddress),
        )))
    }

    /// The shared admission control.
    pub fn admission(&self) -> &Arc<AdmissionControl> {
        &self.admission
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            admission: self.admission.clone(),
        }
    }
}

/// Service produced by [`AdmissionLayer`].
#[derive(Clone)]
pub struct AdmissionService<S> {
    inner: S,
    admission: Arc<AdmissionControl>,
}

impl<S> Service<Request<Body>> for AdmissionService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        match self.admission.handle(&request) {
            Decision::Forward(headers) => {
                // Keep the service that was polled ready.
                let clone = self.inner.clone();
                let mut inner = std::mem::replace(&mut self.inner, clone);

                Box::pin(async move {
                    let mut response = inner.call(request).await?;
                    response.headers_mut().extend(headers);
                    Ok(response)
                })
            }
            Decision::Reject(rejection) => {
                let response = rejection.into_response();
                Box::pin(async move { Ok(response) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::headers::RATELIMIT_REMAINING;
    use crate::ratelimit::{ManualClock, RateLimitConfig, RejectionFormat};
    use axum::extract::ConnectInfo;
    use std::net::SocketAddr;

    fn admission(config: RateLimitConfig) -> (AdmissionControl, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = RateLimiter::with_clock(config, clock.clone()).unwrap();
        (
            AdmissionControl::new(Arc::new(limiter), Arc::new(PeerAddress)),
            clock,
        )
    }

    fn request_from(addr: &str) -> Request<Body> {
        let addr: SocketAddr = addr.parse().unwrap();
        Request::builder()
            .uri("/api/items")
            .extension(ConnectInfo(addr))
            .body(Body::empty())
            .unwrap()
    }

    fn remaining(decision: &Decision) -> Option<u64> {
        decision
            .headers()
            .get(&RATELIMIT_REMAINING)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    #[test]
    fn test_forward_then_reject() {
        let (admission, _clock) = admission(RateLimitConfig::new(60_000, 2));
        let request = request_from("192.0.2.1:4000");

        let first = admission.handle(&request);
        let second = admission.handle(&request);
        let third = admission.handle(&request);

        assert!(first.is_forward());
        assert_eq!(remaining(&first), Some(1));
        assert!(second.is_forward());
        assert_eq!(remaining(&second), Some(0));

        match third {
            Decision::Reject(rejection) => {
                assert_eq!(rejection.status, StatusCode::TOO_MANY_REQUESTS);
                assert_eq!(rejection.body, "Too many requests, please try again later.");
                assert_eq!(rejection.content_type, "text/plain; charset=utf-8");
                assert_eq!(
                    rejection
                        .headers
                        .get(&RATELIMIT_REMAINING)
                        .and_then(|v| v.to_str().ok()),
                    Some("0")
                );
            }
            Decision::Forward(_) => panic!("third request should be rejected"),
        }
    }

    #[test]
    fn test_new_window_forwards_after_rejections() {
        let (admission, clock) = admission(RateLimitConfig::new(1_000, 1));
        let request = request_from("192.0.2.1:4000");

        assert!(admission.handle(&request).is_forward());
        assert!(!admission.handle(&request).is_forward());
        assert!(!admission.handle(&request).is_forward());

        clock.set(1_000);
        let decision = admission.handle(&request);
        assert!(decision.is_forward());
        assert_eq!(remaining(&decision), Some(0));
    }

    #[test]
    fn test_clients_limited_independently() {
        let (admission, _clock) = admission(RateLimitConfig::new(60_000, 1));

        assert!(admission.handle(&request_from("192.0.2.1:1")).is_forward());
        assert!(admission.handle(&request_from("192.0.2.2:1")).is_forward());
        assert!(!admission.handle(&request_from("192.0.2.1:2")).is_forward());
    }

    #[test]
    fn test_missing_identity_uses_unknown_bucket() {
        let (admission, _clock) = admission(RateLimitConfig::new(60_000, 5));
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();

        assert!(admission.handle(&request).is_forward());
        assert_eq!(
            admission
                .limiter()
                .store()
                .peek(UNKNOWN_IDENTITY, 0)
                .map(|s| s.count),
            Some(1)
        );
    }

    #[test]
    fn test_json_rejection_body() {
        let mut config = RateLimitConfig::new(60_000, 1);
        config.rejection_format = RejectionFormat::Json;
        config.rejection_message = r#"{"error":"rate_limited"}"#.to_string();
        let (admission, _clock) = admission(config);
        let request = request_from("192.0.2.9:1");

        admission.handle(&request);
        let response = match admission.handle(&request) {
            Decision::Reject(rejection) => rejection.into_response(),
            Decision::Forward(_) => panic!("expected rejection"),
        };

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_default_admission_owns_fresh_state() {
        let a = AdmissionControl::default();
        let b = AdmissionControl::default();
        let request = request_from("192.0.2.1:4000");

        a.handle(&request);
        a.handle(&request);

        assert_eq!(a.limiter().store().len(), 1);
        assert!(b.limiter().store().is_empty());
        assert_eq!(remaining(&b.handle(&request)), Some(149));
    }

    #[test]
    fn test_rejection_completes_without_yielding() {
        use tokio_test::{assert_ready, task};

        let (admission, _clock) = admission(RateLimitConfig::new(60_000, 1));
        let layer = AdmissionLayer::new(Arc::new(admission));
        let mut service = layer.layer(tower::service_fn(|_req: Request<Body>| async {
            Ok::<_, std::convert::Infallible>(Response::new(Body::empty()))
        }));

        let _ = service.call(request_from("192.0.2.1:1"));
        let mut rejected = task::spawn(service.call(request_from("192.0.2.1:1")));
        let response = assert_ready!(rejected.poll()).unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
