//! API middleware.

use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderValue, Method, Request, Response, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::Json;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::metrics;

/// Client count above which idle rate limit state is dropped.
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// Per-client request budget for the API routes.
#[derive(Clone)]
pub struct ClientRateLimiter {
    limiter: Arc<DefaultKeyedRateLimiter<IpAddr>>,
    trust_proxy_headers: bool,
}

impl ClientRateLimiter {
    /// Allow `requests_per_second` per client IP, with the same burst.
    ///
    /// Forwarding headers identify the client only when `trust_proxy_headers`
    /// is set; otherwise the socket peer address is used.
    pub fn new(requests_per_second: u32, trust_proxy_headers: bool) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::keyed(Quota::per_second(rps))),
            trust_proxy_headers,
        }
    }

    /// Take one request from `ip`'s budget. Returns false when exhausted.
    pub fn check(&self, ip: IpAddr) -> bool {
        if self.limiter.len() > MAX_TRACKED_CLIENTS {
            self.limiter.retain_recent();
            self.limiter.shrink_to_fit();
            debug!(clients = self.limiter.len(), "Pruned rate limiter state");
        }
        self.limiter.check_key(&ip).is_ok()
    }
}

/// Create CORS layer.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(Any)
            .allow_origin(Any)
            .max_age(Duration::from_secs(600))
    } else {
        let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN])
            .expose_headers([
                header::CONTENT_LENGTH,
                header::CONTENT_TYPE,
                header::CONTENT_DISPOSITION,
            ])
            .allow_origin(origins)
            .max_age(Duration::from_secs(600))
    }
}

/// Security headers middleware.
pub async fn security_headers(request: Request<Body>, next: Next) -> Response<Body> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "X-Permitted-Cross-Domain-Policies",
        HeaderValue::from_static("none"),
    );

    response
}

/// Tag each request with an id, echoed back in `X-Request-ID`.
///
/// A client-supplied id is kept; otherwise a UUID is generated. Everything
/// logged while handling the request runs inside a span carrying the id.
pub async fn request_id(mut request: Request<Body>, next: Next) -> Response<Body> {
    let request_id = request
        .headers()
        .get("X-Request-ID")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(request_id.clone());

    let span = info_span!("request", request_id = %request_id);
    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("X-Request-ID", value);
    }

    response
}

/// Request logging middleware.
pub async fn request_logging(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    // Status polling and health checks are too chatty for info
    let path = uri.path();
    if path == "/health" || path == "/healthz" || path.starts_with("/api/status/") {
        debug!(method = %method, uri = %uri, status = %response.status(), "Request completed");
    } else {
        info!(
            method = %method,
            uri = %uri,
            status = %response.status(),
            duration_ms = %start.elapsed().as_millis(),
            "Request completed"
        );
    }

    response
}

/// Rate limiting middleware using IP-based rate limiter.
pub async fn rate_limit_middleware(
    State(rate_limiter): State<ClientRateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    if let Some(ip) = extract_client_ip(&request, rate_limiter.trust_proxy_headers) {
        if !rate_limiter.check(ip) {
            warn!(ip = %ip, "Rate limit exceeded");
            metrics::record_rate_limit_hit(request.uri().path());
            return (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", "1")],
                Json(serde_json::json!({ "error": "Rate limit exceeded. Please try again later." })),
            )
                .into_response();
        }
    }

    next.run(request).await
}

/// Client address. With `trust_proxy_headers` the first `X-Forwarded-For` hop
/// or `X-Real-IP` wins; the socket peer is the fallback.
fn extract_client_ip(request: &Request<Body>, trust_proxy_headers: bool) -> Option<IpAddr> {
    let header_ip = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
    };
    let peer_ip = || {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    };

    if !trust_proxy_headers {
        return peer_ip();
    }
    header_ip("X-Forwarded-For")
        .or_else(|| header_ip("X-Real-IP"))
        .or_else(peer_ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_from(peer: &str, headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder();
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        let addr: SocketAddr = format!("{}:40000", peer).parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    #[test]
    fn test_rate_limiter_blocks_burst() {
        let limiter = ClientRateLimiter::new(1, false);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        assert!(limiter.check(ip));
        assert!(!limiter.check(ip));

        // Other clients have their own budget
        assert!(limiter.check("10.0.0.2".parse().unwrap()));
    }

    #[test]
    fn test_forwarding_headers_ignored_by_default() {
        let request = request_from("192.0.2.10", &[("X-Forwarded-For", "203.0.113.7"), ("X-Real-IP", "198.51.100.4")]);
        assert_eq!(extract_client_ip(&request, false), Some("192.0.2.10".parse().unwrap()));

        let request = Request::builder()
            .header("X-Forwarded-For", "203.0.113.7")
            .body(Body::empty())
            .unwrap();
        assert_eq!(extract_client_ip(&request, false), None);
    }

    #[test]
    fn test_trusted_proxy_headers_identify_client() {
        let request = request_from("10.0.0.1", &[("X-Forwarded-For", "203.0.113.7, 10.0.0.1")]);
        assert_eq!(extract_client_ip(&request, true), Some("203.0.113.7".parse().unwrap()));

        let request = request_from("10.0.0.1", &[("X-Real-IP", "198.51.100.4")]);
        assert_eq!(extract_client_ip(&request, true), Some("198.51.100.4".parse().unwrap()));

        let request = request_from("10.0.0.1", &[]);
        assert_eq!(extract_client_ip(&request, true), Some("10.0.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_rotating_forwarded_header_does_not_reset_budget() {
        use axum::routing::get;
        use tower::ServiceExt;

        let app = axum::Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                ClientRateLimiter::new(1, false),
                rate_limit_middleware,
            ));

        let first = app
            .clone()
            .oneshot(request_from("192.0.2.10", &[("X-Forwarded-For", "203.0.113.1")]))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(request_from("192.0.2.10", &[("X-Forwarded-For", "203.0.113.2")]))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
