//! Prometheus metrics for the API server.

use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::{ApiError, ApiResult};

/// Install the Prometheus recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> ApiResult<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ApiError::Config(format!("failed to install metrics recorder: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "autoedit_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "autoedit_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "autoedit_http_requests_in_flight";

    // Job metrics
    pub const JOBS_SUBMITTED_TOTAL: &str = "autoedit_jobs_submitted_total";
    pub const UPLOADS_REJECTED_TOTAL: &str = "autoedit_uploads_rejected_total";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "autoedit_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a job accepted for processing.
pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

/// Record an upload that did not produce a job.
pub fn record_upload_rejected(status: u16) {
    let labels = [("status", status.to_string())];
    counter!(names::UPLOADS_REJECTED_TOTAL, &labels).increment(1);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

fn uuid_pattern() -> &'static regex_lite::Regex {
    static UUID: OnceLock<regex_lite::Regex> = OnceLock::new();
    UUID.get_or_init(|| {
        regex_lite::Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
            .expect("valid UUID pattern")
    })
}

fn job_path_pattern() -> &'static regex_lite::Regex {
    static JOB_PATH: OnceLock<regex_lite::Regex> = OnceLock::new();
    JOB_PATH.get_or_init(|| {
        regex_lite::Regex::new(r"^/api/(status|download)/[^/]+$").expect("valid job path pattern")
    })
}

/// Sanitize path for metrics labels (replace job ids).
fn sanitize_path(path: &str) -> String {
    let path = uuid_pattern().replace_all(path, ":id");
    job_path_pattern()
        .replace_all(&path, "/api/$1/:job_id")
        .to_string()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(&method, &path, response.status().as_u16(), start.elapsed().as_secs_f64());

    response
}
