//! Axum middleware wrapped around the dispatcher fallback.
use std::time::Instant;

use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

const SERVER_TIMING: HeaderName = HeaderName::from_static("server-timing");

/// Time each exchange, log it and expose the latency as a `Server-Timing`
/// entry.
pub async fn request_timing_middleware(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    let mut response = next.run(req).await;
    let elapsed = started.elapsed();

    tracing::info!(
        http.method = %method,
        http.path = %path,
        http.status_code = response.status().as_u16(),
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "request served"
    );

    let timing = format!("gateway;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
    if let Ok(value) = HeaderValue::from_str(&timing) {
        response.headers_mut().append(SERVER_TIMING, value);
    }
    response
}

/// Add common hardening headers without overwriting values set by handlers.
pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers
        .entry("x-content-type-options")
        .or_insert(HeaderValue::from_static("nosniff"));
    headers
        .entry("x-frame-options")
        .or_insert(HeaderValue::from_static("DENY"));
    headers
        .entry("referrer-policy")
        .or_insert(HeaderValue::from_static("strict-origin-when-cross-origin"));

    response
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::Body, http::StatusCode, middleware, routing::get};
    use tower::ServiceExt; // for oneshot

    use super::*;

    #[tokio::test]
    async fn test_handler_headers_are_kept() {
        let app = Router::new()
            .route(
                "/",
                get(|| async { ([("x-frame-options", "SAMEORIGIN")], "framed") }),
            )
            .layer(middleware::from_fn(security_headers_middleware));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let hardened = response.headers();

        assert_eq!(hardened["x-content-type-options"], "nosniff");
        assert_eq!(hardened["referrer-policy"], "strict-origin-when-cross-origin");
        assert_eq!(hardened["x-frame-options"], "SAMEORIGIN");
    }

    #[tokio::test]
    async fn test_timing_is_reported() {
        let app = Router::new()
            .route("/", get(|| async { StatusCode::ACCEPTED }))
            .layer(middleware::from_fn(request_timing_middleware));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let timing = response.headers().get("server-timing").unwrap();
        assert!(timing.to_str().unwrap().starts_with("gateway;dur="));
    }
}
