//! Request logging middleware.
//!
//! # Responsibilities
//! - Assign (or adopt) an `X-Request-ID` and echo it on the response
//! - Log method, path, status, latency and client identity per request
//! - Warn about requests slower than the configured threshold
//! - Record request metrics
//!
//! The response body is returned untouched and the request (with its
//! upgrade handle in the extensions) is forwarded as is, so SSE streams and
//! WebSocket upgrades keep working behind this layer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{body::Body, http::Request};

use crate::http::request::{client_identity, RequestId, X_REQUEST_ID};
use crate::observability::metrics;
use crate::routing::handler::{middleware, BoxResponseFuture, Handler, Middleware};

pub fn logger(slow_request: Duration) -> Middleware {
    middleware(move |next: Handler| -> Handler {
        Arc::new(move |mut req: Request<Body>| -> BoxResponseFuture {
            let next = next.clone();
            let start = Instant::now();

            let request_id = req
                .headers()
                .get(X_REQUEST_ID)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(|v| RequestId(v.to_string()))
                .unwrap_or_default();
            req.extensions_mut().insert(request_id.clone());

            let method = req.method().clone();
            let path = req.uri().path().to_string();
            let client = client_identity(&req);

            Box::pin(async move {
                let mut response = next(req).await;
                let status = response.status();
                let latency = start.elapsed();

                if let Some(value) = request_id.header_value() {
                    response.headers_mut().insert(X_REQUEST_ID, value);
                }

                if latency > slow_request {
                    tracing::warn!(
                        request_id = %request_id.as_str(),
                        method = %method,
                        path = %path,
                        status = status.as_u16(),
                        latency_ms = latency.as_millis() as u64,
                        client = %client,
                        "Slow request"
                    );
                } else {
                    tracing::info!(
                        request_id = %request_id.as_str(),
                        method = %method,
                        path = %path,
                        status = status.as_u16(),
                        latency_ms = latency.as_millis() as u64,
                        client = %client,
                        "Request completed"
                    );
                }

                metrics::record_request(method.as_str(), status.as_u16(), start);
                response
            })
        })
    })
}
