//! CORS header injection.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    response::IntoResponse,
};

use crate::config::CorsConfig;
use crate::routing::handler::{middleware, BoxResponseFuture, Handler, Middleware};

#[derive(Debug, Clone)]
struct CorsHeaders {
    origin: HeaderValue,
    methods: HeaderValue,
    headers: HeaderValue,
}

impl CorsHeaders {
    fn apply(&self, map: &mut HeaderMap) {
        map.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, self.origin.clone());
        map.insert(header::ACCESS_CONTROL_ALLOW_METHODS, self.methods.clone());
        map.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, self.headers.clone());
    }
}

fn header_or(value: &str, fallback: &'static str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| {
        tracing::warn!(value = %value, "Invalid CORS header value, using default");
        HeaderValue::from_static(fallback)
    })
}

/// Adds CORS headers to every response and answers pre-flight `OPTIONS`
/// requests directly with 200.
pub fn cors(config: &CorsConfig) -> Middleware {
    let headers = Arc::new(CorsHeaders {
        origin: header_or(&config.allow_origin, "*"),
        methods: header_or(&config.allow_methods, "GET, POST, PUT, DELETE, OPTIONS"),
        headers: header_or(&config.allow_headers, "Content-Type, Authorization"),
    });

    middleware(move |next: Handler| -> Handler {
        let headers = headers.clone();
        Arc::new(move |req: Request<Body>| -> BoxResponseFuture {
            let headers = headers.clone();

            if req.method() == Method::OPTIONS {
                let mut response = StatusCode::OK.into_response();
                headers.apply(response.headers_mut());
                return Box::pin(async move { response });
            }

            let fut = next(req);
            Box::pin(async move {
                let mut response = fut.await;
                headers.apply(response.headers_mut());
                response
            })
        })
    })
}
