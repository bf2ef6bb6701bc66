//! Panic recovery middleware.
//!
//! Converts a panic anywhere inside the wrapped handler into a generic
//! 500 JSON response. The panic message and a backtrace are logged; none of
//! it reaches the client. The dispatcher installs this layer outermost.

use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::{body::Body, http::Request, http::StatusCode, response::Response};
use futures_util::FutureExt;

use crate::http::response::json_error;
use crate::observability::metrics;
use crate::routing::handler::{middleware, BoxResponseFuture, Handler, Middleware};

/// Message returned for every recovered fault.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

pub fn recovery() -> Middleware {
    middleware(|next: Handler| -> Handler {
        Arc::new(move |req: Request<Body>| -> BoxResponseFuture {
            let method = req.method().clone();
            let path = req.uri().path().to_string();

            // A handler may panic before it even hands back a future.
            let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| next(req))) {
                Ok(fut) => fut,
                Err(payload) => {
                    let response = recovered(&method, &path, payload.as_ref());
                    return Box::pin(async move { response });
                }
            };

            Box::pin(async move {
                match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(response) => response,
                    Err(payload) => recovered(&method, &path, payload.as_ref()),
                }
            })
        })
    })
}

fn recovered(method: &axum::http::Method, path: &str, payload: &(dyn Any + Send)) -> Response {
    let message = panic_message(payload);
    tracing::error!(
        method = %method,
        path = %path,
        panic = %message,
        backtrace = %Backtrace::force_capture(),
        "Panic recovered"
    );
    metrics::record_panic();
    json_error(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
