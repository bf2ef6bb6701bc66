//! Handler and middleware types.
//!
//! Every route handler has one signature: it takes the request and returns a
//! boxed future resolving to a response. Middleware is a plain function from
//! handler to handler, so composing a pipeline is function composition.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::{
    body::Body,
    http::Request,
    response::{IntoResponse, Response},
};

/// Future returned by every handler.
pub type BoxResponseFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// A request handler.
pub type Handler = Arc<dyn Fn(Request<Body>) -> BoxResponseFuture + Send + Sync>;

/// Transforms a handler into another handler.
pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// Build a [`Handler`] from an async function.
pub fn handler<F, Fut, R>(f: F) -> Handler
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    Arc::new(move |req: Request<Body>| -> BoxResponseFuture {
        let fut = f(req);
        Box::pin(async move { fut.await.into_response() })
    })
}

/// Build a [`Handler`] from an async function that also receives shared state.
pub fn with_state<S, F, Fut, R>(state: S, f: F) -> Handler
where
    S: Clone + Send + Sync + 'static,
    F: Fn(S, Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    Arc::new(move |req: Request<Body>| -> BoxResponseFuture {
        let fut = f(state.clone(), req);
        Box::pin(async move { fut.await.into_response() })
    })
}

/// Build a [`Middleware`] from a closure over the wrapped handler.
pub fn middleware<F>(f: F) -> Middleware
where
    F: Fn(Handler) -> Handler + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap `handler` in `layers`; the first layer ends up outermost.
pub fn compose(layers: &[Middleware], handler: Handler) -> Handler {
    layers.iter().rev().fold(handler, |inner, layer| layer(inner))
}

/// Parameters extracted from the matched route pattern.
///
/// Inserted into the request extensions before the handler runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(HashMap<String, String>);

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for PathParams {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Read the path parameters of a dispatched request.
pub fn path_params(req: &Request<Body>) -> PathParams {
    req.extensions().get::<PathParams>().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    fn tag(name: &'static str) -> Middleware {
        middleware(move |next: Handler| -> Handler {
            Arc::new(move |req: Request<Body>| -> BoxResponseFuture {
                let next = next.clone();
                Box::pin(async move {
                    let mut res = next(req).await;
                    res.headers_mut()
                        .append("x-order", HeaderValue::from_static(name));
                    res
                })
            })
        })
    }

    #[tokio::test]
    async fn test_compose_first_layer_is_outermost() {
        let inner = handler(|_req| async { StatusCode::OK });
        let composed = compose(&[tag("outer"), tag("inner")], inner);

        let res = composed(Request::new(Body::empty())).await;
        let order: Vec<_> = res
            .headers()
            .get_all("x-order")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();

        // Inner layer sees the response first.
        assert_eq!(order, vec!["inner", "outer"]);
    }

    #[test]
    fn test_path_params_missing_extension() {
        let req = Request::new(Body::empty());
        assert!(path_params(&req).is_empty());
    }
}
