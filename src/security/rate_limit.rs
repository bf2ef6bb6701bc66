//! Per-client rate limiting over a sliding one-minute window.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{body::Body, http::Request, http::StatusCode};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::http::request::client_identity;
use crate::http::response::json_error;
use crate::observability::metrics;
use crate::routing::handler::{middleware, BoxResponseFuture, Handler, Middleware};

const WINDOW: Duration = Duration::from_secs(60);

/// Request timestamps per client identity.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
    max_requests: usize,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_requests: requests_per_minute as usize,
        }
    }

    /// Record a request from `client`; returns false when the cap is hit.
    pub fn check(&self, client: &str) -> bool {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock();
        let window = windows.entry(client.to_string()).or_default();

        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.max_requests {
            return false;
        }
        window.push_back(now);
        true
    }

    /// Drop clients with no requests inside the window.
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    fn prune_at(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, window| {
            window
                .back()
                .is_some_and(|last| now.duration_since(*last) < WINDOW)
        });
        before - windows.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.lock().len()
    }

    /// Prune idle clients on a fixed interval until shutdown.
    pub async fn run_janitor(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.prune();
                    if removed > 0 {
                        tracing::debug!(removed, "Pruned idle rate limit windows");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Rate limit janitor shutting down");
                    break;
                }
            }
        }
    }
}

/// Reject clients over the per-minute cap with 429.
pub fn rate_limit(limiter: Arc<RateLimiter>) -> Middleware {
    middleware(move |next: Handler| -> Handler {
        let limiter = limiter.clone();
        Arc::new(move |req: Request<Body>| -> BoxResponseFuture {
            let client = client_identity(&req);
            if limiter.check(&client) {
                return next(req);
            }

            tracing::warn!(client = %client, path = %req.uri().path(), "Rate limit exceeded");
            metrics::record_rate_limited();
            let response = json_error(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded");
            Box::pin(async move { response })
        })
    })
}
