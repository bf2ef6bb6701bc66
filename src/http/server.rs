//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the shared application state once at startup
//! - Assemble the route table and global middleware into a dispatcher
//! - Serve it on a listener with peer addresses attached
//! - Run the background janitors until shutdown

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::IntoResponse,
};
use thiserror::Error;
use tokio::net::TcpListener;

use crate::auth::{AuthManager, AuthPolicy, CredentialVerifier, PrincipalDirectory, SuVerifier, SystemDirectory};
use crate::clock::{Clock, SystemClock};
use crate::config::PanelConfig;
use crate::http::middleware::{cors, logger};
use crate::http::request::TrustProxyHeaders;
use crate::http::response::json_error;
use crate::lifecycle::Shutdown;
use crate::panel;
use crate::routing::{handler, middleware, BoxResponseFuture, Dispatcher, Handler, Middleware, RegistrationError, Router};
use crate::security::{rate_limit, RateLimiter};
use crate::session::{SessionBackend, SessionError, SessionStore, SqliteBackend};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to prepare data directory {path}: {source}")]
    DataDir { path: String, source: io::Error },

    #[error("failed to open session database: {0}")]
    Session(#[from] SessionError),

    #[error("invalid route table: {0}")]
    Routes(#[from] RegistrationError),
}

/// Shared state handed to handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PanelConfig>,
    pub sessions: Arc<SessionStore>,
    pub auth: Arc<AuthManager>,
    pub limiter: Option<Arc<RateLimiter>>,
}

impl AppState {
    /// State backed by the host: SQLite sessions, `/etc/passwd` principals
    /// and `su` password checks.
    pub fn from_config(config: PanelConfig) -> Result<Self, StartupError> {
        let db_path = Path::new(&config.session.database_path);
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StartupError::DataDir {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let backend = Arc::new(SqliteBackend::open(db_path)?);
        let directory = Arc::new(SystemDirectory::from_config(&config.auth));
        let verifier = Arc::new(SuVerifier::new(Duration::from_secs(config.auth.verify_timeout_secs)));

        Ok(Self::with_collaborators(
            config,
            backend,
            directory,
            verifier,
            Arc::new(SystemClock),
        ))
    }

    /// State with every external collaborator supplied by the caller.
    pub fn with_collaborators(
        config: PanelConfig,
        backend: Arc<dyn SessionBackend>,
        directory: Arc<dyn PrincipalDirectory>,
        verifier: Arc<dyn CredentialVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let sessions = Arc::new(SessionStore::new(backend, clock.clone(), &config.session));
        let auth = Arc::new(AuthManager::new(
            AuthPolicy::from(&config.auth),
            directory,
            verifier,
            clock,
        ));
        let limiter = config
            .rate_limit
            .enabled
            .then(|| Arc::new(RateLimiter::new(config.rate_limit.requests_per_minute)));

        Self {
            config: Arc::new(config),
            sessions,
            auth,
            limiter,
        }
    }
}

/// Tag requests with whether forwarding headers may be trusted.
fn trust_proxy(trust: bool) -> Middleware {
    middleware(move |next: Handler| -> Handler {
        Arc::new(move |mut req: Request<Body>| -> BoxResponseFuture {
            req.extensions_mut().insert(TrustProxyHeaders(trust));
            next(req)
        })
    })
}

fn not_found() -> Handler {
    handler(|req: Request<Body>| async move {
        if req.uri().path().starts_with("/api/") {
            json_error(StatusCode::NOT_FOUND, "Not found")
        } else {
            (StatusCode::NOT_FOUND, "404 page not found").into_response()
        }
    })
}

/// Route table plus global middleware, frozen.
pub fn build_dispatcher(state: &AppState) -> Result<Dispatcher, RegistrationError> {
    let config = &state.config;
    let mut router = Router::new();

    router
        .use_middleware(trust_proxy(config.listener.trust_proxy_headers))
        .use_middleware(logger(Duration::from_millis(config.observability.slow_request_ms)));
    if config.cors.enabled {
        router.use_middleware(cors(&config.cors));
    }
    if let Some(limiter) = &state.limiter {
        router.use_middleware(rate_limit(limiter.clone()));
    }
    router.not_found(not_found());

    panel::register_routes(&mut router, state)?;
    tracing::info!(routes = router.route_count(), "Route table built");
    Ok(router.into_dispatcher())
}

pub struct PanelServer {
    state: AppState,
    dispatcher: Dispatcher,
}

impl PanelServer {
    pub fn new(state: AppState) -> Result<Self, StartupError> {
        let dispatcher = build_dispatcher(&state)?;
        Ok(Self { state, dispatcher })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    fn spawn_janitors(&self, shutdown: &Shutdown) {
        let config = &self.state.config;

        tokio::spawn(self.state.sessions.clone().run_janitor(
            Duration::from_secs(config.session.sweep_interval_secs),
            shutdown.subscribe(),
        ));
        tokio::spawn(self.state.auth.clone().run_janitor(
            Duration::from_secs(config.auth.sweep_interval_secs),
            shutdown.subscribe(),
        ));
        if let Some(limiter) = &self.state.limiter {
            tokio::spawn(limiter.clone().run_janitor(
                Duration::from_secs(config.rate_limit.prune_interval_secs),
                shutdown.subscribe(),
            ));
        }
    }

    /// Serve until `shutdown` fires, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        self.spawn_janitors(shutdown);

        let app = axum::Router::new()
            .fallback_service(self.dispatcher)
            .into_make_service_with_connect_info::<SocketAddr>();

        let mut stop = shutdown.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
