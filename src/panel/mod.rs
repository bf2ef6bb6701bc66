//! The panel's route table.
//!
//! # Routes
//! ```text
//! public:     GET  /                → 302 /dashboard
//!             GET  /login, POST /login, POST /api/login
//!             GET|POST /logout, POST /api/logout
//!             GET  /static/*
//! protected:  GET  /dashboard, /api/me, /api/sessions, /api/events
//! ```
//!
//! Everything past login is registered through one group carrying the auth
//! gate, so a new protected endpoint cannot forget it.

pub mod handlers;

use crate::http::middleware::auth_gate;
use crate::http::server::AppState;
use crate::routing::{handler, with_state, RegistrationError, Router};

pub fn register_routes(router: &mut Router, state: &AppState) -> Result<(), RegistrationError> {
    let login_path = state.config.auth.login_path.clone();

    router.get("/", handler(handlers::index))?;
    router.get(&login_path, with_state(state.clone(), handlers::login_page))?;
    router.post(&login_path, with_state(state.clone(), handlers::login_form))?;
    router.post("/api/login", with_state(state.clone(), handlers::login_api))?;
    router.get("/logout", with_state(state.clone(), handlers::logout_page))?;
    router.post("/logout", with_state(state.clone(), handlers::logout_page))?;
    router.post("/api/logout", with_state(state.clone(), handlers::logout_api))?;

    let assets = &state.config.static_files;
    router.static_files(&assets.prefix, &assets.directory)?;

    let mut protected = router.group("/");
    protected.use_middleware(auth_gate(
        state.sessions.clone(),
        state.auth.clone(),
        login_path,
    ));
    protected.get("/dashboard", handler(handlers::dashboard))?;
    protected.get("/api/me", handler(handlers::me))?;
    protected.get("/api/sessions", with_state(state.clone(), handlers::sessions))?;
    protected.get("/api/events", handler(handlers::events))?;

    Ok(())
}
