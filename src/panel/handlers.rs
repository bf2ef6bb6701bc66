//! Login, logout and the protected operator endpoints.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    body::Body,
    extract::FromRequest,
    http::{header, HeaderMap, Request, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    Form, Json,
};
use chrono::Utc;
use maud::{html, DOCTYPE};
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthenticatedSession;
use crate::http::middleware::{current_user, AUTH_SESSION_KEY};
use crate::http::middleware::recovery::INTERNAL_ERROR_MESSAGE;
use crate::http::request::client_identity;
use crate::http::response::{json_error, redirect, ApiResponse};
use crate::http::server::AppState;

const DASHBOARD_PATH: &str = "/dashboard";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Why a sign-in did not produce a logged-in session.
enum SignInError {
    Rejected(&'static str),
    Internal,
}

/// Authenticate and bind the result to the caller's generic session,
/// moved to a freshly issued token.
///
/// Returns the `Set-Cookie` headers to send back.
async fn sign_in(
    state: &AppState,
    request_headers: &HeaderMap,
    client: &str,
    credentials: &Credentials,
) -> Result<HeaderMap, SignInError> {
    let authenticated = state
        .auth
        .authenticate(credentials.username.trim(), &credentials.password, client)
        .await
        .map_err(|e| SignInError::Rejected(e.public_message()))?;

    // Never elevate a token the client brought with it.
    let mut session = state.sessions.get(request_headers);
    if let Err(e) = state.sessions.regenerate(&mut session) {
        tracing::warn!(error = %e, "Failed to drop pre-login session");
    }
    session.set("username", authenticated.username.clone());
    session.set("authenticated", true);
    session.set(AUTH_SESSION_KEY, authenticated.id.clone());
    session.set("login_time", authenticated.login_time.to_rfc3339());

    let mut headers = HeaderMap::new();
    if let Err(e) = state.sessions.save(&mut session, &mut headers) {
        tracing::error!(username = %authenticated.username, error = %e, "Could not store login session");
        state.auth.logout(&authenticated.id);
        return Err(SignInError::Internal);
    }
    Ok(headers)
}

/// Tear down both the authenticated and the generic session.
fn sign_out(state: &AppState, request_headers: &HeaderMap) -> HeaderMap {
    let session = state.sessions.get(request_headers);
    if let Some(id) = session.get_str(AUTH_SESSION_KEY) {
        state.auth.logout(id);
    }
    if let Err(e) = state.sessions.destroy(session.id()) {
        tracing::warn!(error = %e, "Failed to delete session row on logout");
    }

    let mut headers = HeaderMap::new();
    state.sessions.clear_cookie(&mut headers);
    headers
}

fn is_logged_in(state: &AppState, request_headers: &HeaderMap) -> bool {
    state
        .sessions
        .get(request_headers)
        .get_str(AUTH_SESSION_KEY)
        .is_some_and(|id| state.auth.validate_session(id).is_ok())
}

fn wants_json(headers: &HeaderMap) -> bool {
    let header_contains = |name: header::HeaderName, needle: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains(needle))
    };
    header_contains(header::CONTENT_TYPE, "application/json")
        || header_contains(header::ACCEPT, "application/json")
        || headers.contains_key("hx-request")
}

/// Read credentials from a JSON or urlencoded body.
async fn read_credentials(req: Request<Body>) -> Result<Credentials, Response> {
    let is_json = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));

    if is_json {
        Json::<Credentials>::from_request(req, &())
            .await
            .map(|Json(c)| c)
            .map_err(|e| json_error(StatusCode::BAD_REQUEST, e.body_text()))
    } else {
        Form::<Credentials>::from_request(req, &())
            .await
            .map(|Form(c)| c)
            .map_err(|e| json_error(StatusCode::BAD_REQUEST, e.body_text()))
    }
}

fn login_page_html(error: Option<&str>) -> Html<String> {
    let markup = html! {
        (DOCTYPE)
        html {
            head {
                meta charset="utf-8";
                title { "Server Panel - Login" }
                link rel="stylesheet" href="/static/css/panel.css";
            }
            body {
                form method="post" action="/login" {
                    h1 { "Server Panel" }
                    @if let Some(error) = error {
                        p.error { (error) }
                    }
                    input name="username" placeholder="Username" autocomplete="username" required;
                    input name="password" type="password" placeholder="Password" autocomplete="current-password" required;
                    button type="submit" { "Sign in" }
                }
            }
        }
    };
    Html(markup.into_string())
}

pub async fn index(_req: Request<Body>) -> Response {
    redirect(DASHBOARD_PATH)
}

pub async fn login_page(state: AppState, req: Request<Body>) -> Response {
    if is_logged_in(&state, req.headers()) {
        return redirect(DASHBOARD_PATH);
    }
    login_page_html(None).into_response()
}

/// Browser form login. JSON-minded clients get the API envelope instead of
/// a redirect.
pub async fn login_form(state: AppState, req: Request<Body>) -> Response {
    let client = client_identity(&req);
    let request_headers = req.headers().clone();
    let json = wants_json(&request_headers);

    let credentials = match read_credentials(req).await {
        Ok(c) => c,
        Err(response) => return response,
    };

    match sign_in(&state, &request_headers, &client, &credentials).await {
        Ok(cookies) if json => (
            cookies,
            Json(ApiResponse::ok(json!({ "redirect": DASHBOARD_PATH }))),
        )
            .into_response(),
        Ok(cookies) => (cookies, redirect(DASHBOARD_PATH)).into_response(),
        Err(SignInError::Rejected(message)) if json => json_error(StatusCode::UNAUTHORIZED, message),
        Err(SignInError::Rejected(message)) => {
            (StatusCode::UNAUTHORIZED, login_page_html(Some(message))).into_response()
        }
        Err(SignInError::Internal) => json_error(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE),
    }
}

pub async fn login_api(state: AppState, req: Request<Body>) -> Response {
    let client = client_identity(&req);
    let request_headers = req.headers().clone();

    let credentials = match read_credentials(req).await {
        Ok(c) => c,
        Err(response) => return response,
    };

    match sign_in(&state, &request_headers, &client, &credentials).await {
        Ok(cookies) => (
            cookies,
            Json(ApiResponse::ok(json!({ "username": credentials.username.trim() }))),
        )
            .into_response(),
        Err(SignInError::Rejected(message)) => json_error(StatusCode::UNAUTHORIZED, message),
        Err(SignInError::Internal) => json_error(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE),
    }
}

pub async fn logout_page(state: AppState, req: Request<Body>) -> Response {
    let cookies = sign_out(&state, req.headers());
    (cookies, redirect(&state.config.auth.login_path)).into_response()
}

pub async fn logout_api(state: AppState, req: Request<Body>) -> Response {
    let cookies = sign_out(&state, req.headers());
    (cookies, Json(ApiResponse::message("Logged out"))).into_response()
}

fn operator(req: &Request<Body>) -> Result<&AuthenticatedSession, Response> {
    // Only reachable behind the auth gate; treat a missing user as a 401.
    current_user(req).ok_or_else(|| json_error(StatusCode::UNAUTHORIZED, "Unauthorized"))
}

pub async fn dashboard(req: Request<Body>) -> Response {
    let user = match operator(&req) {
        Ok(user) => user,
        Err(response) => return response,
    };
    let markup = html! {
        (DOCTYPE)
        html {
            head {
                meta charset="utf-8";
                title { "Server Panel" }
                link rel="stylesheet" href="/static/css/panel.css";
            }
            body {
                header {
                    "Signed in as " strong { (user.username) } " "
                    a href="/logout" { "Log out" }
                }
                main #dashboard data-events="/api/events" {}
            }
        }
    };
    Html(markup.into_string()).into_response()
}

pub async fn me(req: Request<Body>) -> Response {
    match operator(&req) {
        Ok(user) => Json(ApiResponse::ok(json!({
            "username": user.username,
            "uid": user.uid,
            "login_time": user.login_time,
            "last_seen": user.last_seen,
            "client_ip": user.client_ip,
        })))
        .into_response(),
        Err(response) => response,
    }
}

pub async fn sessions(state: AppState, _req: Request<Body>) -> Response {
    let active = state.auth.active_sessions();
    Json(ApiResponse::ok(json!({
        "count": active.len(),
        "sessions": active,
    })))
    .into_response()
}

/// Server-sent heartbeat stream. Ends when the client goes away and the
/// body is dropped.
pub async fn events(req: Request<Body>) -> Response {
    let username = match operator(&req) {
        Ok(user) => user.username.clone(),
        Err(response) => return response,
    };

    let ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    let stream = futures_util::stream::unfold((ticker, 0u64), move |(mut ticker, seq)| {
        let username = username.clone();
        async move {
            ticker.tick().await;
            let payload = json!({ "seq": seq, "user": username, "time": Utc::now() });
            let event = Event::default().event("heartbeat").data(payload.to_string());
            Some((Ok::<_, Infallible>(event), (ticker, seq + 1)))
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}
