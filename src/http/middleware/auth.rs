//! Authentication gate for protected routes.
//!
//! Resolves the session cookie, follows its `auth_session_id` to the auth
//! manager and lets the request through only for a live authenticated
//! session. The resolved [`Session`] and [`AuthenticatedSession`] are
//! attached as request extensions, and the session cookie is re-sent on the
//! response so the browser's expiry follows the sliding one.
//!
//! Rejections: paths under `/api/` get 401 JSON, everything else a 302 to
//! the login page.

use std::sync::Arc;

use axum::{body::Body, http::Request, http::StatusCode, response::Response};

use crate::auth::{AuthError, AuthManager, AuthenticatedSession};
use crate::http::request::{client_identity, RequestIdExt};
use crate::http::response::{json_error, redirect};
use crate::routing::handler::{middleware, BoxResponseFuture, Handler, Middleware};
use crate::session::{Session, SessionStore};

/// Generic-session key holding the authenticated session id.
pub const AUTH_SESSION_KEY: &str = "auth_session_id";

pub fn auth_gate(sessions: Arc<SessionStore>, auth: Arc<AuthManager>, login_path: String) -> Middleware {
    let login_path: Arc<str> = login_path.into();
    middleware(move |next: Handler| -> Handler {
        let sessions = sessions.clone();
        let auth = auth.clone();
        let login_path = login_path.clone();
        Arc::new(move |mut req: Request<Body>| -> BoxResponseFuture {
            let session = sessions.get(req.headers());

            let validated = session
                .get_str(AUTH_SESSION_KEY)
                .ok_or(AuthError::SessionNotFound)
                .and_then(|id| auth.validate_session(id));

            match validated {
                Ok(authenticated) => {
                    req.extensions_mut().insert(authenticated);
                    req.extensions_mut().insert(session.clone());
                    let response = next(req);
                    let sessions = sessions.clone();
                    Box::pin(async move {
                        let mut response = response.await;
                        if let Err(e) = sessions.refresh(&session, response.headers_mut()) {
                            tracing::warn!(error = %e, "Failed to refresh session");
                        }
                        response
                    })
                }
                Err(e) => {
                    tracing::debug!(
                        request_id = req.request_id().map_or("-", |id| id.as_str()),
                        path = %req.uri().path(),
                        client = %client_identity(&req),
                        cause = %e,
                        "Unauthenticated request"
                    );
                    let response = reject(req.uri().path(), &login_path);
                    Box::pin(async move { response })
                }
            }
        })
    })
}

fn reject(path: &str, login_path: &str) -> Response {
    if path.starts_with("/api/") {
        json_error(StatusCode::UNAUTHORIZED, "Unauthorized")
    } else {
        redirect(login_path)
    }
}

/// The authenticated operator, for handlers behind the gate.
pub fn current_user(req: &Request<Body>) -> Option<&AuthenticatedSession> {
    req.extensions().get::<AuthenticatedSession>()
}

/// The generic session resolved by the gate.
pub fn current_session(req: &Request<Body>) -> Option<&Session> {
    req.extensions().get::<Session>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    use async_trait::async_trait;
    use axum::http::{header, HeaderMap};

    use crate::auth::{AuthPolicy, CredentialVerifier, Principal, PrincipalDirectory};
    use crate::clock::SystemClock;
    use crate::config::{AuthConfig, SessionConfig};
    use crate::routing::handler::handler;
    use crate::session::MemoryBackend;

    struct OneAdmin;

    #[async_trait]
    impl PrincipalDirectory for OneAdmin {
        async fn lookup(&self, username: &str) -> io::Result<Option<Principal>> {
            Ok((username == "admin").then(|| Principal {
                username: "admin".into(),
                uid: 1000,
                groups: vec!["sudo".into()],
            }))
        }
    }

    struct AnyPassword;

    #[async_trait]
    impl CredentialVerifier for AnyPassword {
        async fn verify_password(&self, _username: &str, _password: &str) -> bool {
            true
        }
    }

    fn stack() -> (Arc<SessionStore>, Arc<AuthManager>, Handler) {
        let sessions = Arc::new(SessionStore::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(SystemClock),
            &SessionConfig::default(),
        ));
        let auth = Arc::new(AuthManager::new(
            AuthPolicy::from(&AuthConfig::default()),
            Arc::new(OneAdmin),
            Arc::new(AnyPassword),
            Arc::new(SystemClock),
        ));
        let gated = auth_gate(sessions.clone(), auth.clone(), "/login".into())(handler(
            |req: Request<Body>| async move {
                current_user(&req)
                    .map(|u| u.username.clone())
                    .unwrap_or_default()
            },
        ));
        (sessions, auth, gated)
    }

    fn get(path: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_api_paths_get_401() {
        let (_, _, gated) = stack();
        let res = gated(get("/api/stats", None)).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let bytes = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Unauthorized");
    }

    #[tokio::test]
    async fn test_rejection_sets_no_cookie() {
        let (_, _, gated) = stack();
        let res = gated(get("/api/stats", Some("session_id=abc123"))).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert!(res.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_pages_redirect_to_login() {
        let (_, _, gated) = stack();
        let res = gated(get("/dashboard", None)).await;
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(res.headers()[header::LOCATION], "/login");
    }

    #[tokio::test]
    async fn test_authenticated_request_passes() {
        let (sessions, auth, gated) = stack();
        let authenticated = auth.authenticate("admin", "pw", "127.0.0.1").await.unwrap();

        let mut session = sessions.get(&HeaderMap::new());
        session.set(AUTH_SESSION_KEY, authenticated.id.clone());
        let mut out = HeaderMap::new();
        sessions.save(&mut session, &mut out).unwrap();

        let cookie = format!("session_id={}", session.id());
        let res = gated(get("/api/me", Some(&cookie))).await;
        assert_eq!(res.status(), StatusCode::OK);
        // The cookie is re-sent so the browser follows the sliding expiry.
        let refreshed = res.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(refreshed.starts_with(&format!("{cookie};")));
        let bytes = axum::body::to_bytes(res.into_body(), 1024).await.unwrap();
        assert_eq!(&bytes[..], b"admin");

        // Revoking the authenticated session closes the gate.
        auth.logout(&authenticated.id);
        let res = gated(get("/api/me", Some(&cookie))).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
