//! In-process tests driving the dispatcher directly.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use server_panel::auth::SystemDirectory;
use chrono::{TimeZone, Utc};
use server_panel::clock::{ManualClock, SystemClock};
use server_panel::http::{build_dispatcher, AppState};
use server_panel::routing::Dispatcher;
use server_panel::session::{MemoryBackend, SessionStore, SqliteBackend};

mod common;

use common::{test_config, test_state, TestVerifier, ADMIN, PASSWORD};

async fn send(dispatcher: &Dispatcher, req: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let res = dispatcher.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let headers = res.headers().clone();
    let body = res.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

fn token_of(headers: &HeaderMap) -> String {
    headers[header::SET_COOKIE]
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .and_then(|kv| kv.strip_prefix("session_id="))
        .unwrap()
        .to_string()
}

fn me_request(token: &str) -> Request<Body> {
    Request::get("/api/me")
        .header(header::COOKIE, format!("session_id={token}"))
        .body(Body::empty())
        .unwrap()
}

fn login_request() -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "username": ADMIN, "password": PASSWORD }).to_string(),
        ))
        .unwrap()
}

#[tokio::test]
async fn test_static_files_served_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("css")).unwrap();
    std::fs::write(dir.path().join("css/a.css"), "body { margin: 0 }").unwrap();

    let mut config = test_config();
    config.static_files.directory = dir.path().display().to_string();
    let (state, _, _) = test_state(config);
    let dispatcher = build_dispatcher(&state).unwrap();

    let req = Request::get("/static/css/a.css").body(Body::empty()).unwrap();
    let (status, headers, body) = send(&dispatcher, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/css");
    assert_eq!(&body[..], b"body { margin: 0 }");

    let req = Request::get("/static/css/missing.css").body(Body::empty()).unwrap();
    let (status, _, _) = send(&dispatcher, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rate_limit_applies_before_routing() {
    let mut config = test_config();
    config.rate_limit.enabled = true;
    config.rate_limit.requests_per_minute = 2;
    let (state, _, _) = test_state(config);
    let dispatcher = build_dispatcher(&state).unwrap();

    for _ in 0..2 {
        let req = Request::get("/login").body(Body::empty()).unwrap();
        assert_eq!(send(&dispatcher, req).await.0, StatusCode::OK);
    }

    let req = Request::get("/login").body(Body::empty()).unwrap();
    let (status, headers, body) = send(&dispatcher, req).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    // CORS and request ids still decorate the rejection.
    assert!(headers.contains_key("access-control-allow-origin"));
    assert!(headers.contains_key("x-request-id"));
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_login_persists_generic_session_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("panel.db");

    let build = || {
        let mut config = test_config();
        config.session.database_path = db.display().to_string();
        AppState::with_collaborators(
            config,
            Arc::new(SqliteBackend::open(&db).unwrap()),
            Arc::new(common::TestDirectory),
            Arc::new(TestVerifier::default()),
            Arc::new(SystemClock),
        )
    };

    let first = build();
    let (status, headers, _) = send(&build_dispatcher(&first).unwrap(), login_request()).await;
    assert_eq!(status, StatusCode::OK);
    let token = token_of(&headers);
    drop(first);

    let second = build();
    let session = second.sessions.load(&token).unwrap();
    assert_eq!(session.get_str("username"), Some(ADMIN));
    assert_eq!(session.get("authenticated"), Some(&Value::Bool(true)));
    assert!(session.get_str("auth_session_id").is_some());
    assert!(session.get_str("login_time").is_some());
}

#[tokio::test]
async fn test_system_directory_wires_into_state() {
    let dir = tempfile::tempdir().unwrap();
    let passwd = dir.path().join("passwd");
    let group = dir.path().join("group");
    std::fs::write(&passwd, "ops:x:1200:1200::/home/ops:/bin/bash\n").unwrap();
    std::fs::write(&group, "ops:x:1200:\nwheel:x:10:ops\n").unwrap();

    let (template, _, _) = test_state(test_config());
    let state = AppState::with_collaborators(
        (*template.config).clone(),
        Arc::new(server_panel::session::MemoryBackend::new()),
        Arc::new(SystemDirectory::new(&passwd, &group)),
        Arc::new(TestVerifier::default()),
        Arc::new(SystemClock),
    );

    let session = state.auth.authenticate("ops", PASSWORD, "192.0.2.10").await.unwrap();
    assert_eq!(session.uid, 1200);
}

#[tokio::test]
async fn test_activity_keeps_session_alive_past_login_ttl() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap()));
    let backend = Arc::new(MemoryBackend::new());
    let state = AppState::with_collaborators(
        test_config(),
        backend.clone(),
        Arc::new(common::TestDirectory),
        Arc::new(TestVerifier::default()),
        clock.clone(),
    );
    let dispatcher = build_dispatcher(&state).unwrap();

    let (status, headers, _) = send(&dispatcher, login_request()).await;
    assert_eq!(status, StatusCode::OK);
    let token = token_of(&headers);

    clock.advance(chrono::Duration::hours(23));
    let (status, headers, _) = send(&dispatcher, me_request(&token)).await;
    assert_eq!(status, StatusCode::OK);
    let cookie = headers[header::SET_COOKIE].to_str().unwrap();
    assert!(cookie.starts_with(&format!("session_id={token};")));
    assert!(cookie.contains("Expires=Wed, 06 May 2026 08:30:00 GMT"));

    // Two hours past the login-time expiry.
    clock.advance(chrono::Duration::hours(2));
    let (status, _, _) = send(&dispatcher, me_request(&token)).await;
    assert_eq!(status, StatusCode::OK);

    state.sessions.sweep();
    assert_eq!(backend.row_count(), 1);

    let restarted = SessionStore::new(backend, clock, &state.config.session);
    assert_eq!(restarted.load(&token).unwrap().get_str("username"), Some(ADMIN));
}

#[tokio::test]
async fn test_login_replaces_presented_token() {
    let (state, _, _) = test_state(test_config());
    let dispatcher = build_dispatcher(&state).unwrap();

    let mut req = login_request();
    req.headers_mut().insert(
        header::COOKIE,
        "session_id=plantedtoken0001".parse().unwrap(),
    );
    let (status, headers, _) = send(&dispatcher, req).await;
    assert_eq!(status, StatusCode::OK);
    let token = token_of(&headers);
    assert_ne!(token, "plantedtoken0001");

    let (status, _, _) = send(&dispatcher, me_request("plantedtoken0001")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _, _) = send(&dispatcher, me_request(&token)).await;
    assert_eq!(status, StatusCode::OK);
}
