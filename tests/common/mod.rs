//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;

use server_panel::auth::{CredentialVerifier, Principal, PrincipalDirectory};
use server_panel::clock::SystemClock;
use server_panel::http::{AppState, PanelServer};
use server_panel::session::MemoryBackend;
use server_panel::{PanelConfig, Shutdown};

pub const ADMIN: &str = "admin";
pub const PASSWORD: &str = "s3cret";

/// `admin` (uid 1000, sudo) and `guest` (uid 1001, no admin group).
pub struct TestDirectory;

#[async_trait]
impl PrincipalDirectory for TestDirectory {
    async fn lookup(&self, username: &str) -> io::Result<Option<Principal>> {
        let (uid, groups) = match username {
            ADMIN => (1000, vec!["admin".to_string(), "sudo".to_string()]),
            "guest" => (1001, vec!["guest".to_string()]),
            _ => return Ok(None),
        };
        Ok(Some(Principal {
            username: username.to_string(),
            uid,
            groups,
        }))
    }
}

/// Accepts [`PASSWORD`] and counts how often it was asked.
#[derive(Default)]
pub struct TestVerifier {
    pub calls: AtomicUsize,
}

impl TestVerifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialVerifier for TestVerifier {
    async fn verify_password(&self, _username: &str, password: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        password == PASSWORD
    }
}

pub fn test_config() -> PanelConfig {
    let mut config = PanelConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.auth.max_login_attempts = 3;
    config
}

pub fn test_state(config: PanelConfig) -> (AppState, Arc<TestVerifier>, Arc<MemoryBackend>) {
    let verifier = Arc::new(TestVerifier::default());
    let backend = Arc::new(MemoryBackend::new());
    let state = AppState::with_collaborators(
        config,
        backend.clone(),
        Arc::new(TestDirectory),
        verifier.clone(),
        Arc::new(SystemClock),
    );
    (state, verifier, backend)
}

pub struct TestPanel {
    pub addr: SocketAddr,
    pub state: AppState,
    pub verifier: Arc<TestVerifier>,
    pub backend: Arc<MemoryBackend>,
    pub shutdown: Arc<Shutdown>,
}

impl TestPanel {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestPanel {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Run a panel on an ephemeral port.
pub async fn spawn_panel(config: PanelConfig) -> TestPanel {
    let (state, verifier, backend) = test_state(config);
    let server = PanelServer::new(state.clone()).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Arc::new(Shutdown::new());

    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        server.run(listener, &server_shutdown).await.unwrap();
    });

    TestPanel {
        addr,
        state,
        verifier,
        backend,
        shutdown,
    }
}

/// A client that does not follow redirects, so 302s can be asserted.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

/// `name=value` of the first `Set-Cookie` header.
pub fn session_cookie(res: &reqwest::Response) -> Option<String> {
    res.headers()
        .get(reqwest::header::SET_COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .next()
        .map(str::to_string)
}
