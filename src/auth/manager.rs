//! Authentication manager.
//!
//! # Responsibilities
//! - Check credentials for host principals in an administrative group
//! - Count failed logins per client and lock clients out for a window
//! - Issue, validate (with sliding expiry) and revoke authenticated sessions
//!
//! # Locking
//! One `RwLock` covers sessions and attempt counters. It is taken briefly
//! before and after the credential check, never across it, so a slow `su`
//! does not hold up other clients.
//!
//! Checks still running count against the cap: a client may have at most
//! `max_attempts` failures plus checks in flight, so parallel guesses
//! cannot overrun the lockout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use serde::Serialize;
use tokio::sync::broadcast;

use super::principal::{CredentialVerifier, Principal, PrincipalDirectory};
use super::AuthError;
use crate::clock::{self, Clock};
use crate::config::AuthConfig;
use crate::observability::metrics;

const SESSION_ID_BYTES: usize = 32;

/// A logged-in operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedSession {
    #[serde(skip_serializing)]
    pub id: String,
    pub username: String,
    pub uid: u32,
    pub login_time: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub client_ip: String,
}

#[derive(Debug, Clone)]
struct LoginAttempts {
    failures: u32,
    in_flight: u32,
    last_attempt: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
}

impl LoginAttempts {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            failures: 0,
            in_flight: 0,
            last_attempt: now,
            locked_until: None,
        }
    }
}

/// An attempt slot held while the credential check runs.
///
/// Dropping it, including when the login future is cancelled, gives the
/// slot back.
struct AttemptSlot<'a> {
    state: &'a RwLock<AuthState>,
    client: &'a str,
}

impl Drop for AttemptSlot<'_> {
    fn drop(&mut self) {
        if let Some(attempts) = self.state.write().attempts.get_mut(self.client) {
            attempts.in_flight = attempts.in_flight.saturating_sub(1);
        }
    }
}

#[derive(Default)]
struct AuthState {
    sessions: HashMap<String, AuthenticatedSession>,
    attempts: HashMap<String, LoginAttempts>,
}

/// Counts removed by one [`AuthManager::cleanup_expired`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub sessions: usize,
    pub attempts: usize,
}

/// Tunables pulled out of [`AuthConfig`].
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    pub session_timeout: chrono::Duration,
    pub max_attempts: u32,
    pub lockout: chrono::Duration,
    pub min_uid: u32,
    pub superuser_uid: u32,
    pub admin_groups: Vec<String>,
}

impl From<&AuthConfig> for AuthPolicy {
    fn from(config: &AuthConfig) -> Self {
        Self {
            session_timeout: clock::window(config.session_timeout_secs),
            max_attempts: config.max_login_attempts,
            lockout: clock::window(config.lockout_secs),
            min_uid: config.min_uid,
            superuser_uid: config.superuser_uid,
            admin_groups: config.admin_groups.clone(),
        }
    }
}

pub struct AuthManager {
    state: RwLock<AuthState>,
    policy: AuthPolicy,
    directory: Arc<dyn PrincipalDirectory>,
    verifier: Arc<dyn CredentialVerifier>,
    clock: Arc<dyn Clock>,
}

impl AuthManager {
    pub fn new(
        policy: AuthPolicy,
        directory: Arc<dyn PrincipalDirectory>,
        verifier: Arc<dyn CredentialVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state: RwLock::new(AuthState::default()),
            policy,
            directory,
            verifier,
            clock,
        }
    }

    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    /// Log `username` in from `client`.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        client: &str,
    ) -> Result<AuthenticatedSession, AuthError> {
        let _slot = match self.reserve_attempt(client) {
            Ok(slot) => slot,
            Err(e) => {
                tracing::warn!(username = %username, client = %client, cause = %e, "Login rejected");
                metrics::record_login(e.outcome());
                return Err(e);
            }
        };

        match self.verify(username, password).await {
            Ok(principal) => {
                let session = self.open_session(&principal, client);
                tracing::info!(username = %username, client = %client, "Login succeeded");
                metrics::record_login("success");
                Ok(session)
            }
            Err(e) => {
                tracing::warn!(username = %username, client = %client, cause = %e, "Login failed");
                metrics::record_login(e.outcome());
                self.record_failure(client);
                Err(e)
            }
        }
    }

    /// Take an attempt slot for `client`.
    ///
    /// Rejects a locked client, and one whose failures plus checks in
    /// flight already reach the cap. A lock whose window has passed is
    /// cleared first.
    fn reserve_attempt<'a>(&'a self, client: &'a str) -> Result<AttemptSlot<'a>, AuthError> {
        let now = self.clock.now();
        let mut state = self.state.write();

        let elapsed = state
            .attempts
            .get(client)
            .and_then(|a| a.locked_until)
            .is_some_and(|until| now >= until);
        if elapsed {
            state.attempts.remove(client);
            tracing::info!(client = %client, "Lockout window elapsed");
        }

        let attempts = state
            .attempts
            .entry(client.to_string())
            .or_insert_with(|| LoginAttempts::new(now));
        if let Some(until) = attempts.locked_until {
            return Err(AuthError::LockedOut { until });
        }
        if attempts.failures + attempts.in_flight >= self.policy.max_attempts {
            return Err(AuthError::TooManyAttempts);
        }

        attempts.in_flight += 1;
        attempts.last_attempt = now;
        Ok(AttemptSlot {
            state: &self.state,
            client,
        })
    }

    async fn verify(&self, username: &str, password: &str) -> Result<Principal, AuthError> {
        let principal = match self.directory.lookup(username).await {
            Ok(Some(p)) => p,
            Ok(None) => return Err(AuthError::UnknownPrincipal(username.to_string())),
            Err(e) => {
                tracing::error!(username = %username, error = %e, "Principal lookup failed");
                return Err(AuthError::UnknownPrincipal(username.to_string()));
            }
        };

        let superuser = principal.uid == self.policy.superuser_uid;
        if principal.uid < self.policy.min_uid && !superuser {
            return Err(AuthError::UnknownPrincipal(username.to_string()));
        }
        if !superuser && !principal.in_any_group(&self.policy.admin_groups) {
            return Err(AuthError::InsufficientPrivilege(username.to_string()));
        }

        if !self.verifier.verify_password(username, password).await {
            return Err(AuthError::InvalidCredential);
        }
        Ok(principal)
    }

    fn record_failure(&self, client: &str) {
        let now = self.clock.now();
        let mut state = self.state.write();
        let attempts = state
            .attempts
            .entry(client.to_string())
            .or_insert_with(|| LoginAttempts::new(now));

        attempts.failures += 1;
        attempts.last_attempt = now;

        if attempts.failures >= self.policy.max_attempts && attempts.locked_until.is_none() {
            let until = now + self.policy.lockout;
            attempts.locked_until = Some(until);
            tracing::warn!(
                client = %client,
                failures = attempts.failures,
                locked_until = %until,
                "Client locked out"
            );
            metrics::record_lockout();
        }
    }

    fn open_session(&self, principal: &Principal, client: &str) -> AuthenticatedSession {
        let now = self.clock.now();
        let session = AuthenticatedSession {
            id: generate_session_id(),
            username: principal.username.clone(),
            uid: principal.uid,
            login_time: now,
            last_seen: now,
            client_ip: client.to_string(),
        };

        let mut state = self.state.write();
        match state.attempts.get_mut(client) {
            // Other checks from this client are still running; keep their slots.
            Some(attempts) if attempts.in_flight > 1 => {
                attempts.failures = 0;
                attempts.locked_until = None;
            }
            _ => {
                state.attempts.remove(client);
            }
        }
        state.sessions.insert(session.id.clone(), session.clone());
        metrics::record_active_sessions(state.sessions.len());
        session
    }

    /// Look up a session and push its `last_seen` forward.
    ///
    /// A session idle for the full timeout or longer is evicted.
    pub fn validate_session(&self, id: &str) -> Result<AuthenticatedSession, AuthError> {
        let now = self.clock.now();
        let mut state = self.state.write();
        let session = state.sessions.get_mut(id).ok_or(AuthError::SessionNotFound)?;

        if now - session.last_seen >= self.policy.session_timeout {
            let username = session.username.clone();
            state.sessions.remove(id);
            metrics::record_active_sessions(state.sessions.len());
            tracing::info!(username = %username, "Authenticated session expired");
            return Err(AuthError::SessionExpired);
        }

        session.last_seen = now;
        Ok(session.clone())
    }

    pub fn logout(&self, id: &str) {
        let mut state = self.state.write();
        if let Some(session) = state.sessions.remove(id) {
            tracing::info!(username = %session.username, client = %session.client_ip, "Logged out");
            metrics::record_active_sessions(state.sessions.len());
        }
    }

    /// Sessions that have not yet timed out, oldest login first.
    pub fn active_sessions(&self) -> Vec<AuthenticatedSession> {
        let now = self.clock.now();
        let state = self.state.read();
        let mut sessions: Vec<_> = state
            .sessions
            .values()
            .filter(|s| now - s.last_seen < self.policy.session_timeout)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.login_time);
        sessions
    }

    /// Failures recorded against `client`, zero when none.
    pub fn failed_attempts(&self, client: &str) -> u32 {
        self.state
            .read()
            .attempts
            .get(client)
            .map_or(0, |a| a.failures)
    }

    /// Drop timed-out sessions, elapsed lockouts and stale failure counts.
    pub fn cleanup_expired(&self) -> CleanupStats {
        let now = self.clock.now();
        let timeout = self.policy.session_timeout;
        let lockout = self.policy.lockout;
        let mut state = self.state.write();

        let sessions_before = state.sessions.len();
        state.sessions.retain(|_, s| now - s.last_seen < timeout);

        let attempts_before = state.attempts.len();
        state.attempts.retain(|_, a| {
            a.in_flight > 0
                || match a.locked_until {
                    Some(until) => now < until,
                    None => now - a.last_attempt < lockout,
                }
        });

        let stats = CleanupStats {
            sessions: sessions_before - state.sessions.len(),
            attempts: attempts_before - state.attempts.len(),
        };
        metrics::record_active_sessions(state.sessions.len());
        stats
    }

    pub async fn run_janitor(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = self.cleanup_expired();
                    if stats != CleanupStats::default() {
                        tracing::debug!(sessions = stats.sessions, attempts = stats.attempts, "Auth cleanup");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Auth janitor shutting down");
                    break;
                }
            }
        }
    }
}

/// 256-bit random id, hex encoded.
fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;

    use crate::clock::ManualClock;

    struct FakeDirectory;

    #[async_trait]
    impl PrincipalDirectory for FakeDirectory {
        async fn lookup(&self, username: &str) -> io::Result<Option<Principal>> {
            let principal = |uid, groups: &[&str]| Principal {
                username: username.to_string(),
                uid,
                groups: groups.iter().map(|g| g.to_string()).collect(),
            };
            Ok(match username {
                "root" => Some(principal(0, &["root"])),
                "alice" => Some(principal(1000, &["alice", "sudo"])),
                "bob" => Some(principal(1001, &["bob", "users"])),
                "daemon" => Some(principal(1, &["wheel"])),
                "broken" => return Err(io::Error::other("passwd unreadable")),
                _ => None,
            })
        }
    }

    /// Accepts `correct-horse` for everyone and counts calls.
    #[derive(Default)]
    struct FakeVerifier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialVerifier for FakeVerifier {
        async fn verify_password(&self, _username: &str, password: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            password == "correct-horse"
        }
    }

    struct Harness {
        manager: Arc<AuthManager>,
        verifier: Arc<FakeVerifier>,
        clock: Arc<ManualClock>,
    }

    fn harness(max_attempts: u32) -> Harness {
        let verifier = Arc::new(FakeVerifier::default());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 15, 8, 0, 0).unwrap(),
        ));
        let policy = AuthPolicy {
            max_attempts,
            ..AuthPolicy::from(&AuthConfig::default())
        };
        let manager = Arc::new(AuthManager::new(
            policy,
            Arc::new(FakeDirectory),
            verifier.clone(),
            clock.clone(),
        ));
        Harness {
            manager,
            verifier,
            clock,
        }
    }

    #[tokio::test]
    async fn test_successful_login() {
        let h = harness(5);
        let session = h
            .manager
            .authenticate("alice", "correct-horse", "10.0.0.5")
            .await
            .unwrap();

        assert_eq!(session.username, "alice");
        assert_eq!(session.uid, 1000);
        assert_eq!(session.client_ip, "10.0.0.5");
        assert_eq!(session.id.len(), 64);
        assert_eq!(session.login_time, session.last_seen);
        assert_eq!(h.manager.validate_session(&session.id).unwrap().username, "alice");
    }

    #[tokio::test]
    async fn test_lockout_after_three_failures() {
        let h = harness(3);

        for _ in 0..3 {
            let err = h.manager.authenticate("alice", "wrong", "10.0.0.7").await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredential));
        }
        assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 3);

        h.clock.advance(chrono::Duration::minutes(14));
        let err = h
            .manager
            .authenticate("alice", "correct-horse", "10.0.0.7")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::LockedOut { .. }));
        assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 3);

        // Another client is unaffected.
        assert!(h
            .manager
            .authenticate("alice", "correct-horse", "10.0.0.8")
            .await
            .is_ok());

        h.clock.advance(chrono::Duration::minutes(1));
        assert!(h
            .manager
            .authenticate("alice", "correct-horse", "10.0.0.7")
            .await
            .is_ok());
        assert_eq!(h.manager.failed_attempts("10.0.0.7"), 0);
    }

    #[tokio::test]
    async fn test_elapsed_lock_restarts_count() {
        let h = harness(3);
        for _ in 0..3 {
            let _ = h.manager.authenticate("alice", "wrong", "10.0.0.7").await;
        }
        h.clock.advance(chrono::Duration::minutes(15));

        let err = h.manager.authenticate("alice", "wrong", "10.0.0.7").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential));
        assert_eq!(h.manager.failed_attempts("10.0.0.7"), 1);
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let h = harness(3);
        let _ = h.manager.authenticate("alice", "wrong", "10.0.0.9").await;
        let _ = h.manager.authenticate("alice", "wrong", "10.0.0.9").await;
        assert_eq!(h.manager.failed_attempts("10.0.0.9"), 2);

        h.manager
            .authenticate("alice", "correct-horse", "10.0.0.9")
            .await
            .unwrap();
        assert_eq!(h.manager.failed_attempts("10.0.0.9"), 0);
    }

    #[tokio::test]
    async fn test_principal_checks() {
        let h = harness(10);
        let m = &h.manager;

        assert!(matches!(
            m.authenticate("mallory", "correct-horse", "c").await,
            Err(AuthError::UnknownPrincipal(_))
        ));
        assert!(matches!(
            m.authenticate("daemon", "correct-horse", "c").await,
            Err(AuthError::UnknownPrincipal(_))
        ));
        assert!(matches!(
            m.authenticate("bob", "correct-horse", "c").await,
            Err(AuthError::InsufficientPrivilege(_))
        ));
        assert!(matches!(
            m.authenticate("broken", "correct-horse", "c").await,
            Err(AuthError::UnknownPrincipal(_))
        ));
        // None of the above reached the password check.
        assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 0);
        assert_eq!(m.failed_attempts("c"), 4);

        // The superuser needs neither a high uid nor an admin group.
        assert!(m.authenticate("root", "correct-horse", "c").await.is_ok());
    }

    #[tokio::test]
    async fn test_public_message_is_uniform() {
        let h = harness(10);
        let unknown = h.manager.authenticate("mallory", "x", "c").await.unwrap_err();
        let privilege = h.manager.authenticate("bob", "x", "c").await.unwrap_err();
        let password = h.manager.authenticate("alice", "x", "c").await.unwrap_err();

        assert_eq!(unknown.public_message(), privilege.public_message());
        assert_eq!(privilege.public_message(), password.public_message());
    }

    #[tokio::test]
    async fn test_session_timeout_boundary() {
        let h = harness(5);
        let session = h
            .manager
            .authenticate("alice", "correct-horse", "10.0.0.5")
            .await
            .unwrap();
        let timeout = h.manager.policy().session_timeout;

        h.clock.advance(timeout - chrono::Duration::seconds(1));
        assert!(h.manager.validate_session(&session.id).is_ok());

        // last_seen slid forward; exactly one timeout later it is gone.
        h.clock.advance(timeout);
        assert!(matches!(
            h.manager.validate_session(&session.id),
            Err(AuthError::SessionExpired)
        ));
        assert!(matches!(
            h.manager.validate_session(&session.id),
            Err(AuthError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_logout_and_active_sessions() {
        let h = harness(5);
        let a = h.manager.authenticate("alice", "correct-horse", "1.1.1.1").await.unwrap();
        h.clock.advance(chrono::Duration::seconds(5));
        let b = h.manager.authenticate("root", "correct-horse", "2.2.2.2").await.unwrap();

        let active = h.manager.active_sessions();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].username, "alice");

        h.manager.logout(&a.id);
        h.manager.logout(&a.id);
        let active = h.manager.active_sessions();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.id);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let h = harness(2);
        let session = h.manager.authenticate("alice", "correct-horse", "1.1.1.1").await.unwrap();
        let _ = h.manager.authenticate("alice", "wrong", "3.3.3.3").await;
        let _ = h.manager.authenticate("alice", "wrong", "4.4.4.4").await;
        let _ = h.manager.authenticate("alice", "wrong", "4.4.4.4").await;

        h.clock.advance(chrono::Duration::minutes(15));
        let stats = h.manager.cleanup_expired();
        assert_eq!(stats, CleanupStats { sessions: 0, attempts: 2 });

        h.clock.advance(h.manager.policy().session_timeout);
        let stats = h.manager.cleanup_expired();
        assert_eq!(stats.sessions, 1);
        assert!(h.manager.validate_session(&session.id).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_clients_keep_separate_counters() {
        let h = harness(100);
        let mut tasks = Vec::new();
        for client in 0..8 {
            for _ in 0..5 {
                let manager = h.manager.clone();
                tasks.push(tokio::spawn(async move {
                    let ip = format!("192.0.2.{client}");
                    let _ = manager.authenticate("alice", "wrong", &ip).await;
                }));
            }
        }
        for task in tasks {
            task.await.unwrap();
        }

        for client in 0..8 {
            assert_eq!(h.manager.failed_attempts(&format!("192.0.2.{client}")), 5);
        }
        assert_eq!(h.verifier.calls.load(Ordering::SeqCst), 40);
    }

    /// Rejects everything after a delay, counting calls.
    #[derive(Default)]
    struct SlowVerifier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialVerifier for SlowVerifier {
        async fn verify_password(&self, _username: &str, _password: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            false
        }
    }

    fn slow_manager(max_attempts: u32) -> (Arc<AuthManager>, Arc<SlowVerifier>) {
        let verifier = Arc::new(SlowVerifier::default());
        let policy = AuthPolicy {
            max_attempts,
            ..AuthPolicy::from(&AuthConfig::default())
        };
        let manager = Arc::new(AuthManager::new(
            policy,
            Arc::new(FakeDirectory),
            verifier.clone(),
            Arc::new(ManualClock::default()),
        ));
        (manager, verifier)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_guesses_from_one_client_respect_cap() {
        let (manager, verifier) = slow_manager(3);
        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.authenticate("alice", "guess", "198.51.100.1").await })
            })
            .collect();

        let mut throttled = 0;
        for task in tasks {
            match task.await.unwrap() {
                Err(AuthError::TooManyAttempts | AuthError::LockedOut { .. }) => throttled += 1,
                Err(AuthError::InvalidCredential) => {}
                other => panic!("unexpected result: {other:?}"),
            }
        }

        assert_eq!(verifier.calls.load(Ordering::SeqCst), 3);
        assert_eq!(manager.failed_attempts("198.51.100.1"), 3);
        assert_eq!(throttled, 47);
        assert!(matches!(
            manager.authenticate("alice", "guess", "198.51.100.1").await,
            Err(AuthError::LockedOut { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_check_gives_slot_back() {
        let (manager, verifier) = slow_manager(1);

        let attempt = manager.authenticate("alice", "guess", "198.51.100.2");
        assert!(tokio::time::timeout(Duration::from_millis(5), attempt).await.is_err());
        assert_eq!(manager.failed_attempts("198.51.100.2"), 0);

        let err = manager.authenticate("alice", "guess", "198.51.100.2").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 2);
    }
}
