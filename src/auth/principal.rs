//! Host principals and credential checks.
//!
//! The auth manager only sees the two traits below. The system
//! implementations read the account databases and shell out to `su`; tests
//! swap in fakes that never touch the OS.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::AuthConfig;

/// A host account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub username: String,
    pub uid: u32,
    pub groups: Vec<String>,
}

impl Principal {
    pub fn in_any_group(&self, groups: &[String]) -> bool {
        self.groups.iter().any(|g| groups.contains(g))
    }
}

/// Resolves usernames to host principals.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    /// `Ok(None)` when no such account exists.
    async fn lookup(&self, username: &str) -> io::Result<Option<Principal>>;
}

/// Checks a password against the host's authentication stack.
///
/// May be slow; callers must not hold locks across it.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify_password(&self, username: &str, password: &str) -> bool;
}

/// Reads `/etc/passwd` and `/etc/group` (or the configured substitutes).
#[derive(Debug, Clone)]
pub struct SystemDirectory {
    passwd_path: PathBuf,
    group_path: PathBuf,
}

impl SystemDirectory {
    pub fn new(passwd_path: impl Into<PathBuf>, group_path: impl Into<PathBuf>) -> Self {
        Self {
            passwd_path: passwd_path.into(),
            group_path: group_path.into(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.passwd_path, &config.group_path)
    }
}

#[async_trait]
impl PrincipalDirectory for SystemDirectory {
    async fn lookup(&self, username: &str) -> io::Result<Option<Principal>> {
        let passwd = tokio::fs::read_to_string(&self.passwd_path).await?;
        let Some((uid, gid)) = find_account(&passwd, username) else {
            return Ok(None);
        };

        let group = tokio::fs::read_to_string(&self.group_path).await?;
        Ok(Some(Principal {
            username: username.to_string(),
            uid,
            groups: groups_for(&group, username, gid),
        }))
    }
}

/// `(uid, gid)` of `username` in passwd(5) content.
fn find_account(passwd: &str, username: &str) -> Option<(u32, u32)> {
    passwd
        .lines()
        .filter(|line| !line.starts_with('#'))
        .map(|line| line.split(':').collect::<Vec<_>>())
        .find(|fields| fields.len() >= 4 && fields[0] == username)
        .and_then(|fields| Some((fields[2].parse().ok()?, fields[3].parse().ok()?)))
}

/// Primary group plus every group listing `username` as a member.
fn groups_for(group: &str, username: &str, primary_gid: u32) -> Vec<String> {
    let mut groups = Vec::new();
    for line in group.lines().filter(|l| !l.starts_with('#')) {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 3 {
            continue;
        }
        let name = fields[0];
        let primary = fields[2].parse::<u32>().ok() == Some(primary_gid);
        let member = fields
            .get(3)
            .is_some_and(|members| members.split(',').any(|m| m.trim() == username));
        if (primary || member) && !groups.iter().any(|g| g == name) {
            groups.push(name.to_string());
        }
    }
    groups
}

/// Verifies passwords by running `su -c "exit 0" <user>` with the password
/// on stdin.
#[derive(Debug, Clone)]
pub struct SuVerifier {
    timeout: Duration,
}

impl SuVerifier {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn run(&self, username: &str, password: &str) -> io::Result<bool> {
        let mut child = Command::new("su")
            .args(["-c", "exit 0", "--", username])
            .env("DEBIAN_FRONTEND", "noninteractive")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(password.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.shutdown().await?;
        }

        Ok(child.wait().await?.success())
    }
}

#[async_trait]
impl CredentialVerifier for SuVerifier {
    async fn verify_password(&self, username: &str, password: &str) -> bool {
        match tokio::time::timeout(self.timeout, self.run(username, password)).await {
            Ok(Ok(ok)) => ok,
            Ok(Err(e)) => {
                tracing::error!(username = %username, error = %e, "Credential check could not run");
                false
            }
            Err(_) => {
                tracing::warn!(username = %username, timeout = ?self.timeout, "Credential check timed out");
                false
            }
        }
    }
}
