//! Tiered session authentication.
//!
//! Two credential tiers (read-write, read-only) and two global overrides:
//! `admin` opens everything, `public` opens viewing only. Sessions live in a
//! reader/writer-locked map; validation takes the read side, login, logout,
//! lazy eviction and the sweep take the write side.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::AuthError;

/// Session lifetime from creation.
pub const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Period of the expired-session sweep.
pub const SWEEP_PERIOD: Duration = Duration::from_secs(60 * 60);
const TOKEN_BYTES: usize = 32;
const PASSWORD_SALT: &str = "syspeek_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    ReadWrite,
    ReadOnly,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::ReadWrite => "read-write",
            Role::ReadOnly => "read-only",
        }
    }
}

/// What an endpoint needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    View,
    Mutate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub token: String,
    pub username: String,
    pub role: Role,
    pub created_at: SystemTime,
    pub expires_at: SystemTime,
}

/// Username and transformed password of one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password_hash: String,
}

impl Credential {
    /// None unless both parts are non-empty.
    pub fn new(username: &str, password_hash: &str) -> Option<Self> {
        (!username.is_empty() && !password_hash.is_empty()).then(|| Self {
            username: username.to_string(),
            password_hash: password_hash.to_ascii_lowercase(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthSettings {
    pub read_write: Option<Credential>,
    pub read_only: Option<Credential>,
    pub public: bool,
    pub admin: bool,
}

/// Who was let through, for logging mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub username: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub authenticated: bool,
    pub auth_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub can_write: bool,
    pub login_required: bool,
    pub public_mode: bool,
    pub admin_mode: bool,
}

/// Fixed one-way transform applied to submitted passwords: hex SHA-256 of the
/// salted plaintext. Config files store this value.
pub fn hash_password(plaintext: &str) -> String {
    let mut h = Sha256::new();
    h.update(PASSWORD_SALT.as_bytes());
    h.update(plaintext.as_bytes());
    h.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

fn new_token() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

// Compares without early exit on the first differing byte.
fn digest_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub struct AuthManager {
    read_write: Option<Credential>,
    read_only: Option<Credential>,
    public: bool,
    admin: bool,
    ttl: Duration,
    sessions: RwLock<HashMap<String, AuthSession>>,
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("read_write", &self.read_write.is_some())
            .field("read_only", &self.read_only.is_some())
            .field("public", &self.public)
            .field("admin", &self.admin)
            .field("sessions", &self.session_count())
            .finish_non_exhaustive()
    }
}

impl AuthManager {
    pub fn new(settings: AuthSettings) -> Self {
        Self {
            read_write: settings.read_write,
            read_only: settings.read_only,
            public: settings.public,
            admin: settings.admin,
            ttl: SESSION_TTL,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// True when at least one credential tier is configured.
    pub fn is_enabled(&self) -> bool {
        self.read_write.is_some() || self.read_only.is_some()
    }

    pub fn is_public(&self) -> bool {
        self.public
    }

    pub fn is_admin(&self) -> bool {
        self.admin
    }

    pub fn login(&self, username: &str, password: &str) -> Option<AuthSession> {
        self.login_at(username, password, SystemTime::now())
    }

    /// Tries the read-write tier, then read-only. Unknown user and wrong
    /// password are the same `None`.
    pub fn login_at(&self, username: &str, password: &str, now: SystemTime) -> Option<AuthSession> {
        let submitted = hash_password(password);
        let role = [
            (self.read_write.as_ref(), Role::ReadWrite),
            (self.read_only.as_ref(), Role::ReadOnly),
        ]
        .into_iter()
        .find_map(|(cred, role)| {
            let cred = cred?;
            (cred.username == username && digest_eq(&cred.password_hash, &submitted))
                .then_some(role)
        })?;

        let session = AuthSession {
            token: new_token(),
            username: username.to_string(),
            role,
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.token.clone(), session.clone());
        info!(user = username, ?role, "login");
        Some(session)
    }

    pub fn logout(&self, token: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token)
            .is_some()
    }

    pub fn validate(&self, token: &str) -> Option<AuthSession> {
        self.validate_at(token, SystemTime::now())
    }

    /// Returns the live session for `token`. An expired session is removed
    /// and reported exactly like an unknown token.
    pub fn validate_at(&self, token: &str, now: SystemTime) -> Option<AuthSession> {
        {
            let map = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            match map.get(token) {
                None => return None,
                Some(s) if s.expires_at > now => return Some(s.clone()),
                Some(_) => {}
            }
        }
        let mut map = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        // re-check: a concurrent login cannot reuse the token, but a sweep may have run
        if map.get(token).is_some_and(|s| s.expires_at <= now) {
            map.remove(token);
            debug!("expired session evicted on access");
        }
        None
    }

    pub fn authorize(&self, token: Option<&str>, access: Access) -> Result<Grant, AuthError> {
        self.authorize_at(token, access, SystemTime::now())
    }

    /// Mutations: admin, or a read-write session. Viewing: admin, public, or
    /// any valid session.
    pub fn authorize_at(
        &self,
        token: Option<&str>,
        access: Access,
        now: SystemTime,
    ) -> Result<Grant, AuthError> {
        let session = token.and_then(|t| self.validate_at(t, now));
        let grant = Grant {
            username: session.as_ref().map(|s| s.username.clone()),
            role: session.as_ref().map(|s| s.role),
        };
        if self.admin {
            return Ok(grant);
        }
        match (access, grant.role) {
            (Access::View, Some(_)) | (Access::Mutate, Some(Role::ReadWrite)) => Ok(grant),
            (Access::View, None) if self.public => Ok(grant),
            (Access::Mutate, Some(Role::ReadOnly)) => Err(AuthError::Forbidden),
            (_, None) => Err(AuthError::Unauthorized),
        }
    }

    pub fn status(&self, token: Option<&str>) -> AuthStatus {
        let session = token.and_then(|t| self.validate(t));
        let role = session.as_ref().map(|s| s.role);
        AuthStatus {
            authenticated: session.is_some(),
            auth_enabled: self.is_enabled(),
            username: session.map(|s| s.username),
            role,
            can_write: self.admin || role == Some(Role::ReadWrite),
            login_required: !self.admin && !self.public && self.is_enabled(),
            public_mode: self.public,
            admin_mode: self.admin,
        }
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(SystemTime::now())
    }

    /// Removes every session past its expiry. Returns how many were removed.
    pub fn sweep_at(&self, now: SystemTime) -> usize {
        let mut map = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();
        map.retain(|_, s| s.expires_at > now);
        before - map.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Background task that sweeps on `period` until `shutdown` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let auth = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let n = auth.sweep();
                        if n > 0 {
                            debug!("swept {n} expired sessions");
                        }
                    }
                }
            }
        })
    }

    #[cfg(test)]
    fn force_expiry(&self, token: &str, at: SystemTime) {
        if let Some(s) = self.sessions.write().unwrap().get_mut(token) {
            s.expires_at = at;
        }
    }
}
