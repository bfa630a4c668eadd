use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RateLimitConfig;
use crate::db::{NewSession, Session, SessionRepo};
use crate::proxy::{CloseReason, ConnectionRegistry};
use crate::rate_limit::RateLimiter;

/// Internal cause of a denial. Never sent to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    MissingCredential,
    UnknownSession,
    Expired,
    Revoked,
    RateLimited { retry_after: u64 },
    StoreFailure,
}

/// Authorization was refused.
#[derive(Debug, Error)]
#[error("unauthorized")]
pub struct Unauthorized {
    pub reason: DenyReason,
}

impl From<DenyReason> for Unauthorized {
    fn from(reason: DenyReason) -> Self {
        Self { reason }
    }
}

#[derive(Debug, Error)]
pub enum GatekeeperError {
    #[error("session store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("session lifetime out of range")]
    InvalidTtl,
}

/// Decides whether a connection attempt carries a live session, and
/// propagates revocation to connections already open.
pub struct Gatekeeper {
    sessions: SessionRepo,
    limiter: RateLimiter,
    registry: Arc<ConnectionRegistry>,
    session_ttl: Duration,
}

impl Gatekeeper {
    pub fn new(
        sessions: SessionRepo,
        registry: Arc<ConnectionRegistry>,
        rate_limit: &RateLimitConfig,
        session_ttl: Duration,
    ) -> Self {
        Self {
            sessions,
            limiter: RateLimiter::new(rate_limit.window, rate_limit.max_attempts),
            registry,
            session_ttl,
        }
    }

    pub fn sessions(&self) -> &SessionRepo {
        &self.sessions
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Validate the credential presented from `origin`.
    ///
    /// The attempt counts against `origin` before anything else is looked at.
    /// Any failure to reach a decision denies.
    pub fn authorize(
        &self,
        credential: Option<&str>,
        origin: &str,
    ) -> Result<Session, Unauthorized> {
        if let Err(retry_after) = self.limiter.check(origin) {
            warn!("Authorization rate limited for {}", origin);
            return Err(DenyReason::RateLimited { retry_after }.into());
        }

        let credential = credential
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or(DenyReason::MissingCredential)?;

        let session = match self.sessions.find_by_token(credential) {
            Ok(Some(session)) => session,
            Ok(None) => return Err(DenyReason::UnknownSession.into()),
            Err(e) => {
                warn!("Session lookup failed: {}", e);
                return Err(DenyReason::StoreFailure.into());
            }
        };

        if session.revoked_at.is_some() {
            return Err(DenyReason::Revoked.into());
        }
        if !session.is_valid_at(Utc::now()) {
            return Err(DenyReason::Expired.into());
        }

        debug!("Authorized session {} for {}", session.id, origin);
        Ok(session)
    }

    /// Issue a session for `subject_id`.
    pub fn open_session(&self, subject_id: &str) -> Result<NewSession, GatekeeperError> {
        let ttl = chrono::Duration::from_std(self.session_ttl)
            .map_err(|_| GatekeeperError::InvalidTtl)?;
        let created = self.sessions.create_session(subject_id, ttl)?;
        info!(
            "Opened session {} for subject {}",
            created.session.id, subject_id
        );
        Ok(created)
    }

    /// Revoke a session and close every connection bound to it.
    ///
    /// Returns the number of connections closed. Connections are closed even
    /// when the session was already revoked.
    pub fn revoke(&self, session_id: &str) -> Result<usize, GatekeeperError> {
        let newly_revoked = self.sessions.revoke_session(session_id)?;
        let closed = self
            .registry
            .close_session(session_id, CloseReason::SessionRevoked);
        info!(
            "Revoked session {} (new: {}, connections closed: {})",
            session_id, newly_revoked, closed
        );
        Ok(closed)
    }

    /// Revoke the session `credential` refers to, whatever its state.
    ///
    /// Not rate limited: a logout must never be skipped. Returns the id of
    /// the session found, if any.
    pub fn logout(&self, credential: Option<&str>) -> Result<Option<String>, GatekeeperError> {
        let Some(credential) = credential.map(str::trim).filter(|c| !c.is_empty()) else {
            return Ok(None);
        };
        let Some(session) = self.sessions.find_by_token(credential)? else {
            return Ok(None);
        };
        let closed = self.revoke(&session.id)?;
        info!(
            "Logged out session {} ({} connections closed)",
            session.id, closed
        );
        Ok(Some(session.id))
    }

    /// Revoke every live session of a subject. Returns the revoked ids.
    pub fn revoke_subject(&self, subject_id: &str) -> Result<Vec<String>, GatekeeperError> {
        let revoked = self.sessions.revoke_subject_sessions(subject_id)?;
        let closed: usize = revoked
            .iter()
            .map(|id| self.registry.close_session(id, CloseReason::SessionRevoked))
            .sum();
        info!(
            "Revoked {} sessions of subject {} ({} connections closed)",
            revoked.len(),
            subject_id,
            closed
        );
        Ok(revoked)
    }

    /// Drop expired sessions and finished rate-limit windows.
    pub fn sweep(&self) -> Result<usize, GatekeeperError> {
        self.limiter.cleanup();
        Ok(self
            .sessions
            .cleanup_expired_sessions(chrono::Duration::days(1))?)
    }
}
