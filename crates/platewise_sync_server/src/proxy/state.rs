//! Per-connection state machine.
//!
//! ```text
//! Connecting → Authorizing ─┬→ Proxying → Closing → Closed
//!                           └→ Closed (unauthorized)
//! ```

use std::fmt;
use tracing::{debug, warn};

/// Lifecycle of one proxied connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport handshake accepted, no session checked yet.
    Connecting,
    /// Waiting on the gatekeeper.
    Authorizing,
    /// Upstream open, frames flowing.
    Proxying,
    /// Pumps stopping, sockets being closed.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Authorizing)
                | (Authorizing, Proxying)
                | (Authorizing, Closed)
                | (Proxying, Closing)
                | (Closing, Closed)
        )
    }
}

/// Why a connection ended. Sent to the client as the WebSocket close reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Unauthorized,
    ClientClosed,
    ClientError,
    UpstreamClosed,
    UpstreamUnavailable,
    UpstreamError,
    FrameTooLarge,
    SessionRevoked,
    SessionExpired,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Unauthorized => "unauthorized",
            CloseReason::ClientClosed => "client_closed",
            CloseReason::ClientError => "client_error",
            CloseReason::UpstreamClosed => "upstream_closed",
            CloseReason::UpstreamUnavailable => "upstream_unavailable",
            CloseReason::UpstreamError => "upstream_error",
            CloseReason::FrameTooLarge => "frame_too_large",
            CloseReason::SessionRevoked => "session_revoked",
            CloseReason::SessionExpired => "session_expired",
            CloseReason::Shutdown => "shutdown",
        }
    }

    /// WebSocket close code reported to the client.
    pub fn close_code(self) -> u16 {
        match self {
            CloseReason::ClientClosed | CloseReason::UpstreamClosed => 1000,
            CloseReason::Shutdown => 1001,
            CloseReason::FrameTooLarge => 1009,
            CloseReason::ClientError
            | CloseReason::UpstreamUnavailable
            | CloseReason::UpstreamError => 1011,
            CloseReason::Unauthorized => 4000,
            CloseReason::SessionRevoked => 4001,
            CloseReason::SessionExpired => 4002,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Book-keeping for one client connection.
#[derive(Debug)]
pub struct ProxyConnection {
    pub id: u64,
    pub session_id: Option<String>,
    state: ConnectionState,
    close_reason: Option<CloseReason>,
}

impl ProxyConnection {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            session_id: None,
            state: ConnectionState::Connecting,
            close_reason: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    /// Move to `next`. Invalid transitions are logged and ignored.
    pub fn advance(&mut self, next: ConnectionState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                "Connection {}: ignoring transition {:?} -> {:?}",
                self.id, self.state, next
            );
            return false;
        }
        debug!("Connection {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
        true
    }

    /// Enter `Closed`, recording why.
    pub fn finish(&mut self, reason: CloseReason) -> bool {
        if self.advance(ConnectionState::Closed) {
            self.close_reason = Some(reason);
            true
        } else {
            false
        }
    }
}
