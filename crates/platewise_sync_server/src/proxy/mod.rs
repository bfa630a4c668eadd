//! Session-bound WebSocket tunnel to the internal replication server.

mod registry;
mod relay;
mod state;
mod transport;
mod upstream;

pub use registry::{ConnectionControl, ConnectionRegistry, Registration};
pub use relay::{Direction, RelayGauge, RelayLimits, pump};
pub use state::{CloseReason, ConnectionState, ProxyConnection};
pub use transport::{BoxSink, BoxSource, Frame, FrameSink, FrameSource, TransportError, split_client};
pub use upstream::{TungsteniteConnector, UpstreamConnector};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::ProxyConfig;
use crate::db::{Session, SessionRepo};

/// Tunnel settings shared by all connections.
#[derive(Debug, Clone, Copy)]
pub struct ProxySettings {
    pub limits: RelayLimits,
    pub session_recheck_interval: Duration,
}

impl From<&ProxyConfig> for ProxySettings {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            limits: RelayLimits {
                max_buffered_bytes: config.buffer_bytes,
                max_buffered_frames: config.buffer_frames,
                drain_timeout: config.drain_timeout,
            },
            session_recheck_interval: config.session_recheck_interval,
        }
    }
}

/// Runs authorized connections: opens the upstream, relays both directions
/// and tears everything down when either side, revocation or shutdown ends it.
#[derive(Clone)]
pub struct SyncProxy {
    connector: Arc<dyn UpstreamConnector>,
    registry: Arc<ConnectionRegistry>,
    sessions: SessionRepo,
    settings: ProxySettings,
}

impl SyncProxy {
    pub fn new(
        connector: Arc<dyn UpstreamConnector>,
        registry: Arc<ConnectionRegistry>,
        sessions: SessionRepo,
        settings: ProxySettings,
    ) -> Self {
        Self {
            connector,
            registry,
            sessions,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Serve an authorized connection until it closes.
    ///
    /// `conn` must be in `Authorizing`; the upstream is only dialed from here.
    pub async fn serve(
        &self,
        mut conn: ProxyConnection,
        session: Session,
        client_sink: BoxSink,
        client_source: BoxSource,
    ) -> CloseReason {
        conn.session_id = Some(session.id.clone());
        conn.advance(ConnectionState::Proxying);
        let registration = self.registry.register(&session.id, conn.id);
        let control = registration.control().clone();

        let connected = tokio::select! {
            biased;
            _ = control.closed() => None,
            result = self.connector.connect() => Some(result),
        };
        let (upstream_sink, upstream_source) = match connected {
            Some(Ok(halves)) => halves,
            Some(Err(e)) => {
                error!("Connection {}: upstream unavailable: {}", conn.id, e);
                control.close(CloseReason::UpstreamUnavailable);
                return self.finish(conn, &control, vec![client_sink]).await;
            }
            None => return self.finish(conn, &control, vec![client_sink]).await,
        };
        info!(
            "Connection {}: proxying for subject {}",
            conn.id, session.subject_id
        );

        let upward = tokio::spawn(pump(
            Direction::ClientToUpstream,
            client_source,
            upstream_sink,
            self.settings.limits,
            Arc::new(RelayGauge::default()),
            control.clone(),
        ));
        let downward = tokio::spawn(pump(
            Direction::UpstreamToClient,
            upstream_source,
            client_sink,
            self.settings.limits,
            Arc::new(RelayGauge::default()),
            control.clone(),
        ));

        // The first tick fires at once, which catches a revocation that
        // landed between authorization and registration.
        let mut recheck = tokio::time::interval(self.settings.session_recheck_interval);
        recheck.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = control.closed() => break,
                _ = recheck.tick() => self.recheck_session(&session.id, &control),
            }
        }

        conn.advance(ConnectionState::Closing);
        let (upward, downward) = tokio::join!(upward, downward);
        let mut sinks = Vec::with_capacity(2);
        // Client sink first so it learns the reason before the upstream goes away.
        for joined in [downward, upward] {
            match joined {
                Ok(sink) => sinks.push(sink),
                Err(e) => error!("Connection {}: relay task failed: {}", conn.id, e),
            }
        }
        // Stay registered until the close frames are out, so shutdown can
        // wait for them.
        let reason = self.finish(conn, &control, sinks).await;
        drop(registration);
        reason
    }

    /// Close every sink with the recorded reason and mark the connection closed.
    async fn finish(
        &self,
        mut conn: ProxyConnection,
        control: &ConnectionControl,
        sinks: Vec<BoxSink>,
    ) -> CloseReason {
        if conn.state() == ConnectionState::Proxying {
            conn.advance(ConnectionState::Closing);
        }
        let reason = control.reason().unwrap_or(CloseReason::Shutdown);
        for mut sink in sinks {
            let closing = sink.close(reason);
            if tokio::time::timeout(self.settings.limits.drain_timeout, closing)
                .await
                .is_err()
            {
                warn!("Connection {}: peer did not take the close frame", conn.id);
            }
        }
        conn.finish(reason);
        info!("Connection {} closed: {}", conn.id, reason);
        reason
    }

    /// Close the connection if its session is no longer valid.
    ///
    /// A store error leaves the connection open; the next tick retries.
    fn recheck_session(&self, session_id: &str, control: &ConnectionControl) {
        match self.sessions.get_session(session_id) {
            Ok(Some(session)) if session.revoked_at.is_some() => {
                control.close(CloseReason::SessionRevoked)
            }
            Ok(Some(session)) if !session.is_valid_at(Utc::now()) => {
                control.close(CloseReason::SessionExpired)
            }
            Ok(Some(_)) => {}
            Ok(None) => control.close(CloseReason::SessionRevoked),
            Err(e) => warn!("Session recheck for {} failed: {}", session_id, e),
        }
    }
}
