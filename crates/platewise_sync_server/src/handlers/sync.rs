//! `GET /sync`: the authorized WebSocket tunnel.

use axum::{
    Router,
    extract::{
        State,
        ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::{ClientOrigin, Gatekeeper};
use crate::proxy::{CloseReason, ConnectionState, ProxyConnection, SyncProxy, split_client};

/// Shared state for the sync endpoint
#[derive(Clone)]
pub struct SyncState {
    pub gatekeeper: Arc<Gatekeeper>,
    pub proxy: SyncProxy,
    pub cookie_name: String,
}

pub fn sync_routes(state: SyncState) -> Router {
    Router::new()
        .route("/sync", get(sync_handler))
        .with_state(state)
}

/// Authorize first; only then accept the upgrade and dial upstream.
async fn sync_handler(
    State(state): State<SyncState>,
    origin: ClientOrigin,
    jar: CookieJar,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let mut conn = ProxyConnection::new(state.proxy.registry().next_connection_id());
    conn.advance(ConnectionState::Authorizing);

    let credential = jar.get(&state.cookie_name).map(|c| c.value().to_string());
    let session = match state
        .gatekeeper
        .authorize(credential.as_deref(), origin.as_str())
    {
        Ok(session) => session,
        Err(denied) => {
            warn!(
                "WebSocket connection rejected: {:?} (origin {})",
                denied.reason,
                origin.as_str()
            );
            conn.finish(CloseReason::Unauthorized);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!("Connection {}: not a WebSocket upgrade", conn.id);
            conn.finish(CloseReason::ClientError);
            return rejection.into_response();
        }
    };

    ws.on_upgrade(move |socket| async move {
        let (sink, source) = split_client(socket);
        state.proxy.serve(conn, session, sink, source).await;
    })
}
