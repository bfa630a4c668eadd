use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::auth::{ClientOrigin, Gatekeeper};

/// Shared state for session self-service handlers
#[derive(Clone)]
pub struct AuthState {
    pub gatekeeper: Arc<Gatekeeper>,
    pub cookie_name: String,
}

/// Current session response
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub subject_id: String,
    pub expires_at: String,
}

pub fn auth_routes(state: AuthState) -> Router {
    Router::new()
        .route("/session", get(get_session))
        .route("/logout", post(logout))
        .with_state(state)
}

/// GET /auth/session - Describe the session the cookie refers to
async fn get_session(
    State(state): State<AuthState>,
    origin: ClientOrigin,
    jar: CookieJar,
) -> impl IntoResponse {
    let credential = jar.get(&state.cookie_name).map(|c| c.value().to_string());
    match state
        .gatekeeper
        .authorize(credential.as_deref(), origin.as_str())
    {
        Ok(session) => Json(SessionResponse {
            session_id: session.id,
            subject_id: session.subject_id,
            expires_at: session.expires_at.to_rfc3339(),
        })
        .into_response(),
        Err(_) => StatusCode::UNAUTHORIZED.into_response(),
    }
}

/// POST /auth/logout - Revoke the cookie's session and clear the cookie
async fn logout(State(state): State<AuthState>, jar: CookieJar) -> impl IntoResponse {
    let credential = jar.get(&state.cookie_name).map(|c| c.value().to_string());
    if let Err(e) = state.gatekeeper.logout(credential.as_deref()) {
        error!("Failed to revoke session on logout: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let jar = jar.remove(Cookie::build((state.cookie_name.clone(), "")).path("/"));
    (jar, StatusCode::NO_CONTENT).into_response()
}
