use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::post,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::auth::Gatekeeper;

/// Shared state for administrative session handlers
#[derive(Clone)]
pub struct AdminState {
    pub gatekeeper: Arc<Gatekeeper>,
    pub admin_secret: Option<String>,
    pub cookie_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub subject_id: String,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub subject_id: String,
    pub token: String,
    pub expires_at: String,
}

#[derive(Debug, Serialize)]
pub struct RevokeSessionResponse {
    pub session_id: String,
    pub connections_closed: usize,
}

#[derive(Debug, Serialize)]
pub struct RevokeSubjectResponse {
    pub subject_id: String,
    pub revoked_sessions: Vec<String>,
}

pub fn admin_routes(state: AdminState) -> Router {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{session_id}/revoke", post(revoke_session))
        .route("/subjects/{subject_id}/revoke", post(revoke_subject))
        .with_state(state)
}

/// Routes answer 404 when no secret is configured, 401 on a wrong secret.
fn check_admin(state: &AdminState, headers: &HeaderMap) -> Result<(), Response> {
    let secret = match &state.admin_secret {
        Some(s) => s,
        None => return Err(StatusCode::NOT_FOUND.into_response()),
    };

    let provided = headers
        .get("x-admin-secret")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if provided != secret {
        return Err(StatusCode::UNAUTHORIZED.into_response());
    }
    Ok(())
}

/// POST /admin/sessions - Open a session for a subject
async fn create_session(
    State(state): State<AdminState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(body): Json<CreateSessionRequest>,
) -> Response {
    if let Err(response) = check_admin(&state, &headers) {
        return response;
    }

    let subject_id = body.subject_id.trim();
    if subject_id.is_empty() {
        return (StatusCode::BAD_REQUEST, "subject_id is required").into_response();
    }

    let created = match state.gatekeeper.open_session(subject_id) {
        Ok(created) => created,
        Err(e) => {
            error!("Failed to open session: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let cookie = Cookie::build((state.cookie_name.clone(), created.token.clone()))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .build();

    (
        StatusCode::CREATED,
        jar.add(cookie),
        Json(CreateSessionResponse {
            session_id: created.session.id,
            subject_id: created.session.subject_id,
            token: created.token,
            expires_at: created.session.expires_at.to_rfc3339(),
        }),
    )
        .into_response()
}

/// POST /admin/sessions/{session_id}/revoke - Revoke one session
async fn revoke_session(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Response {
    if let Err(response) = check_admin(&state, &headers) {
        return response;
    }

    match state.gatekeeper.sessions().get_session(&session_id) {
        Ok(Some(_)) => {}
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("Failed to load session {}: {}", session_id, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    match state.gatekeeper.revoke(&session_id) {
        Ok(connections_closed) => Json(RevokeSessionResponse {
            session_id,
            connections_closed,
        })
        .into_response(),
        Err(e) => {
            error!("Failed to revoke session {}: {}", session_id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// POST /admin/subjects/{subject_id}/revoke - Revoke every session of a subject
async fn revoke_subject(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path(subject_id): Path<String>,
) -> Response {
    if let Err(response) = check_admin(&state, &headers) {
        return response;
    }

    match state.gatekeeper.revoke_subject(&subject_id) {
        Ok(revoked_sessions) => Json(RevokeSubjectResponse {
            subject_id,
            revoked_sessions,
        })
        .into_response(),
        Err(e) => {
            error!("Failed to revoke sessions of {}: {}", subject_id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
