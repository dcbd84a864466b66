use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::{middleware::AuthUser, AppState};

pub async fn list_sessions(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let sessions = state.sessions.list_active(&user.0.sub).await?;
    Ok(Json(serde_json::json!({
        "sessions": sessions,
        "current": user.0.sid,
    })))
}

/// Revoke one of the caller's own sessions.
pub async fn revoke_session(
    State(state): State<AppState>,
    user: AuthUser,
    Path(session_id): Path<String>,
) -> Result<StatusCode, AppError> {
    // Someone else's session reads as missing
    let owned = state
        .sessions
        .get(&session_id)
        .await?
        .is_some_and(|s| s.user_id == user.0.sub);
    if !owned {
        return Err(AppError::NotFound(anyhow::anyhow!("Session not found")));
    }

    state.sessions.revoke(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
