use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use std::collections::BTreeMap;

use super::ClientDevice;
use crate::{
    dtos::privacy::{ConsentUpdateRequest, HistoryQuery, VisibilityUpdateRequest},
    middleware::AuthUser,
    models::{ConsentCategory, ConsentMetadata, ConsentRecord, PrivacySettings},
    AppState,
};

pub async fn get_consent(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<BTreeMap<ConsentCategory, bool>>, AppError> {
    Ok(Json(state.consent.get_consent(&user.0.sub).await?))
}

pub async fn update_consent(
    State(state): State<AppState>,
    user: AuthUser,
    ClientDevice(device): ClientDevice,
    Json(req): Json<ConsentUpdateRequest>,
) -> Result<Json<BTreeMap<ConsentCategory, bool>>, AppError> {
    let metadata = ConsentMetadata {
        ip_address: device.ip_address,
        user_agent: Some(device.user_agent).filter(|ua| !ua.is_empty()),
    };

    let snapshot = state
        .consent
        .record_consents(&user.0.sub, req.categories, Some(metadata))
        .await?;
    Ok(Json(snapshot.resolved()))
}

pub async fn consent_history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ConsentRecord>>, AppError> {
    Ok(Json(state.consent.history(&user.0.sub, query.limit).await?))
}

pub async fn get_privacy(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<PrivacySettings>, AppError> {
    Ok(Json(state.privacy.settings(&user.0.sub).await?))
}

pub async fn update_privacy(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<VisibilityUpdateRequest>,
) -> Result<Json<PrivacySettings>, AppError> {
    Ok(Json(
        state
            .privacy
            .update_visibility(&user.0.sub, req.visibility)
            .await?,
    ))
}

pub async fn block_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(blocked_user_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.privacy.block_user(&user.0.sub, &blocked_user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unblock_user(
    State(state): State<AppState>,
    user: AuthUser,
    Path(blocked_user_id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state
        .privacy
        .unblock_user(&user.0.sub, &blocked_user_id)
        .await?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(anyhow::anyhow!("User is not blocked")))
    }
}
