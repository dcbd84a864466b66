use axum::{extract::State, http::StatusCode, Json};
use service_core::error::{AppError, AUTHENTICATION_FAILED};

use super::ClientDevice;
use crate::{
    dtos::auth::{
        BackupCodesResponse, TwoFactorEnableRequest, TwoFactorSetupRequest, TwoFactorVerifyRequest,
    },
    middleware::AuthUser,
    models::{AuthEventKind, TwoFactorCheck, TwoFactorSetup},
    utils::ValidatedJson,
    AppState,
};

pub async fn status(
    State(state): State<AppState>,
    user: AuthUser,
    ClientDevice(device): ClientDevice,
) -> Result<Json<serde_json::Value>, AppError> {
    let enabled = state.two_factor.is_enabled(&user.0.sub).await?;
    let trusted = enabled
        && state
            .two_factor
            .is_trusted_device(&user.0.sub, &device.user_agent)
            .await?;

    Ok(Json(serde_json::json!({
        "enabled": enabled,
        "trusted_device": trusted,
    })))
}

pub async fn setup(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<TwoFactorSetupRequest>,
) -> Result<Json<TwoFactorSetup>, AppError> {
    Ok(Json(state.two_factor.generate_secret(&user.0.sub, &req.email)?))
}

pub async fn enable(
    State(state): State<AppState>,
    user: AuthUser,
    ClientDevice(device): ClientDevice,
    ValidatedJson(req): ValidatedJson<TwoFactorEnableRequest>,
) -> Result<StatusCode, AppError> {
    state
        .two_factor
        .verify_and_enable(
            &user.0.sub,
            &req.secret,
            &req.code,
            req.backup_codes,
            Some(&device).filter(|d| !d.user_agent.is_empty()),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn check(
    state: &AppState,
    user_id: &str,
    req: &TwoFactorVerifyRequest,
) -> Result<(), AppError> {
    let outcome = if req.backup {
        state.two_factor.verify_backup_code(user_id, &req.code).await?
    } else {
        state.two_factor.verify_token(user_id, &req.code).await?
    };

    match outcome {
        TwoFactorCheck::Accepted => Ok(()),
        TwoFactorCheck::Rejected => {
            Err(AppError::Unauthorized(anyhow::anyhow!(AUTHENTICATION_FAILED)))
        }
        TwoFactorCheck::NotEnabled => Err(AppError::BadRequest(anyhow::anyhow!(
            "Two-factor authentication is not enabled"
        ))),
    }
}

/// Second-factor challenge. Accepted and rejected codes count towards the
/// login success rate.
pub async fn verify(
    State(state): State<AppState>,
    user: AuthUser,
    ClientDevice(device): ClientDevice,
    ValidatedJson(req): ValidatedJson<TwoFactorVerifyRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let checked = check(&state, &user.0.sub, &req).await;
    match &checked {
        Ok(()) => state
            .events
            .record(AuthEventKind::LoginSuccess, Some(&user.0.sub)),
        Err(AppError::Unauthorized(_)) => state
            .events
            .record(AuthEventKind::LoginFailure, Some(&user.0.sub)),
        Err(_) => {}
    }
    checked?;

    let trusted = req.trust_device
        && !device.user_agent.is_empty()
        && state
            .two_factor
            .trust_device(&user.0.sub, &device.user_agent)
            .await?;

    Ok(Json(serde_json::json!({
        "verified": true,
        "trusted_device": trusted,
    })))
}

pub async fn regenerate_backup_codes(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<BackupCodesResponse>, AppError> {
    let backup_codes = state.two_factor.regenerate_backup_codes(&user.0.sub).await?;
    Ok(Json(BackupCodesResponse { backup_codes }))
}

/// Opting out requires a current code.
pub async fn disable(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<TwoFactorVerifyRequest>,
) -> Result<StatusCode, AppError> {
    check(&state, &user.0.sub, &req).await?;
    state.two_factor.disable(&user.0.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}
