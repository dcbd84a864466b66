use axum::{extract::State, Json};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use super::{token::with_refresh_cookie, ClientDevice};
use crate::{
    dtos::auth::{SsoGenerateRequest, SsoGenerateResponse, SsoVerifyRequest, SsoVerifyResponse},
    middleware::AuthUser,
    models::{AppId, ClaimSet},
    utils::ValidatedJson,
    AppState,
};

/// Mint an exchange token for the signed-in user to carry to another app.
pub async fn generate(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<SsoGenerateRequest>,
) -> Result<Json<SsoGenerateResponse>, AppError> {
    let claims = user.0;
    let source_app = req.source_app.as_deref().unwrap_or(AppId::Hub.as_str());

    let token = state
        .sso
        .generate(&claims.sub, source_app, &req.target_app, claims.permissions)
        .await?;

    let redirect_url = state.sso.build_redirect_url(
        token.target_app,
        &token.token,
        req.return_path.as_deref().unwrap_or("/"),
    );

    Ok(Json(SsoGenerateResponse {
        token,
        redirect_url,
    }))
}

/// Redeem an exchange token at the target app: opens a session there and
/// returns a token pair bound to it.
pub async fn verify(
    State(state): State<AppState>,
    ClientDevice(device): ClientDevice,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<SsoVerifyRequest>,
) -> Result<(CookieJar, Json<SsoVerifyResponse>), AppError> {
    let verification = state.sso.verify(&req.token, &req.app).await?;

    let session = state
        .sessions
        .create(&verification.user_id, device, None)
        .await?;

    let claims = ClaimSet::default()
        .with_permissions(verification.permissions.clone())
        .with_apps(verification.active_apps.clone())
        .with_session(session.session_id);
    let tokens = state
        .tokens
        .generate_token_pair(&verification.user_id, claims)?;

    let jar = with_refresh_cookie(jar, &state, &tokens);

    Ok((
        jar,
        Json(SsoVerifyResponse {
            verification,
            tokens,
        }),
    ))
}
