use axum::{extract::State, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use service_core::error::{AppError, AUTHENTICATION_FAILED};

use crate::{dtos::auth::RefreshRequest, models::TokenPair, AppState};

pub const REFRESH_COOKIE: &str = "refresh_token";

/// HTTP-only cookie carrying the refresh token.
pub fn refresh_cookie(token: String, max_age_seconds: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(max_age_seconds))
        .build()
}

/// Set the refresh cookie for a freshly minted pair.
pub fn with_refresh_cookie(jar: CookieJar, state: &AppState, pair: &TokenPair) -> CookieJar {
    jar.add(refresh_cookie(
        pair.refresh_token.clone(),
        pair.refresh_expires_in,
        state.config.environment.is_production(),
    ))
}

/// Exchange the refresh token (cookie first, then body) for a new pair.
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> Result<(CookieJar, Json<TokenPair>), AppError> {
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .or_else(|| body.and_then(|Json(req)| req.refresh_token))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!(AUTHENTICATION_FAILED)))?;

    let pair = state.tokens.refresh(&token).await?;
    let jar = with_refresh_cookie(jar, &state, &pair);

    Ok((jar, Json(pair)))
}
