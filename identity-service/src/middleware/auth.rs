use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::IntoResponse,
    Json,
};
use service_core::error::AUTHENTICATION_FAILED;

use crate::{dtos::ErrorResponse, models::TokenClaims, models::TokenKind, AppState};

fn rejection(status: StatusCode, error: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

/// Middleware to require a valid access token
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| {
            rejection(
                StatusCode::UNAUTHORIZED,
                "Missing or invalid Authorization header",
            )
        })?;

    let claims = state
        .tokens
        .verify(token, TokenKind::Access)
        .await
        .map_err(|e| {
            if e.is_infrastructure() {
                // Revocation state unknown
                tracing::error!(error = %e, "Access token check failed");
                rejection(StatusCode::SERVICE_UNAVAILABLE, "Service unavailable")
            } else {
                tracing::debug!(error = %e, "Access token rejected");
                rejection(StatusCode::UNAUTHORIZED, AUTHENTICATION_FAILED)
            }
        })?;

    // Session-bound tokens die with their session
    if let Some(session_id) = claims.sid.as_deref() {
        let live = state
            .sessions
            .validate(session_id, Some(&claims.sub))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Session check failed");
                rejection(StatusCode::SERVICE_UNAVAILABLE, "Service unavailable")
            })?;
        if !live {
            return Err(rejection(StatusCode::UNAUTHORIZED, AUTHENTICATION_FAILED));
        }
    }

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Extractor for the claims stored by [`auth_middleware`]
pub struct AuthUser(pub TokenClaims);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = parts.extensions.get::<TokenClaims>().ok_or_else(|| {
            rejection(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Auth claims missing from request extensions",
            )
        })?;

        Ok(AuthUser(claims.clone()))
    }
}
