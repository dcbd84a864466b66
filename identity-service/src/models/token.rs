//! Bearer token claims.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::AppId;

/// Token purpose. Carried inside the signed claims so one verifier can reject
/// a token presented where a different kind is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
    Sso,
    Csrf,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
            TokenKind::Sso => "sso",
            TokenKind::Csrf => "csrf",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims specific to an SSO exchange token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsoClaims {
    pub source_app: AppId,
    pub target_app: AppId,
    /// Correlation id of the exchange record.
    pub session_id: String,
}

/// Optional claim bag supplied at issue time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimSet {
    pub email: Option<String>,
    pub permissions: Vec<String>,
    pub apps: Vec<AppId>,
    pub sso: Option<SsoClaims>,
    /// Session the token is bound to (CSRF tokens, session-scoped access).
    pub session_id: Option<String>,
}

impl ClaimSet {
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_apps(mut self, apps: Vec<AppId>) -> Self {
        self.apps = apps;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Decoded, verified claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user ID)
    pub sub: String,
    pub kind: TokenKind,
    pub iss: String,
    pub aud: Vec<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// JWT ID
    pub jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub apps: Vec<AppId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso: Option<SsoClaims>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
}

/// Access and refresh tokens minted together.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    /// Refresh token lifetime in seconds.
    #[serde(skip)]
    pub refresh_expires_in: i64,
}
