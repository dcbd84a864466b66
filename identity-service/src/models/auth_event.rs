//! Structured auth events for observability. Never read back for
//! authorization decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEventKind {
    LoginSuccess,
    LoginFailure,
    Logout,
    TokenIssued,
    TokenRefreshed,
    TokenRevoked,
    TokenValidationFailed,
    SsoTokenGenerated,
    SsoTokenVerified,
    SsoVerificationFailed,
    CrossAppNavigation,
    SessionCreated,
    SessionRevoked,
    SessionsCleaned,
    TwoFactorEnabled,
    TwoFactorDisabled,
    TwoFactorVerified,
    TwoFactorFailed,
    BackupCodeUsed,
    BackupCodesRegenerated,
    RateLimited,
    ConsentUpdated,
}

impl AuthEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthEventKind::LoginSuccess => "login_success",
            AuthEventKind::LoginFailure => "login_failure",
            AuthEventKind::Logout => "logout",
            AuthEventKind::TokenIssued => "token_issued",
            AuthEventKind::TokenRefreshed => "token_refreshed",
            AuthEventKind::TokenRevoked => "token_revoked",
            AuthEventKind::TokenValidationFailed => "token_validation_failed",
            AuthEventKind::SsoTokenGenerated => "sso_token_generated",
            AuthEventKind::SsoTokenVerified => "sso_token_verified",
            AuthEventKind::SsoVerificationFailed => "sso_verification_failed",
            AuthEventKind::CrossAppNavigation => "cross_app_navigation",
            AuthEventKind::SessionCreated => "session_created",
            AuthEventKind::SessionRevoked => "session_revoked",
            AuthEventKind::SessionsCleaned => "sessions_cleaned",
            AuthEventKind::TwoFactorEnabled => "two_factor_enabled",
            AuthEventKind::TwoFactorDisabled => "two_factor_disabled",
            AuthEventKind::TwoFactorVerified => "two_factor_verified",
            AuthEventKind::TwoFactorFailed => "two_factor_failed",
            AuthEventKind::BackupCodeUsed => "backup_code_used",
            AuthEventKind::BackupCodesRegenerated => "backup_codes_regenerated",
            AuthEventKind::RateLimited => "rate_limited",
            AuthEventKind::ConsentUpdated => "consent_updated",
        }
    }

    /// Severity used when the caller does not pick one.
    pub fn default_severity(&self) -> Severity {
        match self {
            AuthEventKind::LoginFailure
            | AuthEventKind::TokenValidationFailed
            | AuthEventKind::SsoVerificationFailed
            | AuthEventKind::TwoFactorFailed
            | AuthEventKind::RateLimited => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

/// Audit event entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub kind: AuthEventKind,
    pub user_id: Option<String>,
    pub app: Option<AppId>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl AuthEvent {
    pub fn new(kind: AuthEventKind) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            severity: kind.default_severity(),
            kind,
            user_id: None,
            app: None,
            duration_ms: None,
            error: None,
            details: None,
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn app(mut self, app: AppId) -> Self {
        self.app = Some(app);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}
