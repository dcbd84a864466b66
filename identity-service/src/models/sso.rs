//! SSO exchange records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AppId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeState {
    /// Issued, not yet presented at a target.
    Created,
    /// Redeemed at its target. Kept until expiry so `active_apps` stays
    /// readable.
    Active,
}

/// Ephemeral record correlating one sign-on hand-off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsoExchange {
    pub session_id: String,
    pub user_id: String,
    pub source_app: AppId,
    pub target_app: AppId,
    pub state: ExchangeState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Apps that completed the exchange, in arrival order.
    pub active_apps: Vec<AppId>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl SsoExchange {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Record `app` as having joined; returns whether it was new.
    pub fn activate(&mut self, app: AppId) -> bool {
        self.state = ExchangeState::Active;
        if self.active_apps.contains(&app) {
            return false;
        }
        self.active_apps.push(app);
        true
    }
}

/// Freshly generated exchange token.
#[derive(Debug, Clone, Serialize)]
pub struct SsoToken {
    pub token: String,
    pub session_id: String,
    pub source_app: AppId,
    pub target_app: AppId,
    pub expires_at: DateTime<Utc>,
    /// Seconds until expiry.
    pub expires_in: i64,
}

/// Identity transferred to the target application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SsoVerification {
    pub user_id: String,
    pub session_id: String,
    pub source_app: AppId,
    pub target_app: AppId,
    pub permissions: Vec<String>,
    pub active_apps: Vec<AppId>,
}
