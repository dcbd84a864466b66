//! Two-factor credentials.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedDevice {
    pub user_agent: String,
    pub last_used: DateTime<Utc>,
    pub trusted: bool,
}

/// Stored per user once two-factor is enabled. Backup codes are held only as
/// keyed one-way hashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoFactorCredential {
    pub user_id: String,
    /// Base32 TOTP shared secret.
    pub secret: String,
    pub backup_code_hashes: Vec<String>,
    pub enabled: bool,
    pub trusted_devices: Vec<TrustedDevice>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Material handed to the user during enrolment. Nothing here is persisted
/// until the first code is confirmed.
#[derive(Debug, Clone, Serialize)]
pub struct TwoFactorSetup {
    pub secret: String,
    /// `otpauth://` URI for authenticator apps / QR rendering.
    pub otpauth_url: String,
    /// Plaintext backup codes, shown once.
    pub backup_codes: Vec<String>,
}

/// Verification outcome. "Not enabled" is kept distinct from "rejected" so
/// callers never mistake a missing enrolment for a wrong code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorCheck {
    Accepted,
    Rejected,
    NotEnabled,
}

impl TwoFactorCheck {
    pub fn is_accepted(&self) -> bool {
        *self == TwoFactorCheck::Accepted
    }
}
