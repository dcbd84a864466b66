//! Per-device session records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Client description captured at sign-in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub user_agent: String,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub browser: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Caller-computed fingerprint; derived from the fields above when absent.
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl DeviceInfo {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            ..Default::default()
        }
    }

    /// SHA-256 over user agent, device type, browser and OS, hex-encoded.
    /// Each field is framed as a presence byte plus a length prefix.
    pub fn derive_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            Some(self.user_agent.as_str()),
            self.device_type.as_deref(),
            self.browser.as_deref(),
            self.os.as_deref(),
        ] {
            match part {
                Some(value) => {
                    hasher.update([1u8]);
                    hasher.update((value.len() as u64).to_be_bytes());
                    hasher.update(value.as_bytes());
                }
                None => hasher.update([0u8]),
            }
        }
        hex::encode(hasher.finalize())
    }

    pub fn fingerprint(&self) -> String {
        self.fingerprint
            .clone()
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| self.derive_fingerprint())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Session entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub device_fingerprint: String,
    pub device: DeviceInfo,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub location: Option<GeoLocation>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Not revoked and not expired at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired_at(now)
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }
}

/// Result of an activity heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchOutcome {
    Updated,
    /// Last activity is within the threshold; nothing written.
    Throttled,
    /// Missing, revoked or expired.
    Inactive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCleanupReport {
    pub deleted: u64,
    pub batches: usize,
    pub failed_batches: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_device_sensitive() {
        let mut device = DeviceInfo::new("Mozilla/5.0");
        device.browser = Some("Firefox".into());
        let a = device.derive_fingerprint();
        assert_eq!(a, device.derive_fingerprint());
        assert_eq!(a.len(), 64);

        device.os = Some("Linux".into());
        assert_ne!(a, device.derive_fingerprint());
    }

    #[test]
    fn supplied_fingerprint_wins() {
        let mut device = DeviceInfo::new("ua");
        device.fingerprint = Some("abc".into());
        assert_eq!(device.fingerprint(), "abc");
    }

    #[test]
    fn fields_do_not_bleed_into_each_other() {
        let mut left = DeviceInfo::new("ab");
        left.browser = Some("c".into());
        let mut right = DeviceInfo::new("a");
        right.browser = Some("bc".into());
        assert_ne!(left.derive_fingerprint(), right.derive_fingerprint());
    }

    #[test]
    fn separator_characters_in_fields_stay_distinct() {
        let left = DeviceInfo::new("a|");
        let mut right = DeviceInfo::new("a");
        right.device_type = Some("|".into());
        assert_ne!(left.derive_fingerprint(), right.derive_fingerprint());

        let mut empty = DeviceInfo::new("a");
        empty.device_type = Some(String::new());
        assert_ne!(DeviceInfo::new("a").derive_fingerprint(), empty.derive_fingerprint());
    }
}
