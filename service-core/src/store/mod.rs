//! Key-value store abstraction for transient, TTL-bound state: rate-limit
//! windows, revocation markers and SSO exchange records.
//!
//! Two backends are provided: [`MemoryStore`] for single-instance and
//! development use, and [`RedisStore`] when counts and markers must be
//! shared across replicas. The backend is chosen once at startup.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Result of bumping a windowed counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Number of hits recorded in the current window, including this one.
    pub count: u64,
    /// When the current window closes and the counter starts over.
    pub reset_at: DateTime<Utc>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;

    /// Write `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), anyhow::Error>;

    /// Write `value` under `key` only if no live entry exists. Returns
    /// whether this call created the entry.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, anyhow::Error>;

    /// Remove `key`. Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, anyhow::Error>;

    /// Increment the counter under `key`. An unseen or expired key starts a
    /// new window of length `window` with a count of 1.
    async fn increment_window(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<WindowCount, anyhow::Error>;

    /// Drop entries whose TTL has elapsed. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

pub(crate) fn to_chrono(window: Duration) -> chrono::Duration {
    chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(36_500))
}
