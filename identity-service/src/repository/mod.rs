//! Persistence seams. Each trait has a MongoDB implementation in
//! [`crate::db`] and a process-local one in [`memory`].
//!
//! Every mutation is a single conditional write: it either fully applies or
//! leaves the record untouched.

pub mod memory;

pub use memory::{
    InMemoryConsentRepository, InMemoryPrivacyRepository, InMemorySessionRepository,
    InMemoryTwoFactorRepository,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::models::{
    ConsentCategory, ConsentRecord, ConsentSnapshot, DataType, PrivacySettings, Session,
    TrustedDevice, TwoFactorCredential, VisibilityLevel,
};
use crate::services::ServiceError;

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert(&self, session: &Session) -> Result<(), ServiceError>;

    /// Raw lookup; the caller decides whether the record is still usable.
    async fn find(&self, session_id: &str) -> Result<Option<Session>, ServiceError>;

    /// Sessions of `user_id` that are neither revoked nor expired at `now`,
    /// most recent activity first.
    async fn list_active(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, ServiceError>;

    /// Set `last_activity = now` when the session is active and its last
    /// activity is older than `stale_before`. Returns whether it was written.
    async fn touch(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, ServiceError>;

    /// Set `revoked_at` and collapse `expires_at` to `now` in one write.
    /// Returns false when missing or already revoked.
    async fn revoke(&self, session_id: &str, now: DateTime<Utc>) -> Result<bool, ServiceError>;

    /// Revoke every active session of `user_id` except `except`.
    async fn revoke_all(
        &self,
        user_id: &str,
        except: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError>;

    /// Ids of sessions expired at `now`, oldest expiry first.
    async fn expired_ids(
        &self,
        now: DateTime<Utc>,
        skip: u64,
        limit: usize,
    ) -> Result<Vec<String>, ServiceError>;

    async fn delete_many(&self, session_ids: &[String]) -> Result<u64, ServiceError>;
}

#[async_trait]
pub trait TwoFactorRepository: Send + Sync {
    async fn find(&self, user_id: &str) -> Result<Option<TwoFactorCredential>, ServiceError>;

    /// Store `credential` unless the user already has one. Returns false on
    /// conflict.
    async fn insert_if_absent(
        &self,
        credential: &TwoFactorCredential,
    ) -> Result<bool, ServiceError>;

    /// Remove one backup-code hash if it is still present. Returns whether
    /// this call removed it.
    async fn consume_backup_code(
        &self,
        user_id: &str,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError>;

    /// Replace the whole backup-code set of an enabled credential.
    async fn replace_backup_codes(
        &self,
        user_id: &str,
        code_hashes: &[String],
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError>;

    /// Insert or refresh a trusted device, matched by user agent.
    async fn upsert_trusted_device(
        &self,
        user_id: &str,
        device: &TrustedDevice,
    ) -> Result<bool, ServiceError>;

    async fn delete(&self, user_id: &str) -> Result<bool, ServiceError>;
}

#[async_trait]
pub trait ConsentRepository: Send + Sync {
    /// Append history entries.
    async fn append(&self, records: &[ConsentRecord]) -> Result<(), ServiceError>;

    /// Merge `changes` into the current snapshot, creating it if needed.
    async fn apply(
        &self,
        user_id: &str,
        changes: &BTreeMap<ConsentCategory, bool>,
        now: DateTime<Utc>,
    ) -> Result<ConsentSnapshot, ServiceError>;

    async fn snapshot(&self, user_id: &str) -> Result<Option<ConsentSnapshot>, ServiceError>;

    /// Most recent first.
    async fn history(&self, user_id: &str, limit: usize)
        -> Result<Vec<ConsentRecord>, ServiceError>;
}

#[async_trait]
pub trait PrivacyRepository: Send + Sync {
    async fn find(&self, user_id: &str) -> Result<Option<PrivacySettings>, ServiceError>;

    async fn set_visibility(
        &self,
        user_id: &str,
        changes: &BTreeMap<DataType, VisibilityLevel>,
        now: DateTime<Utc>,
    ) -> Result<PrivacySettings, ServiceError>;

    async fn block(
        &self,
        user_id: &str,
        blocked_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError>;

    async fn unblock(
        &self,
        user_id: &str,
        blocked_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError>;
}
