//! Process-local repositories for single-instance deployments and tests.
//!
//! Each map entry is mutated under its `DashMap` shard lock, which gives the
//! same per-record atomicity as the conditional writes in MongoDB.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{ConsentRepository, PrivacyRepository, SessionRepository, TwoFactorRepository};
use crate::models::{
    ConsentCategory, ConsentRecord, ConsentSnapshot, DataType, PrivacySettings, Session,
    TrustedDevice, TwoFactorCredential, VisibilityLevel,
};
use crate::services::ServiceError;

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: DashMap<String, Session>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn insert(&self, session: &Session) -> Result<(), ServiceError> {
        self.sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn find(&self, session_id: &str) -> Result<Option<Session>, ServiceError> {
        Ok(self.sessions.get(session_id).map(|s| s.value().clone()))
    }

    async fn list_active(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, ServiceError> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id && s.is_active_at(now))
            .map(|s| s.value().clone())
            .collect();
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(sessions)
    }

    async fn touch(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let Some(mut session) = self.sessions.get_mut(session_id) else {
            return Ok(false);
        };
        if !session.is_active_at(now) || session.last_activity >= stale_before {
            return Ok(false);
        }
        session.last_activity = now;
        Ok(true)
    }

    async fn revoke(&self, session_id: &str, now: DateTime<Utc>) -> Result<bool, ServiceError> {
        let Some(mut session) = self.sessions.get_mut(session_id) else {
            return Ok(false);
        };
        if session.is_revoked() {
            return Ok(false);
        }
        session.revoked_at = Some(now);
        session.expires_at = now;
        if session.last_activity > now {
            session.last_activity = now;
        }
        Ok(true)
    }

    async fn revoke_all(
        &self,
        user_id: &str,
        except: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let mut revoked = 0;
        for mut session in self.sessions.iter_mut() {
            if session.user_id != user_id
                || Some(session.session_id.as_str()) == except
                || !session.is_active_at(now)
            {
                continue;
            }
            session.revoked_at = Some(now);
            session.expires_at = now;
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn expired_ids(
        &self,
        now: DateTime<Utc>,
        skip: u64,
        limit: usize,
    ) -> Result<Vec<String>, ServiceError> {
        let mut expired: Vec<(DateTime<Utc>, String)> = self
            .sessions
            .iter()
            .filter(|s| s.is_expired_at(now))
            .map(|s| (s.expires_at, s.session_id.clone()))
            .collect();
        expired.sort();
        Ok(expired
            .into_iter()
            .skip(skip as usize)
            .take(limit)
            .map(|(_, id)| id)
            .collect())
    }

    async fn delete_many(&self, session_ids: &[String]) -> Result<u64, ServiceError> {
        Ok(session_ids
            .iter()
            .filter(|id| self.sessions.remove(id.as_str()).is_some())
            .count() as u64)
    }
}

#[derive(Default)]
pub struct InMemoryTwoFactorRepository {
    credentials: DashMap<String, TwoFactorCredential>,
}

impl InMemoryTwoFactorRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TwoFactorRepository for InMemoryTwoFactorRepository {
    async fn find(&self, user_id: &str) -> Result<Option<TwoFactorCredential>, ServiceError> {
        Ok(self.credentials.get(user_id).map(|c| c.value().clone()))
    }

    async fn insert_if_absent(
        &self,
        credential: &TwoFactorCredential,
    ) -> Result<bool, ServiceError> {
        match self.credentials.entry(credential.user_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(credential.clone());
                Ok(true)
            }
        }
    }

    async fn consume_backup_code(
        &self,
        user_id: &str,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let Some(mut credential) = self.credentials.get_mut(user_id) else {
            return Ok(false);
        };
        let before = credential.backup_code_hashes.len();
        credential.backup_code_hashes.retain(|h| h != code_hash);
        let removed = credential.backup_code_hashes.len() < before;
        if removed {
            credential.updated_at = now;
        }
        Ok(removed)
    }

    async fn replace_backup_codes(
        &self,
        user_id: &str,
        code_hashes: &[String],
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let Some(mut credential) = self.credentials.get_mut(user_id) else {
            return Ok(false);
        };
        if !credential.enabled {
            return Ok(false);
        }
        credential.backup_code_hashes = code_hashes.to_vec();
        credential.updated_at = now;
        Ok(true)
    }

    async fn upsert_trusted_device(
        &self,
        user_id: &str,
        device: &TrustedDevice,
    ) -> Result<bool, ServiceError> {
        let Some(mut credential) = self.credentials.get_mut(user_id) else {
            return Ok(false);
        };
        let devices = &mut credential.trusted_devices;
        match devices
            .iter()
            .position(|d| d.user_agent == device.user_agent)
        {
            Some(i) => {
                devices[i].last_used = device.last_used;
                devices[i].trusted = device.trusted;
            }
            None => devices.push(device.clone()),
        }
        Ok(true)
    }

    async fn delete(&self, user_id: &str) -> Result<bool, ServiceError> {
        Ok(self.credentials.remove(user_id).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryConsentRepository {
    history: Mutex<Vec<ConsentRecord>>,
    snapshots: DashMap<String, ConsentSnapshot>,
}

impl InMemoryConsentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConsentRepository for InMemoryConsentRepository {
    async fn append(&self, records: &[ConsentRecord]) -> Result<(), ServiceError> {
        self.history
            .lock()
            .map_err(|_| anyhow::anyhow!("Consent history lock poisoned"))?
            .extend_from_slice(records);
        Ok(())
    }

    async fn apply(
        &self,
        user_id: &str,
        changes: &BTreeMap<ConsentCategory, bool>,
        now: DateTime<Utc>,
    ) -> Result<ConsentSnapshot, ServiceError> {
        let mut snapshot = self
            .snapshots
            .entry(user_id.to_string())
            .or_insert_with(|| ConsentSnapshot::empty(user_id));
        snapshot.categories.extend(changes.iter().map(|(c, g)| (*c, *g)));
        snapshot.updated_at = Some(now);
        Ok(snapshot.value().clone())
    }

    async fn snapshot(&self, user_id: &str) -> Result<Option<ConsentSnapshot>, ServiceError> {
        Ok(self.snapshots.get(user_id).map(|s| s.value().clone()))
    }

    async fn history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConsentRecord>, ServiceError> {
        let history = self
            .history
            .lock()
            .map_err(|_| anyhow::anyhow!("Consent history lock poisoned"))?;
        Ok(history
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryPrivacyRepository {
    settings: DashMap<String, PrivacySettings>,
}

impl InMemoryPrivacyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PrivacyRepository for InMemoryPrivacyRepository {
    async fn find(&self, user_id: &str) -> Result<Option<PrivacySettings>, ServiceError> {
        Ok(self.settings.get(user_id).map(|s| s.value().clone()))
    }

    async fn set_visibility(
        &self,
        user_id: &str,
        changes: &BTreeMap<DataType, VisibilityLevel>,
        now: DateTime<Utc>,
    ) -> Result<PrivacySettings, ServiceError> {
        let mut settings = self
            .settings
            .entry(user_id.to_string())
            .or_insert_with(|| PrivacySettings::defaults_for(user_id));
        settings.visibility.extend(changes.iter().map(|(d, v)| (*d, *v)));
        settings.updated_at = Some(now);
        Ok(settings.value().clone())
    }

    async fn block(
        &self,
        user_id: &str,
        blocked_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut settings = self
            .settings
            .entry(user_id.to_string())
            .or_insert_with(|| PrivacySettings::defaults_for(user_id));
        settings.blocked_users.insert(blocked_user_id.to_string());
        settings.updated_at = Some(now);
        Ok(())
    }

    async fn unblock(
        &self,
        user_id: &str,
        blocked_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let Some(mut settings) = self.settings.get_mut(user_id) else {
            return Ok(false);
        };
        let removed = settings.blocked_users.remove(blocked_user_id);
        if removed {
            settings.updated_at = Some(now);
        }
        Ok(removed)
    }
}
