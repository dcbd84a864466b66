use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::events::AuthEventLogger;
use super::notifier::{AuthChange, AuthNotifier};
use super::ServiceError;
use crate::config::SessionConfig;
use crate::models::{
    AuthEvent, AuthEventKind, DeviceInfo, GeoLocation, Session, SessionCleanupReport,
    TouchOutcome,
};
use crate::repository::SessionRepository;

/// Per-device session records.
#[derive(Clone)]
pub struct SessionService {
    repository: Arc<dyn SessionRepository>,
    ttl: Duration,
    activity_threshold: Duration,
    cleanup_batch_size: usize,
    cleanup_max_batches: usize,
    events: Arc<AuthEventLogger>,
    notifier: AuthNotifier,
}

impl SessionService {
    pub fn new(
        repository: Arc<dyn SessionRepository>,
        config: &SessionConfig,
        events: Arc<AuthEventLogger>,
        notifier: AuthNotifier,
    ) -> Self {
        Self {
            repository,
            ttl: Duration::seconds(config.ttl_seconds),
            activity_threshold: Duration::seconds(config.activity_threshold_seconds),
            cleanup_batch_size: config.cleanup_batch_size.max(1),
            cleanup_max_batches: config.cleanup_max_batches.max(1),
            events,
            notifier,
        }
    }

    pub async fn create(
        &self,
        user_id: &str,
        device: DeviceInfo,
        location: Option<GeoLocation>,
    ) -> Result<Session, ServiceError> {
        if user_id.is_empty() {
            return Err(ServiceError::Validation("User id must not be empty".into()));
        }

        let now = Utc::now();
        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            device_fingerprint: device.fingerprint(),
            device,
            created_at: now,
            last_activity: now,
            expires_at: now + self.ttl,
            location,
            revoked_at: None,
        };
        self.repository.insert(&session).await?;

        self.events.log(
            AuthEvent::new(AuthEventKind::SessionCreated)
                .user(user_id)
                .details(serde_json::json!({ "session_id": session.session_id })),
        );
        Ok(session)
    }

    /// The session if it exists and is still active. Missing, revoked and
    /// expired sessions all read as `None`.
    pub async fn get(&self, session_id: &str) -> Result<Option<Session>, ServiceError> {
        let now = Utc::now();
        Ok(self
            .repository
            .find(session_id)
            .await?
            .filter(|s| s.is_active_at(now)))
    }

    pub async fn list_active(&self, user_id: &str) -> Result<Vec<Session>, ServiceError> {
        self.repository.list_active(user_id, Utc::now()).await
    }

    /// Activity heartbeat. Writes only when the last recorded activity is
    /// older than the threshold.
    pub async fn touch(&self, session_id: &str) -> Result<TouchOutcome, ServiceError> {
        let now = Utc::now();
        let Some(session) = self.repository.find(session_id).await? else {
            return Ok(TouchOutcome::Inactive);
        };
        if !session.is_active_at(now) {
            return Ok(TouchOutcome::Inactive);
        }

        let stale_before = now - self.activity_threshold;
        if session.last_activity >= stale_before {
            return Ok(TouchOutcome::Throttled);
        }

        if self.repository.touch(session_id, now, stale_before).await? {
            return Ok(TouchOutcome::Updated);
        }

        // Lost a race: someone else touched or revoked it in between
        Ok(match self.get(session_id).await? {
            Some(_) => TouchOutcome::Throttled,
            None => TouchOutcome::Inactive,
        })
    }

    /// Returns false when the session was missing or already revoked.
    pub async fn revoke(&self, session_id: &str) -> Result<bool, ServiceError> {
        let Some(session) = self.repository.find(session_id).await? else {
            return Ok(false);
        };
        let revoked = self.repository.revoke(session_id, Utc::now()).await?;
        if revoked {
            self.events.log(
                AuthEvent::new(AuthEventKind::SessionRevoked)
                    .user(&session.user_id)
                    .details(serde_json::json!({ "session_id": session_id })),
            );
            self.notifier.publish(AuthChange::SessionRevoked {
                user_id: session.user_id,
                session_id: session_id.to_string(),
            });
        }
        Ok(revoked)
    }

    /// Revoke every active session of the user except `except`, in one
    /// batch write. Returns the number revoked.
    pub async fn revoke_all(
        &self,
        user_id: &str,
        except: Option<&str>,
    ) -> Result<u64, ServiceError> {
        let revoked = self
            .repository
            .revoke_all(user_id, except, Utc::now())
            .await?;
        if revoked > 0 {
            self.events.log(
                AuthEvent::new(AuthEventKind::SessionRevoked)
                    .user(user_id)
                    .details(serde_json::json!({ "revoked": revoked, "kept": except })),
            );
        }
        Ok(revoked)
    }

    /// Exists, belongs to `user_id` when given, not revoked, not expired.
    pub async fn validate(
        &self,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<bool, ServiceError> {
        Ok(match self.get(session_id).await? {
            Some(session) => user_id.is_none_or(|u| session.user_id == u),
            None => false,
        })
    }

    /// Delete expired sessions in bounded batches. A failed batch is logged
    /// and skipped; the sweep carries on with the next one.
    pub async fn cleanup_expired(&self) -> SessionCleanupReport {
        let now = Utc::now();
        let mut report = SessionCleanupReport::default();
        let mut skip: u64 = 0;

        while report.batches < self.cleanup_max_batches {
            let ids = match self
                .repository
                .expired_ids(now, skip, self.cleanup_batch_size)
                .await
            {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to list expired sessions");
                    report.failed_batches += 1;
                    break;
                }
            };
            if ids.is_empty() {
                break;
            }
            report.batches += 1;
            let full_batch = ids.len() == self.cleanup_batch_size;

            match self.repository.delete_many(&ids).await {
                Ok(deleted) => report.deleted += deleted,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        batch_size = ids.len(),
                        "Failed to delete expired session batch"
                    );
                    report.failed_batches += 1;
                    skip += ids.len() as u64;
                }
            }

            if !full_batch {
                break;
            }
        }

        if report.deleted > 0 || report.failed_batches > 0 {
            self.events.log(
                AuthEvent::new(AuthEventKind::SessionsCleaned).details(serde_json::json!({
                    "deleted": report.deleted,
                    "batches": report.batches,
                    "failed_batches": report.failed_batches,
                })),
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemorySessionRepository;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config() -> SessionConfig {
        SessionConfig {
            ttl_seconds: 3600,
            activity_threshold_seconds: 300,
            cleanup_batch_size: 2,
            cleanup_max_batches: 10,
        }
    }

    fn service_over(repository: Arc<dyn SessionRepository>) -> SessionService {
        SessionService::new(
            repository,
            &config(),
            Arc::new(AuthEventLogger::default()),
            AuthNotifier::default(),
        )
    }

    fn service() -> (SessionService, Arc<InMemorySessionRepository>) {
        let repository = Arc::new(InMemorySessionRepository::new());
        (service_over(repository.clone()), repository)
    }

    fn device() -> DeviceInfo {
        let mut device = DeviceInfo::new("Mozilla/5.0 (X11; Linux x86_64)");
        device.browser = Some("Firefox".into());
        device.os = Some("Linux".into());
        device
    }

    #[tokio::test]
    async fn create_derives_fingerprint_and_expiry() {
        let (service, _) = service();
        let session = service.create("user-1", device(), None).await.unwrap();
        assert_eq!(session.device_fingerprint, device().derive_fingerprint());
        assert_eq!((session.expires_at - session.created_at).num_seconds(), 3600);
        assert!(session.last_activity <= session.expires_at);
    }

    #[tokio::test]
    async fn revoke_makes_validate_false() {
        let (service, _) = service();
        let session = service.create("user-1", device(), None).await.unwrap();
        assert!(service.validate(&session.session_id, Some("user-1")).await.unwrap());
        assert!(!service.validate(&session.session_id, Some("user-2")).await.unwrap());

        assert!(service.revoke(&session.session_id).await.unwrap());
        assert!(!service.revoke(&session.session_id).await.unwrap());
        assert!(!service.validate(&session.session_id, Some("user-1")).await.unwrap());
        assert!(service.get(&session.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoke_all_spares_current_session() {
        let (service, _) = service();
        let keep = service.create("user-1", device(), None).await.unwrap();
        service.create("user-1", device(), None).await.unwrap();
        service.create("user-1", device(), None).await.unwrap();
        let other_user = service.create("user-2", device(), None).await.unwrap();

        let revoked = service
            .revoke_all("user-1", Some(&keep.session_id))
            .await
            .unwrap();
        assert_eq!(revoked, 2);

        let active = service.list_active("user-1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, keep.session_id);
        assert!(service.validate(&other_user.session_id, None).await.unwrap());
    }

    #[tokio::test]
    async fn touch_is_throttled_within_threshold() {
        let (service, repository) = service();
        let session = service.create("user-1", device(), None).await.unwrap();
        assert_eq!(
            service.touch(&session.session_id).await.unwrap(),
            TouchOutcome::Throttled
        );

        let mut stale = session.clone();
        stale.last_activity = Utc::now() - Duration::minutes(10);
        repository.insert(&stale).await.unwrap();
        assert_eq!(
            service.touch(&session.session_id).await.unwrap(),
            TouchOutcome::Updated
        );

        service.revoke(&session.session_id).await.unwrap();
        assert_eq!(
            service.touch(&session.session_id).await.unwrap(),
            TouchOutcome::Inactive
        );
        assert_eq!(service.touch("missing").await.unwrap(), TouchOutcome::Inactive);
    }

    #[tokio::test]
    async fn list_active_orders_by_recent_activity() {
        let (service, repository) = service();
        let older = service.create("user-1", device(), None).await.unwrap();
        let newer = service.create("user-1", device(), None).await.unwrap();

        let mut aged = older.clone();
        aged.last_activity = Utc::now() - Duration::minutes(30);
        repository.insert(&aged).await.unwrap();

        let active = service.list_active("user-1").await.unwrap();
        assert_eq!(active[0].session_id, newer.session_id);
        assert_eq!(active[1].session_id, older.session_id);
    }

    #[tokio::test]
    async fn cleanup_runs_in_batches() {
        let (service, repository) = service();
        for _ in 0..5 {
            let mut s = service.create("user-1", device(), None).await.unwrap();
            s.expires_at = Utc::now() - Duration::seconds(1);
            repository.insert(&s).await.unwrap();
        }
        service.create("user-1", device(), None).await.unwrap();

        let report = service.cleanup_expired().await;
        assert_eq!(report.deleted, 5);
        assert_eq!(report.batches, 3);
        assert_eq!(report.failed_batches, 0);
        assert_eq!(repository.len(), 1);

        // Idempotent
        assert_eq!(service.cleanup_expired().await.deleted, 0);
    }

    /// Fails the first delete, then delegates.
    struct FlakyDeletes {
        inner: InMemorySessionRepository,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl SessionRepository for FlakyDeletes {
        async fn insert(&self, session: &Session) -> Result<(), ServiceError> {
            self.inner.insert(session).await
        }
        async fn find(&self, session_id: &str) -> Result<Option<Session>, ServiceError> {
            self.inner.find(session_id).await
        }
        async fn list_active(
            &self,
            user_id: &str,
            now: DateTime<Utc>,
        ) -> Result<Vec<Session>, ServiceError> {
            self.inner.list_active(user_id, now).await
        }
        async fn touch(
            &self,
            session_id: &str,
            now: DateTime<Utc>,
            stale_before: DateTime<Utc>,
        ) -> Result<bool, ServiceError> {
            self.inner.touch(session_id, now, stale_before).await
        }
        async fn revoke(&self, session_id: &str, now: DateTime<Utc>) -> Result<bool, ServiceError> {
            self.inner.revoke(session_id, now).await
        }
        async fn revoke_all(
            &self,
            user_id: &str,
            except: Option<&str>,
            now: DateTime<Utc>,
        ) -> Result<u64, ServiceError> {
            self.inner.revoke_all(user_id, except, now).await
        }
        async fn expired_ids(
            &self,
            now: DateTime<Utc>,
            skip: u64,
            limit: usize,
        ) -> Result<Vec<String>, ServiceError> {
            self.inner.expired_ids(now, skip, limit).await
        }
        async fn delete_many(&self, session_ids: &[String]) -> Result<u64, ServiceError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ServiceError::ServiceUnavailable("primary stepped down".into()));
            }
            self.inner.delete_many(session_ids).await
        }
    }

    #[tokio::test]
    async fn cleanup_continues_past_failed_batch() {
        let repository = Arc::new(FlakyDeletes {
            inner: InMemorySessionRepository::new(),
            failures_left: AtomicUsize::new(1),
        });
        let service = service_over(repository.clone());
        let expired = Utc::now() - Duration::seconds(1);
        for i in 0..4 {
            let mut s = service.create("user-1", device(), None).await.unwrap();
            s.expires_at = expired - Duration::seconds(i);
            repository.insert(&s).await.unwrap();
        }

        let report = service.cleanup_expired().await;
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.deleted, 2);
        assert_eq!(repository.inner.len(), 2);

        // The skipped batch is picked up by the next sweep
        assert_eq!(service.cleanup_expired().await.deleted, 2);
    }
}
