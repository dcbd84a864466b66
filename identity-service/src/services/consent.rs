use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use super::events::AuthEventLogger;
use super::ServiceError;
use crate::models::consent::CONSENT_VERSION;
use crate::models::{
    AuthEvent, AuthEventKind, ConsentCategory, ConsentMetadata, ConsentRecord, ConsentSnapshot,
};
use crate::repository::ConsentRepository;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Append-only consent history plus the derived current snapshot.
#[derive(Clone)]
pub struct ConsentService {
    repository: Arc<dyn ConsentRepository>,
    events: Arc<AuthEventLogger>,
}

impl ConsentService {
    pub fn new(repository: Arc<dyn ConsentRepository>, events: Arc<AuthEventLogger>) -> Self {
        Self { repository, events }
    }

    pub async fn record_consent(
        &self,
        user_id: &str,
        category: ConsentCategory,
        granted: bool,
        metadata: Option<ConsentMetadata>,
    ) -> Result<ConsentSnapshot, ServiceError> {
        self.record_consents(user_id, BTreeMap::from([(category, granted)]), metadata)
            .await
    }

    /// Record several categories at once: one history entry each, one
    /// snapshot write.
    pub async fn record_consents(
        &self,
        user_id: &str,
        changes: BTreeMap<ConsentCategory, bool>,
        metadata: Option<ConsentMetadata>,
    ) -> Result<ConsentSnapshot, ServiceError> {
        if user_id.is_empty() {
            return Err(ServiceError::Validation("User id must not be empty".into()));
        }
        if changes.is_empty() {
            return Err(ServiceError::Validation("No consent changes supplied".into()));
        }
        if changes.contains_key(&ConsentCategory::Necessary) {
            return Err(ServiceError::Validation(
                "The necessary category cannot be changed".into(),
            ));
        }

        let now = Utc::now();
        let records: Vec<ConsentRecord> = changes
            .iter()
            .map(|(category, granted)| ConsentRecord {
                record_id: Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                category: *category,
                granted: *granted,
                timestamp: now,
                version: CONSENT_VERSION.to_string(),
                metadata: metadata.clone(),
            })
            .collect();

        // Snapshot first; history is appended only for a change that landed.
        let previous = self.snapshot(user_id).await?;
        let snapshot = self.repository.apply(user_id, &changes, now).await?;
        if let Err(e) = self.append_history(&records).await {
            self.restore(user_id, &changes, &previous).await;
            return Err(e);
        }

        self.events.log(
            AuthEvent::new(AuthEventKind::ConsentUpdated)
                .user(user_id)
                .details(serde_json::json!({ "changes": changes })),
        );
        Ok(snapshot)
    }

    /// Append with one retry on a store failure.
    async fn append_history(&self, records: &[ConsentRecord]) -> Result<(), ServiceError> {
        match self.repository.append(records).await {
            Err(e) if e.is_infrastructure() => {
                tracing::warn!(error = %e, "Consent history append failed; retrying");
                self.repository.append(records).await
            }
            result => result,
        }
    }

    /// Put the changed categories back to their values in `previous`.
    async fn restore(
        &self,
        user_id: &str,
        changes: &BTreeMap<ConsentCategory, bool>,
        previous: &ConsentSnapshot,
    ) {
        let reverted: BTreeMap<ConsentCategory, bool> = changes
            .keys()
            .map(|category| (*category, previous.get(*category)))
            .collect();
        let restored_at = previous.updated_at.unwrap_or_else(Utc::now);
        if let Err(e) = self.repository.apply(user_id, &reverted, restored_at).await {
            tracing::error!(
                error = %e,
                user_id = %user_id,
                "Consent snapshot holds changes missing from history"
            );
        }
    }

    /// Every category with its effective value.
    pub async fn get_consent(
        &self,
        user_id: &str,
    ) -> Result<BTreeMap<ConsentCategory, bool>, ServiceError> {
        Ok(self.snapshot(user_id).await?.resolved())
    }

    pub async fn snapshot(&self, user_id: &str) -> Result<ConsentSnapshot, ServiceError> {
        Ok(self
            .repository
            .snapshot(user_id)
            .await?
            .unwrap_or_else(|| ConsentSnapshot::empty(user_id)))
    }

    pub async fn can_track(
        &self,
        user_id: &str,
        category: ConsentCategory,
    ) -> Result<bool, ServiceError> {
        if category == ConsentCategory::Necessary {
            return Ok(true);
        }
        Ok(self.snapshot(user_id).await?.get(category))
    }

    /// Most recent first.
    pub async fn history(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ConsentRecord>, ServiceError> {
        self.repository
            .history(user_id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryConsentRepository;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn service() -> ConsentService {
        ConsentService::new(
            Arc::new(InMemoryConsentRepository::new()),
            Arc::new(AuthEventLogger::default()),
        )
    }

    #[tokio::test]
    async fn defaults_before_any_record() {
        let service = service();
        let consent = service.get_consent("user-1").await.unwrap();
        assert_eq!(consent[&ConsentCategory::Necessary], true);
        assert_eq!(consent[&ConsentCategory::Analytics], false);
        assert!(service.can_track("user-1", ConsentCategory::Necessary).await.unwrap());
        assert!(!service.can_track("user-1", ConsentCategory::Marketing).await.unwrap());
    }

    #[tokio::test]
    async fn grant_and_withdraw_are_recorded() {
        let service = service();
        let metadata = ConsentMetadata {
            ip_address: Some("203.0.113.9".into()),
            user_agent: Some("Firefox".into()),
        };
        service
            .record_consent("user-1", ConsentCategory::Analytics, true, Some(metadata))
            .await
            .unwrap();
        assert!(service.can_track("user-1", ConsentCategory::Analytics).await.unwrap());

        service
            .record_consent("user-1", ConsentCategory::Analytics, false, None)
            .await
            .unwrap();
        assert!(!service.can_track("user-1", ConsentCategory::Analytics).await.unwrap());

        let history = service.history("user-1", None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].granted);
        assert!(history[1].granted);
        assert_eq!(history[1].version, CONSENT_VERSION);
        assert_eq!(
            history[1].metadata.as_ref().unwrap().ip_address.as_deref(),
            Some("203.0.113.9")
        );
    }

    #[tokio::test]
    async fn necessary_is_not_user_settable() {
        let service = service();
        assert!(matches!(
            service
                .record_consent("user-1", ConsentCategory::Necessary, false, None)
                .await,
            Err(ServiceError::Validation(_))
        ));
        assert!(service.history("user-1", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_update_touches_only_named_categories() {
        let service = service();
        let snapshot = service
            .record_consents(
                "user-1",
                BTreeMap::from([
                    (ConsentCategory::Functional, true),
                    (ConsentCategory::Personalization, true),
                ]),
                None,
            )
            .await
            .unwrap();
        assert!(snapshot.get(ConsentCategory::Functional));
        assert!(!snapshot.get(ConsentCategory::Marketing));
        assert_eq!(service.history("user-1", Some(1)).await.unwrap().len(), 1);
    }

    struct FlakyHistory {
        inner: InMemoryConsentRepository,
        failures_left: AtomicUsize,
    }

    impl FlakyHistory {
        fn failing(times: usize) -> Arc<Self> {
            Arc::new(Self {
                inner: InMemoryConsentRepository::new(),
                failures_left: AtomicUsize::new(times),
            })
        }
    }

    #[async_trait]
    impl ConsentRepository for FlakyHistory {
        async fn append(&self, records: &[ConsentRecord]) -> Result<(), ServiceError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ServiceError::ServiceUnavailable("history write timed out".into()));
            }
            self.inner.append(records).await
        }
        async fn apply(
            &self,
            user_id: &str,
            changes: &BTreeMap<ConsentCategory, bool>,
            now: chrono::DateTime<Utc>,
        ) -> Result<ConsentSnapshot, ServiceError> {
            self.inner.apply(user_id, changes, now).await
        }
        async fn snapshot(&self, user_id: &str) -> Result<Option<ConsentSnapshot>, ServiceError> {
            self.inner.snapshot(user_id).await
        }
        async fn history(
            &self,
            user_id: &str,
            limit: usize,
        ) -> Result<Vec<ConsentRecord>, ServiceError> {
            self.inner.history(user_id, limit).await
        }
    }

    fn service_over(repository: Arc<FlakyHistory>) -> ConsentService {
        ConsentService::new(repository, Arc::new(AuthEventLogger::default()))
    }

    #[tokio::test]
    async fn transient_history_failure_is_retried() {
        let service = service_over(FlakyHistory::failing(1));
        service
            .record_consent("user-1", ConsentCategory::Analytics, true, None)
            .await
            .unwrap();

        assert!(service.can_track("user-1", ConsentCategory::Analytics).await.unwrap());
        assert_eq!(service.history("user-1", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_history_write_leaves_snapshot_unchanged() {
        let repository = FlakyHistory::failing(0);
        let service = service_over(repository.clone());
        service
            .record_consent("user-1", ConsentCategory::Marketing, true, None)
            .await
            .unwrap();

        repository.failures_left.store(2, Ordering::SeqCst);
        let result = service
            .record_consents(
                "user-1",
                BTreeMap::from([
                    (ConsentCategory::Marketing, false),
                    (ConsentCategory::Analytics, true),
                ]),
                None,
            )
            .await;
        assert!(matches!(result, Err(ServiceError::ServiceUnavailable(_))));

        // Snapshot and history still agree
        assert!(service.can_track("user-1", ConsentCategory::Marketing).await.unwrap());
        assert!(!service.can_track("user-1", ConsentCategory::Analytics).await.unwrap());
        let history = service.history("user-1", None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].category, ConsentCategory::Marketing);
    }
}
