use chrono::Utc;
use service_core::store::Store;
use std::sync::Arc;
use std::time::Duration;

/// Per-user revocation markers over the shared [`Store`].
///
/// A marker holds the Unix second at which every token of the user was
/// invalidated. Tokens with `iat` at or before that second are rejected.
#[derive(Clone)]
pub struct RevocationList {
    store: Arc<dyn Store>,
}

impl RevocationList {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    fn marker_key(user_id: &str) -> String {
        format!("revoked:{}", user_id)
    }

    /// Record a marker for `user_id` at the current time. The marker outlives
    /// the longest-lived token it needs to cover, then expires on its own.
    pub async fn revoke_user(&self, user_id: &str, ttl: Duration) -> Result<i64, anyhow::Error> {
        let now = Utc::now().timestamp();
        self.store
            .set(&Self::marker_key(user_id), &now.to_string(), ttl)
            .await?;
        tracing::info!(user_id = %user_id, revoked_at = now, "Revocation marker recorded");
        Ok(now)
    }

    pub async fn marker(&self, user_id: &str) -> Result<Option<i64>, anyhow::Error> {
        let Some(raw) = self.store.get(&Self::marker_key(user_id)).await? else {
            return Ok(None);
        };
        raw.parse::<i64>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Corrupt revocation marker for {}: {}", user_id, e))
    }

    /// Whether a token issued at `issued_at` is covered by a marker.
    pub async fn is_revoked(&self, user_id: &str, issued_at: i64) -> Result<bool, anyhow::Error> {
        Ok(self
            .marker(user_id)
            .await?
            .is_some_and(|revoked_at| revoked_at >= issued_at))
    }

    pub async fn clear(&self, user_id: &str) -> Result<bool, anyhow::Error> {
        self.store.delete(&Self::marker_key(user_id)).await
    }
}
