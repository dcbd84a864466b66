use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::Collection;
use serde::{Deserialize, Serialize};

use super::{MongoDb, AUTH_EVENTS};
use crate::models::{AppId, AuthEvent, AuthEventKind, Severity};
use crate::services::AuthEventSink;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuthEventDocument {
    event_id: String,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    timestamp: DateTime<Utc>,
    severity: Severity,
    kind: AuthEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    app: Option<AppId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl From<&AuthEvent> for AuthEventDocument {
    fn from(e: &AuthEvent) -> Self {
        Self {
            event_id: e.event_id.clone(),
            timestamp: e.timestamp,
            severity: e.severity,
            kind: e.kind,
            user_id: e.user_id.clone(),
            app: e.app,
            duration_ms: e.duration_ms.map(|d| d.min(i64::MAX as u64) as i64),
            error: e.error.clone(),
            details: e.details.clone(),
        }
    }
}

/// Persists audit events; failures are reported to the logger, which drops
/// them.
#[derive(Clone)]
pub struct MongoAuthEventSink {
    events: Collection<AuthEventDocument>,
}

impl MongoAuthEventSink {
    pub fn new(db: &MongoDb) -> Self {
        Self {
            events: db.collection(AUTH_EVENTS),
        }
    }
}

#[async_trait]
impl AuthEventSink for MongoAuthEventSink {
    async fn write(&self, event: &AuthEvent) -> Result<(), anyhow::Error> {
        self.events
            .insert_one(AuthEventDocument::from(event), None)
            .await?;
        Ok(())
    }
}
