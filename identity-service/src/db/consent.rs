use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, DateTime as BsonDateTime, Document},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
    Collection,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{db_error, MongoDb, CONSENT_HISTORY, CONSENT_SNAPSHOTS, PRIVACY_SETTINGS};
use crate::models::{
    ConsentCategory, ConsentMetadata, ConsentRecord, ConsentSnapshot, DataType, PrivacySettings,
    VisibilityLevel,
};
use crate::repository::{ConsentRepository, PrivacyRepository};
use crate::services::ServiceError;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConsentRecordDocument {
    record_id: String,
    user_id: String,
    category: ConsentCategory,
    granted: bool,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    timestamp: DateTime<Utc>,
    version: String,
    #[serde(default)]
    metadata: Option<ConsentMetadata>,
}

impl From<&ConsentRecord> for ConsentRecordDocument {
    fn from(r: &ConsentRecord) -> Self {
        Self {
            record_id: r.record_id.clone(),
            user_id: r.user_id.clone(),
            category: r.category,
            granted: r.granted,
            timestamp: r.timestamp,
            version: r.version.clone(),
            metadata: r.metadata.clone(),
        }
    }
}

impl From<ConsentRecordDocument> for ConsentRecord {
    fn from(d: ConsentRecordDocument) -> Self {
        Self {
            record_id: d.record_id,
            user_id: d.user_id,
            category: d.category,
            granted: d.granted,
            timestamp: d.timestamp,
            version: d.version,
            metadata: d.metadata,
        }
    }
}

/// Category names are stored as plain string keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConsentSnapshotDocument {
    user_id: String,
    #[serde(default)]
    categories: BTreeMap<String, bool>,
    #[serde(
        default,
        with = "super::optional_chrono_datetime_as_bson_datetime",
        skip_serializing_if = "Option::is_none"
    )]
    updated_at: Option<DateTime<Utc>>,
}

impl From<ConsentSnapshotDocument> for ConsentSnapshot {
    fn from(d: ConsentSnapshotDocument) -> Self {
        let categories = d
            .categories
            .into_iter()
            .filter_map(|(name, granted)| match name.parse::<ConsentCategory>() {
                Ok(category) => Some((category, granted)),
                Err(e) => {
                    tracing::warn!(user_id = %d.user_id, "Skipping stored consent entry: {}", e);
                    None
                }
            })
            .collect();
        Self {
            user_id: d.user_id,
            categories,
            updated_at: d.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct MongoConsentRepository {
    history: Collection<ConsentRecordDocument>,
    snapshots: Collection<ConsentSnapshotDocument>,
}

impl MongoConsentRepository {
    pub fn new(db: &MongoDb) -> Self {
        Self {
            history: db.collection(CONSENT_HISTORY),
            snapshots: db.collection(CONSENT_SNAPSHOTS),
        }
    }
}

#[async_trait]
impl ConsentRepository for MongoConsentRepository {
    async fn append(&self, records: &[ConsentRecord]) -> Result<(), ServiceError> {
        if records.is_empty() {
            return Ok(());
        }
        self.history
            .insert_many(records.iter().map(ConsentRecordDocument::from), None)
            .await
            .map_err(db_error("Failed to append consent history"))?;
        Ok(())
    }

    async fn apply(
        &self,
        user_id: &str,
        changes: &BTreeMap<ConsentCategory, bool>,
        now: DateTime<Utc>,
    ) -> Result<ConsentSnapshot, ServiceError> {
        let mut set = Document::new();
        for (category, granted) in changes {
            set.insert(format!("categories.{}", category.as_str()), *granted);
        }
        set.insert("updated_at", BsonDateTime::from_chrono(now));

        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        let updated = self
            .snapshots
            .find_one_and_update(doc! { "user_id": user_id }, doc! { "$set": set }, options)
            .await
            .map_err(db_error("Failed to update consent snapshot"))?;

        updated.map(ConsentSnapshot::from).ok_or_else(|| {
            ServiceError::Internal(anyhow::anyhow!("Consent snapshot upsert returned nothing"))
        })
    }

    async fn snapshot(&self, user_id: &str) -> Result<Option<ConsentSnapshot>, ServiceError> {
        Ok(self
            .snapshots
            .find_one(doc! { "user_id": user_id }, None)
            .await
            .map_err(db_error("Failed to find consent snapshot"))?
            .map(ConsentSnapshot::from))
    }

    async fn history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConsentRecord>, ServiceError> {
        let options = FindOptions::builder()
            .sort(doc! { "timestamp": -1 })
            .limit(limit as i64)
            .build();

        let cursor = self
            .history
            .find(doc! { "user_id": user_id }, options)
            .await
            .map_err(db_error("Failed to read consent history"))?;
        let documents: Vec<ConsentRecordDocument> = cursor
            .try_collect()
            .await
            .map_err(db_error("Failed to collect consent history"))?;

        Ok(documents.into_iter().map(ConsentRecord::from).collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PrivacySettingsDocument {
    user_id: String,
    #[serde(default)]
    visibility: BTreeMap<String, VisibilityLevel>,
    #[serde(default)]
    blocked_users: Vec<String>,
    #[serde(
        default,
        with = "super::optional_chrono_datetime_as_bson_datetime",
        skip_serializing_if = "Option::is_none"
    )]
    updated_at: Option<DateTime<Utc>>,
}

impl From<PrivacySettingsDocument> for PrivacySettings {
    fn from(d: PrivacySettingsDocument) -> Self {
        let visibility = d
            .visibility
            .into_iter()
            .filter_map(|(name, level)| name.parse::<DataType>().ok().map(|t| (t, level)))
            .collect();
        Self {
            user_id: d.user_id,
            visibility,
            blocked_users: d.blocked_users.into_iter().collect(),
            updated_at: d.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct MongoPrivacyRepository {
    settings: Collection<PrivacySettingsDocument>,
}

impl MongoPrivacyRepository {
    pub fn new(db: &MongoDb) -> Self {
        Self {
            settings: db.collection(PRIVACY_SETTINGS),
        }
    }

    async fn upsert(&self, user_id: &str, update: Document) -> Result<PrivacySettings, ServiceError> {
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        self.settings
            .find_one_and_update(doc! { "user_id": user_id }, update, options)
            .await
            .map_err(db_error("Failed to update privacy settings"))?
            .map(PrivacySettings::from)
            .ok_or_else(|| {
                ServiceError::Internal(anyhow::anyhow!("Privacy settings upsert returned nothing"))
            })
    }
}

#[async_trait]
impl PrivacyRepository for MongoPrivacyRepository {
    async fn find(&self, user_id: &str) -> Result<Option<PrivacySettings>, ServiceError> {
        Ok(self
            .settings
            .find_one(doc! { "user_id": user_id }, None)
            .await
            .map_err(db_error("Failed to find privacy settings"))?
            .map(PrivacySettings::from))
    }

    async fn set_visibility(
        &self,
        user_id: &str,
        changes: &BTreeMap<DataType, VisibilityLevel>,
        now: DateTime<Utc>,
    ) -> Result<PrivacySettings, ServiceError> {
        let mut set = Document::new();
        for (data_type, level) in changes {
            set.insert(format!("visibility.{}", data_type.as_str()), level.as_str());
        }
        set.insert("updated_at", BsonDateTime::from_chrono(now));

        self.upsert(user_id, doc! { "$set": set }).await
    }

    async fn block(
        &self,
        user_id: &str,
        blocked_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        self.upsert(
            user_id,
            doc! {
                "$addToSet": { "blocked_users": blocked_user_id },
                "$set": { "updated_at": BsonDateTime::from_chrono(now) },
            },
        )
        .await?;
        Ok(())
    }

    async fn unblock(
        &self,
        user_id: &str,
        blocked_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let result = self
            .settings
            .update_one(
                doc! { "user_id": user_id, "blocked_users": blocked_user_id },
                doc! {
                    "$pull": { "blocked_users": blocked_user_id },
                    "$set": { "updated_at": BsonDateTime::from_chrono(now) },
                },
                None,
            )
            .await
            .map_err(db_error("Failed to unblock user"))?;
        Ok(result.modified_count == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_ignores_unknown_categories() {
        let document = doc! {
            "user_id": "u1",
            "categories": { "analytics": true, "telemetry": true },
        };
        let snapshot = ConsentSnapshot::from(
            mongodb::bson::from_document::<ConsentSnapshotDocument>(document).unwrap(),
        );
        assert_eq!(snapshot.categories.len(), 1);
        assert!(snapshot.get(ConsentCategory::Analytics));
        assert!(snapshot.updated_at.is_none());
    }

    #[test]
    fn privacy_document_reads_kebab_levels() {
        let document = doc! {
            "user_id": "u1",
            "visibility": { "email": "everyone", "location": "only-me" },
            "blocked_users": ["u2"],
            "updated_at": BsonDateTime::now(),
        };
        let settings = PrivacySettings::from(
            mongodb::bson::from_document::<PrivacySettingsDocument>(document).unwrap(),
        );
        assert_eq!(settings.visibility_of(DataType::Email), VisibilityLevel::Everyone);
        assert!(settings.is_blocked("u2"));
        assert!(settings.updated_at.is_some());
    }
}
