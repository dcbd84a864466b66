use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, DateTime as BsonDateTime, Document},
    options::FindOptions,
    Collection,
};
use serde::{Deserialize, Serialize};

use super::{db_error, MongoDb, SESSIONS};
use crate::models::{DeviceInfo, GeoLocation, Session};
use crate::repository::SessionRepository;
use crate::services::ServiceError;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionDocument {
    session_id: String,
    user_id: String,
    device_fingerprint: String,
    device: DeviceInfo,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    last_activity: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    expires_at: DateTime<Utc>,
    #[serde(default)]
    location: Option<GeoLocation>,
    #[serde(
        default,
        with = "super::optional_chrono_datetime_as_bson_datetime",
        skip_serializing_if = "Option::is_none"
    )]
    revoked_at: Option<DateTime<Utc>>,
}

impl From<&Session> for SessionDocument {
    fn from(s: &Session) -> Self {
        Self {
            session_id: s.session_id.clone(),
            user_id: s.user_id.clone(),
            device_fingerprint: s.device_fingerprint.clone(),
            device: s.device.clone(),
            created_at: s.created_at,
            last_activity: s.last_activity,
            expires_at: s.expires_at,
            location: s.location.clone(),
            revoked_at: s.revoked_at,
        }
    }
}

impl From<SessionDocument> for Session {
    fn from(d: SessionDocument) -> Self {
        Self {
            session_id: d.session_id,
            user_id: d.user_id,
            device_fingerprint: d.device_fingerprint,
            device: d.device,
            created_at: d.created_at,
            last_activity: d.last_activity,
            expires_at: d.expires_at,
            location: d.location,
            revoked_at: d.revoked_at,
        }
    }
}

#[derive(Clone)]
pub struct MongoSessionRepository {
    sessions: Collection<SessionDocument>,
    raw: Collection<Document>,
}

impl MongoSessionRepository {
    pub fn new(db: &MongoDb) -> Self {
        Self {
            sessions: db.collection(SESSIONS),
            raw: db.collection(SESSIONS),
        }
    }
}

fn bson_time(t: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_chrono(t)
}

#[async_trait]
impl SessionRepository for MongoSessionRepository {
    async fn insert(&self, session: &Session) -> Result<(), ServiceError> {
        self.sessions
            .insert_one(SessionDocument::from(session), None)
            .await
            .map_err(db_error("Failed to insert session"))?;
        Ok(())
    }

    async fn find(&self, session_id: &str) -> Result<Option<Session>, ServiceError> {
        Ok(self
            .sessions
            .find_one(doc! { "session_id": session_id }, None)
            .await
            .map_err(db_error("Failed to find session"))?
            .map(Session::from))
    }

    async fn list_active(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, ServiceError> {
        let filter = doc! {
            "user_id": user_id,
            "revoked_at": null,
            "expires_at": { "$gt": bson_time(now) },
        };
        let options = FindOptions::builder()
            .sort(doc! { "last_activity": -1 })
            .build();

        let cursor = self
            .sessions
            .find(filter, options)
            .await
            .map_err(db_error("Failed to list sessions"))?;
        let documents: Vec<SessionDocument> = cursor
            .try_collect()
            .await
            .map_err(db_error("Failed to collect sessions"))?;

        Ok(documents.into_iter().map(Session::from).collect())
    }

    async fn touch(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let result = self
            .sessions
            .update_one(
                doc! {
                    "session_id": session_id,
                    "revoked_at": null,
                    "expires_at": { "$gt": bson_time(now) },
                    "last_activity": { "$lt": bson_time(stale_before) },
                },
                doc! { "$set": { "last_activity": bson_time(now) } },
                None,
            )
            .await
            .map_err(db_error("Failed to touch session"))?;
        Ok(result.modified_count == 1)
    }

    async fn revoke(&self, session_id: &str, now: DateTime<Utc>) -> Result<bool, ServiceError> {
        let result = self
            .sessions
            .update_one(
                doc! { "session_id": session_id, "revoked_at": null },
                doc! { "$set": { "revoked_at": bson_time(now), "expires_at": bson_time(now) } },
                None,
            )
            .await
            .map_err(db_error("Failed to revoke session"))?;
        Ok(result.modified_count == 1)
    }

    async fn revoke_all(
        &self,
        user_id: &str,
        except: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let mut filter = doc! {
            "user_id": user_id,
            "revoked_at": null,
            "expires_at": { "$gt": bson_time(now) },
        };
        if let Some(except) = except {
            filter.insert("session_id", doc! { "$ne": except });
        }

        let result = self
            .sessions
            .update_many(
                filter,
                doc! { "$set": { "revoked_at": bson_time(now), "expires_at": bson_time(now) } },
                None,
            )
            .await
            .map_err(db_error("Failed to revoke sessions"))?;
        Ok(result.modified_count)
    }

    async fn expired_ids(
        &self,
        now: DateTime<Utc>,
        skip: u64,
        limit: usize,
    ) -> Result<Vec<String>, ServiceError> {
        let options = FindOptions::builder()
            .sort(doc! { "expires_at": 1 })
            .projection(doc! { "session_id": 1, "_id": 0 })
            .skip(skip)
            .limit(limit as i64)
            .build();

        let cursor = self
            .raw
            .find(doc! { "expires_at": { "$lte": bson_time(now) } }, options)
            .await
            .map_err(db_error("Failed to find expired sessions"))?;
        let documents: Vec<Document> = cursor
            .try_collect()
            .await
            .map_err(db_error("Failed to collect expired sessions"))?;

        Ok(documents
            .iter()
            .filter_map(|d| d.get_str("session_id").ok().map(str::to_string))
            .collect())
    }

    async fn delete_many(&self, session_ids: &[String]) -> Result<u64, ServiceError> {
        if session_ids.is_empty() {
            return Ok(0);
        }
        let result = self
            .sessions
            .delete_many(doc! { "session_id": { "$in": session_ids } }, None)
            .await
            .map_err(db_error("Failed to delete sessions"))?;
        Ok(result.deleted_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn document_keeps_revocation_and_dates() {
        let now = Utc::now();
        let session = Session {
            session_id: "s1".into(),
            user_id: "u1".into(),
            device_fingerprint: "fp".into(),
            device: DeviceInfo::new("ua"),
            created_at: now,
            last_activity: now,
            expires_at: now + Duration::hours(1),
            location: None,
            revoked_at: Some(now),
        };

        let document = mongodb::bson::to_document(&SessionDocument::from(&session)).unwrap();
        assert!(matches!(
            document.get("expires_at"),
            Some(mongodb::bson::Bson::DateTime(_))
        ));
        assert!(matches!(
            document.get("revoked_at"),
            Some(mongodb::bson::Bson::DateTime(_))
        ));

        let back: SessionDocument = mongodb::bson::from_document(document).unwrap();
        let back = Session::from(back);
        assert_eq!(back.session_id, "s1");
        assert_eq!(back.revoked_at.map(|t| t.timestamp_millis()), Some(now.timestamp_millis()));
    }

    #[test]
    fn unrevoked_session_omits_field() {
        let now = Utc::now();
        let session = Session {
            session_id: "s1".into(),
            user_id: "u1".into(),
            device_fingerprint: "fp".into(),
            device: DeviceInfo::new("ua"),
            created_at: now,
            last_activity: now,
            expires_at: now,
            location: None,
            revoked_at: None,
        };
        let document = mongodb::bson::to_document(&SessionDocument::from(&session)).unwrap();
        assert!(!document.contains_key("revoked_at"));
    }
}
