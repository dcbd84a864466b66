use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::{
    bson::{doc, DateTime as BsonDateTime},
    Collection,
};
use serde::{Deserialize, Serialize};

use super::{db_error, is_duplicate_key, MongoDb, TWO_FACTOR};
use crate::models::{TrustedDevice, TwoFactorCredential};
use crate::repository::TwoFactorRepository;
use crate::services::ServiceError;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrustedDeviceDocument {
    user_agent: String,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    last_used: DateTime<Utc>,
    trusted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TwoFactorDocument {
    user_id: String,
    secret: String,
    backup_code_hashes: Vec<String>,
    enabled: bool,
    #[serde(default)]
    trusted_devices: Vec<TrustedDeviceDocument>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    updated_at: DateTime<Utc>,
}

impl From<&TrustedDevice> for TrustedDeviceDocument {
    fn from(d: &TrustedDevice) -> Self {
        Self {
            user_agent: d.user_agent.clone(),
            last_used: d.last_used,
            trusted: d.trusted,
        }
    }
}

impl From<&TwoFactorCredential> for TwoFactorDocument {
    fn from(c: &TwoFactorCredential) -> Self {
        Self {
            user_id: c.user_id.clone(),
            secret: c.secret.clone(),
            backup_code_hashes: c.backup_code_hashes.clone(),
            enabled: c.enabled,
            trusted_devices: c.trusted_devices.iter().map(Into::into).collect(),
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

impl From<TwoFactorDocument> for TwoFactorCredential {
    fn from(d: TwoFactorDocument) -> Self {
        Self {
            user_id: d.user_id,
            secret: d.secret,
            backup_code_hashes: d.backup_code_hashes,
            enabled: d.enabled,
            trusted_devices: d
                .trusted_devices
                .into_iter()
                .map(|t| TrustedDevice {
                    user_agent: t.user_agent,
                    last_used: t.last_used,
                    trusted: t.trusted,
                })
                .collect(),
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct MongoTwoFactorRepository {
    credentials: Collection<TwoFactorDocument>,
}

impl MongoTwoFactorRepository {
    pub fn new(db: &MongoDb) -> Self {
        Self {
            credentials: db.collection(TWO_FACTOR),
        }
    }
}

#[async_trait]
impl TwoFactorRepository for MongoTwoFactorRepository {
    async fn find(&self, user_id: &str) -> Result<Option<TwoFactorCredential>, ServiceError> {
        Ok(self
            .credentials
            .find_one(doc! { "user_id": user_id }, None)
            .await
            .map_err(db_error("Failed to find two-factor credential"))?
            .map(TwoFactorCredential::from))
    }

    async fn insert_if_absent(
        &self,
        credential: &TwoFactorCredential,
    ) -> Result<bool, ServiceError> {
        // Unique index on user_id turns a concurrent enable into a duplicate key.
        match self
            .credentials
            .insert_one(TwoFactorDocument::from(credential), None)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(db_error("Failed to insert two-factor credential")(e)),
        }
    }

    async fn consume_backup_code(
        &self,
        user_id: &str,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let result = self
            .credentials
            .update_one(
                doc! { "user_id": user_id, "enabled": true, "backup_code_hashes": code_hash },
                doc! {
                    "$pull": { "backup_code_hashes": code_hash },
                    "$set": { "updated_at": BsonDateTime::from_chrono(now) },
                },
                None,
            )
            .await
            .map_err(db_error("Failed to consume backup code"))?;
        Ok(result.modified_count == 1)
    }

    async fn replace_backup_codes(
        &self,
        user_id: &str,
        code_hashes: &[String],
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let result = self
            .credentials
            .update_one(
                doc! { "user_id": user_id, "enabled": true },
                doc! {
                    "$set": {
                        "backup_code_hashes": code_hashes,
                        "updated_at": BsonDateTime::from_chrono(now),
                    }
                },
                None,
            )
            .await
            .map_err(db_error("Failed to replace backup codes"))?;
        Ok(result.matched_count == 1)
    }

    async fn upsert_trusted_device(
        &self,
        user_id: &str,
        device: &TrustedDevice,
    ) -> Result<bool, ServiceError> {
        let last_used = BsonDateTime::from_chrono(device.last_used);

        let refreshed = self
            .credentials
            .update_one(
                doc! { "user_id": user_id, "trusted_devices.user_agent": device.user_agent.as_str() },
                doc! {
                    "$set": {
                        "trusted_devices.$.last_used": last_used,
                        "trusted_devices.$.trusted": device.trusted,
                        "updated_at": last_used,
                    }
                },
                None,
            )
            .await
            .map_err(db_error("Failed to refresh trusted device"))?;
        if refreshed.matched_count == 1 {
            return Ok(true);
        }

        let entry = mongodb::bson::to_bson(&TrustedDeviceDocument::from(device))
            .map_err(|e| ServiceError::Internal(e.into()))?;
        let added = self
            .credentials
            .update_one(
                doc! {
                    "user_id": user_id,
                    "trusted_devices.user_agent": { "$ne": device.user_agent.as_str() },
                },
                doc! {
                    "$push": { "trusted_devices": entry },
                    "$set": { "updated_at": last_used },
                },
                None,
            )
            .await
            .map_err(db_error("Failed to add trusted device"))?;
        Ok(added.matched_count == 1)
    }

    async fn delete(&self, user_id: &str) -> Result<bool, ServiceError> {
        let result = self
            .credentials
            .delete_one(doc! { "user_id": user_id }, None)
            .await
            .map_err(db_error("Failed to delete two-factor credential"))?;
        Ok(result.deleted_count == 1)
    }
}
