//! MongoDB persistence.

pub mod consent;
pub mod events;
pub mod sessions;
pub mod two_factor;

pub use consent::{MongoConsentRepository, MongoPrivacyRepository};
pub use events::MongoAuthEventSink;
pub use sessions::MongoSessionRepository;
pub use two_factor::MongoTwoFactorRepository;

use mongodb::{
    bson::{doc, Document},
    options::IndexOptions,
    Client as MongoClient, Collection, Database, IndexModel,
};

use crate::services::ServiceError;

pub const SESSIONS: &str = "sessions";
pub const TWO_FACTOR: &str = "two_factor";
pub const CONSENT_HISTORY: &str = "consent_history";
pub const CONSENT_SNAPSHOTS: &str = "consent_snapshots";
pub const PRIVACY_SETTINGS: &str = "privacy_settings";
pub const AUTH_EVENTS: &str = "auth_events";

#[derive(Clone)]
pub struct MongoDb {
    client: MongoClient,
    db: Database,
}

impl MongoDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, ServiceError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            ServiceError::Database(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub fn collection<T>(&self, name: &str) -> Collection<T> {
        self.db.collection(name)
    }

    pub async fn health_check(&self) -> Result<(), ServiceError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                ServiceError::Database(e)
            })?;
        Ok(())
    }

    pub async fn initialize_indexes(&self) -> Result<(), ServiceError> {
        tracing::info!("Creating MongoDB indexes for identity-service");

        let indexes: [(&str, Document, &str, bool); 9] = [
            (SESSIONS, doc! { "session_id": 1 }, "session_id_idx", true),
            (
                SESSIONS,
                doc! { "user_id": 1, "last_activity": -1 },
                "user_activity_idx",
                false,
            ),
            (SESSIONS, doc! { "expires_at": 1 }, "expires_at_idx", false),
            (TWO_FACTOR, doc! { "user_id": 1 }, "user_id_idx", true),
            (
                CONSENT_HISTORY,
                doc! { "user_id": 1, "timestamp": -1 },
                "user_timestamp_idx",
                false,
            ),
            (CONSENT_SNAPSHOTS, doc! { "user_id": 1 }, "user_id_idx", true),
            (PRIVACY_SETTINGS, doc! { "user_id": 1 }, "user_id_idx", true),
            (AUTH_EVENTS, doc! { "timestamp": -1 }, "timestamp_idx", false),
            (
                AUTH_EVENTS,
                doc! { "user_id": 1, "timestamp": -1 },
                "user_timestamp_idx",
                false,
            ),
        ];

        for (collection, keys, name, unique) in indexes {
            let index = IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .name(name.to_string())
                        .unique(unique)
                        .build(),
                )
                .build();

            self.collection::<Document>(collection)
                .create_index(index, None)
                .await
                .map_err(|e| {
                    tracing::error!(collection, index = name, "Failed to create index: {}", e);
                    ServiceError::Database(e)
                })?;
        }

        tracing::info!("Successfully created all MongoDB indexes");
        Ok(())
    }
}

/// Log a driver error with context and wrap it.
pub(crate) fn db_error(context: &'static str) -> impl Fn(mongodb::error::Error) -> ServiceError {
    move |e| {
        tracing::error!("{}: {}", context, e);
        ServiceError::Database(e)
    }
}

pub(crate) fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    matches!(
        e.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == 11000
    )
}

/// `Option<DateTime<Utc>>` stored as a BSON date or null.
pub mod optional_chrono_datetime_as_bson_datetime {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(val: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match val {
            Some(date) => mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime::serialize(
                date, serializer,
            ),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wrapper(
            #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
            DateTime<Utc>,
        );

        let wrapper = Option::<Wrapper>::deserialize(deserializer)?;
        Ok(wrapper.map(|w| w.0))
    }
}
