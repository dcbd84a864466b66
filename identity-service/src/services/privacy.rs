use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::ServiceError;
use crate::models::{DataType, PrivacySettings, Relationship, VisibilityLevel};
use crate::repository::PrivacyRepository;

/// Whether `viewer_id` may see `data_type` of the owner of `settings`.
///
/// Self-access always passes and a blocked viewer never does. Otherwise the
/// owner's visibility level decides, with `friends` requiring the caller to
/// have established a friend relationship.
pub fn can_view(
    viewer_id: &str,
    target_user_id: &str,
    data_type: DataType,
    relationship: Option<Relationship>,
    settings: &PrivacySettings,
) -> bool {
    if viewer_id == target_user_id {
        return true;
    }
    if settings.is_blocked(viewer_id) {
        return false;
    }
    match settings.visibility_of(data_type) {
        VisibilityLevel::Everyone => true,
        VisibilityLevel::Friends => relationship == Some(Relationship::Friend),
        VisibilityLevel::OnlyMe => false,
    }
}

#[derive(Clone)]
pub struct PrivacyService {
    repository: Arc<dyn PrivacyRepository>,
}

impl PrivacyService {
    pub fn new(repository: Arc<dyn PrivacyRepository>) -> Self {
        Self { repository }
    }

    /// Stored settings, or the defaults when the user never changed any.
    pub async fn settings(&self, user_id: &str) -> Result<PrivacySettings, ServiceError> {
        Ok(self
            .repository
            .find(user_id)
            .await?
            .unwrap_or_else(|| PrivacySettings::defaults_for(user_id)))
    }

    pub async fn update_visibility(
        &self,
        user_id: &str,
        changes: BTreeMap<DataType, VisibilityLevel>,
    ) -> Result<PrivacySettings, ServiceError> {
        if changes.is_empty() {
            return Err(ServiceError::Validation("No visibility changes supplied".into()));
        }
        self.repository
            .set_visibility(user_id, &changes, Utc::now())
            .await
    }

    pub async fn block_user(&self, user_id: &str, blocked_user_id: &str) -> Result<(), ServiceError> {
        if blocked_user_id.is_empty() || user_id == blocked_user_id {
            return Err(ServiceError::Validation("Cannot block this user".into()));
        }
        self.repository
            .block(user_id, blocked_user_id, Utc::now())
            .await?;
        tracing::info!(user_id = %user_id, "User added to block list");
        Ok(())
    }

    pub async fn unblock_user(
        &self,
        user_id: &str,
        blocked_user_id: &str,
    ) -> Result<bool, ServiceError> {
        self.repository
            .unblock(user_id, blocked_user_id, Utc::now())
            .await
    }

    /// [`can_view`] against the target's stored settings.
    pub async fn can_view(
        &self,
        viewer_id: &str,
        target_user_id: &str,
        data_type: DataType,
        relationship: Option<Relationship>,
    ) -> Result<bool, ServiceError> {
        if viewer_id == target_user_id {
            return Ok(true);
        }
        let settings = self.settings(target_user_id).await?;
        Ok(can_view(
            viewer_id,
            target_user_id,
            data_type,
            relationship,
            &settings,
        ))
    }

    /// Like [`PrivacyService::can_view`] but fails with `DataAccessDenied`.
    pub async fn ensure_can_view(
        &self,
        viewer_id: &str,
        target_user_id: &str,
        data_type: DataType,
        relationship: Option<Relationship>,
    ) -> Result<(), ServiceError> {
        if self
            .can_view(viewer_id, target_user_id, data_type, relationship)
            .await?
        {
            Ok(())
        } else {
            Err(ServiceError::DataAccessDenied(format!(
                "{:?} is not visible to this user",
                data_type
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryPrivacyRepository;

    #[test]
    fn self_access_always_allowed() {
        let mut settings = PrivacySettings::defaults_for("ana");
        settings.blocked_users.insert("ana".into());
        for data_type in [DataType::Email, DataType::Location, DataType::Expenses] {
            assert!(can_view("ana", "ana", data_type, None, &settings));
        }
    }

    #[test]
    fn blocked_viewer_sees_nothing() {
        let mut settings = PrivacySettings::defaults_for("ana");
        settings.blocked_users.insert("bob".into());
        assert!(!can_view(
            "bob",
            "ana",
            DataType::Profile,
            Some(Relationship::Friend),
            &settings
        ));
    }

    #[test]
    fn visibility_levels_map_to_relationship() {
        let settings = PrivacySettings::defaults_for("ana");
        // Defaults: profile everyone, expenses friends, email only-me
        assert!(can_view("bob", "ana", DataType::Profile, None, &settings));
        assert!(!can_view("bob", "ana", DataType::Expenses, None, &settings));
        assert!(!can_view(
            "bob",
            "ana",
            DataType::Expenses,
            Some(Relationship::Stranger),
            &settings
        ));
        assert!(can_view(
            "bob",
            "ana",
            DataType::Expenses,
            Some(Relationship::Friend),
            &settings
        ));
        assert!(!can_view(
            "bob",
            "ana",
            DataType::Email,
            Some(Relationship::Friend),
            &settings
        ));
    }

    #[tokio::test]
    async fn stored_settings_drive_decisions() {
        let service = PrivacyService::new(Arc::new(InMemoryPrivacyRepository::new()));
        service
            .update_visibility(
                "ana",
                BTreeMap::from([(DataType::Email, VisibilityLevel::Everyone)]),
            )
            .await
            .unwrap();
        assert!(service
            .can_view("bob", "ana", DataType::Email, None)
            .await
            .unwrap());

        service.block_user("ana", "bob").await.unwrap();
        assert!(matches!(
            service
                .ensure_can_view("bob", "ana", DataType::Email, None)
                .await,
            Err(ServiceError::DataAccessDenied(_))
        ));

        assert!(service.unblock_user("ana", "bob").await.unwrap());
        assert!(service
            .ensure_can_view("bob", "ana", DataType::Email, None)
            .await
            .is_ok());
        assert!(matches!(
            service.block_user("ana", "ana").await,
            Err(ServiceError::Validation(_))
        ));
    }
}
