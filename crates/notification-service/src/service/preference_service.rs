//! 偏好服务
//!
//! 偏好在首次访问时以默认值懒创建，更新为部分字段合并后整体 upsert。

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};
use validator::Validate;

use super::dto::UpdatePreferencesRequest;
use crate::error::Result;
use crate::models::NotificationPreferences;
use crate::repository::PreferenceRepositoryTrait;

pub struct PreferenceService {
    preferences: Arc<dyn PreferenceRepositoryTrait>,
}

impl PreferenceService {
    pub fn new(preferences: Arc<dyn PreferenceRepositoryTrait>) -> Self {
        Self { preferences }
    }

    /// 获取偏好，不存在时创建默认偏好
    pub async fn get(&self, user_id: &str) -> Result<NotificationPreferences> {
        self.preferences
            .get_or_create(&NotificationPreferences::defaults_for(user_id))
            .await
    }

    #[instrument(skip(self, request))]
    pub async fn update(
        &self,
        user_id: &str,
        request: UpdatePreferencesRequest,
    ) -> Result<NotificationPreferences> {
        request.validate()?;
        let mut prefs = self.get(user_id).await?;

        if let Some(v) = request.email_enabled {
            prefs.email_enabled = v;
        }
        if let Some(v) = request.push_enabled {
            prefs.push_enabled = v;
        }
        if let Some(v) = request.in_app_enabled {
            prefs.in_app_enabled = v;
        }
        if let Some(v) = request.sms_enabled {
            prefs.sms_enabled = v;
        }
        if let Some(v) = request.quiet_hours_enabled {
            prefs.quiet_hours_enabled = v;
        }
        if let Some(v) = request.quiet_hours_start {
            prefs.quiet_hours_start = v;
        }
        if let Some(v) = request.quiet_hours_end {
            prefs.quiet_hours_end = v;
        }
        if let Some(v) = request.timezone {
            prefs.timezone = v;
        }
        if let Some(v) = request.category_preferences {
            prefs.category_preferences = v;
        }
        prefs.updated_at = Utc::now();

        let saved = self.preferences.upsert(&prefs).await?;
        info!(
            user_id = %user_id,
            quiet_hours_enabled = saved.quiet_hours_enabled,
            timezone = %saved.timezone,
            "通知偏好已更新"
        );
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotificationError;
    use crate::repository::MemoryStore;

    #[tokio::test]
    async fn test_lazy_defaults_and_partial_update() {
        let service = PreferenceService::new(Arc::new(MemoryStore::new()));

        let prefs = service.get("u1").await.unwrap();
        assert!(prefs.email_enabled);
        assert!(!prefs.quiet_hours_enabled);

        let updated = service
            .update(
                "u1",
                UpdatePreferencesRequest {
                    quiet_hours_enabled: Some(true),
                    timezone: Some("Asia/Shanghai".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.quiet_hours_enabled);
        assert_eq!(updated.timezone, "Asia/Shanghai");
        assert!(updated.email_enabled);
        assert_eq!(updated.id, prefs.id);

        let err = service
            .update(
                "u1",
                UpdatePreferencesRequest {
                    quiet_hours_end: Some("8am".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::Validation(_)));
    }
}
