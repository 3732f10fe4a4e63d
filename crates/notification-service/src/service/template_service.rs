//! 模板服务
//!
//! 模板名称全局唯一；删除为软删除（停用），已创建的通知不受影响。

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use super::dto::{CreateTemplateRequest, TemplatePreview, UpdateTemplateRequest};
use crate::error::{NotificationError, Result};
use crate::models::NotificationTemplate;
use crate::notification::TemplateEngine;
use crate::repository::TemplateRepositoryTrait;

pub struct TemplateService {
    templates: Arc<dyn TemplateRepositoryTrait>,
    engine: TemplateEngine,
}

impl TemplateService {
    pub fn new(templates: Arc<dyn TemplateRepositoryTrait>) -> Self {
        Self {
            templates,
            engine: TemplateEngine::new(),
        }
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create(&self, request: CreateTemplateRequest) -> Result<NotificationTemplate> {
        request.validate()?;
        self.ensure_name_available(&request.name, None).await?;

        let variables = request
            .variables
            .unwrap_or_else(|| self.declared_variables(&request.title, &request.message));
        let now = Utc::now();
        let template = NotificationTemplate {
            id: Uuid::now_v7(),
            name: request.name,
            title: request.title,
            message: request.message,
            notification_type: request.notification_type,
            category: request.category,
            priority: request.priority,
            default_channels: request.default_channels,
            variables,
            metadata: request.metadata.unwrap_or_else(|| json!({})),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        self.templates.create(&template).await?;
        info!(template_id = %template.id, variables = ?template.variables, "模板已创建");
        Ok(template)
    }

    pub async fn get(&self, id: Uuid) -> Result<NotificationTemplate> {
        self.templates
            .get(id)
            .await?
            .ok_or(NotificationError::TemplateNotFound(id))
    }

    pub async fn list(&self, active_only: bool) -> Result<Vec<NotificationTemplate>> {
        self.templates.list(active_only).await
    }

    #[instrument(skip(self, request))]
    pub async fn update(
        &self,
        id: Uuid,
        request: UpdateTemplateRequest,
    ) -> Result<NotificationTemplate> {
        request.validate()?;
        let mut template = self.get(id).await?;

        if let Some(name) = request.name {
            if name != template.name {
                self.ensure_name_available(&name, Some(id)).await?;
                template.name = name;
            }
        }
        let content_changed = request.title.is_some() || request.message.is_some();
        if let Some(title) = request.title {
            template.title = title;
        }
        if let Some(message) = request.message {
            template.message = message;
        }
        if let Some(v) = request.notification_type {
            template.notification_type = v;
        }
        if let Some(v) = request.category {
            template.category = v;
        }
        if let Some(v) = request.priority {
            template.priority = v;
        }
        if let Some(v) = request.default_channels {
            template.default_channels = v;
        }
        if let Some(v) = request.metadata {
            template.metadata = v;
        }
        if let Some(v) = request.is_active {
            template.is_active = v;
        }
        match request.variables {
            Some(variables) => template.variables = variables,
            None if content_changed => {
                template.variables = self.declared_variables(&template.title, &template.message);
            }
            None => {}
        }
        template.updated_at = Utc::now();

        self.templates.update(&template).await?;
        info!(template_id = %id, "模板已更新");
        Ok(template)
    }

    /// 停用模板
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        if !self.templates.deactivate(id).await? {
            return Err(NotificationError::TemplateNotFound(id));
        }
        info!(template_id = %id, "模板已停用");
        Ok(())
    }

    /// 用给定变量预览渲染结果
    pub async fn preview(&self, id: Uuid, variables: &Value) -> Result<TemplatePreview> {
        let template = self.get(id).await?;
        let empty = Map::new();
        let vars = variables.as_object().unwrap_or(&empty);

        let mut missing = self.engine.missing_variables(&template.title, vars);
        for name in self.engine.missing_variables(&template.message, vars) {
            if !missing.contains(&name) {
                missing.push(name);
            }
        }

        Ok(TemplatePreview {
            title: self.engine.render(&template.title, vars),
            message: self.engine.render(&template.message, vars),
            missing_variables: missing,
        })
    }

    fn declared_variables(&self, title: &str, message: &str) -> Vec<String> {
        let mut variables = self.engine.extract_variables(title);
        for name in self.engine.extract_variables(message) {
            if !variables.contains(&name) {
                variables.push(name);
            }
        }
        variables
    }

    async fn ensure_name_available(&self, name: &str, current: Option<Uuid>) -> Result<()> {
        match self.templates.get_by_name(name).await? {
            Some(existing) if Some(existing.id) != current => {
                Err(NotificationError::TemplateNameTaken(name.to_string()))
            }
            _ => Ok(()),
        }
    }
}
