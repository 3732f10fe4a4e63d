//! 通知模板引擎
//!
//! 提供模板变量替换功能，支持 `{{variable}}` 语法，花括号内允许空白。
//!
//! ## 使用示例
//!
//! ```ignore
//! let engine = TemplateEngine::new();
//! let vars = json!({"taskName": "Algebra HW"});
//!
//! let rendered = engine.render("Task Due: {{taskName}}", vars.as_object().unwrap());
//! // 输出: "Task Due: Algebra HW"
//! ```

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tracing::debug;

use crate::models::{
    DeliveryChannel, NotificationCategory, NotificationPriority, NotificationTemplate,
    NotificationType,
};

/// 匹配 `{{ name }}`，变量名支持字母、数字、下划线
static VARIABLE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("占位符正则合法"));

/// 调用方对模板默认值的覆盖
#[derive(Debug, Clone, Default)]
pub struct TemplateOverrides {
    pub notification_type: Option<NotificationType>,
    pub category: Option<NotificationCategory>,
    pub priority: Option<NotificationPriority>,
    pub channels: Option<Vec<DeliveryChannel>>,
    /// 与模板 metadata 合并，键冲突时以此为准
    pub metadata: Option<Value>,
}

/// 模板渲染并与请求合并后的内容
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedContent {
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    pub category: NotificationCategory,
    pub priority: NotificationPriority,
    pub channels: Vec<DeliveryChannel>,
    pub metadata: Value,
}

/// 模板引擎
///
/// 无状态，替换为字面量替换，大小写敏感
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateEngine;

impl TemplateEngine {
    pub fn new() -> Self {
        Self
    }

    /// 渲染模板
    ///
    /// 未找到的变量保留原样，多余变量忽略
    pub fn render(&self, template: &str, variables: &Map<String, Value>) -> String {
        VARIABLE_REGEX
            .replace_all(template, |caps: &Captures| {
                let name = &caps[1];
                match variables.get(name) {
                    Some(value) => value_to_text(value),
                    None => {
                        debug!(variable = name, "模板变量未提供，保留原样");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    /// 渲染模板并与请求值合并
    pub fn apply(
        &self,
        template: &NotificationTemplate,
        variables: Option<&Value>,
        overrides: TemplateOverrides,
    ) -> RenderedContent {
        let empty = Map::new();
        let variables = variables.and_then(Value::as_object).unwrap_or(&empty);

        RenderedContent {
            title: self.render(&template.title, variables),
            message: self.render(&template.message, variables),
            notification_type: overrides
                .notification_type
                .unwrap_or(template.notification_type),
            category: overrides.category.unwrap_or(template.category),
            priority: overrides.priority.unwrap_or(template.priority),
            channels: overrides
                .channels
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| template.default_channels.clone()),
            metadata: merge_metadata(&template.metadata, overrides.metadata.as_ref()),
        }
    }

    /// 按出现顺序提取去重后的变量名
    pub fn extract_variables(&self, template: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        VARIABLE_REGEX
            .captures_iter(template)
            .map(|caps| caps[1].to_string())
            .filter(|name| seen.insert(name.clone()))
            .collect()
    }

    /// 模板引用但未提供的变量
    pub fn missing_variables(&self, template: &str, variables: &Map<String, Value>) -> Vec<String> {
        self.extract_variables(template)
            .into_iter()
            .filter(|name| !variables.contains_key(name))
            .collect()
    }
}

/// 字符串原样输出，其余值输出 JSON 文本
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn merge_metadata(base: &Value, overlay: Option<&Value>) -> Value {
    let mut merged = base.as_object().cloned().unwrap_or_default();
    if let Some(Value::Object(overlay)) = overlay {
        for (key, value) in overlay {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn vars(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn template() -> NotificationTemplate {
        let now = Utc::now();
        NotificationTemplate {
            id: Uuid::now_v7(),
            name: "task_due".to_string(),
            title: "Task Due: {{taskName}}".to_string(),
            message: "{{ taskName }} is due {{dueDate}}".to_string(),
            notification_type: NotificationType::Reminder,
            category: NotificationCategory::Task,
            priority: NotificationPriority::High,
            default_channels: vec![DeliveryChannel::InApp, DeliveryChannel::Email],
            variables: vec!["taskName".to_string(), "dueDate".to_string()],
            metadata: json!({"icon": "task", "actionUrl": "/tasks"}),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_render_round_trip() {
        let engine = TemplateEngine::new();
        let variables = vars(json!({"taskName": "Algebra HW", "dueDate": "Friday"}));

        assert_eq!(
            engine.render("Task Due: {{taskName}}", &variables),
            "Task Due: Algebra HW"
        );
    }

    #[test]
    fn test_render_whitespace_and_case() {
        let engine = TemplateEngine::new();
        let variables = vars(json!({"name": "Ada"}));

        assert_eq!(engine.render("Hi {{  name }}", &variables), "Hi Ada");
        assert_eq!(engine.render("Hi {{Name}}", &variables), "Hi {{Name}}");
    }

    #[test]
    fn test_render_missing_variable_kept() {
        let engine = TemplateEngine::new();
        assert_eq!(
            engine.render("你好，{{name}}！", &Map::new()),
            "你好，{{name}}！"
        );
    }

    #[test]
    fn test_render_non_string_values() {
        let engine = TemplateEngine::new();
        let variables = vars(json!({"count": 3, "done": true}));
        assert_eq!(
            engine.render("{{count}} tasks, done={{done}}", &variables),
            "3 tasks, done=true"
        );
    }

    #[test]
    fn test_render_is_literal() {
        let engine = TemplateEngine::new();
        let variables = vars(json!({"a": "{{b}}", "b": "x", "c": "$1"}));
        assert_eq!(engine.render("{{a}} {{c}}", &variables), "{{b}} $1");
    }

    #[test]
    fn test_extract_and_missing_variables() {
        let engine = TemplateEngine::new();
        let text = "{{a}} {{ b }} {{a}}";

        assert_eq!(engine.extract_variables(text), vec!["a", "b"]);
        assert_eq!(
            engine.missing_variables(text, &vars(json!({"a": 1}))),
            vec!["b"]
        );
    }

    #[test]
    fn test_apply_uses_template_defaults() {
        let engine = TemplateEngine::new();
        let variables = json!({"taskName": "Algebra HW", "dueDate": "Friday", "extra": 1});

        let content = engine.apply(&template(), Some(&variables), TemplateOverrides::default());

        assert_eq!(content.title, "Task Due: Algebra HW");
        assert_eq!(content.message, "Algebra HW is due Friday");
        assert_eq!(content.priority, NotificationPriority::High);
        assert_eq!(
            content.channels,
            vec![DeliveryChannel::InApp, DeliveryChannel::Email]
        );
    }

    #[test]
    fn test_apply_request_metadata_wins() {
        let engine = TemplateEngine::new();
        let overrides = TemplateOverrides {
            priority: Some(NotificationPriority::Urgent),
            channels: Some(vec![DeliveryChannel::Push]),
            metadata: Some(json!({"actionUrl": "/tasks/42", "badge": "1"})),
            ..Default::default()
        };

        let content = engine.apply(&template(), None, overrides);

        assert_eq!(content.priority, NotificationPriority::Urgent);
        assert_eq!(content.channels, vec![DeliveryChannel::Push]);
        assert_eq!(
            content.metadata,
            json!({"icon": "task", "actionUrl": "/tasks/42", "badge": "1"})
        );
    }
}
