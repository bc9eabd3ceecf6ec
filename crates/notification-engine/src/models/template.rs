//! 通知模板实体与请求定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::enums::{Channel, NotificationType};

/// 通知模板
///
/// 可复用、无版本的消息蓝本。title/content/subject 中出现的每个 `{{name}}`
/// 都必须在 `variables` 中声明（创建和更新时校验）。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTemplate {
    pub id: Uuid,
    pub organization_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub channel: Channel,
    /// 邮件主题（仅 email 渠道有意义）
    #[sqlx(default)]
    pub subject: Option<String>,
    pub title: String,
    pub content: String,
    /// 声明的变量名
    pub variables: Vec<String>,
    pub is_active: bool,
    /// 默认模板：同一 (organization, type, channel) 最多一个，不可删除
    pub is_default: bool,
    #[sqlx(default)]
    pub created_by: Option<String>,
    #[sqlx(default)]
    pub updated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationTemplate {
    /// 是否可被指定组织的通知使用
    pub fn is_usable_by(&self, organization_id: &str) -> bool {
        self.is_active && self.organization_id == organization_id
    }

    /// 所有需要校验变量的模板字符串
    pub fn sources(&self) -> Vec<&str> {
        let mut sources = vec![self.title.as_str(), self.content.as_str()];
        if let Some(subject) = &self.subject {
            sources.push(subject.as_str());
        }
        sources
    }
}

/// 创建模板请求
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateRequest {
    #[validate(length(min = 1, max = 100, message = "模板名称长度必须在 1-100 之间"))]
    pub name: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub channel: Channel,
    #[validate(length(max = 255, message = "主题不能超过 255 个字符"))]
    pub subject: Option<String>,
    #[validate(length(min = 1, max = 255, message = "标题长度必须在 1-255 之间"))]
    pub title: String,
    #[validate(length(min = 1, max = 10000, message = "正文长度必须在 1-10000 之间"))]
    pub content: String,
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub is_default: bool,
    /// 缺省为启用
    pub is_active: Option<bool>,
}

/// 更新模板请求
///
/// 所有字段可选，只更新传入的字段
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTemplateRequest {
    #[validate(length(min = 1, max = 100, message = "模板名称长度必须在 1-100 之间"))]
    pub name: Option<String>,
    #[validate(length(max = 255, message = "主题不能超过 255 个字符"))]
    pub subject: Option<String>,
    #[validate(length(min = 1, max = 255, message = "标题长度必须在 1-255 之间"))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 10000, message = "正文长度必须在 1-10000 之间"))]
    pub content: Option<String>,
    pub variables: Option<Vec<String>>,
    pub is_default: Option<bool>,
}

impl UpdateTemplateRequest {
    /// 是否触及需要重新校验变量的字段
    pub fn touches_body(&self) -> bool {
        self.subject.is_some()
            || self.title.is_some()
            || self.content.is_some()
            || self.variables.is_some()
    }
}

/// 模板列表过滤条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateFilter {
    #[serde(rename = "type")]
    pub notification_type: Option<NotificationType>,
    pub channel: Option<Channel>,
    pub is_active: Option<bool>,
}

impl TemplateFilter {
    pub fn matches(&self, t: &NotificationTemplate) -> bool {
        self.notification_type.is_none_or(|v| t.notification_type == v)
            && self.channel.is_none_or(|v| t.channel == v)
            && self.is_active.is_none_or(|v| t.is_active == v)
    }
}
