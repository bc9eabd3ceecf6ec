//! 通知实体与请求定义

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::enums::{Channel, NotificationStatus, NotificationType, Priority};
use crate::error::{NotificationError, Result};

/// 渲染数据（模板变量 + UI 跳转参数）
pub type TemplateData = serde_json::Map<String, serde_json::Value>;

/// 通知
///
/// 一条发给单个用户、单个渠道的消息实例。`content` 为渲染后的正文而非模板源。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub organization_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub channel: Channel,
    pub title: String,
    pub content: String,
    /// 不透明的键值数据，用于渲染和 UI 深链接
    pub data: serde_json::Value,
    pub status: NotificationStatus,
    pub priority: Priority,
    #[sqlx(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub read_at: Option<DateTime<Utc>>,
    /// 来源模板（仅引用）
    #[sqlx(default)]
    pub template_id: Option<Uuid>,
    #[sqlx(default)]
    pub related_entity_type: Option<String>,
    #[sqlx(default)]
    pub related_entity_id: Option<String>,
    /// 最近一次投递失败原因
    #[sqlx(default)]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    /// 在内存中执行状态转换
    ///
    /// 转为 sent 时写入 sent_at，转为 failed 时记录失败原因
    pub fn transition(
        &mut self,
        target: NotificationStatus,
        now: DateTime<Utc>,
        failure_reason: Option<String>,
    ) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(NotificationError::InvalidTransition {
                id: self.id.to_string(),
                from: self.status,
                to: target,
            });
        }

        self.status = target;
        self.updated_at = now;
        match target {
            NotificationStatus::Sent => {
                self.sent_at = Some(now);
                self.failure_reason = None;
            }
            NotificationStatus::Failed => self.failure_reason = failure_reason,
            _ => {}
        }
        Ok(())
    }

    /// 标记已读
    ///
    /// 只有已发送的通知才能被标记为已读；重复调用会刷新 read_at
    pub fn mark_read(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.sent_at.is_none() {
            return Err(NotificationError::Validation(format!(
                "通知尚未发送，不能标记为已读: {}",
                self.id
            )));
        }
        self.read_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}

/// 创建通知请求
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationRequest {
    #[validate(length(min = 1, max = 64, message = "用户 ID 长度必须在 1-64 之间"))]
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub channel: Channel,
    /// 字面标题（无模板或模板不可用时使用）
    #[validate(length(max = 255, message = "标题不能超过 255 个字符"))]
    pub title: Option<String>,
    /// 字面正文
    #[validate(length(max = 10000, message = "正文不能超过 10000 个字符"))]
    pub content: Option<String>,
    #[serde(default)]
    pub data: TemplateData,
    #[serde(default)]
    pub priority: Priority,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub template_id: Option<Uuid>,
    #[validate(length(max = 64))]
    pub related_entity_type: Option<String>,
    #[validate(length(max = 64))]
    pub related_entity_id: Option<String>,
}

impl CreateNotificationRequest {
    pub fn new(
        user_id: impl Into<String>,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            notification_type,
            channel,
            title: None,
            content: None,
            data: TemplateData::new(),
            priority: Priority::default(),
            scheduled_for: None,
            template_id: None,
            related_entity_type: None,
            related_entity_id: None,
        }
    }

    pub fn with_literal(mut self, title: impl Into<String>, content: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self.content = Some(content.into());
        self
    }

    pub fn with_template(mut self, template_id: Uuid) -> Self {
        self.template_id = Some(template_id);
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    pub fn related_to(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.related_entity_type = Some(entity_type.into());
        self.related_entity_id = Some(entity_id.into());
        self
    }
}

/// 通知列表过滤条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationFilter {
    /// 非特权调用方会被强制覆盖为自身 ID
    pub user_id: Option<String>,
    #[serde(rename = "type")]
    pub notification_type: Option<NotificationType>,
    pub channel: Option<Channel>,
    pub status: Option<NotificationStatus>,
    /// true 只看未读，false 只看已读
    pub is_read: Option<bool>,
}

impl NotificationFilter {
    /// 内存过滤（与 SQL WHERE 子句语义一致）
    pub fn matches(&self, n: &Notification) -> bool {
        self.user_id.as_ref().is_none_or(|u| &n.user_id == u)
            && self.notification_type.is_none_or(|t| n.notification_type == t)
            && self.channel.is_none_or(|c| n.channel == c)
            && self.status.is_none_or(|s| n.status == s)
            && self.is_read.is_none_or(|r| n.is_read() == r)
    }
}

/// 统计范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsScope {
    Organization,
    User,
}

/// 通知统计
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStats {
    pub scope: StatsScope,
    pub total: i64,
    pub unread: i64,
    pub by_type: HashMap<NotificationType, i64>,
    pub by_channel: HashMap<Channel, i64>,
    pub by_status: HashMap<NotificationStatus, i64>,
    /// 今日（UTC）发送成功数（含已送达）
    pub sent_today: i64,
    /// 今日（UTC）发送失败数
    pub failed_today: i64,
}

impl NotificationStats {
    pub fn empty(scope: StatsScope) -> Self {
        Self {
            scope,
            total: 0,
            unread: 0,
            by_type: HashMap::new(),
            by_channel: HashMap::new(),
            by_status: HashMap::new(),
            sent_today: 0,
            failed_today: 0,
        }
    }

    /// 累加单条通知（内存仓储使用）
    pub fn accumulate(&mut self, n: &Notification, today_start: DateTime<Utc>) {
        self.total += 1;
        if n.read_at.is_none() && n.sent_at.is_some() {
            self.unread += 1;
        }
        *self.by_type.entry(n.notification_type).or_default() += 1;
        *self.by_channel.entry(n.channel).or_default() += 1;
        *self.by_status.entry(n.status).or_default() += 1;
        if n.sent_at.is_some_and(|t| t >= today_start) {
            self.sent_today += 1;
        }
        if n.status == NotificationStatus::Failed && n.updated_at >= today_start {
            self.failed_today += 1;
        }
    }
}
