//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于服务层依赖抽象而非具体实现，支持 mock 测试

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Channel, Notification, NotificationFilter, NotificationPreference, NotificationStats,
    NotificationStatus, NotificationTemplate, NotificationType, PageRequest, TemplateFilter,
};

/// 通知仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationRepositoryTrait: Send + Sync {
    /// 写入一条完整的通知记录
    async fn insert(&self, notification: &Notification) -> Result<()>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Notification>>;

    /// 分页查询，返回 (当前页, 总数)，按创建时间倒序
    async fn list(
        &self,
        organization_id: &str,
        filter: &NotificationFilter,
        page: PageRequest,
    ) -> Result<(Vec<Notification>, i64)>;

    /// 条件更新状态（仅当当前状态为 expected 时生效），返回是否更新成功
    ///
    /// 转为 sent 时写入 sent_at，转为 failed 时写入 failure_reason
    async fn update_status(
        &self,
        id: Uuid,
        expected: NotificationStatus,
        target: NotificationStatus,
        at: DateTime<Utc>,
        failure_reason: Option<String>,
    ) -> Result<bool>;

    /// 写入 read_at（仅对已发送的通知生效）
    async fn mark_read(&self, id: Uuid, read_at: DateTime<Utc>) -> Result<bool>;

    /// 将用户所有已发送未读的通知标为已读，返回影响行数
    async fn mark_all_read(&self, user_id: &str, read_at: DateTime<Utc>) -> Result<u64>;

    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// 查询已到期的定时通知（status = scheduled 且 scheduled_for <= now）
    async fn find_due_scheduled(&self, now: DateTime<Utc>, limit: i64)
    -> Result<Vec<Notification>>;

    async fn count_unread(&self, user_id: &str) -> Result<i64>;

    /// 聚合统计；user_id 为 None 时统计整个组织
    async fn stats(
        &self,
        organization_id: &str,
        user_id: Option<String>,
        today_start: DateTime<Utc>,
    ) -> Result<NotificationStats>;
}

/// 模板仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemplateRepositoryTrait: Send + Sync {
    async fn insert(&self, template: &NotificationTemplate) -> Result<()>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<NotificationTemplate>>;

    async fn find_by_name(
        &self,
        organization_id: &str,
        name: &str,
    ) -> Result<Option<NotificationTemplate>>;

    async fn list(
        &self,
        organization_id: &str,
        filter: &TemplateFilter,
    ) -> Result<Vec<NotificationTemplate>>;

    async fn update(&self, template: &NotificationTemplate) -> Result<()>;

    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// 查找 (organization, type, channel) 的启用中的默认模板
    async fn find_default(
        &self,
        organization_id: &str,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<Option<NotificationTemplate>>;

    /// 清除同一槽位下其他模板的默认标记，返回影响行数
    async fn clear_default(
        &self,
        organization_id: &str,
        notification_type: NotificationType,
        channel: Channel,
        except: Uuid,
    ) -> Result<u64>;
}

/// 偏好仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PreferenceRepositoryTrait: Send + Sync {
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<NotificationPreference>>;

    async fn find(
        &self,
        user_id: &str,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<Option<NotificationPreference>>;

    /// 批量写入默认偏好，已存在的 (user, type, channel) 跳过，返回实际插入行数
    async fn insert_missing(&self, preferences: &[NotificationPreference]) -> Result<u64>;

    /// 按 (user, type, channel) 写入或覆盖，返回持久化后的记录
    async fn upsert(&self, preference: &NotificationPreference) -> Result<NotificationPreference>;

    async fn delete(
        &self,
        user_id: &str,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<bool>;
}
