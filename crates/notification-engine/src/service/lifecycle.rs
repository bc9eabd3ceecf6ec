//! 通知生命周期服务
//!
//! 负责通知从创建到送达的完整流程：
//! - 偏好决策（抑制 / 延后 / 立即投递）
//! - 模板解析与渲染（显式模板 -> 字面内容 -> 组织默认模板）
//! - 立即投递或转入定时队列
//! - 已读、取消、删除、送达确认等状态维护
//! - 列表与统计（非特权调用方只能看到自己的通知）
//!
//! ## 创建流程
//!
//! 1. 请求校验 -> 2. 偏好决策（抑制直接返回错误，不落库）
//!    -> 3. 模板解析与渲染 -> 4. 需要延后则以 scheduled 落库
//!    -> 5. 否则先调用渠道 Sink，再以最终状态（sent/failed）一次性落库
//!    -> 6. 发布 `notification:created`（与投递结果无关）
//!
//! 第 5 步先投递后落库，数据库中不会出现"永远 pending"的孤儿记录。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use feedback_shared::events::names;
use feedback_shared::observability::metrics;

use crate::auth::RoleOracle;
use crate::channels::SinkRegistry;
use crate::error::{NotificationError, Result};
use crate::models::{
    Channel, CreateNotificationRequest, Notification, NotificationFilter, NotificationPreference,
    NotificationSettings, NotificationStats, NotificationStatus, NotificationTemplate,
    NotificationType, Page, PageRequest, PreferenceUpdate,
};
use crate::preference::{BulkPreferenceResult, DeliveryDecision, PreferenceResolver};
use crate::publisher::EventPublisher;
use crate::repository::{
    NotificationRepositoryTrait, PgNotificationRepository, PgPreferenceRepository,
    PgTemplateRepository, PreferenceRepositoryTrait, TemplateRepositoryTrait,
};
use crate::template::render_template;

/// 渲染完成、待落库的消息内容
#[derive(Debug, Clone)]
struct ComposedMessage {
    title: String,
    content: String,
    subject: Option<String>,
    template_id: Option<Uuid>,
}

/// 通知生命周期服务
pub struct NotificationService<
    NR = PgNotificationRepository,
    TR = PgTemplateRepository,
    PR = PgPreferenceRepository,
> where
    NR: NotificationRepositoryTrait,
    TR: TemplateRepositoryTrait,
    PR: PreferenceRepositoryTrait,
{
    notifications: Arc<NR>,
    templates: Arc<TR>,
    preferences: PreferenceResolver<PR>,
    sinks: SinkRegistry,
    publisher: Arc<dyn EventPublisher>,
    roles: Arc<dyn RoleOracle>,
}

impl<NR, TR, PR> NotificationService<NR, TR, PR>
where
    NR: NotificationRepositoryTrait,
    TR: TemplateRepositoryTrait,
    PR: PreferenceRepositoryTrait,
{
    pub fn new(
        notifications: Arc<NR>,
        templates: Arc<TR>,
        preferences: PreferenceResolver<PR>,
        sinks: SinkRegistry,
        publisher: Arc<dyn EventPublisher>,
        roles: Arc<dyn RoleOracle>,
    ) -> Self {
        Self {
            notifications,
            templates,
            preferences,
            sinks,
            publisher,
            roles,
        }
    }

    pub fn preferences(&self) -> &PreferenceResolver<PR> {
        &self.preferences
    }

    // ------------------------------------------------------------------
    // 创建与投递
    // ------------------------------------------------------------------

    /// 创建通知
    ///
    /// 被偏好抑制时返回 `Suppressed` 且不落库；立即投递失败时记录以 failed
    /// 状态落库后返回 `Transport` 错误。
    #[instrument(
        skip(self, request),
        fields(
            organization_id = %organization_id,
            user_id = %request.user_id,
            notification_type = %request.notification_type,
            channel = %request.channel
        )
    )]
    pub async fn create(
        &self,
        organization_id: &str,
        request: CreateNotificationRequest,
        actor_id: Option<&str>,
    ) -> Result<Notification> {
        request.validate()?;
        let now = Utc::now();

        let decision = self
            .preferences
            .decide(
                &request.user_id,
                organization_id,
                request.notification_type,
                request.channel,
                request.priority,
                now,
            )
            .await?;

        let deferred_until = match decision {
            DeliveryDecision::Suppress(reason) => {
                metrics::record_notification_suppressed(
                    request.notification_type.as_str(),
                    request.channel.as_str(),
                    reason.as_str(),
                );
                info!(reason = reason.as_str(), "通知被用户偏好抑制");
                return Err(NotificationError::Suppressed {
                    user_id: request.user_id,
                    notification_type: request.notification_type,
                    channel: request.channel,
                    reason: reason.as_str().to_string(),
                });
            }
            DeliveryDecision::Defer { until, reason } => {
                debug!(until = %until, reason = ?reason, "通知按偏好延后投递");
                Some(until)
            }
            DeliveryDecision::Deliver => None,
        };

        let composed = self.compose(organization_id, &request).await?;
        let mut notification = Self::build(organization_id, request, composed, now);

        // 调用方指定的时间和偏好延后取较晚者
        let requested = notification.scheduled_for.filter(|at| *at > now);
        let release_at = match (requested, deferred_until) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        let delivery = match release_at {
            Some(at) => {
                notification.status = NotificationStatus::Scheduled;
                notification.scheduled_for = Some(at);
                Ok(())
            }
            None => self.deliver_new(&mut notification, now).await,
        };

        self.notifications.insert(&notification).await?;
        metrics::record_notification_created(
            notification.notification_type.as_str(),
            notification.channel.as_str(),
            notification.status.as_str(),
        );
        info!(
            notification_id = %notification.id,
            status = %notification.status,
            actor_id = actor_id.unwrap_or("system"),
            "通知已创建"
        );

        self.publish_created(&notification).await;

        delivery.map(|_| notification)
    }

    /// 对尚未落库的通知执行首次投递，结果写回内存中的状态
    async fn deliver_new(&self, notification: &mut Notification, now: DateTime<Utc>) -> Result<()> {
        match self.sinks.dispatch(notification).await {
            Ok(receipt) => {
                debug!(message_id = %receipt.message_id, "渠道投递成功");
                notification.transition(NotificationStatus::Sent, now, None)
            }
            Err(e) => {
                notification.transition(NotificationStatus::Failed, now, Some(e.to_string()))?;
                Err(e)
            }
        }
    }

    /// 投递一条已落库的待发通知（定时队列使用）
    ///
    /// 成功后以条件更新转为 sent；Sink 失败时转为 failed 并返回 `Transport` 错误。
    /// 若通知状态已被其他写入方改变，返回 `InvalidTransition` 且不调用 Sink。
    #[instrument(skip(self, notification), fields(notification_id = %notification.id, channel = %notification.channel))]
    pub async fn process(&self, notification: &Notification) -> Result<Notification> {
        let expected = notification.status;
        if !expected.is_awaiting_delivery() {
            return Err(NotificationError::InvalidTransition {
                id: notification.id.to_string(),
                from: expected,
                to: NotificationStatus::Sent,
            });
        }

        let mut updated = notification.clone();
        let now = Utc::now();

        match self.sinks.dispatch(notification).await {
            Ok(_) => {
                updated.transition(NotificationStatus::Sent, now, None)?;
                self.commit_transition(&updated, expected).await?;
                info!("定时通知已发送");
                Ok(updated)
            }
            Err(e) => {
                let reason = e.to_string();
                updated.transition(NotificationStatus::Failed, now, Some(reason))?;
                self.commit_transition(&updated, expected).await?;
                Err(e)
            }
        }
    }

    /// 以条件更新持久化已在内存中完成的状态转换
    async fn commit_transition(
        &self,
        updated: &Notification,
        expected: NotificationStatus,
    ) -> Result<()> {
        let applied = self
            .notifications
            .update_status(
                updated.id,
                expected,
                updated.status,
                updated.updated_at,
                updated.failure_reason.clone(),
            )
            .await?;

        if !applied {
            warn!(
                notification_id = %updated.id,
                expected = %expected,
                target = %updated.status,
                "通知状态已被并发修改，放弃本次转换"
            );
            return Err(NotificationError::InvalidTransition {
                id: updated.id.to_string(),
                from: expected,
                to: updated.status,
            });
        }
        Ok(())
    }

    /// 已到期的定时通知
    pub async fn due_scheduled(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>> {
        self.notifications.find_due_scheduled(now, limit).await
    }

    // ------------------------------------------------------------------
    // 查询
    // ------------------------------------------------------------------

    /// 查看单条通知（所有者或组织管理员）
    pub async fn get(
        &self,
        organization_id: &str,
        id: Uuid,
        requester_id: &str,
    ) -> Result<Notification> {
        let notification = self.load(organization_id, id).await?;
        if !notification.is_owned_by(requester_id)
            && !self.is_privileged(requester_id, organization_id).await?
        {
            return Err(NotificationError::forbidden("查看他人的通知"));
        }
        Ok(notification)
    }

    /// 分页列表
    ///
    /// 非特权调用方的 user_id 过滤条件被强制为自身
    #[instrument(skip(self, filter), fields(organization_id = %organization_id, requester_id = %requester_id))]
    pub async fn list(
        &self,
        organization_id: &str,
        mut filter: NotificationFilter,
        requester_id: &str,
        page: PageRequest,
    ) -> Result<Page<Notification>> {
        if !self.is_privileged(requester_id, organization_id).await? {
            if filter.user_id.as_deref().is_some_and(|u| u != requester_id) {
                debug!(requested = ?filter.user_id, "非特权调用方，忽略 user_id 过滤条件");
            }
            filter.user_id = Some(requester_id.to_string());
        }

        let (items, total) = self
            .notifications
            .list(organization_id, &filter, page)
            .await?;
        Ok(Page::new(items, total, page))
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<i64> {
        self.notifications.count_unread(user_id).await
    }

    /// 统计：管理员获得组织维度，其他人只获得自己的数据
    pub async fn stats(&self, organization_id: &str, requester_id: &str) -> Result<NotificationStats> {
        let today_start = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .unwrap_or_else(Utc::now);

        let user_filter = if self.is_privileged(requester_id, organization_id).await? {
            None
        } else {
            Some(requester_id.to_string())
        };

        let stats = self
            .notifications
            .stats(organization_id, user_filter, today_start)
            .await?;
        debug!(scope = ?stats.scope, total = stats.total, "通知统计完成");
        Ok(stats)
    }

    // ------------------------------------------------------------------
    // 状态维护
    // ------------------------------------------------------------------

    /// 标记已读（仅所有者）
    ///
    /// 已读的通知再次标记会刷新 read_at
    #[instrument(skip(self), fields(notification_id = %id, requester_id = %requester_id))]
    pub async fn mark_as_read(&self, id: Uuid, requester_id: &str) -> Result<Notification> {
        let mut notification = self
            .notifications
            .find_by_id(id)
            .await?
            .ok_or_else(|| NotificationError::not_found("Notification", id))?;

        if !notification.is_owned_by(requester_id) {
            return Err(NotificationError::forbidden("标记他人的通知为已读"));
        }

        let now = Utc::now();
        notification.mark_read(now)?;
        if !self.notifications.mark_read(id, now).await? {
            return Err(NotificationError::Validation(format!(
                "通知尚未发送，不能标记为已读: {}",
                id
            )));
        }
        Ok(notification)
    }

    /// 全部标记已读，返回影响条数
    pub async fn mark_all_as_read(&self, user_id: &str) -> Result<u64> {
        let count = self.notifications.mark_all_read(user_id, Utc::now()).await?;
        info!(user_id = %user_id, count, "已全部标记为已读");
        Ok(count)
    }

    /// 删除通知（所有者或组织管理员；已取消的通知不可删除）
    #[instrument(skip(self), fields(notification_id = %id, requester_id = %requester_id))]
    pub async fn delete(&self, organization_id: &str, id: Uuid, requester_id: &str) -> Result<()> {
        let notification = self.load(organization_id, id).await?;

        if !notification.is_owned_by(requester_id)
            && !self.is_privileged(requester_id, organization_id).await?
        {
            return Err(NotificationError::forbidden("删除他人的通知"));
        }
        if !notification.status.is_deletable() {
            return Err(NotificationError::Validation(format!(
                "通知状态为 {}，不可删除",
                notification.status
            )));
        }

        if !self.notifications.delete(id).await? {
            return Err(NotificationError::not_found("Notification", id));
        }
        info!("通知已删除");
        Ok(())
    }

    /// 取消尚未投递的通知
    #[instrument(skip(self), fields(notification_id = %id, requester_id = %requester_id))]
    pub async fn cancel(
        &self,
        organization_id: &str,
        id: Uuid,
        requester_id: &str,
    ) -> Result<Notification> {
        let mut notification = self.load(organization_id, id).await?;

        if !notification.is_owned_by(requester_id)
            && !self.is_privileged(requester_id, organization_id).await?
        {
            return Err(NotificationError::forbidden("取消他人的通知"));
        }

        let expected = notification.status;
        notification.transition(NotificationStatus::Cancelled, Utc::now(), None)?;
        self.commit_transition(&notification, expected).await?;
        info!("通知已取消");
        Ok(notification)
    }

    /// 接收渠道送达确认
    pub async fn mark_delivered(&self, id: Uuid) -> Result<Notification> {
        let mut notification = self
            .notifications
            .find_by_id(id)
            .await?
            .ok_or_else(|| NotificationError::not_found("Notification", id))?;

        let expected = notification.status;
        notification.transition(NotificationStatus::Delivered, Utc::now(), None)?;
        self.commit_transition(&notification, expected).await?;
        debug!(notification_id = %id, "通知已送达");
        Ok(notification)
    }

    // ------------------------------------------------------------------
    // 偏好
    // ------------------------------------------------------------------

    pub async fn get_preferences(
        &self,
        user_id: &str,
        organization_id: &str,
    ) -> Result<Vec<NotificationPreference>> {
        self.preferences.resolve(user_id, organization_id).await
    }

    pub async fn get_settings(
        &self,
        user_id: &str,
        organization_id: &str,
    ) -> Result<NotificationSettings> {
        self.preferences.summarize(user_id, organization_id).await
    }

    pub async fn update_preference(
        &self,
        user_id: &str,
        organization_id: &str,
        update: &PreferenceUpdate,
    ) -> Result<NotificationPreference> {
        self.preferences
            .update_preference(user_id, organization_id, update)
            .await
    }

    pub async fn update_preferences(
        &self,
        user_id: &str,
        organization_id: &str,
        updates: &[PreferenceUpdate],
    ) -> Result<BulkPreferenceResult> {
        self.preferences
            .update_bulk(user_id, organization_id, updates)
            .await
    }

    pub async fn delete_preference(
        &self,
        user_id: &str,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<()> {
        self.preferences
            .delete_preference(user_id, notification_type, channel)
            .await
    }

    // ------------------------------------------------------------------
    // 内部
    // ------------------------------------------------------------------

    async fn is_privileged(&self, user_id: &str, organization_id: &str) -> Result<bool> {
        self.roles.is_privileged(user_id, organization_id).await
    }

    /// 加载通知，其他组织的通知按不存在处理
    async fn load(&self, organization_id: &str, id: Uuid) -> Result<Notification> {
        self.notifications
            .find_by_id(id)
            .await?
            .filter(|n| n.organization_id == organization_id)
            .ok_or_else(|| NotificationError::not_found("Notification", id))
    }

    /// (type, channel) 的启用中默认模板
    pub async fn default_template(
        &self,
        organization_id: &str,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<Option<NotificationTemplate>> {
        self.templates
            .find_default(organization_id, notification_type, channel)
            .await
    }

    /// 确定标题与正文
    ///
    /// 顺序：可用的指定模板 → 请求中的标题和正文 → 组织默认模板
    async fn compose(
        &self,
        organization_id: &str,
        request: &CreateNotificationRequest,
    ) -> Result<ComposedMessage> {
        if let Some(template_id) = request.template_id {
            match self.templates.find_by_id(template_id).await? {
                Some(template) if template.is_usable_by(organization_id) => {
                    return Ok(Self::from_template(&template, request));
                }
                Some(_) => warn!(template_id = %template_id, "模板已停用或不属于该组织，忽略"),
                None => warn!(template_id = %template_id, "模板不存在，忽略"),
            }
        }

        if let (Some(title), Some(content)) = (&request.title, &request.content) {
            return Ok(ComposedMessage {
                title: title.clone(),
                content: content.clone(),
                subject: None,
                template_id: None,
            });
        }

        // 调用方未提供文案时才使用组织默认模板
        if let Some(template) = self
            .default_template(organization_id, request.notification_type, request.channel)
            .await?
        {
            debug!(template_id = %template.id, "使用组织默认模板");
            return Ok(Self::from_template(&template, request));
        }

        Err(NotificationError::Validation(
            "缺少可用模板，且未提供标题和正文".to_string(),
        ))
    }

    fn from_template(
        template: &NotificationTemplate,
        request: &CreateNotificationRequest,
    ) -> ComposedMessage {
        let rendered = render_template(template, &request.data);
        ComposedMessage {
            title: rendered.title,
            content: rendered.content,
            subject: rendered.subject,
            template_id: Some(template.id),
        }
    }

    fn build(
        organization_id: &str,
        request: CreateNotificationRequest,
        composed: ComposedMessage,
        now: DateTime<Utc>,
    ) -> Notification {
        let mut data = request.data;
        if let Some(subject) = composed.subject {
            data.insert("subject".to_string(), Value::String(subject));
        }

        Notification {
            id: Uuid::now_v7(),
            user_id: request.user_id,
            organization_id: organization_id.to_string(),
            notification_type: request.notification_type,
            channel: request.channel,
            title: composed.title,
            content: composed.content,
            data: Value::Object(data),
            status: NotificationStatus::Pending,
            priority: request.priority,
            scheduled_for: request.scheduled_for,
            sent_at: None,
            read_at: None,
            template_id: composed.template_id,
            related_entity_type: request.related_entity_type,
            related_entity_id: request.related_entity_id,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 发布创建事件；失败只记录日志
    async fn publish_created(&self, notification: &Notification) {
        let payload = match serde_json::to_value(notification) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(notification_id = %notification.id, error = %e, "通知事件序列化失败");
                return;
            }
        };

        if let Err(e) = self
            .publisher
            .publish(names::NOTIFICATION_CREATED, payload)
            .await
        {
            warn!(notification_id = %notification.id, error = %e, "通知事件发布失败");
        }
    }
}
