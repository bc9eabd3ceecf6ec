//! 领域事件接入
//!
//! 将考核周期、反馈等业务域的事件转换为面向具体用户的通知。
//!
//! | 事件                 | 通知类型             | 渠道             | 收件人              |
//! |----------------------|----------------------|------------------|---------------------|
//! | `cycle:created`      | `cycle_created`      | in_app           | 周期参与者          |
//! | `cycle:activated`    | `cycle_activated`    | in_app + email   | 周期参与者          |
//! | `cycle:closing`      | `cycle_closing`      | in_app           | 周期参与者          |
//! | `cycle:closed`       | `cycle_closed`       | in_app           | 周期参与者          |
//! | `feedback:created`   | `feedback_requested` | in_app           | `giverId`           |
//! | `feedback:submitted` | `feedback_received`  | in_app           | `receiverId`        |
//! | `feedback:reminder`  | `feedback_reminder`  | in_app + email   | `giverId`           |
//!
//! 未知事件只记录警告，不报错；无法确定组织的事件直接跳过。
//! 单个收件人的失败（包括被偏好抑制）只记录日志，不影响其他收件人。

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use feedback_shared::events::{DomainEvent, DomainEventKind};
use feedback_shared::observability::metrics;

use super::lifecycle::NotificationService;
use crate::error::Result;
use crate::models::{Channel, CreateNotificationRequest, NotificationType, Priority, TemplateData};
use crate::repository::{
    NotificationRepositoryTrait, PgNotificationRepository, PgPreferenceRepository,
    PgTemplateRepository, PreferenceRepositoryTrait, TemplateRepositoryTrait,
};

/// 周期参与者查询端口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecipientResolver: Send + Sync {
    async fn cycle_participants(&self, cycle_id: &str, organization_id: &str)
    -> Result<Vec<String>>;
}

/// 进程内登记的参与者名单（本地运行和测试使用）
#[derive(Debug, Default)]
pub struct StaticRecipientResolver {
    participants: DashMap<String, Vec<String>>,
}

impl StaticRecipientResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, cycle_id: impl Into<String>, user_ids: Vec<String>) {
        self.participants.insert(cycle_id.into(), user_ids);
    }
}

#[async_trait]
impl RecipientResolver for StaticRecipientResolver {
    async fn cycle_participants(
        &self,
        cycle_id: &str,
        _organization_id: &str,
    ) -> Result<Vec<String>> {
        Ok(self
            .participants
            .get(cycle_id)
            .map(|v| v.clone())
            .unwrap_or_default())
    }
}

/// 单个事件的处理结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventOutcome {
    pub event: String,
    /// 是否为已知事件且成功解析出组织
    pub handled: bool,
    pub created: usize,
    pub suppressed: usize,
    pub failed: usize,
}

impl EventOutcome {
    fn ignored(event: &str) -> Self {
        Self {
            event: event.to_string(),
            ..Default::default()
        }
    }
}

/// 事件到通知的映射规则
struct Dispatch {
    notification_type: NotificationType,
    channels: &'static [Channel],
    priority: Priority,
    entity: &'static str,
}

impl Dispatch {
    fn for_kind(kind: DomainEventKind) -> Self {
        use DomainEventKind::*;

        const IN_APP: &[Channel] = &[Channel::InApp];
        const IN_APP_EMAIL: &[Channel] = &[Channel::InApp, Channel::Email];

        let (notification_type, channels, priority) = match kind {
            CycleCreated => (NotificationType::CycleCreated, IN_APP, Priority::Normal),
            CycleActivated => (NotificationType::CycleActivated, IN_APP_EMAIL, Priority::Normal),
            CycleClosing => (NotificationType::CycleClosing, IN_APP, Priority::High),
            CycleClosed => (NotificationType::CycleClosed, IN_APP, Priority::Normal),
            FeedbackCreated => (NotificationType::FeedbackRequested, IN_APP, Priority::Normal),
            FeedbackSubmitted => (NotificationType::FeedbackReceived, IN_APP, Priority::Normal),
            FeedbackReminder => (NotificationType::FeedbackReminder, IN_APP_EMAIL, Priority::High),
        };

        Self {
            notification_type,
            channels,
            priority,
            entity: if kind.is_cycle() { "cycle" } else { "feedback" },
        }
    }
}

/// 领域事件处理器
pub struct DomainEventHandler<
    NR = PgNotificationRepository,
    TR = PgTemplateRepository,
    PR = PgPreferenceRepository,
> where
    NR: NotificationRepositoryTrait,
    TR: TemplateRepositoryTrait,
    PR: PreferenceRepositoryTrait,
{
    notifications: Arc<NotificationService<NR, TR, PR>>,
    recipients: Arc<dyn RecipientResolver>,
}

impl<NR, TR, PR> DomainEventHandler<NR, TR, PR>
where
    NR: NotificationRepositoryTrait,
    TR: TemplateRepositoryTrait,
    PR: PreferenceRepositoryTrait,
{
    pub fn new(
        notifications: Arc<NotificationService<NR, TR, PR>>,
        recipients: Arc<dyn RecipientResolver>,
    ) -> Self {
        Self {
            notifications,
            recipients,
        }
    }

    /// 处理一个领域事件，永不返回错误
    #[instrument(skip(self, event), fields(event = %event.name, event_id = %event.event_id))]
    pub async fn on_domain_event(&self, event: &DomainEvent) -> EventOutcome {
        let Some(kind) = event.kind() else {
            warn!("未知的领域事件类型，已忽略");
            metrics::record_domain_event(&event.name, false);
            return EventOutcome::ignored(&event.name);
        };

        let Some(organization_id) = event.organization_id() else {
            warn!("事件缺少 organizationId，跳过处理");
            metrics::record_domain_event(&event.name, false);
            return EventOutcome::ignored(&event.name);
        };

        let dispatch = Dispatch::for_kind(kind);
        let recipients = match self.recipients_for(kind, event, &organization_id).await {
            Ok(recipients) => recipients,
            Err(e) => {
                warn!(error = %e, "收件人解析失败，跳过处理");
                metrics::record_domain_event(&event.name, false);
                return EventOutcome::ignored(&event.name);
            }
        };

        if recipients.is_empty() {
            debug!("事件没有收件人");
        }

        let data = Self::template_data(kind, event);
        let mut defaults = Vec::with_capacity(dispatch.channels.len());
        for channel in dispatch.channels {
            defaults.push((
                *channel,
                self.default_template_id(&organization_id, dispatch.notification_type, *channel)
                    .await,
            ));
        }

        let mut requests = Vec::with_capacity(recipients.len() * defaults.len());
        for user_id in &recipients {
            for (channel, template_id) in &defaults {
                requests.push(Self::build_request(
                    &dispatch,
                    kind,
                    event,
                    user_id,
                    *channel,
                    *template_id,
                    &data,
                ));
            }
        }

        let results = join_all(requests.into_iter().map(|request| {
            let org = organization_id.as_str();
            async move {
                let user_id = request.user_id.clone();
                let channel = request.channel;
                (user_id, channel, self.notifications.create(org, request, None).await)
            }
        }))
        .await;

        let mut outcome = EventOutcome {
            event: event.name.clone(),
            handled: true,
            ..Default::default()
        };
        for (user_id, channel, result) in results {
            match result {
                Ok(_) => outcome.created += 1,
                Err(e) if e.is_suppressed() => {
                    debug!(user_id = %user_id, channel = %channel, "收件人已关闭该通知");
                    outcome.suppressed += 1;
                }
                Err(e) => {
                    warn!(user_id = %user_id, channel = %channel, error = %e, "事件通知创建失败");
                    outcome.failed += 1;
                }
            }
        }

        metrics::record_domain_event(&event.name, true);
        info!(
            organization_id = %organization_id,
            created = outcome.created,
            suppressed = outcome.suppressed,
            failed = outcome.failed,
            "领域事件处理完成"
        );
        outcome
    }

    async fn recipients_for(
        &self,
        kind: DomainEventKind,
        event: &DomainEvent,
        organization_id: &str,
    ) -> Result<Vec<String>> {
        let recipients: Vec<String> = match kind {
            DomainEventKind::FeedbackCreated | DomainEventKind::FeedbackReminder => {
                event.entity_field("feedback", "giverId").into_iter().collect()
            }
            DomainEventKind::FeedbackSubmitted => {
                event.entity_field("feedback", "receiverId").into_iter().collect()
            }
            _ => {
                let listed = participant_ids(event);
                if !listed.is_empty() {
                    listed
                } else if let Some(cycle_id) = event
                    .entity_field("cycle", "id")
                    .or_else(|| event.str_field("cycleId"))
                {
                    self.recipients
                        .cycle_participants(&cycle_id, organization_id)
                        .await?
                } else {
                    warn!("周期事件缺少周期 ID");
                    Vec::new()
                }
            }
        };

        // 去重并保持稳定顺序
        Ok(recipients
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    /// 组织为该 (type, channel) 配置的默认模板；查询失败时退回内置文案
    async fn default_template_id(
        &self,
        organization_id: &str,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Option<Uuid> {
        match self
            .notifications
            .default_template(organization_id, notification_type, channel)
            .await
        {
            Ok(template) => template.map(|t| t.id),
            Err(e) => {
                warn!(channel = %channel, error = %e, "默认模板查询失败，使用内置文案");
                None
            }
        }
    }

    fn build_request(
        dispatch: &Dispatch,
        kind: DomainEventKind,
        event: &DomainEvent,
        user_id: &str,
        channel: Channel,
        template_id: Option<Uuid>,
        data: &TemplateData,
    ) -> CreateNotificationRequest {
        let mut request =
            CreateNotificationRequest::new(user_id, dispatch.notification_type, channel)
                .with_priority(dispatch.priority);
        request = match template_id {
            Some(id) => request.with_template(id),
            None => {
                let (title, content) = default_wording(kind, data);
                request.with_literal(title, content)
            }
        };
        request.data = data.clone();

        if let Some(entity_id) = event.entity_field(dispatch.entity, "id") {
            request = request.related_to(dispatch.entity, entity_id);
        }
        request
    }

    /// 渲染数据：嵌套实体的全部标量字段（camelCase 原样保留）
    fn template_data(kind: DomainEventKind, event: &DomainEvent) -> TemplateData {
        let entity = if kind.is_cycle() { "cycle" } else { "feedback" };
        let mut data = TemplateData::new();

        if let Some(Value::Object(fields)) = event.payload.get(entity) {
            for (key, value) in fields {
                if !value.is_object() && !value.is_array() {
                    data.insert(key.clone(), value.clone());
                }
            }
        }
        if let Some(id) = event.entity_field(entity, "id") {
            data.insert(format!("{}Id", entity), Value::String(id));
        }
        data.insert("event".to_string(), Value::String(event.name.clone()));
        data
    }
}

/// payload 中直接列出的参与者（`participantIds` 或 `cycle.participantIds`）
fn participant_ids(event: &DomainEvent) -> Vec<String> {
    event
        .payload
        .get("participantIds")
        .or_else(|| event.payload.get("cycle").and_then(|c| c.get("participantIds")))
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(|v| match v {
                    Value::String(s) if !s.is_empty() => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// 组织未配置默认模板时使用的文案
fn default_wording(kind: DomainEventKind, data: &TemplateData) -> (String, String) {
    use DomainEventKind::*;

    let name = data
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("考核周期");

    match kind {
        CycleCreated => (
            format!("新的考核周期：{}", name),
            format!("{} 已创建，敬请关注后续安排。", name),
        ),
        CycleActivated => (
            format!("{} 已开始", name),
            format!("{} 已开始，请在截止日期前完成反馈。", name),
        ),
        CycleClosing => (
            format!("{} 即将结束", name),
            format!("{} 即将结束，请尽快提交未完成的反馈。", name),
        ),
        CycleClosed => (
            format!("{} 已结束", name),
            format!("{} 已结束，感谢你的参与。", name),
        ),
        FeedbackCreated => (
            "你有新的反馈请求".to_string(),
            "有同事邀请你提供反馈，请及时处理。".to_string(),
        ),
        FeedbackSubmitted => (
            "你收到了新的反馈".to_string(),
            "有同事为你提交了反馈，点击查看。".to_string(),
        ),
        FeedbackReminder => (
            "反馈提醒".to_string(),
            "你还有待完成的反馈，请尽快提交。".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticRoleOracle;
    use crate::channels::SinkRegistry;
    use crate::models::{NotificationFilter, PageRequest, PreferenceUpdate};
    use crate::preference::{DigestSchedule, PreferenceResolver};
    use crate::publisher::TracingEventPublisher;
    use crate::repository::{
        InMemoryNotificationRepository, InMemoryPreferenceRepository, InMemoryTemplateRepository,
    };
    use serde_json::json;

    type TestService = NotificationService<
        InMemoryNotificationRepository,
        InMemoryTemplateRepository,
        InMemoryPreferenceRepository,
    >;

    fn handler(
        recipients: Arc<dyn RecipientResolver>,
    ) -> (
        DomainEventHandler<
            InMemoryNotificationRepository,
            InMemoryTemplateRepository,
            InMemoryPreferenceRepository,
        >,
        Arc<TestService>,
        Arc<InMemoryNotificationRepository>,
    ) {
        let repo = Arc::new(InMemoryNotificationRepository::new());
        let service = Arc::new(NotificationService::new(
            repo.clone(),
            Arc::new(InMemoryTemplateRepository::new()),
            PreferenceResolver::new(
                Arc::new(InMemoryPreferenceRepository::new()),
                DigestSchedule::default(),
            ),
            SinkRegistry::with_simulated(),
            Arc::new(TracingEventPublisher),
            Arc::new(StaticRoleOracle::nobody()),
        ));
        (
            DomainEventHandler::new(service.clone(), recipients),
            service,
            repo,
        )
    }

    #[tokio::test]
    async fn test_unknown_event_is_ignored() {
        let mut resolver = MockRecipientResolver::new();
        resolver.expect_cycle_participants().never();
        let (handler, _, repo) = handler(Arc::new(resolver));

        let outcome = handler
            .on_domain_event(&DomainEvent::new("goal:created", json!({"organizationId": "org-1"})))
            .await;
        assert!(!outcome.handled);
        assert_eq!(repo.count(), 0);
    }

    #[tokio::test]
    async fn test_missing_organization_is_skipped() {
        let (handler, _, repo) = handler(Arc::new(StaticRecipientResolver::new()));
        let outcome = handler
            .on_domain_event(&DomainEvent::new(
                "feedback:submitted",
                json!({"feedback": {"id": "f1", "receiverId": "u1"}}),
            ))
            .await;
        assert!(!outcome.handled);
        assert_eq!(repo.count(), 0);
    }

    #[tokio::test]
    async fn test_cycle_activated_notifies_participants_on_two_channels() {
        let mut resolver = MockRecipientResolver::new();
        resolver
            .expect_cycle_participants()
            .withf(|cycle_id, org| cycle_id == "c1" && org == "org-1")
            .times(1)
            .returning(|_, _| Ok(vec!["u1".to_string(), "u2".to_string(), "u1".to_string()]));
        let (handler, _, repo) = handler(Arc::new(resolver));

        let outcome = handler
            .on_domain_event(&DomainEvent::new(
                "cycle:activated",
                json!({"cycle": {"id": "c1", "organizationId": "org-1", "name": "2025 Q1"}}),
            ))
            .await;

        assert!(outcome.handled);
        assert_eq!(outcome.created, 4);
        assert_eq!(repo.count(), 4);
    }

    #[tokio::test]
    async fn test_suppressed_recipient_is_counted_not_failed() {
        let (handler, service, _) = handler(Arc::new(StaticRecipientResolver::new()));
        service
            .update_preference(
                "u1",
                "org-1",
                &PreferenceUpdate::new(NotificationType::FeedbackReceived, Channel::InApp)
                    .enabled(false),
            )
            .await
            .unwrap();

        let outcome = handler
            .on_domain_event(&DomainEvent::new(
                "feedback:submitted",
                json!({"organizationId": "org-1", "feedback": {"id": "f1", "receiverId": "u1"}}),
            ))
            .await;
        assert_eq!(outcome.suppressed, 1);
        assert_eq!(outcome.created, 0);
        assert_eq!(outcome.failed, 0);
    }

    #[tokio::test]
    async fn test_feedback_created_uses_giver_and_payload_fields() {
        let (handler, service, _) = handler(Arc::new(StaticRecipientResolver::new()));
        let outcome = handler
            .on_domain_event(&DomainEvent::new(
                "feedback:created",
                json!({
                    "organizationId": "org-1",
                    "feedback": {"id": 42, "giverId": "u7", "receiverId": "u8"}
                }),
            ))
            .await;
        assert_eq!(outcome.created, 1);

        let page = service
            .list("org-1", NotificationFilter::default(), "u7", PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        let n = &page.items[0];
        assert_eq!(n.notification_type, NotificationType::FeedbackRequested);
        assert_eq!(n.related_entity_id.as_deref(), Some("42"));
        assert_eq!(n.data["feedbackId"], "42");
    }
}
