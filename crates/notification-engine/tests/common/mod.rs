//! 集成测试公共装配
//!
//! 全部使用内存仓储，不依赖外部服务。

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use notification_engine::{
    Channel, DeliveryReceipt, DigestSchedule, EventPublisher, InMemoryNotificationRepository,
    InMemoryPreferenceRepository, InMemoryTemplateRepository, Notification, NotificationError,
    NotificationService, PreferenceResolver, RoleOracle, SinkRegistry, StaticRoleOracle,
    TemplateService, TracingEventPublisher, TransportSink,
};

pub type Service = NotificationService<
    InMemoryNotificationRepository,
    InMemoryTemplateRepository,
    InMemoryPreferenceRepository,
>;

pub const ORG: &str = "org-1";
pub const ADMIN: &str = "admin-1";

/// 标题包含 `boom` 时投递失败的站内信 Sink
pub struct FlakyInAppSink;

#[async_trait]
impl TransportSink for FlakyInAppSink {
    fn channel(&self) -> Channel {
        Channel::InApp
    }

    fn name(&self) -> &str {
        "FlakyInApp"
    }

    async fn send(&self, notification: &Notification) -> notification_engine::Result<DeliveryReceipt> {
        if notification.title.contains("boom") {
            return Err(NotificationError::Transport {
                channel: Channel::InApp,
                reason: "gateway rejected".to_string(),
            });
        }
        Ok(DeliveryReceipt::new(
            Channel::InApp,
            format!("in_app_{}", Uuid::new_v4()),
        ))
    }
}

pub struct Harness {
    pub service: Arc<Service>,
    pub templates: TemplateService<InMemoryTemplateRepository>,
    pub notification_repo: Arc<InMemoryNotificationRepository>,
    pub template_repo: Arc<InMemoryTemplateRepository>,
    pub preference_repo: Arc<InMemoryPreferenceRepository>,
}

pub struct HarnessBuilder {
    sinks: SinkRegistry,
    publisher: Arc<dyn EventPublisher>,
    roles: Arc<dyn RoleOracle>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            sinks: SinkRegistry::with_simulated(),
            publisher: Arc::new(TracingEventPublisher),
            roles: Arc::new(StaticRoleOracle::new([ADMIN])),
        }
    }

    pub fn flaky_in_app(mut self) -> Self {
        self.sinks = self.sinks.with(Arc::new(FlakyInAppSink));
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn build(self) -> Harness {
        let notification_repo = Arc::new(InMemoryNotificationRepository::new());
        let template_repo = Arc::new(InMemoryTemplateRepository::new());
        let preference_repo = Arc::new(InMemoryPreferenceRepository::new());

        let service = Arc::new(NotificationService::new(
            notification_repo.clone(),
            template_repo.clone(),
            PreferenceResolver::new(preference_repo.clone(), DigestSchedule::default()),
            self.sinks,
            self.publisher,
            self.roles,
        ));

        Harness {
            service,
            templates: TemplateService::new(template_repo.clone()),
            notification_repo,
            template_repo,
            preference_repo,
        }
    }
}

pub fn harness() -> Harness {
    HarnessBuilder::new().build()
}
