//! Sink 注册表
//!
//! 按渠道分发通知，并记录投递指标。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use feedback_shared::observability::metrics;

use super::{DeliveryReceipt, EmailSink, InAppSink, PushSink, SmsSink, TransportSink};
use crate::error::{NotificationError, Result};
use crate::models::{Channel, Notification};

/// 渠道 Sink 注册表
#[derive(Default, Clone)]
pub struct SinkRegistry {
    sinks: HashMap<Channel, Arc<dyn TransportSink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部模拟 Sink
    pub fn with_simulated() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(InAppSink::new()));
        registry.register(Arc::new(EmailSink::new()));
        registry.register(Arc::new(SmsSink::new()));
        registry.register(Arc::new(PushSink::new()));
        registry
    }

    /// 注册 Sink，同一渠道后注册的覆盖先注册的
    pub fn register(&mut self, sink: Arc<dyn TransportSink>) {
        debug!(channel = %sink.channel(), sink = sink.name(), "注册投递 Sink");
        self.sinks.insert(sink.channel(), sink);
    }

    pub fn with(mut self, sink: Arc<dyn TransportSink>) -> Self {
        self.register(sink);
        self
    }

    pub fn has(&self, channel: Channel) -> bool {
        self.sinks.contains_key(&channel)
    }

    /// 投递到通知所属渠道
    pub async fn dispatch(&self, notification: &Notification) -> Result<DeliveryReceipt> {
        let channel = notification.channel;
        let sink = self.sinks.get(&channel).ok_or_else(|| NotificationError::Transport {
            channel,
            reason: "渠道未注册投递 Sink".to_string(),
        })?;

        let start = Instant::now();
        let result = sink.send(notification).await;
        metrics::record_delivery(channel.as_str(), result.is_ok(), start.elapsed().as_secs_f64());

        if let Err(e) = &result {
            warn!(
                notification_id = %notification.id,
                user_id = %notification.user_id,
                channel = %channel,
                sink = sink.name(),
                error = %e,
                "渠道投递失败"
            );
        }

        // 非 Transport 错误统一折算为投递失败
        result.map_err(|e| match e {
            NotificationError::Transport { .. } => e,
            other => NotificationError::Transport {
                channel,
                reason: other.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::MockTransportSink;
    use crate::models::{NotificationStatus, NotificationType, Priority};
    use chrono::Utc;
    use uuid::Uuid;

    fn notification(channel: Channel) -> Notification {
        let now = Utc::now();
        Notification {
            id: Uuid::now_v7(),
            user_id: "u1".to_string(),
            organization_id: "org-1".to_string(),
            notification_type: NotificationType::FeedbackReceived,
            channel,
            title: "收到新反馈".to_string(),
            content: "张三给了你一条反馈".to_string(),
            data: serde_json::json!({}),
            status: NotificationStatus::Pending,
            priority: Priority::Normal,
            scheduled_for: None,
            sent_at: None,
            read_at: None,
            template_id: None,
            related_entity_type: None,
            related_entity_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_channel() {
        let registry = SinkRegistry::with_simulated();
        for channel in Channel::ALL {
            let receipt = registry.dispatch(&notification(channel)).await.unwrap();
            assert_eq!(receipt.channel, channel);
        }
    }

    #[tokio::test]
    async fn test_missing_sink_is_transport_error() {
        let registry = SinkRegistry::new().with(Arc::new(InAppSink::new()));
        let err = registry.dispatch(&notification(Channel::Sms)).await.unwrap_err();
        assert_eq!(err.error_code(), "TRANSPORT_ERROR");
    }

    #[tokio::test]
    async fn test_sink_errors_become_transport_errors() {
        let mut sink = MockTransportSink::new();
        sink.expect_channel().return_const(Channel::Email);
        sink.expect_name().return_const("failing-email".to_string());
        sink.expect_send()
            .returning(|_| Err(NotificationError::Internal("smtp down".to_string())));

        let registry = SinkRegistry::new().with(Arc::new(sink));
        let err = registry.dispatch(&notification(Channel::Email)).await.unwrap_err();
        match err {
            NotificationError::Transport { channel, reason } => {
                assert_eq!(channel, Channel::Email);
                assert!(reason.contains("smtp down"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
