//! App 推送渠道
//!
//! 当前为模拟实现。推送正文较短，使用标题作为通知栏文字。

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::{DeliveryReceipt, TransportSink};
use crate::error::Result;
use crate::models::{Channel, Notification};

#[derive(Debug, Default)]
pub struct PushSink;

impl PushSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportSink for PushSink {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    fn name(&self) -> &str {
        "Push"
    }

    async fn send(&self, notification: &Notification) -> Result<DeliveryReceipt> {
        let message_id = format!("push_{}", Uuid::new_v4());

        info!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            title = %notification.title,
            message_id = %message_id,
            "推送发送成功"
        );

        Ok(DeliveryReceipt::new(Channel::Push, message_id))
    }
}
