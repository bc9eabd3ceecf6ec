//! Email 邮件渠道
//!
//! 当前为模拟实现，生产环境需要接入真实的邮件服务。
//! 邮件主题取 `data.subject`（模板渲染结果），缺省使用通知标题。

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use super::{DeliveryReceipt, TransportSink};
use crate::error::Result;
use crate::models::{Channel, Notification};

pub struct EmailSink {
    from_address: String,
}

impl Default for EmailSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EmailSink {
    pub fn new() -> Self {
        Self::with_from("noreply@feedback-platform.local")
    }

    pub fn with_from(from_address: impl Into<String>) -> Self {
        Self {
            from_address: from_address.into(),
        }
    }

    /// 邮件主题
    pub fn subject_of(notification: &Notification) -> &str {
        notification
            .data
            .get("subject")
            .and_then(|v| v.as_str())
            .unwrap_or(&notification.title)
    }
}

#[async_trait]
impl TransportSink for EmailSink {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn name(&self) -> &str {
        "Email"
    }

    async fn send(&self, notification: &Notification) -> Result<DeliveryReceipt> {
        let subject = Self::subject_of(notification);

        debug!(
            notification_id = %notification.id,
            from = %self.from_address,
            subject = %subject,
            body_length = notification.content.len(),
            "邮件发送中..."
        );

        let message_id = format!("email_{}", Uuid::new_v4());

        info!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            message_id = %message_id,
            "邮件发送成功"
        );

        Ok(DeliveryReceipt::new(Channel::Email, message_id))
    }
}
