//! SMS 短信渠道
//!
//! 当前为模拟实现，生产环境需要接入真实的短信服务。
//! 短信有字数限制，超长内容会被截断。

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use super::{DeliveryReceipt, TransportSink};
use crate::error::Result;
use crate::models::{Channel, Notification};

/// 标准短信长度（字符数）
const DEFAULT_MAX_LENGTH: usize = 70;

pub struct SmsSink {
    max_content_length: usize,
}

impl Default for SmsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl SmsSink {
    pub fn new() -> Self {
        Self {
            max_content_length: DEFAULT_MAX_LENGTH,
        }
    }

    /// 截断过长的内容
    pub fn truncate_content(&self, content: &str) -> String {
        let chars: Vec<char> = content.chars().collect();
        if chars.len() <= self.max_content_length {
            content.to_string()
        } else {
            let truncated: String = chars[..self.max_content_length - 3].iter().collect();
            format!("{}...", truncated)
        }
    }
}

#[async_trait]
impl TransportSink for SmsSink {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn name(&self) -> &str {
        "SMS"
    }

    async fn send(&self, notification: &Notification) -> Result<DeliveryReceipt> {
        let content = self.truncate_content(&notification.content);

        debug!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            content_length = content.chars().count(),
            "SMS 发送中..."
        );

        let message_id = format!("sms_{}", Uuid::new_v4());

        info!(
            notification_id = %notification.id,
            message_id = %message_id,
            "SMS 发送成功"
        );

        Ok(DeliveryReceipt::new(Channel::Sms, message_id))
    }
}
