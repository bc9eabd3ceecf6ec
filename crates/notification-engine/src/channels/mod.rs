//! 渠道投递
//!
//! 定义投递 Sink trait，并提供各渠道的模拟实现。
//!
//! ## 支持的渠道
//!
//! - **InApp**: 站内信（写库即送达，Sink 仅记录）
//! - **Email**: 邮件
//! - **SMS**: 短信（超长内容截断）
//! - **Push**: App 推送
//!
//! 真实网关接入不在本引擎范围内：Sink 只做单次、同步的投递尝试，
//! 重试策略由网关侧负责。

mod email;
mod in_app;
mod push;
mod registry;
mod sms;

pub use email::EmailSink;
pub use in_app::InAppSink;
pub use push::PushSink;
pub use registry::SinkRegistry;
pub use sms::SmsSink;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::models::{Channel, Notification};

/// 投递回执
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub channel: Channel,
    /// 网关返回的消息 ID
    pub message_id: String,
}

impl DeliveryReceipt {
    pub fn new(channel: Channel, message_id: impl Into<String>) -> Self {
        Self {
            channel,
            message_id: message_id.into(),
        }
    }
}

/// 渠道投递 Sink
///
/// 实现应当无状态，便于并发调用。投递失败返回 `NotificationError::Transport`。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportSink: Send + Sync {
    /// 渠道类型
    fn channel(&self) -> Channel;

    /// Sink 名称（用于日志）
    fn name(&self) -> &str;

    /// 投递通知
    async fn send(&self, notification: &Notification) -> Result<DeliveryReceipt>;
}
