//! 站内信渠道
//!
//! 站内信在通知落库后即对用户可见，Sink 只负责记录投递并生成回执。

use async_trait::async_trait;
use tracing::debug;

use super::{DeliveryReceipt, TransportSink};
use crate::error::Result;
use crate::models::{Channel, Notification};

#[derive(Debug, Default)]
pub struct InAppSink;

impl InAppSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportSink for InAppSink {
    fn channel(&self) -> Channel {
        Channel::InApp
    }

    fn name(&self) -> &str {
        "InApp"
    }

    async fn send(&self, notification: &Notification) -> Result<DeliveryReceipt> {
        debug!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            "站内信已投递"
        );
        Ok(DeliveryReceipt::new(
            Channel::InApp,
            format!("in_app_{}", notification.id),
        ))
    }
}
