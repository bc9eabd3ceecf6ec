//! 出站事件发布
//!
//! 生命周期管理器通过 `EventPublisher` 向外广播 `notification:created` 等事件，
//! 供站内实时推送桥接（WebSocket 等）订阅。发布是尽力而为的旁路通道：
//! 发布失败只记录日志，不影响已提交的通知。

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::Result;

/// 出站事件发布端口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, name: &str, payload: Value) -> Result<()>;
}

/// 仅写日志的发布器（无订阅方的部署使用）
#[derive(Debug, Default, Clone)]
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, name: &str, payload: Value) -> Result<()> {
        info!(event = %name, payload = %payload, "发布出站事件");
        Ok(())
    }
}

/// 广播出的事件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedEvent {
    pub name: String,
    pub payload: Value,
}

/// 基于 tokio broadcast 的进程内发布器
///
/// 慢订阅方会丢失最旧的事件（`RecvError::Lagged`），不会阻塞发布方。
#[derive(Debug, Clone)]
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventPublisher {
    async fn publish(&self, name: &str, payload: Value) -> Result<()> {
        let event = PublishedEvent {
            name: name.to_string(),
            payload,
        };
        // 没有订阅方时 send 返回 Err，这不是故障
        match self.sender.send(event) {
            Ok(receivers) => debug!(event = %name, receivers, "事件已广播"),
            Err(_) => debug!(event = %name, "无订阅方，事件已丢弃"),
        }
        Ok(())
    }
}
