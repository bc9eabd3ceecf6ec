//! 领域事件模型
//!
//! 定义反馈平台各业务域（考核周期、反馈）向通知引擎投递的事件信封格式、
//! 已知事件名称，以及从不透明的 payload 中提取组织和实体引用的辅助方法。
//!
//! 事件名称采用 `域:动作` 格式（如 `cycle:activated`）。引擎必须对未知事件
//! 保持向前兼容，因此事件名以字符串承载，`DomainEventKind` 只覆盖已知集合。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 事件名称常量
pub mod names {
    pub const CYCLE_CREATED: &str = "cycle:created";
    pub const CYCLE_ACTIVATED: &str = "cycle:activated";
    pub const CYCLE_CLOSING: &str = "cycle:closing";
    pub const CYCLE_CLOSED: &str = "cycle:closed";
    pub const FEEDBACK_CREATED: &str = "feedback:created";
    pub const FEEDBACK_SUBMITTED: &str = "feedback:submitted";
    pub const FEEDBACK_REMINDER: &str = "feedback:reminder";

    /// 通知创建完成后对外广播的事件（供实时 UI 等观察者订阅）
    pub const NOTIFICATION_CREATED: &str = "notification:created";
}

// ---------------------------------------------------------------------------
// 已知事件类型
// ---------------------------------------------------------------------------

/// 已知的领域事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainEventKind {
    CycleCreated,
    CycleActivated,
    CycleClosing,
    CycleClosed,
    FeedbackCreated,
    FeedbackSubmitted,
    FeedbackReminder,
}

impl DomainEventKind {
    /// 按事件名称解析，未知名称返回 None
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            names::CYCLE_CREATED => Some(Self::CycleCreated),
            names::CYCLE_ACTIVATED => Some(Self::CycleActivated),
            names::CYCLE_CLOSING => Some(Self::CycleClosing),
            names::CYCLE_CLOSED => Some(Self::CycleClosed),
            names::FEEDBACK_CREATED => Some(Self::FeedbackCreated),
            names::FEEDBACK_SUBMITTED => Some(Self::FeedbackSubmitted),
            names::FEEDBACK_REMINDER => Some(Self::FeedbackReminder),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CycleCreated => names::CYCLE_CREATED,
            Self::CycleActivated => names::CYCLE_ACTIVATED,
            Self::CycleClosing => names::CYCLE_CLOSING,
            Self::CycleClosed => names::CYCLE_CLOSED,
            Self::FeedbackCreated => names::FEEDBACK_CREATED,
            Self::FeedbackSubmitted => names::FEEDBACK_SUBMITTED,
            Self::FeedbackReminder => names::FEEDBACK_REMINDER,
        }
    }

    /// 周期类事件，收件人为周期参与者
    pub fn is_cycle(&self) -> bool {
        matches!(
            self,
            Self::CycleCreated | Self::CycleActivated | Self::CycleClosing | Self::CycleClosed
        )
    }

    /// 反馈类事件，收件人直接来自 payload
    pub fn is_feedback(&self) -> bool {
        matches!(
            self,
            Self::FeedbackCreated | Self::FeedbackSubmitted | Self::FeedbackReminder
        )
    }
}

impl std::fmt::Display for DomainEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// 事件信封
// ---------------------------------------------------------------------------

/// 领域事件信封
///
/// payload 对通知引擎是不透明的：引擎只读取 `organizationId` 以及嵌套实体
/// （`cycle`、`feedback`）中的引用字段，不校验其余结构。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    /// 事件唯一标识（UUID v7）
    pub event_id: String,
    /// 事件名称，如 `cycle:activated`
    pub name: String,
    /// 业务数据
    pub payload: serde_json::Value,
    /// 事件发生时间
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::now_v7().to_string(),
            name: name.into(),
            payload,
            occurred_at: Utc::now(),
        }
    }

    /// 解析为已知事件类型
    pub fn kind(&self) -> Option<DomainEventKind> {
        DomainEventKind::from_name(&self.name)
    }

    /// 提取组织 ID
    ///
    /// 依次尝试顶层 `organizationId`，以及 `cycle`、`feedback` 嵌套对象中的同名字段
    pub fn organization_id(&self) -> Option<String> {
        self.str_field("organizationId")
            .or_else(|| self.nested_str("cycle", "organizationId"))
            .or_else(|| self.nested_str("feedback", "organizationId"))
    }

    /// 读取顶层字符串字段
    pub fn str_field(&self, key: &str) -> Option<String> {
        self.payload.get(key).and_then(value_as_id)
    }

    /// 读取嵌套对象中的字符串字段，如 `feedback.receiverId`
    pub fn nested_str(&self, entity: &str, key: &str) -> Option<String> {
        self.payload
            .get(entity)
            .and_then(|e| e.get(key))
            .and_then(value_as_id)
    }

    /// 读取嵌套实体（或顶层）字段，嵌套优先
    pub fn entity_field(&self, entity: &str, key: &str) -> Option<String> {
        self.nested_str(entity, key).or_else(|| self.str_field(key))
    }
}

/// 标识符既可能是字符串也可能是数字，统一转为字符串；空串视为缺失
fn value_as_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_from_name() {
        assert_eq!(
            DomainEventKind::from_name("cycle:activated"),
            Some(DomainEventKind::CycleActivated)
        );
        assert_eq!(
            DomainEventKind::from_name("feedback:submitted"),
            Some(DomainEventKind::FeedbackSubmitted)
        );
        assert_eq!(DomainEventKind::from_name("goal:created"), None);
        assert!(DomainEventKind::CycleClosed.is_cycle());
        assert!(DomainEventKind::FeedbackReminder.is_feedback());
        assert!(!DomainEventKind::FeedbackCreated.is_cycle());
    }

    #[test]
    fn test_organization_id_extraction() {
        let top = DomainEvent::new("cycle:created", json!({"organizationId": "org-1"}));
        assert_eq!(top.organization_id(), Some("org-1".to_string()));

        let nested = DomainEvent::new(
            "feedback:submitted",
            json!({"feedback": {"organizationId": "org-2", "receiverId": "u-9"}}),
        );
        assert_eq!(nested.organization_id(), Some("org-2".to_string()));
        assert_eq!(
            nested.entity_field("feedback", "receiverId"),
            Some("u-9".to_string())
        );

        let missing = DomainEvent::new("cycle:created", json!({"cycle": {"id": 7}}));
        assert_eq!(missing.organization_id(), None);
        assert_eq!(missing.nested_str("cycle", "id"), Some("7".to_string()));
    }

    #[test]
    fn test_empty_string_is_missing() {
        let event = DomainEvent::new("cycle:created", json!({"organizationId": ""}));
        assert_eq!(event.organization_id(), None);
    }

    #[test]
    fn test_event_serialization() {
        let event = DomainEvent::new("cycle:closed", json!({"organizationId": "org-1"}));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("eventId"));
        assert!(json.contains("occurredAt"));

        let back: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), Some(DomainEventKind::CycleClosed));
    }
}
