//! 通知引擎枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx，以 varchar 存储）和 JSON（serde）序列化，
//! 两侧统一使用 snake_case 字符串（如 `in_app`、`feedback_requested`）。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NotificationError;

/// 通知类型
///
/// 通知产生的业务原因，决定偏好查找和默认模板选择
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum NotificationType {
    CycleCreated,
    CycleActivated,
    CycleClosing,
    CycleClosed,
    FeedbackRequested,
    FeedbackSubmitted,
    FeedbackReceived,
    FeedbackReminder,
    SystemAnnouncement,
}

impl NotificationType {
    pub const ALL: [NotificationType; 9] = [
        Self::CycleCreated,
        Self::CycleActivated,
        Self::CycleClosing,
        Self::CycleClosed,
        Self::FeedbackRequested,
        Self::FeedbackSubmitted,
        Self::FeedbackReceived,
        Self::FeedbackReminder,
        Self::SystemAnnouncement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CycleCreated => "cycle_created",
            Self::CycleActivated => "cycle_activated",
            Self::CycleClosing => "cycle_closing",
            Self::CycleClosed => "cycle_closed",
            Self::FeedbackRequested => "feedback_requested",
            Self::FeedbackSubmitted => "feedback_submitted",
            Self::FeedbackReceived => "feedback_received",
            Self::FeedbackReminder => "feedback_reminder",
            Self::SystemAnnouncement => "system_announcement",
        }
    }
}

/// 投递渠道
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum Channel {
    Email,
    InApp,
    Sms,
    Push,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Self::Email, Self::InApp, Self::Sms, Self::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::InApp => "in_app",
            Self::Sms => "sms",
            Self::Push => "push",
        }
    }
}

/// 通知状态
///
/// 状态机：
/// ```text
/// pending   ──> sent | failed | cancelled
/// scheduled ──> sent | failed | cancelled
/// sent      ──> delivered
/// ```
/// 不允许回退；cancelled 为终态且不可删除。
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum NotificationStatus {
    #[default]
    Pending,
    Scheduled,
    Sent,
    Delivered,
    Failed,
    Cancelled,
}

impl NotificationStatus {
    pub const ALL: [NotificationStatus; 6] = [
        Self::Pending,
        Self::Scheduled,
        Self::Sent,
        Self::Delivered,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// 检查状态转换是否合法
    pub fn can_transition_to(&self, target: NotificationStatus) -> bool {
        use NotificationStatus::*;
        matches!(
            (self, target),
            (Pending, Sent)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Scheduled, Sent)
                | (Scheduled, Failed)
                | (Scheduled, Cancelled)
                | (Sent, Delivered)
        )
    }

    /// 是否还在等待投递
    pub fn is_awaiting_delivery(&self) -> bool {
        matches!(self, Self::Pending | Self::Scheduled)
    }

    /// 所有者可删除（cancelled 除外）
    pub fn is_deletable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// 通知优先级
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    /// 紧急通知绕过免打扰和汇总延迟（但不绕过用户的关闭设置）
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

/// 投递频率
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum Frequency {
    #[default]
    Immediate,
    Daily,
    Weekly,
    Never,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Never => "never",
        }
    }

    /// 限制程度：never > weekly > daily > immediate
    pub fn restrictiveness(&self) -> u8 {
        match self {
            Self::Immediate => 0,
            Self::Daily => 1,
            Self::Weekly => 2,
            Self::Never => 3,
        }
    }

    /// 取两者中限制更严格的频率
    pub fn most_restrictive(self, other: Frequency) -> Frequency {
        if other.restrictiveness() > self.restrictiveness() {
            other
        } else {
            self
        }
    }
}

// ---------------------------------------------------------------------------
// Display / FromStr
// ---------------------------------------------------------------------------

macro_rules! impl_str_conversions {
    ($ty:ty, $label:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = NotificationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL_VALUES
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| {
                        NotificationError::Validation(format!("未知的{}: {}", $label, s))
                    })
            }
        }
    };
}

impl NotificationType {
    const ALL_VALUES: &'static [Self] = &Self::ALL;
}
impl Channel {
    const ALL_VALUES: &'static [Self] = &Self::ALL;
}
impl NotificationStatus {
    const ALL_VALUES: &'static [Self] = &Self::ALL;
}
impl Priority {
    const ALL_VALUES: &'static [Self] = &[Self::Low, Self::Normal, Self::High, Self::Urgent];
}
impl Frequency {
    const ALL_VALUES: &'static [Self] = &[Self::Immediate, Self::Daily, Self::Weekly, Self::Never];
}

impl_str_conversions!(NotificationType, "通知类型");
impl_str_conversions!(Channel, "渠道");
impl_str_conversions!(NotificationStatus, "通知状态");
impl_str_conversions!(Priority, "优先级");
impl_str_conversions!(Frequency, "频率");
