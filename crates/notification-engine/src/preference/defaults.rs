//! 组织默认偏好
//!
//! 用户第一次被解析偏好时按此种子表写入：站内信和邮件默认开启，
//! 短信和推送默认关闭，频率均为即时。

use crate::models::{Channel, Frequency, NotificationPreference, NotificationType};

/// 渠道默认值 (enabled, frequency)
pub fn channel_default(channel: Channel) -> (bool, Frequency) {
    match channel {
        Channel::Email | Channel::InApp => (true, Frequency::Immediate),
        Channel::Sms | Channel::Push => (false, Frequency::Immediate),
    }
}

/// 生成单个 (type, channel) 的默认偏好
pub fn default_preference(
    user_id: &str,
    organization_id: &str,
    notification_type: NotificationType,
    channel: Channel,
) -> NotificationPreference {
    let (enabled, frequency) = channel_default(channel);
    NotificationPreference::new(
        user_id,
        organization_id,
        notification_type,
        channel,
        enabled,
        frequency,
    )
}

/// 生成完整的默认偏好集（所有类型 × 所有渠道）
pub fn default_preferences(user_id: &str, organization_id: &str) -> Vec<NotificationPreference> {
    NotificationType::ALL
        .iter()
        .flat_map(|t| {
            Channel::ALL
                .iter()
                .map(move |c| default_preference(user_id, organization_id, *t, *c))
        })
        .collect()
}

/// 默认偏好集大小
pub const DEFAULT_SET_SIZE: usize = NotificationType::ALL.len() * Channel::ALL.len();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_set_covers_every_pair() {
        let prefs = default_preferences("u1", "org-1");
        assert_eq!(prefs.len(), DEFAULT_SET_SIZE);

        let sms_enabled = prefs
            .iter()
            .filter(|p| p.channel == Channel::Sms)
            .any(|p| p.enabled);
        assert!(!sms_enabled);

        assert!(
            prefs
                .iter()
                .filter(|p| p.channel == Channel::InApp)
                .all(|p| p.enabled && p.frequency == Frequency::Immediate)
        );
    }
}
