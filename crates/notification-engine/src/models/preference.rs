//! 通知偏好实体定义
//!
//! 每个 (user, type, channel) 至多一行偏好。缺失的行表示"使用组织默认值"，
//! 而不是"关闭"。

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{Channel, Frequency, NotificationType};
use crate::error::{NotificationError, Result};

/// 通知偏好
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreference {
    pub id: Uuid,
    pub user_id: String,
    pub organization_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub channel: Channel,
    pub enabled: bool,
    pub frequency: Frequency,
    pub quiet_hours: Option<QuietHours>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreference {
    pub fn new(
        user_id: &str,
        organization_id: &str,
        notification_type: NotificationType,
        channel: Channel,
        enabled: bool,
        frequency: Frequency,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            organization_id: organization_id.to_string(),
            notification_type,
            channel,
            enabled,
            frequency,
            quiet_hours: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 是否匹配 (type, channel) 键
    pub fn is_for(&self, notification_type: NotificationType, channel: Channel) -> bool {
        self.notification_type == notification_type && self.channel == channel
    }

    /// 应用一次更新（只覆盖传入的字段）
    pub fn apply(&mut self, update: &PreferenceUpdate, now: DateTime<Utc>) {
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(frequency) = update.frequency {
            self.frequency = frequency;
        }
        if let Some(quiet_hours) = &update.quiet_hours {
            self.quiet_hours = Some(quiet_hours.clone());
        }
        self.updated_at = now;
    }
}

/// 偏好更新项
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceUpdate {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub channel: Channel,
    pub enabled: Option<bool>,
    pub frequency: Option<Frequency>,
    /// 传入即覆盖；关闭免打扰请传 `enabled: false`
    pub quiet_hours: Option<QuietHours>,
}

impl PreferenceUpdate {
    pub fn new(notification_type: NotificationType, channel: Channel) -> Self {
        Self {
            notification_type,
            channel,
            enabled: None,
            frequency: None,
            quiet_hours: None,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = Some(frequency);
        self
    }

    pub fn quiet_hours(mut self, quiet_hours: QuietHours) -> Self {
        self.quiet_hours = Some(quiet_hours);
        self
    }
}

// ---------------------------------------------------------------------------
// 免打扰时段
// ---------------------------------------------------------------------------

/// 免打扰时段
///
/// `start`/`end` 为 `HH:MM` 本地时间；`end <= start` 表示跨越午夜。
/// `timezone` 支持 IANA 时区名（如 `Asia/Shanghai`，夏令时按当地规则换算）、
/// `UTC`、`Z` 或 `±HH:MM` 固定偏移。
/// `days` 为生效的星期（0 = 周日 … 6 = 周六），为空表示每天；
/// 跨午夜的时段以开始那天的星期为准。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuietHours {
    pub enabled: bool,
    pub start: String,
    pub end: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub days: Vec<u8>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl QuietHours {
    pub fn new(start: &str, end: &str, timezone: &str) -> Self {
        Self {
            enabled: true,
            start: start.to_string(),
            end: end.to_string(),
            timezone: timezone.to_string(),
            days: Vec::new(),
        }
    }

    pub fn on_days(mut self, days: Vec<u8>) -> Self {
        self.days = days;
        self
    }

    /// 校验格式
    pub fn validate(&self) -> Result<()> {
        parse_time_of_day(&self.start)?;
        parse_time_of_day(&self.end)?;
        parse_timezone(&self.timezone)?;
        if let Some(day) = self.days.iter().find(|d| **d > 6) {
            return Err(NotificationError::Validation(format!(
                "免打扰星期取值必须在 0-6 之间: {}",
                day
            )));
        }
        Ok(())
    }

    /// 若 `now` 落在免打扰时段内，返回时段结束时刻
    pub fn deferral(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        if !self.enabled {
            return Ok(None);
        }

        let start = parse_time_of_day(&self.start)?;
        let end = parse_time_of_day(&self.end)?;
        if start == end {
            return Ok(None);
        }

        match parse_timezone(&self.timezone)? {
            QuietZone::Named(tz) => self.window_end(&tz, now, start, end),
            QuietZone::Fixed(offset) => self.window_end(&offset, now, start, end),
        }
    }

    fn window_end<Z: TimeZone>(
        &self,
        zone: &Z,
        now: DateTime<Utc>,
        start: NaiveTime,
        end: NaiveTime,
    ) -> Result<Option<DateTime<Utc>>> {
        let local = now.with_timezone(zone);
        let time = local.time();
        let today = local.date_naive();

        // (时段开始的日期, 时段结束的日期)
        let window = if start < end {
            (time >= start && time < end).then_some((today, today))
        } else if time >= start {
            Some((today, today + Duration::days(1)))
        } else if time < end {
            Some((today - Duration::days(1), today))
        } else {
            None
        };

        let Some((window_day, end_day)) = window else {
            return Ok(None);
        };

        let weekday = window_day.weekday().num_days_from_sunday() as u8;
        if !self.days.is_empty() && !self.days.contains(&weekday) {
            return Ok(None);
        }

        let until = resolve_local(zone, end_day.and_time(end)).ok_or_else(|| {
            NotificationError::Internal("免打扰结束时间无法换算".to_string())
        })?;
        Ok(Some(until))
    }
}

/// 本地时刻换算为 UTC
///
/// 夏令时回拨造成的重复时刻取较早者；跳过的时刻顺延到跳变之后
fn resolve_local<Z: TimeZone>(zone: &Z, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    zone.from_local_datetime(&local)
        .earliest()
        .or_else(|| {
            zone.from_local_datetime(&(local + Duration::hours(1)))
                .earliest()
        })
        .map(|t| t.with_timezone(&Utc))
}

fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|_| NotificationError::Validation(format!("无效的时间格式（应为 HH:MM）: {}", value)))
}

/// 免打扰时段使用的时区
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuietZone {
    Named(Tz),
    Fixed(FixedOffset),
}

/// 解析时区：IANA 名称优先，其次 `UTC` / `Z` / `±HH:MM`
pub fn parse_timezone(value: &str) -> Result<QuietZone> {
    let trimmed = value.trim();
    if let Ok(tz) = Tz::from_str(trimmed) {
        return Ok(QuietZone::Named(tz));
    }
    parse_offset(trimmed).map(QuietZone::Fixed)
}

/// 解析固定偏移：`UTC` / `Z` / `±HH:MM`
pub fn parse_offset(value: &str) -> Result<FixedOffset> {
    let invalid = || NotificationError::Validation(format!("不支持的时区: {}", value));

    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("utc") || trimmed == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match trimmed.as_bytes()[0] {
        b'+' => (1, &trimmed[1..]),
        b'-' => (-1, &trimmed[1..]),
        _ => return Err(invalid()),
    };

    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

// ---------------------------------------------------------------------------
// 渠道级汇总视图
// ---------------------------------------------------------------------------

/// 单个渠道的汇总设置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSettings {
    /// 任一类型开启即为开启
    pub enabled: bool,
    /// 所有类型中限制最严格的频率
    pub frequency: Frequency,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: Frequency::Immediate,
        }
    }
}

/// 用户通知设置（渠道级汇总）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    pub email: ChannelSettings,
    pub in_app: ChannelSettings,
    pub sms: ChannelSettings,
    pub push: ChannelSettings,
}

impl NotificationSettings {
    pub fn channel_mut(&mut self, channel: Channel) -> &mut ChannelSettings {
        match channel {
            Channel::Email => &mut self.email,
            Channel::InApp => &mut self.in_app,
            Channel::Sms => &mut self.sms,
            Channel::Push => &mut self.push,
        }
    }

    pub fn channel(&self, channel: Channel) -> &ChannelSettings {
        match channel {
            Channel::Email => &self.email,
            Channel::InApp => &self.in_app,
            Channel::Sms => &self.sms,
            Channel::Push => &self.push,
        }
    }
}
