//! 偏好解析器
//!
//! ## 解析规则
//!
//! 1. 用户没有偏好记录时，先写入组织默认值（幂等，依赖唯一键而非外部锁）
//! 2. 关闭或频率为 never → 抑制
//! 3. urgent 优先级 → 立即投递
//! 4. daily / weekly → 延后到下一个汇总时点
//! 5. 处于免打扰时段 → 延后到时段结束
//! 6. 其余 → 立即投递

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use feedback_shared::config::NotificationConfig;

use super::defaults::{DEFAULT_SET_SIZE, default_preference, default_preferences};
use crate::error::{NotificationError, Result};
use crate::models::{
    Channel, Frequency, NotificationPreference, NotificationSettings, NotificationType,
    PreferenceUpdate, Priority,
};
use crate::repository::{PgPreferenceRepository, PreferenceRepositoryTrait};

/// 抑制原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    ChannelDisabled,
    FrequencyNever,
}

impl SuppressReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChannelDisabled => "channel_disabled",
            Self::FrequencyNever => "frequency_never",
        }
    }
}

/// 延后原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    QuietHours,
    DailyDigest,
    WeeklyDigest,
}

/// 投递决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryDecision {
    Deliver,
    Defer {
        until: DateTime<Utc>,
        reason: DeferReason,
    },
    Suppress(SuppressReason),
}

/// 汇总投递时点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestSchedule {
    hour_utc: u32,
    weekly_weekday: Weekday,
}

impl Default for DigestSchedule {
    fn default() -> Self {
        Self {
            hour_utc: 9,
            weekly_weekday: Weekday::Mon,
        }
    }
}

impl DigestSchedule {
    pub fn new(hour_utc: u32, weekly_weekday: Weekday) -> Result<Self> {
        if hour_utc > 23 {
            return Err(NotificationError::Validation(format!(
                "汇总投递整点必须在 0-23 之间: {}",
                hour_utc
            )));
        }
        Ok(Self {
            hour_utc,
            weekly_weekday,
        })
    }

    pub fn from_config(config: &NotificationConfig) -> Result<Self> {
        let weekday = Weekday::from_str(&config.weekly_digest_weekday).map_err(|_| {
            NotificationError::Validation(format!(
                "无效的每周汇总星期: {}",
                config.weekly_digest_weekday
            ))
        })?;
        Self::new(config.digest_hour_utc, weekday)
    }

    fn slot_on(&self, date: chrono::NaiveDate) -> DateTime<Utc> {
        let time = NaiveTime::from_hms_opt(self.hour_utc, 0, 0).unwrap_or(NaiveTime::MIN);
        Utc.from_utc_datetime(&date.and_time(time))
    }

    /// 下一个每日汇总时点（严格晚于 now）
    pub fn next_daily(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let slot = self.slot_on(now.date_naive());
        if slot > now {
            slot
        } else {
            slot + Duration::days(1)
        }
    }

    /// 下一个每周汇总时点（严格晚于 now）
    pub fn next_weekly(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.weekday().num_days_from_monday() as i64;
        let target = self.weekly_weekday.num_days_from_monday() as i64;
        let days_ahead = (target - today).rem_euclid(7);

        let slot = self.slot_on(now.date_naive() + Duration::days(days_ahead));
        if slot > now {
            slot
        } else {
            slot + Duration::days(7)
        }
    }
}

/// 批量更新中单项失败的记录
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceFailure {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub channel: Channel,
    pub error_code: String,
    pub message: String,
}

/// 批量更新结果
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkPreferenceResult {
    pub updated: Vec<NotificationPreference>,
    pub failures: Vec<PreferenceFailure>,
}

/// 偏好解析器
pub struct PreferenceResolver<PR = PgPreferenceRepository>
where
    PR: PreferenceRepositoryTrait,
{
    repo: Arc<PR>,
    digest: DigestSchedule,
}

impl<PR> PreferenceResolver<PR>
where
    PR: PreferenceRepositoryTrait,
{
    pub fn new(repo: Arc<PR>, digest: DigestSchedule) -> Self {
        Self { repo, digest }
    }

    pub fn digest(&self) -> DigestSchedule {
        self.digest
    }

    /// 获取用户全部偏好
    ///
    /// 缺少任一 (type, channel) 行时补齐组织默认值后重新读取。
    /// 默认值写入依赖唯一键跳过已存在的行，并发首次访问不会重复插入。
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn resolve(
        &self,
        user_id: &str,
        organization_id: &str,
    ) -> Result<Vec<NotificationPreference>> {
        let existing = self.repo.list_by_user(user_id).await?;
        if existing.len() >= DEFAULT_SET_SIZE {
            return Ok(existing);
        }

        let seed = default_preferences(user_id, organization_id);
        let inserted = self.repo.insert_missing(&seed).await?;
        if inserted > 0 {
            info!(
                user_id = %user_id,
                organization_id = %organization_id,
                inserted,
                "已写入默认通知偏好"
            );
        }

        self.repo.list_by_user(user_id).await
    }

    /// 获取单个 (type, channel) 的有效偏好
    pub async fn preference_for(
        &self,
        user_id: &str,
        organization_id: &str,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<NotificationPreference> {
        let prefs = self.resolve(user_id, organization_id).await?;
        Ok(prefs
            .into_iter()
            .find(|p| p.is_for(notification_type, channel))
            .unwrap_or_else(|| {
                default_preference(user_id, organization_id, notification_type, channel)
            }))
    }

    /// 单项开关查询
    pub async fn is_enabled(
        &self,
        user_id: &str,
        organization_id: &str,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<bool> {
        let pref = self
            .preference_for(user_id, organization_id, notification_type, channel)
            .await?;
        Ok(pref.enabled)
    }

    /// 计算投递决策
    #[instrument(skip(self), fields(user_id = %user_id, notification_type = %notification_type, channel = %channel))]
    pub async fn decide(
        &self,
        user_id: &str,
        organization_id: &str,
        notification_type: NotificationType,
        channel: Channel,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Result<DeliveryDecision> {
        let pref = self
            .preference_for(user_id, organization_id, notification_type, channel)
            .await?;

        let decision = self.evaluate(&pref, priority, now);
        debug!(decision = ?decision, "偏好决策完成");
        Ok(decision)
    }

    /// 基于已加载的偏好计算决策
    pub fn evaluate(
        &self,
        pref: &NotificationPreference,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> DeliveryDecision {
        if !pref.enabled {
            return DeliveryDecision::Suppress(SuppressReason::ChannelDisabled);
        }
        if pref.frequency == Frequency::Never {
            return DeliveryDecision::Suppress(SuppressReason::FrequencyNever);
        }
        if priority == Priority::Urgent {
            return DeliveryDecision::Deliver;
        }

        match pref.frequency {
            Frequency::Daily => {
                return DeliveryDecision::Defer {
                    until: self.digest.next_daily(now),
                    reason: DeferReason::DailyDigest,
                };
            }
            Frequency::Weekly => {
                return DeliveryDecision::Defer {
                    until: self.digest.next_weekly(now),
                    reason: DeferReason::WeeklyDigest,
                };
            }
            Frequency::Immediate | Frequency::Never => {}
        }

        if let Some(quiet_hours) = &pref.quiet_hours {
            match quiet_hours.deferral(now) {
                Ok(Some(until)) => {
                    return DeliveryDecision::Defer {
                        until,
                        reason: DeferReason::QuietHours,
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        user_id = %pref.user_id,
                        error = %e,
                        "免打扰配置无效，按未设置处理"
                    );
                }
            }
        }

        DeliveryDecision::Deliver
    }

    /// 渠道级汇总视图
    ///
    /// enabled：该渠道任一类型开启即为 true；
    /// frequency：该渠道所有类型中最严格的频率（never > weekly > daily > immediate）
    pub async fn summarize(
        &self,
        user_id: &str,
        organization_id: &str,
    ) -> Result<NotificationSettings> {
        let prefs = self.resolve(user_id, organization_id).await?;
        Ok(Self::aggregate(&prefs))
    }

    pub fn aggregate(prefs: &[NotificationPreference]) -> NotificationSettings {
        let mut settings = NotificationSettings::default();
        for pref in prefs {
            let channel = settings.channel_mut(pref.channel);
            channel.enabled |= pref.enabled;
            channel.frequency = channel.frequency.most_restrictive(pref.frequency);
        }
        settings
    }

    /// 更新单项偏好（按 (user, type, channel) upsert）
    #[instrument(skip(self, update), fields(user_id = %user_id, notification_type = %update.notification_type, channel = %update.channel))]
    pub async fn update_preference(
        &self,
        user_id: &str,
        organization_id: &str,
        update: &PreferenceUpdate,
    ) -> Result<NotificationPreference> {
        if let Some(quiet_hours) = &update.quiet_hours {
            quiet_hours.validate()?;
        }

        let mut pref = match self
            .repo
            .find(user_id, update.notification_type, update.channel)
            .await?
        {
            Some(existing) => existing,
            None => default_preference(
                user_id,
                organization_id,
                update.notification_type,
                update.channel,
            ),
        };
        pref.apply(update, Utc::now());

        let stored = self.repo.upsert(&pref).await?;
        info!(
            user_id = %user_id,
            enabled = stored.enabled,
            frequency = %stored.frequency,
            "通知偏好已更新"
        );
        Ok(stored)
    }

    /// 批量更新
    ///
    /// 每项独立写入，单项失败不回滚已成功的项
    #[instrument(skip(self, updates), fields(user_id = %user_id, count = updates.len()))]
    pub async fn update_bulk(
        &self,
        user_id: &str,
        organization_id: &str,
        updates: &[PreferenceUpdate],
    ) -> Result<BulkPreferenceResult> {
        let mut result = BulkPreferenceResult::default();

        for update in updates {
            match self.update_preference(user_id, organization_id, update).await {
                Ok(pref) => result.updated.push(pref),
                Err(e) => {
                    warn!(
                        user_id = %user_id,
                        notification_type = %update.notification_type,
                        channel = %update.channel,
                        error = %e,
                        "偏好更新失败，继续处理剩余项"
                    );
                    result.failures.push(PreferenceFailure {
                        notification_type: update.notification_type,
                        channel: update.channel,
                        error_code: e.error_code().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(result)
    }

    /// 删除单项偏好，之后该项回落到组织默认值
    pub async fn delete_preference(
        &self,
        user_id: &str,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<()> {
        if !self.repo.delete(user_id, notification_type, channel).await? {
            return Err(NotificationError::not_found(
                "NotificationPreference",
                format!("{}/{}/{}", user_id, notification_type, channel),
            ));
        }
        info!(user_id = %user_id, notification_type = %notification_type, channel = %channel, "通知偏好已删除");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuietHours;
    use crate::repository::MockPreferenceRepositoryTrait;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn pref(channel: Channel, enabled: bool, frequency: Frequency) -> NotificationPreference {
        NotificationPreference::new(
            "u1",
            "org-1",
            NotificationType::FeedbackRequested,
            channel,
            enabled,
            frequency,
        )
    }

    fn resolver_with(mock: MockPreferenceRepositoryTrait) -> PreferenceResolver<MockPreferenceRepositoryTrait> {
        PreferenceResolver::new(Arc::new(mock), DigestSchedule::default())
    }

    #[test]
    fn test_digest_next_daily() {
        let digest = DigestSchedule::new(9, Weekday::Mon).unwrap();
        assert_eq!(digest.next_daily(at("2025-01-06T08:00:00Z")), at("2025-01-06T09:00:00Z"));
        assert_eq!(digest.next_daily(at("2025-01-06T09:00:00Z")), at("2025-01-07T09:00:00Z"));
        assert_eq!(digest.next_daily(at("2025-01-06T23:00:00Z")), at("2025-01-07T09:00:00Z"));
    }

    #[test]
    fn test_digest_next_weekly() {
        // 2025-01-06 为周一
        let digest = DigestSchedule::new(9, Weekday::Mon).unwrap();
        assert_eq!(digest.next_weekly(at("2025-01-06T08:00:00Z")), at("2025-01-06T09:00:00Z"));
        assert_eq!(digest.next_weekly(at("2025-01-06T10:00:00Z")), at("2025-01-13T09:00:00Z"));
        assert_eq!(digest.next_weekly(at("2025-01-08T10:00:00Z")), at("2025-01-13T09:00:00Z"));

        let friday = DigestSchedule::new(17, Weekday::Fri).unwrap();
        assert_eq!(friday.next_weekly(at("2025-01-06T10:00:00Z")), at("2025-01-10T17:00:00Z"));
    }

    #[test]
    fn test_digest_from_config() {
        let config = NotificationConfig {
            weekly_digest_weekday: "friday".to_string(),
            ..Default::default()
        };
        assert!(DigestSchedule::from_config(&config).is_ok());

        let config = NotificationConfig {
            weekly_digest_weekday: "someday".to_string(),
            ..Default::default()
        };
        assert!(DigestSchedule::from_config(&config).is_err());
        assert!(DigestSchedule::new(24, Weekday::Mon).is_err());
    }

    #[test]
    fn test_evaluate_rules() {
        let resolver = resolver_with(MockPreferenceRepositoryTrait::new());
        let now = at("2025-01-06T12:00:00Z");

        assert_eq!(
            resolver.evaluate(&pref(Channel::Sms, false, Frequency::Immediate), Priority::Urgent, now),
            DeliveryDecision::Suppress(SuppressReason::ChannelDisabled)
        );
        assert_eq!(
            resolver.evaluate(&pref(Channel::Email, true, Frequency::Never), Priority::Normal, now),
            DeliveryDecision::Suppress(SuppressReason::FrequencyNever)
        );
        assert_eq!(
            resolver.evaluate(&pref(Channel::Email, true, Frequency::Daily), Priority::Normal, now),
            DeliveryDecision::Defer {
                until: at("2025-01-07T09:00:00Z"),
                reason: DeferReason::DailyDigest
            }
        );
        assert_eq!(
            resolver.evaluate(&pref(Channel::Email, true, Frequency::Daily), Priority::Urgent, now),
            DeliveryDecision::Deliver
        );

        let mut quiet = pref(Channel::InApp, true, Frequency::Immediate);
        quiet.quiet_hours = Some(QuietHours::new("11:00", "13:00", "UTC"));
        assert_eq!(
            resolver.evaluate(&quiet, Priority::High, now),
            DeliveryDecision::Defer {
                until: at("2025-01-06T13:00:00Z"),
                reason: DeferReason::QuietHours
            }
        );

        // 无效的时区配置按未设置处理
        quiet.quiet_hours = Some(QuietHours::new("11:00", "13:00", "Mars/Olympus"));
        assert_eq!(resolver.evaluate(&quiet, Priority::Normal, now), DeliveryDecision::Deliver);
    }

    #[test]
    fn test_evaluate_quiet_hours_in_named_zone() {
        let resolver = resolver_with(MockPreferenceRepositoryTrait::new());
        let mut quiet = pref(Channel::InApp, true, Frequency::Immediate);
        quiet.quiet_hours = Some(QuietHours::new("22:00", "07:00", "Asia/Shanghai"));

        // 北京时间 23:00
        assert_eq!(
            resolver.evaluate(&quiet, Priority::Normal, at("2025-01-06T15:00:00Z")),
            DeliveryDecision::Defer {
                until: at("2025-01-06T23:00:00Z"),
                reason: DeferReason::QuietHours
            }
        );
        // 北京时间 12:00
        assert_eq!(
            resolver.evaluate(&quiet, Priority::Normal, at("2025-01-06T04:00:00Z")),
            DeliveryDecision::Deliver
        );
    }

    #[test]
    fn test_aggregate_most_restrictive() {
        let mut prefs = vec![
            pref(Channel::Email, true, Frequency::Immediate),
            pref(Channel::Email, false, Frequency::Weekly),
            pref(Channel::Email, true, Frequency::Never),
        ];

        // 与顺序无关
        for _ in 0..prefs.len() {
            prefs.rotate_left(1);
            let settings = PreferenceResolver::<MockPreferenceRepositoryTrait>::aggregate(&prefs);
            assert_eq!(settings.email.frequency, Frequency::Never);
            assert!(settings.email.enabled);
        }

        let settings = PreferenceResolver::<MockPreferenceRepositoryTrait>::aggregate(&[pref(
            Channel::Sms,
            false,
            Frequency::Daily,
        )]);
        assert!(!settings.sms.enabled);
        assert_eq!(settings.sms.frequency, Frequency::Daily);
    }

    #[tokio::test]
    async fn test_resolve_seeds_when_empty() {
        let mut mock = MockPreferenceRepositoryTrait::new();
        let mut calls = 0;
        mock.expect_list_by_user().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(vec![])
            } else {
                Ok(default_preferences("u1", "org-1"))
            }
        });
        mock.expect_insert_missing()
            .times(1)
            .withf(|seed| seed.len() == DEFAULT_SET_SIZE)
            .returning(|seed| Ok(seed.len() as u64));

        let prefs = resolver_with(mock).resolve("u1", "org-1").await.unwrap();
        assert_eq!(prefs.len(), DEFAULT_SET_SIZE);
    }

    #[tokio::test]
    async fn test_resolve_skips_seed_when_complete() {
        let mut mock = MockPreferenceRepositoryTrait::new();
        mock.expect_list_by_user()
            .times(1)
            .returning(|_| Ok(default_preferences("u1", "org-1")));
        mock.expect_insert_missing().never();

        let prefs = resolver_with(mock).resolve("u1", "org-1").await.unwrap();
        assert_eq!(prefs.len(), DEFAULT_SET_SIZE);
    }

    #[tokio::test]
    async fn test_update_bulk_continues_after_failure() {
        let mut mock = MockPreferenceRepositoryTrait::new();
        mock.expect_find().returning(|_, _, _| Ok(None));
        mock.expect_upsert().returning(|p| {
            if p.channel == Channel::Push {
                Err(NotificationError::Internal("写入失败".to_string()))
            } else {
                Ok(p.clone())
            }
        });

        let updates = vec![
            PreferenceUpdate::new(NotificationType::CycleCreated, Channel::Email).enabled(false),
            PreferenceUpdate::new(NotificationType::CycleCreated, Channel::Push).enabled(true),
            PreferenceUpdate::new(NotificationType::CycleCreated, Channel::Sms).enabled(true),
        ];

        let result = resolver_with(mock)
            .update_bulk("u1", "org-1", &updates)
            .await
            .unwrap();
        assert_eq!(result.updated.len(), 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].channel, Channel::Push);
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_quiet_hours() {
        let mut mock = MockPreferenceRepositoryTrait::new();
        mock.expect_upsert().never();

        let update = PreferenceUpdate::new(NotificationType::CycleCreated, Channel::Email)
            .quiet_hours(QuietHours::new("22:00", "7am", "UTC"));
        let err = resolver_with(mock)
            .update_preference("u1", "org-1", &update)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }
}
