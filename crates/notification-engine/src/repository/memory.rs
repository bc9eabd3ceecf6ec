//! 内存仓储
//!
//! 使用 DashMap 实现的并发安全内存存储，适用于测试和本地开发。
//! 语义与 PostgreSQL 实现保持一致（条件更新、唯一键、幂等的默认值写入）。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::traits::{
    NotificationRepositoryTrait, PreferenceRepositoryTrait, TemplateRepositoryTrait,
};
use crate::error::{NotificationError, Result};
use crate::models::{
    Channel, Notification, NotificationFilter, NotificationPreference, NotificationStats,
    NotificationStatus, NotificationTemplate, NotificationType, PageRequest, StatsScope,
    TemplateFilter,
};

// ---------------------------------------------------------------------------
// 通知
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryNotificationRepository {
    data: DashMap<Uuid, Notification>,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前记录总数
    pub fn count(&self) -> usize {
        self.data.len()
    }

    fn collect<F>(&self, predicate: F) -> Vec<Notification>
    where
        F: Fn(&Notification) -> bool,
    {
        self.data
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl NotificationRepositoryTrait for InMemoryNotificationRepository {
    async fn insert(&self, notification: &Notification) -> Result<()> {
        if self.data.contains_key(&notification.id) {
            return Err(NotificationError::Internal(format!(
                "重复的通知 ID: {}",
                notification.id
            )));
        }
        self.data.insert(notification.id, notification.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Notification>> {
        Ok(self.data.get(&id).map(|n| n.clone()))
    }

    async fn list(
        &self,
        organization_id: &str,
        filter: &NotificationFilter,
        page: PageRequest,
    ) -> Result<(Vec<Notification>, i64)> {
        let mut items =
            self.collect(|n| n.organization_id == organization_id && filter.matches(n));
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = items.len() as i64;
        let items = items
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .collect();

        Ok((items, total))
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: NotificationStatus,
        target: NotificationStatus,
        at: DateTime<Utc>,
        failure_reason: Option<String>,
    ) -> Result<bool> {
        let Some(mut entry) = self.data.get_mut(&id) else {
            return Ok(false);
        };
        if entry.status != expected {
            return Ok(false);
        }

        entry.status = target;
        entry.updated_at = at;
        if target == NotificationStatus::Sent {
            entry.sent_at = Some(at);
        }
        entry.failure_reason = if target == NotificationStatus::Failed {
            failure_reason
        } else {
            None
        };
        Ok(true)
    }

    async fn mark_read(&self, id: Uuid, read_at: DateTime<Utc>) -> Result<bool> {
        match self.data.get_mut(&id) {
            Some(mut entry) if entry.sent_at.is_some() => {
                entry.read_at = Some(read_at);
                entry.updated_at = read_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_all_read(&self, user_id: &str, read_at: DateTime<Utc>) -> Result<u64> {
        let mut affected = 0;
        for mut entry in self.data.iter_mut() {
            let n = entry.value_mut();
            if n.user_id == user_id && n.sent_at.is_some() && n.read_at.is_none() {
                n.read_at = Some(read_at);
                n.updated_at = read_at;
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.data.remove(&id).is_some())
    }

    async fn find_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let mut due = self.collect(|n| {
            n.status == NotificationStatus::Scheduled && n.scheduled_for.is_some_and(|t| t <= now)
        });
        due.sort_by_key(|n| n.scheduled_for);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn count_unread(&self, user_id: &str) -> Result<i64> {
        let count = self
            .data
            .iter()
            .filter(|e| e.user_id == user_id && e.sent_at.is_some() && e.read_at.is_none())
            .count();
        Ok(count as i64)
    }

    async fn stats(
        &self,
        organization_id: &str,
        user_id: Option<String>,
        today_start: DateTime<Utc>,
    ) -> Result<NotificationStats> {
        let scope = if user_id.is_some() {
            StatsScope::User
        } else {
            StatsScope::Organization
        };
        let mut stats = NotificationStats::empty(scope);

        for entry in self.data.iter() {
            let n = entry.value();
            if n.organization_id != organization_id {
                continue;
            }
            if user_id.as_ref().is_some_and(|u| &n.user_id != u) {
                continue;
            }
            stats.accumulate(n, today_start);
        }

        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// 模板
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryTemplateRepository {
    data: DashMap<Uuid, NotificationTemplate>,
}

impl InMemoryTemplateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TemplateRepositoryTrait for InMemoryTemplateRepository {
    async fn insert(&self, template: &NotificationTemplate) -> Result<()> {
        self.data.insert(template.id, template.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<NotificationTemplate>> {
        Ok(self.data.get(&id).map(|t| t.clone()))
    }

    async fn find_by_name(
        &self,
        organization_id: &str,
        name: &str,
    ) -> Result<Option<NotificationTemplate>> {
        Ok(self
            .data
            .iter()
            .find(|e| e.organization_id == organization_id && e.name == name)
            .map(|e| e.value().clone()))
    }

    async fn list(
        &self,
        organization_id: &str,
        filter: &TemplateFilter,
    ) -> Result<Vec<NotificationTemplate>> {
        let mut templates: Vec<NotificationTemplate> = self
            .data
            .iter()
            .filter(|e| e.organization_id == organization_id && filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        templates.sort_by(|a, b| {
            (a.notification_type, a.channel, &a.name).cmp(&(b.notification_type, b.channel, &b.name))
        });
        Ok(templates)
    }

    async fn update(&self, template: &NotificationTemplate) -> Result<()> {
        if let Some(mut entry) = self.data.get_mut(&template.id) {
            *entry = template.clone();
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.data.remove(&id).is_some())
    }

    async fn find_default(
        &self,
        organization_id: &str,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<Option<NotificationTemplate>> {
        Ok(self
            .data
            .iter()
            .find(|e| {
                e.organization_id == organization_id
                    && e.notification_type == notification_type
                    && e.channel == channel
                    && e.is_default
                    && e.is_active
            })
            .map(|e| e.value().clone()))
    }

    async fn clear_default(
        &self,
        organization_id: &str,
        notification_type: NotificationType,
        channel: Channel,
        except: Uuid,
    ) -> Result<u64> {
        let mut affected = 0;
        for mut entry in self.data.iter_mut() {
            let t = entry.value_mut();
            if t.organization_id == organization_id
                && t.notification_type == notification_type
                && t.channel == channel
                && t.is_default
                && t.id != except
            {
                t.is_default = false;
                t.updated_at = Utc::now();
                affected += 1;
            }
        }
        Ok(affected)
    }
}

// ---------------------------------------------------------------------------
// 偏好
// ---------------------------------------------------------------------------

type PreferenceKey = (String, NotificationType, Channel);

#[derive(Debug, Default)]
pub struct InMemoryPreferenceRepository {
    data: DashMap<PreferenceKey, NotificationPreference>,
}

impl InMemoryPreferenceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前记录总数
    pub fn count(&self) -> usize {
        self.data.len()
    }

    fn key(user_id: &str, notification_type: NotificationType, channel: Channel) -> PreferenceKey {
        (user_id.to_string(), notification_type, channel)
    }
}

#[async_trait]
impl PreferenceRepositoryTrait for InMemoryPreferenceRepository {
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<NotificationPreference>> {
        let mut prefs: Vec<NotificationPreference> = self
            .data
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.value().clone())
            .collect();
        prefs.sort_by_key(|p| (p.notification_type, p.channel));
        Ok(prefs)
    }

    async fn find(
        &self,
        user_id: &str,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<Option<NotificationPreference>> {
        Ok(self
            .data
            .get(&Self::key(user_id, notification_type, channel))
            .map(|p| p.clone()))
    }

    async fn insert_missing(&self, preferences: &[NotificationPreference]) -> Result<u64> {
        let mut inserted = 0;
        for p in preferences {
            // entry API 在分片锁内完成"检查并插入"
            self.data
                .entry(Self::key(&p.user_id, p.notification_type, p.channel))
                .or_insert_with(|| {
                    inserted += 1;
                    p.clone()
                });
        }
        Ok(inserted)
    }

    async fn upsert(&self, preference: &NotificationPreference) -> Result<NotificationPreference> {
        let key = Self::key(
            &preference.user_id,
            preference.notification_type,
            preference.channel,
        );
        let stored = self
            .data
            .entry(key)
            .and_modify(|existing| {
                existing.enabled = preference.enabled;
                existing.frequency = preference.frequency;
                existing.quiet_hours = preference.quiet_hours.clone();
                existing.updated_at = preference.updated_at;
            })
            .or_insert_with(|| preference.clone())
            .clone();
        Ok(stored)
    }

    async fn delete(
        &self,
        user_id: &str,
        notification_type: NotificationType,
        channel: Channel,
    ) -> Result<bool> {
        Ok(self
            .data
            .remove(&Self::key(user_id, notification_type, channel))
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Frequency, Priority};

    fn notification(user: &str, status: NotificationStatus) -> Notification {
        let now = Utc::now();
        Notification {
            id: Uuid::now_v7(),
            user_id: user.to_string(),
            organization_id: "org-1".to_string(),
            notification_type: NotificationType::CycleActivated,
            channel: Channel::InApp,
            title: "t".to_string(),
            content: "c".to_string(),
            data: serde_json::json!({}),
            status,
            priority: Priority::Normal,
            scheduled_for: None,
            sent_at: (status == NotificationStatus::Sent).then_some(now),
            read_at: None,
            template_id: None,
            related_entity_type: None,
            related_entity_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_update_status_is_compare_and_set() {
        let repo = InMemoryNotificationRepository::new();
        let n = notification("u1", NotificationStatus::Scheduled);
        repo.insert(&n).await.unwrap();

        let now = Utc::now();
        assert!(
            repo.update_status(n.id, NotificationStatus::Scheduled, NotificationStatus::Sent, now, None)
                .await
                .unwrap()
        );
        assert!(
            !repo
                .update_status(n.id, NotificationStatus::Scheduled, NotificationStatus::Failed, now, None)
                .await
                .unwrap()
        );

        let stored = repo.find_by_id(n.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Sent);
        assert_eq!(stored.sent_at, Some(now));
    }

    #[tokio::test]
    async fn test_mark_all_read_only_touches_sent_unread() {
        let repo = InMemoryNotificationRepository::new();
        repo.insert(&notification("u1", NotificationStatus::Sent)).await.unwrap();
        repo.insert(&notification("u1", NotificationStatus::Sent)).await.unwrap();
        repo.insert(&notification("u1", NotificationStatus::Scheduled)).await.unwrap();
        repo.insert(&notification("u2", NotificationStatus::Sent)).await.unwrap();

        assert_eq!(repo.mark_all_read("u1", Utc::now()).await.unwrap(), 2);
        assert_eq!(repo.mark_all_read("u1", Utc::now()).await.unwrap(), 0);
        assert_eq!(repo.count_unread("u2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_missing_keeps_existing_rows() {
        let repo = InMemoryPreferenceRepository::new();
        let existing = NotificationPreference::new(
            "u1",
            "org-1",
            NotificationType::CycleCreated,
            Channel::Email,
            false,
            Frequency::Weekly,
        );
        repo.upsert(&existing).await.unwrap();

        let seed = vec![
            NotificationPreference::new(
                "u1",
                "org-1",
                NotificationType::CycleCreated,
                Channel::Email,
                true,
                Frequency::Immediate,
            ),
            NotificationPreference::new(
                "u1",
                "org-1",
                NotificationType::CycleCreated,
                Channel::Sms,
                false,
                Frequency::Immediate,
            ),
        ];
        assert_eq!(repo.insert_missing(&seed).await.unwrap(), 1);

        let email = repo
            .find("u1", NotificationType::CycleCreated, Channel::Email)
            .await
            .unwrap()
            .unwrap();
        assert!(!email.enabled);
        assert_eq!(email.frequency, Frequency::Weekly);
    }

    #[tokio::test]
    async fn test_upsert_keeps_original_id() {
        let repo = InMemoryPreferenceRepository::new();
        let first = NotificationPreference::new(
            "u1",
            "org-1",
            NotificationType::FeedbackReminder,
            Channel::Push,
            false,
            Frequency::Immediate,
        );
        let stored = repo.upsert(&first).await.unwrap();

        let mut second = first.clone();
        second.id = Uuid::now_v7();
        second.enabled = true;
        let updated = repo.upsert(&second).await.unwrap();

        assert_eq!(updated.id, stored.id);
        assert!(updated.enabled);
        assert_eq!(repo.count(), 1);
    }
}
