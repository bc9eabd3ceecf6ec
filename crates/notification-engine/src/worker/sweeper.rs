//! 定时通知扫描器
//!
//! 周期性地取出已到期的 scheduled 通知并逐条投递。
//! 每条通知独立处理：Sink 失败的通知转为 failed，其他错误保持原状态等待下一轮，
//! 任何单条失败都不会中断本轮扫描。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use feedback_shared::config::NotificationConfig;
use feedback_shared::observability::metrics;

use crate::error::{NotificationError, Result};
use crate::repository::{
    NotificationRepositoryTrait, PgNotificationRepository, PgPreferenceRepository,
    PgTemplateRepository, PreferenceRepositoryTrait, TemplateRepositoryTrait,
};
use crate::service::NotificationService;

/// 单轮扫描结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub found: usize,
    pub sent: usize,
    pub failed: usize,
    /// 状态已被并发修改或遇到非投递类错误，留待下一轮
    pub skipped: usize,
}

/// 定时通知扫描器
pub struct ScheduledDispatchSweeper<
    NR = PgNotificationRepository,
    TR = PgTemplateRepository,
    PR = PgPreferenceRepository,
> where
    NR: NotificationRepositoryTrait,
    TR: TemplateRepositoryTrait,
    PR: PreferenceRepositoryTrait,
{
    service: Arc<NotificationService<NR, TR, PR>>,
    interval: Duration,
    batch_size: i64,
}

impl<NR, TR, PR> ScheduledDispatchSweeper<NR, TR, PR>
where
    NR: NotificationRepositoryTrait,
    TR: TemplateRepositoryTrait,
    PR: PreferenceRepositoryTrait,
{
    pub fn new(
        service: Arc<NotificationService<NR, TR, PR>>,
        interval: Duration,
        batch_size: i64,
    ) -> Self {
        Self {
            service,
            interval,
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(
        service: Arc<NotificationService<NR, TR, PR>>,
        config: &NotificationConfig,
    ) -> Self {
        Self::new(
            service,
            Duration::from_secs(config.sweep_interval_seconds.max(1)),
            config.sweep_batch_size,
        )
    }

    /// 执行一轮扫描
    ///
    /// 只有读取到期列表失败时返回错误
    #[instrument(skip(self), fields(now = %now))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let start = Instant::now();
        let due = self.service.due_scheduled(now, self.batch_size).await?;

        let mut report = SweepReport {
            found: due.len(),
            ..Default::default()
        };

        for notification in &due {
            match self.service.process(notification).await {
                Ok(_) => report.sent += 1,
                Err(NotificationError::Transport { channel, reason }) => {
                    warn!(
                        notification_id = %notification.id,
                        user_id = %notification.user_id,
                        channel = %channel,
                        reason = %reason,
                        "定时通知投递失败，继续处理下一条"
                    );
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(
                        notification_id = %notification.id,
                        error = %e,
                        "定时通知未处理，留待下一轮"
                    );
                    report.skipped += 1;
                }
            }
        }

        metrics::record_sweep(report.found, report.sent, report.failed);
        if report.found > 0 {
            info!(
                found = report.found,
                sent = report.sent,
                failed = report.failed,
                skipped = report.skipped,
                duration_ms = start.elapsed().as_millis() as u64,
                "定时通知扫描完成"
            );
        } else {
            debug!("没有到期的定时通知");
        }
        Ok(report)
    }

    /// 按固定间隔循环扫描，直到收到关闭信号
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "定时通知扫描器已启动"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        error!(error = %e, "定时通知扫描失败");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("定时通知扫描器已退出");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticRoleOracle;
    use crate::channels::SinkRegistry;
    use crate::models::{Channel, CreateNotificationRequest, NotificationType};
    use crate::preference::{DigestSchedule, PreferenceResolver};
    use crate::publisher::TracingEventPublisher;
    use crate::repository::{
        InMemoryNotificationRepository, InMemoryPreferenceRepository, InMemoryTemplateRepository,
    };

    fn sweeper() -> (
        ScheduledDispatchSweeper<
            InMemoryNotificationRepository,
            InMemoryTemplateRepository,
            InMemoryPreferenceRepository,
        >,
        Arc<
            NotificationService<
                InMemoryNotificationRepository,
                InMemoryTemplateRepository,
                InMemoryPreferenceRepository,
            >,
        >,
    ) {
        let service = Arc::new(NotificationService::new(
            Arc::new(InMemoryNotificationRepository::new()),
            Arc::new(InMemoryTemplateRepository::new()),
            PreferenceResolver::new(
                Arc::new(InMemoryPreferenceRepository::new()),
                DigestSchedule::default(),
            ),
            SinkRegistry::with_simulated(),
            Arc::new(TracingEventPublisher),
            Arc::new(StaticRoleOracle::nobody()),
        ));
        (
            ScheduledDispatchSweeper::new(service.clone(), Duration::from_secs(60), 10),
            service,
        )
    }

    #[tokio::test]
    async fn test_sweep_releases_due_notifications_only() {
        let (sweeper, service) = sweeper();
        let now = Utc::now();

        for hours in [1, 3] {
            let request =
                CreateNotificationRequest::new("u1", NotificationType::CycleClosing, Channel::InApp)
                    .with_literal("即将结束", "请提交")
                    .scheduled_for(now + chrono::Duration::hours(hours));
            service.create("org-1", request, None).await.unwrap();
        }

        let report = sweeper.sweep(now).await.unwrap();
        assert_eq!(report, SweepReport::default());

        let report = sweeper
            .sweep(now + chrono::Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(report.found, 1);
        assert_eq!(report.sent, 1);

        // 已发送的不会再被取出
        let report = sweeper
            .sweep(now + chrono::Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(report.found, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (sweeper, _) = sweeper();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(sweeper.run(rx));
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
