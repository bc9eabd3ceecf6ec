//! 通知引擎进程入口
//!
//! 装配 PostgreSQL 仓储、模拟渠道 Sink 和定时通知扫描器，收到关闭信号后退出。

use std::sync::Arc;

use anyhow::Result;
use feedback_shared::{config::AppConfig, database::Database, observability};
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

use notification_engine::{
    BroadcastEventPublisher, DigestSchedule, NotificationService, PgNotificationRepository,
    PgPreferenceRepository, PgTemplateRepository, PreferenceResolver, ScheduledDispatchSweeper,
    SinkRegistry, StaticRoleOracle,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // 1. 加载配置
    let config = AppConfig::load("notification-engine").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    // 2. 可观测性
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!("Starting notification-engine...");
    info!(environment = %config.environment, "Configuration loaded");

    // 3. 数据库
    let db = Database::open(&config.database).await?;
    let pool = db.pool().clone();

    // 4. 仓储与服务
    let notification_repo = Arc::new(PgNotificationRepository::new(pool.clone()));
    let template_repo = Arc::new(PgTemplateRepository::new(pool.clone()));
    let preference_repo = Arc::new(PgPreferenceRepository::new(pool.clone()));

    let digest = DigestSchedule::from_config(&config.notification)?;
    let publisher = Arc::new(BroadcastEventPublisher::new(config.notification.event_buffer));
    let roles = Arc::new(StaticRoleOracle::new(
        config.notification.admin_user_ids.iter().cloned(),
    ));

    let service = Arc::new(NotificationService::new(
        notification_repo,
        template_repo,
        PreferenceResolver::new(preference_repo, digest),
        SinkRegistry::with_simulated(),
        publisher,
        roles,
    ));
    info!("Notification service initialized");

    // 5. 定时通知扫描器
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = ScheduledDispatchSweeper::from_config(service, &config.notification);
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown_rx));

    shutdown_signal().await?;
    let _ = shutdown_tx.send(true);
    sweeper_handle.await?;

    db.close().await;
    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
    Ok(())
}
