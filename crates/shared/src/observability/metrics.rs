//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    /// 停止指标服务器
    pub fn shutdown(self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 和 `/health` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册通知引擎指标描述
///
/// 这些描述会出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "notifications_created_total",
        "Total number of notifications created"
    );
    metrics::describe_counter!(
        "notifications_suppressed_total",
        "Total number of notifications suppressed by user preferences"
    );
    metrics::describe_counter!(
        "notification_deliveries_total",
        "Total number of channel delivery attempts"
    );
    metrics::describe_histogram!(
        "notification_delivery_duration_seconds",
        "Channel delivery duration in seconds"
    );
    metrics::describe_counter!(
        "notification_sweeps_total",
        "Total number of scheduled dispatch sweeps"
    );
    metrics::describe_histogram!(
        "notification_sweep_batch_size",
        "Number of due notifications found per sweep"
    );
    metrics::describe_counter!(
        "notification_sweep_items_total",
        "Scheduled notifications processed by sweeps, by outcome"
    );
    metrics::describe_counter!(
        "domain_events_total",
        "Total number of domain events received"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录通知创建
///
/// `outcome` 取值：sent / failed / scheduled
#[inline]
pub fn record_notification_created(notification_type: &str, channel: &str, outcome: &str) {
    metrics::counter!(
        "notifications_created_total",
        "type" => notification_type.to_string(),
        "channel" => channel.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录因用户偏好被抑制的通知
#[inline]
pub fn record_notification_suppressed(notification_type: &str, channel: &str, reason: &str) {
    metrics::counter!(
        "notifications_suppressed_total",
        "type" => notification_type.to_string(),
        "channel" => channel.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// 记录渠道投递
#[inline]
pub fn record_delivery(channel: &str, success: bool, duration_secs: f64) {
    let status = if success { "success" } else { "failure" };
    metrics::counter!(
        "notification_deliveries_total",
        "channel" => channel.to_string(),
        "status" => status
    )
    .increment(1);

    metrics::histogram!(
        "notification_delivery_duration_seconds",
        "channel" => channel.to_string()
    )
    .record(duration_secs);
}

/// 记录一次定时扫描
#[inline]
pub fn record_sweep(found: usize, sent: usize, failed: usize) {
    metrics::counter!("notification_sweeps_total").increment(1);
    metrics::histogram!("notification_sweep_batch_size").record(found as f64);
    metrics::counter!("notification_sweep_items_total", "outcome" => "sent").increment(sent as u64);
    metrics::counter!("notification_sweep_items_total", "outcome" => "failed")
        .increment(failed as u64);
}

/// 记录收到的领域事件
///
/// `handled` 为 false 表示未知事件或被忽略的事件
#[inline]
pub fn record_domain_event(event_name: &str, handled: bool) {
    metrics::counter!(
        "domain_events_total",
        "event" => event_name.to_string(),
        "handled" => handled.to_string()
    )
    .increment(1);
}
