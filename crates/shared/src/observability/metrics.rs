//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册通用指标描述，出现在 /metrics 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "notifications_created_total",
        "Total number of notifications persisted"
    );
    metrics::describe_counter!(
        "notification_deliveries_total",
        "Total number of channel delivery outcomes"
    );
    metrics::describe_histogram!(
        "notification_delivery_duration_seconds",
        "Channel delivery duration in seconds"
    );
    metrics::describe_counter!(
        "scheduled_notifications_executed_total",
        "Total number of scheduled notification executions"
    );
    metrics::describe_counter!(
        "notification_batch_recipients_total",
        "Total number of batch recipients processed"
    );
    metrics::describe_gauge!(
        "realtime_active_connections",
        "Number of live realtime connections"
    );
    metrics::describe_gauge!(
        "worker_last_run_timestamp_seconds",
        "Unix timestamp of the last background worker iteration"
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


// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录通知创建
#[inline]
pub fn record_notification_created(category: &str, priority: &str, deferred: bool) {
    metrics::counter!(
        "notifications_created_total",
        "category" => category.to_string(),
        "priority" => priority.to_string(),
        "deferred" => deferred.to_string()
    )
    .increment(1);
}

/// 记录单渠道投递结果
#[inline]
pub fn record_channel_delivery(channel: &str, status: &str, duration_secs: f64) {
    metrics::counter!(
        "notification_deliveries_total",
        "channel" => channel.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "notification_delivery_duration_seconds",
        "channel" => channel.to_string()
    )
    .record(duration_secs);
}

/// 记录定时通知执行
#[inline]
pub fn record_scheduled_execution(status: &str) {
    metrics::counter!(
        "scheduled_notifications_executed_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录批量任务的收件人处理结果
#[inline]
pub fn record_batch_result(success: u64, failure: u64) {
    metrics::counter!("notification_batch_recipients_total", "status" => "success")
        .increment(success);
    metrics::counter!("notification_batch_recipients_total", "status" => "failure")
        .increment(failure);
}

/// 更新实时连接数
#[inline]
pub fn set_active_connections(count: usize) {
    metrics::gauge!("realtime_active_connections").set(count as f64);
}

/// 记录后台 Worker 最近一次运行时间，供告警判断 Worker 是否存活
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!(
        "worker_last_run_timestamp_seconds",
        "worker" => worker.to_string()
    )
    .set(chrono::Utc::now().timestamp() as f64);
}
