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
///
/// drop 时终止指标 HTTP 服务器。
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl Drop for MetricsHandle {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册通用指标描述，出现在 /metrics 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "rule_evaluations_total",
        "Total number of multi-rule evaluations by verdict"
    );
    metrics::describe_histogram!(
        "rule_evaluation_duration_seconds",
        "Rule evaluation duration in seconds"
    );

    metrics::describe_counter!(
        "evaluation_tasks_total",
        "Total number of async evaluation tasks by lifecycle event"
    );
    metrics::describe_gauge!(
        "evaluation_tasks_retained",
        "Number of async evaluation task records currently retained"
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

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录一次多规则评估
///
/// `mode` 为 sync 或 async，`verdict` 为 APPROVED / REJECTED。
#[inline]
pub fn record_rule_evaluation(mode: &str, verdict: &str, rule_count: usize, duration_secs: f64) {
    metrics::counter!(
        "rule_evaluations_total",
        "mode" => mode.to_string(),
        "verdict" => verdict.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "rule_evaluation_duration_seconds",
        "mode" => mode.to_string()
    )
    .record(duration_secs);

    metrics::histogram!("rule_evaluation_rule_count").record(rule_count as f64);
}

/// 记录异步任务生命周期事件（enqueued / success / failure）
#[inline]
pub fn record_task_event(event: &str) {
    metrics::counter!("evaluation_tasks_total", "event" => event.to_string()).increment(1);
}

/// 记录清理的过期任务数
#[inline]
pub fn record_tasks_reaped(count: usize) {
    metrics::counter!("evaluation_tasks_total", "event" => "reaped").increment(count as u64);
}

/// 更新当前保留的任务记录数
#[inline]
pub fn set_retained_tasks(count: usize) {
    metrics::gauge!("evaluation_tasks_retained").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_http_request("GET", "/api/rules", 200, 0.1);
        record_rule_evaluation("sync", "APPROVED", 3, 0.01);
        record_task_event("enqueued");
        set_retained_tasks(4);
    }
}
