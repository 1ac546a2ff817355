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
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册通用指标描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!("coupon_issues_total", "Total number of coupon issuance calls");
    metrics::describe_counter!("coupon_attempts_total", "Total number of PDV coupon attempts");
    metrics::describe_counter!(
        "coupon_redemptions_total",
        "Total number of coupon redemption calls"
    );
    metrics::describe_histogram!(
        "coupon_redemption_duration_seconds",
        "Coupon redemption duration in seconds"
    );
    metrics::describe_counter!("points_accruals_total", "Total number of point accruals");
    metrics::describe_counter!(
        "reaper_sweeps_total",
        "Rows touched by the reservation reaper"
    );
    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of the last worker pass"
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

/// 记录券发放
#[inline]
pub fn record_coupon_issue(outcome: &str) {
    metrics::counter!("coupon_issues_total", "outcome" => outcome.to_string()).increment(1);
}

/// 记录 PDV 验券
#[inline]
pub fn record_coupon_attempt(outcome: &str) {
    metrics::counter!("coupon_attempts_total", "outcome" => outcome.to_string()).increment(1);
}

/// 记录核销
#[inline]
pub fn record_redemption(outcome: &str, duration_secs: f64) {
    metrics::counter!("coupon_redemptions_total", "outcome" => outcome.to_string())
        .increment(1);
    metrics::histogram!("coupon_redemption_duration_seconds").record(duration_secs);
}

/// 记录积分累积
#[inline]
pub fn record_points_accrual(scope: &str, outcome: &str) {
    metrics::counter!(
        "points_accruals_total",
        "scope" => scope.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录回收任务处理的行数
#[inline]
pub fn record_reaper_sweep(kind: &str, rows: u64) {
    metrics::counter!("reaper_sweeps_total", "kind" => kind.to_string()).increment(rows);
}

/// 记录 Worker 最近一次运行时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!("worker_last_run_timestamp", "worker" => worker.to_string())
        .set(chrono::Utc::now().timestamp() as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_http_request("GET", "/api/test", 200, 0.1);
        record_coupon_issue("success");
        record_coupon_attempt("reserved");
        record_redemption("success", 0.3);
        record_points_accrual("STORE", "success");
        record_reaper_sweep("released", 3);
        set_worker_last_run("reservation_reaper");
    }

    #[test]
    fn test_handle_absent_before_init() {
        assert!(get_handle().is_none());
    }
}
