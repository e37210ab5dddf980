//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。
//! 未安装 recorder 时各记录函数为 no-op。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    /// 停止指标 HTTP 服务
    pub fn shutdown(self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册通用指标描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("orders_published_total", "Total number of orders published");
    metrics::describe_counter!(
        "messages_consumed_total",
        "Total number of messages received by the consumer loop"
    );
    metrics::describe_counter!(
        "inventory_deductions_total",
        "Total number of simulated inventory deductions"
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
// 指标记录函数
// ============================================================================

/// 记录订单发布
#[inline]
pub fn record_order_published(queue: &str, status: &str) {
    metrics::counter!(
        "orders_published_total",
        "queue" => queue.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录消费到的消息及其处理结果
#[inline]
pub fn record_message_consumed(queue: &str, status: &str) {
    metrics::counter!(
        "messages_consumed_total",
        "queue" => queue.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录模拟库存扣减
#[inline]
pub fn record_inventory_deduction(quantity: i64) {
    metrics::counter!("inventory_deductions_total").increment(1);
    metrics::histogram!("inventory_deduction_quantity").record(quantity as f64);
}
