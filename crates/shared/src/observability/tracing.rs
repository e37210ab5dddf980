//! 日志初始化
//!
//! RUST_LOG 优先于配置中的日志级别；支持人类可读与 JSON 两种输出格式。

use anyhow::Result;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::ObservabilityConfig;

/// 配置中的日志级别无法解析时使用的级别
const FALLBACK_LEVEL: &str = "info";

/// 构建环境过滤器，RUST_LOG 优先
pub fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| level_filter(log_level))
}

/// 由配置的日志级别构建过滤器，非法指令回退到 info
fn level_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new(FALLBACK_LEVEL))
}

/// 初始化全局 tracing subscriber
///
/// 重复初始化会返回错误（全局 subscriber 只能设置一次）。
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let fmt_layer = if config.json_logs {
        fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
