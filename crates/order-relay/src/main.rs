//! 订单中继服务入口
//!
//! `--mode producer` 发布一条演示订单，`--mode consumer` 持续消费订单队列，
//! 其他情况只打印问候语。

use anyhow::Result;
use clap::Parser;
use order_relay::cli::{Cli, Role};
use order_relay::{run_consumer, run_producer};
use order_shared::{config::AppConfig, observability};
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "order-relay";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let Some(role) = cli.role() else {
        println!("Hello World");
        return Ok(());
    };

    // 1. 加载配置，失败时回退默认值，再叠加命令行参数
    let (mut config, load_error) = match AppConfig::load(SERVICE_NAME) {
        Ok(config) => (config, None),
        Err(e) => {
            let config = AppConfig {
                service_name: SERVICE_NAME.to_string(),
                environment: "development".to_string(),
                ..AppConfig::default()
            };
            (config, Some(e))
        }
    };
    cli.apply_overrides(&mut config);

    // 2. 初始化日志与指标
    let _guard = observability::init(&config.service_name, &config.observability).await?;
    if let Some(e) = load_error {
        warn!(error = %e, "加载配置失败，使用默认配置");
    }

    info!(
        role = ?role,
        environment = %config.environment,
        queue = %config.queue.name,
        "Starting {}...",
        SERVICE_NAME
    );

    // 3. 按角色运行
    let result = match role {
        Role::Producer => run_producer(&config).await.map(|_| ()),
        Role::Consumer => run_consumer(&config).await.map(|_| ()),
    };

    if let Err(e) = &result {
        error!(error = %e, code = e.code(), "致命错误，进程退出");
    } else {
        info!("{} 已退出", SERVICE_NAME);
    }

    result.map_err(Into::into)
}
