//! 命令行参数

use clap::Parser;
use order_shared::config::AppConfig;

/// 订单中继：发布演示订单，或消费订单队列并模拟扣减库存
#[derive(Debug, Parser)]
#[command(name = "order-relay", version, about)]
pub struct Cli {
    /// 运行模式：producer 或 consumer，其他值只打印问候语
    #[arg(short, long)]
    pub mode: Option<String>,

    /// AMQP broker 地址，覆盖配置文件
    #[arg(long)]
    pub amqp_url: Option<String>,

    /// 队列名，覆盖配置文件
    #[arg(long)]
    pub queue: Option<String>,

    /// 日志级别
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// 以 JSON 格式输出日志
    #[arg(long)]
    pub json_logs: bool,
}

/// 进程角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Producer,
    Consumer,
}

impl Cli {
    /// 解析运行模式，未知或缺省时返回 None
    pub fn role(&self) -> Option<Role> {
        match self.mode.as_deref() {
            Some("producer") => Some(Role::Producer),
            Some("consumer") => Some(Role::Consumer),
            _ => None,
        }
    }

    /// 用命令行参数覆盖已加载的配置
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(url) = &self.amqp_url {
            config.amqp.url = url.clone();
        }
        if let Some(queue) = &self.queue {
            config.queue.name = queue.clone();
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
        if self.json_logs {
            config.observability.json_logs = true;
        }
    }
}
