//! 订单中继服务
//!
//! 同一个可执行文件承担两种角色：
//! - producer：向订单队列发布一条演示订单后退出
//! - consumer：持续消费订单队列，逐行模拟库存扣减，直到收到关闭信号

pub mod cli;
pub mod consumer;
pub mod error;
pub mod inventory;
pub mod publisher;
pub mod shutdown;

pub use consumer::{
    AbortOnDrop, ConsumerState, OrderConsumer, run_consumer, run_consumer_until, run_consumer_with,
};
pub use error::RelayError;
pub use publisher::{OrderPublisher, demo_order, run_producer};
