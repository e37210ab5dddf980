//! 共享库
//!
//! 包含生产者与消费者共用的配置、错误处理、订单编解码、AMQP 与可观测性等基础设施代码。

pub mod amqp;
pub mod config;
pub mod error;
pub mod observability;
pub mod order;
pub mod test_utils;
