//! 测试辅助工具

mod amqp_helper;

pub use amqp_helper::*;
