//! 测试套件

pub mod order_flow;
