//! 统一错误处理模块
//!
//! 定义订单中继系统共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

use crate::order::{DecodeError, EncodeError};

/// 系统错误类型
#[derive(Debug, Error)]
pub enum OrderQueueError {
    // ==================== 连接错误 ====================
    #[error("连接 AMQP broker 失败: {0}")]
    Connection(String),

    #[error("打开 AMQP channel 失败: {0}")]
    Channel(String),

    // ==================== 队列错误 ====================
    #[error("声明队列失败: queue={queue}, 原因={reason}")]
    QueueDeclare { queue: String, reason: String },

    #[error("注册消费者失败: queue={queue}, 原因={reason}")]
    Subscribe { queue: String, reason: String },

    #[error("发布消息失败: {0}")]
    Publish(String),

    #[error("消息确认失败: {0}")]
    Acknowledge(String),

    #[error("消息流中断: {0}")]
    Stream(String),

    // ==================== 编解码错误 ====================
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, OrderQueueError>;

impl OrderQueueError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Channel(_) => "CHANNEL_ERROR",
            Self::QueueDeclare { .. } => "QUEUE_DECLARE_ERROR",
            Self::Subscribe { .. } => "SUBSCRIBE_ERROR",
            Self::Publish(_) => "PUBLISH_ERROR",
            Self::Acknowledge(_) => "ACK_ERROR",
            Self::Stream(_) => "STREAM_ERROR",
            Self::Encode(_) => "ENCODE_ERROR",
            Self::Decode(_) => "DECODE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
