//! 订单中继服务错误类型
//!
//! 区分共享基础设施错误、库存扣减错误和消费任务异常，
//! 便于入口层统一记录致命错误后退出。

use order_shared::error::OrderQueueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("库存扣减失败: item_id={item_id}, 原因={reason}")]
    InventoryFailed { item_id: String, reason: String },

    #[error("订阅已结束: {0}")]
    SubscriptionLost(String),

    #[error("消费任务异常退出: {0}")]
    TaskJoin(String),

    #[error(transparent)]
    Shared(#[from] OrderQueueError),
}

impl RelayError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::InventoryFailed { .. } => "INVENTORY_FAILED",
            Self::SubscriptionLost(_) => "SUBSCRIPTION_LOST",
            Self::TaskJoin(_) => "TASK_JOIN_ERROR",
            Self::Shared(e) => e.code(),
        }
    }

    /// 转换为共享错误，供消费循环据此决定 ack / reject
    pub fn into_queue_error(self) -> OrderQueueError {
        match self {
            Self::Shared(e) => e,
            other => OrderQueueError::Internal(other.to_string()),
        }
    }
}
