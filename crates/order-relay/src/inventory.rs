//! 模拟库存扣减
//!
//! 通过 `InventoryDeductor` trait 抽象扣减行为。当前实现只记录"将要扣减"的日志，
//! 不修改任何外部状态；接入真实库存系统时只需实现同一 trait。

use async_trait::async_trait;
use order_shared::observability::metrics;
use order_shared::order::Item;
use tracing::info;

use crate::error::RelayError;

/// 一次扣减的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeductionRecord {
    pub order_id: String,
    pub item_id: String,
    pub quantity: i64,
}

/// 库存扣减器
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InventoryDeductor: Send + Sync {
    /// 为订单中的一行明细扣减库存
    async fn deduct(&self, order_id: &str, item: &Item) -> Result<DeductionRecord, RelayError>;
}

/// 仅记录日志的扣减器
pub struct LoggingInventory;

#[async_trait]
impl InventoryDeductor for LoggingInventory {
    async fn deduct(&self, order_id: &str, item: &Item) -> Result<DeductionRecord, RelayError> {
        info!(
            order_id,
            item_id = %item.item_id,
            quantity = item.quantity,
            " - 扣减库存: {} 件 {}",
            item.quantity,
            item.item_id
        );
        metrics::record_inventory_deduction(item.quantity);

        Ok(DeductionRecord {
            order_id: order_id.to_string(),
            item_id: item.item_id.clone(),
            quantity: item.quantity,
        })
    }
}
