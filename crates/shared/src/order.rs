//! 订单消息模型与编解码
//!
//! 定义在队列中传递的订单工作项及其 JSON 线上格式。字段名是生产者与消费者之间的
//! 线上契约（`order_id` / `user_id` / `items` / `total_price`，明细为
//! `item_id` / `quantity`），任何一侧都不能单方面改名。
//!
//! 解码对未知字段宽容（向前兼容），对必填字段的存在性和类型严格。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::error::Category;
use thiserror::Error;

/// 消息体编码格式，随每条消息作为 content-type 发送
pub const CONTENT_TYPE: &str = "application/json";

// ---------------------------------------------------------------------------
// Item / Order
// ---------------------------------------------------------------------------

/// 订单明细
///
/// 没有独立身份，只作为所属订单中的一行存在。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub item_id: String,
    /// 数量；线上不校验正负，交由 `Order::validate` 提示
    pub quantity: i64,
}

impl Item {
    pub fn new(item_id: impl Into<String>, quantity: i64) -> Self {
        Self {
            item_id: item_id.into(),
            quantity,
        }
    }
}

/// 订单工作项
///
/// 生产端在编码前临时构造，消费端每处理一条消息重建一次，处理完即丢弃。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub user_id: String,
    /// 保持顺序，允许为空；线上的 `null` 视为空列表，但字段本身必须存在
    #[serde(deserialize_with = "null_as_empty")]
    pub items: Vec<Item>,
    /// 金额，不携带币种，不与明细核对
    pub total_price: f64,
}

impl Order {
    pub fn new(
        order_id: impl Into<String>,
        user_id: impl Into<String>,
        items: Vec<Item>,
        total_price: f64,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            user_id: user_id.into(),
            items,
            total_price,
        }
    }

    /// 编码为 JSON 字节
    ///
    /// 非有限金额（NaN、±inf）在 JSON 中没有表示，serde_json 会写成 `null`，
    /// 消费端无法解码，因此在编码时直接拒绝。
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        if !self.total_price.is_finite() {
            return Err(EncodeError::NonFiniteTotalPrice(self.total_price));
        }

        let mut buf = Vec::with_capacity(64 + self.items.len() * 32);
        serde_json::to_writer(&mut buf, self).map_err(|e| EncodeError::Serialize(e.to_string()))?;
        Ok(buf)
    }

    /// 从 JSON 字节解码
    ///
    /// 失败时不会返回部分填充的订单。
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(bytes).map_err(DecodeError::from)
    }

    /// 明细数量合计
    pub fn total_quantity(&self) -> i64 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// 检查订单内容，返回发现的问题列表
    ///
    /// 仅作提示用途：线上路径不拒绝任何能解码的订单，以保持与现有生产者的兼容。
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.order_id.trim().is_empty() {
            issues.push(ValidationIssue::BlankField { field: "order_id" });
        }
        if self.user_id.trim().is_empty() {
            issues.push(ValidationIssue::BlankField { field: "user_id" });
        }
        if self.items.is_empty() {
            issues.push(ValidationIssue::NoItems);
        }
        for (index, item) in self.items.iter().enumerate() {
            if item.item_id.trim().is_empty() {
                issues.push(ValidationIssue::BlankItemId { index });
            }
            if item.quantity < 0 {
                issues.push(ValidationIssue::NegativeQuantity {
                    item_id: item.item_id.clone(),
                    quantity: item.quantity,
                });
            }
        }
        if !self.total_price.is_finite() || self.total_price < 0.0 {
            issues.push(ValidationIssue::InvalidTotalPrice(self.total_price));
        }

        issues
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Item>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Item>>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// ValidationIssue
// ---------------------------------------------------------------------------

/// 订单内容问题
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationIssue {
    #[error("字段为空: {field}")]
    BlankField { field: &'static str },

    #[error("订单没有明细")]
    NoItems,

    #[error("第 {index} 行明细缺少 item_id")]
    BlankItemId { index: usize },

    #[error("明细数量为负: item_id={item_id}, quantity={quantity}")]
    NegativeQuantity { item_id: String, quantity: i64 },

    #[error("订单金额无效: {0}")]
    InvalidTotalPrice(f64),
}

// ---------------------------------------------------------------------------
// EncodeError
// ---------------------------------------------------------------------------

/// 订单编码错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("订单金额不是有限数值，无法编码为 JSON: {0}")]
    NonFiniteTotalPrice(f64),

    #[error("订单序列化失败: {0}")]
    Serialize(String),
}

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

/// 订单解码错误
#[derive(Debug, Error)]
pub enum DecodeError {
    /// 消息体不是合法的 JSON 文本（语法错误、截断、非 UTF-8）
    #[error("消息体不是合法 JSON (line {line}, column {column}): {message}")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },

    /// JSON 合法但结构不符合订单格式（缺字段、类型不匹配）
    #[error("消息体结构不匹配订单格式 (line {line}, column {column}): {message}")]
    Schema {
        message: String,
        line: usize,
        column: usize,
    },
}

impl DecodeError {
    /// 是否为结构不匹配（而非语法错误）
    pub fn is_schema(&self) -> bool {
        matches!(self, Self::Schema { .. })
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        let line = err.line();
        let column = err.column();
        let message = err.to_string();
        match err.classify() {
            Category::Data => Self::Schema {
                message,
                line,
                column,
            },
            Category::Syntax | Category::Eof | Category::Io => Self::Syntax {
                message,
                line,
                column,
            },
        }
    }
}
