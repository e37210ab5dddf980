//! 测试工具模块
//!
//! 提供测试所需的订单样例、异常消息体和内存队列实现，
//! 使生产端与消费端逻辑可以在没有 broker 的情况下验证。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::amqp::{ConsumerMessage, MessagePublisher};
use crate::error::{OrderQueueError, Result};
use crate::order::{Item, Order};

// ==================== 测试数据生成器 ====================

/// 生成唯一的测试订单 ID
pub fn test_order_id() -> String {
    format!("test-order-{}", Uuid::new_v4())
}

/// 订单样例
pub struct TestOrders;

impl TestOrders {
    /// 生产者默认发送的演示订单
    pub fn sample() -> Order {
        Order::new(
            "123456",
            "987",
            vec![Item::new("A001", 2), Item::new("B002", 1)],
            150.0,
        )
    }

    /// 无明细、零金额的订单
    pub fn empty(order_id: &str) -> Order {
        Order::new(order_id, "user-empty", vec![], 0.0)
    }

    /// 生成带 n 行明细的订单，第 i 行数量为 i + 1
    pub fn with_items(order_id: &str, n: usize) -> Order {
        let items = (0..n)
            .map(|i| Item::new(format!("SKU-{i:03}"), i as i64 + 1))
            .collect();
        Order::new(order_id, "user-bulk", items, n as f64 * 10.0)
    }
}

/// 异常或非常规消息体
pub struct TestPayloads;

impl TestPayloads {
    /// 附带未知字段的合法订单
    pub fn with_unknown_fields() -> Vec<u8> {
        br#"{"order_id":"123456","user_id":"987","source":"mobile","items":[{"item_id":"A001","quantity":2,"warehouse":"WH-1"}],"total_price":150.0,"version":2}"#.to_vec()
    }

    /// 不是 JSON
    pub fn malformed() -> Vec<u8> {
        b"{this is not json".to_vec()
    }

    /// 缺少 items
    pub fn missing_items() -> Vec<u8> {
        br#"{"order_id":"123456","user_id":"987","total_price":150.0}"#.to_vec()
    }

    /// quantity 类型错误
    pub fn wrong_quantity_type() -> Vec<u8> {
        br#"{"order_id":"123456","user_id":"987","items":[{"item_id":"A001","quantity":"two"}],"total_price":150.0}"#.to_vec()
    }
}

// ==================== 内存队列 ====================

/// 队列中保存的一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub payload: Vec<u8>,
    pub content_type: String,
}

/// 单队列内存实现
///
/// 语义对齐自动确认模式：消息在投递给消费者的一刻即从队列移除，
/// 之后处理是否完成都不会再次投递。
pub struct InMemoryQueue {
    name: String,
    messages: Mutex<VecDeque<StoredMessage>>,
    notify: Notify,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<StoredMessage>> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 队列中待投递的消息数
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 队列内容快照（不移除）
    pub fn snapshot(&self) -> Vec<StoredMessage> {
        self.lock().iter().cloned().collect()
    }

    /// 非阻塞取出一条消息
    pub fn try_receive(&self) -> Option<ConsumerMessage> {
        self.lock().pop_front().map(|stored| {
            ConsumerMessage::new(stored.payload).with_content_type(Some(&stored.content_type))
        })
    }

    /// 等待并取出下一条消息，取出即视为已确认
    pub async fn receive(&self) -> ConsumerMessage {
        loop {
            let notified = self.notify.notified();
            if let Some(msg) = self.try_receive() {
                return msg;
            }
            notified.await;
        }
    }

    /// 以消息流形式订阅，流永不结束
    pub fn subscribe(self: Arc<Self>) -> impl Stream<Item = Result<ConsumerMessage>> {
        futures::stream::unfold(self, |queue| async move {
            let msg = queue.receive().await;
            Some((Ok(msg), queue))
        })
    }
}

#[async_trait]
impl MessagePublisher for InMemoryQueue {
    async fn publish(&self, queue: &str, payload: &[u8], content_type: &str) -> Result<()> {
        if queue != self.name {
            return Err(OrderQueueError::Publish(format!(
                "未知队列: {queue}（内存队列为 {}）",
                self.name
            )));
        }

        self.lock().push_back(StoredMessage {
            payload: payload.to_vec(),
            content_type: content_type.to_string(),
        });
        self.notify.notify_one();
        Ok(())
    }
}
