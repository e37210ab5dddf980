//! 订单发布
//!
//! 生产者模式：连接 broker，声明队列，发布一条演示订单后关闭连接退出。

use order_shared::amqp::{AmqpConnection, AmqpProducer, MessagePublisher};
use order_shared::config::AppConfig;
use order_shared::error::OrderQueueError;
use order_shared::observability::metrics;
use order_shared::order::{CONTENT_TYPE, Item, Order};
use tracing::{error, info};

use crate::error::RelayError;

/// 生产者模式默认发送的订单
pub fn demo_order() -> Order {
    Order::new(
        "123456",
        "987",
        vec![Item::new("A001", 2), Item::new("B002", 1)],
        150.0,
    )
}

/// 订单发布器
///
/// 对 `MessagePublisher` 的薄封装，固定目标队列，负责编码和记录发布结果。
pub struct OrderPublisher<P> {
    publisher: P,
    queue: String,
}

impl<P: MessagePublisher> OrderPublisher<P> {
    pub fn new(publisher: P, queue: impl Into<String>) -> Self {
        Self {
            publisher,
            queue: queue.into(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// 编码并发布一条订单，broker 接收后返回
    ///
    /// 无法编码的订单（金额非有限数）不会发出。
    pub async fn publish(&self, order: &Order) -> Result<(), RelayError> {
        let body = match order.encode() {
            Ok(body) => body,
            Err(e) => {
                metrics::record_order_published(&self.queue, "failed");
                error!(order_id = %order.order_id, error = %e, "订单编码失败，未发布");
                return Err(OrderQueueError::from(e).into());
            }
        };

        if let Err(e) = self
            .publisher
            .publish(&self.queue, &body, CONTENT_TYPE)
            .await
        {
            metrics::record_order_published(&self.queue, "failed");
            error!(order_id = %order.order_id, queue = %self.queue, error = %e, "订单发布失败");
            return Err(e.into());
        }

        metrics::record_order_published(&self.queue, "success");
        info!(
            order_id = %order.order_id,
            queue = %self.queue,
            " [x] Sent order: {}",
            String::from_utf8_lossy(&body)
        );
        Ok(())
    }

    pub fn inner(&self) -> &P {
        &self.publisher
    }

    pub fn into_inner(self) -> P {
        self.publisher
    }
}

/// 生产者模式入口
///
/// 任何一步失败都会先关闭连接再返回错误。
pub async fn run_producer(config: &AppConfig) -> Result<Order, RelayError> {
    let connection = AmqpConnection::connect(&config.amqp, config.connection_name()).await?;

    let result = publish_demo_order(&connection, config).await;
    connection.close().await;
    result
}

async fn publish_demo_order(
    connection: &AmqpConnection,
    config: &AppConfig,
) -> Result<Order, RelayError> {
    let producer = AmqpProducer::new(connection, &config.queue).await?;
    let publisher = OrderPublisher::new(producer, config.queue.name.clone());

    let order = demo_order();
    let result = publisher.publish(&order).await;
    publisher.into_inner().close().await;

    result.map(|()| order)
}
