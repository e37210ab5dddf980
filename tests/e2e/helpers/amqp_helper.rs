//! AMQP 辅助工具
//!
//! 直接使用 lapin 操作测试队列：发布原始消息、拉取消息、查询积压。

use std::time::Duration;

use anyhow::{Result, bail};
use lapin::options::{
    BasicAckOptions, BasicGetOptions, BasicPublishOptions, QueueDeclareOptions,
    QueueDeleteOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};

/// 从队列拉取到的一条消息
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub payload: Vec<u8>,
    pub content_type: Option<String>,
}

/// AMQP 辅助工具
pub struct AmqpHelper {
    connection: Connection,
    channel: Channel,
}

impl AmqpHelper {
    pub async fn new(url: &str) -> Result<Self> {
        let connection = Connection::connect(
            url,
            ConnectionProperties::default().with_connection_name("order-relay-e2e".into()),
        )
        .await?;
        let channel = connection.create_channel().await?;

        Ok(Self {
            connection,
            channel,
        })
    }

    /// 以与服务一致的参数声明队列
    pub async fn declare(&self, queue: &str) -> Result<()> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    /// 队列中待投递的消息数
    pub async fn message_count(&self, queue: &str) -> Result<u32> {
        let declared = self
            .channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(declared.message_count())
    }

    /// 通过默认交换机发布原始消息
    pub async fn publish_raw(&self, queue: &str, payload: &[u8], content_type: &str) -> Result<()> {
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_content_type(content_type.into()),
            )
            .await?
            .await?;
        Ok(())
    }

    /// 拉取一条消息并确认，队列为空时返回 None
    pub async fn fetch(&self, queue: &str) -> Result<Option<FetchedMessage>> {
        let Some(message) = self
            .channel
            .basic_get(queue, BasicGetOptions::default())
            .await?
        else {
            return Ok(None);
        };

        let delivery = message.delivery;
        delivery.ack(BasicAckOptions::default()).await?;

        Ok(Some(FetchedMessage {
            content_type: delivery
                .properties
                .content_type()
                .as_ref()
                .map(|ct| ct.as_str().to_string()),
            payload: delivery.data,
        }))
    }

    /// 等待队列积压降为 0
    pub async fn wait_until_empty(&self, queue: &str, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.message_count(queue).await? == 0 {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("等待队列 {queue} 清空超时");
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// 删除测试队列
    pub async fn delete(&self, queue: &str) -> Result<()> {
        self.channel
            .queue_delete(queue, QueueDeleteOptions::default())
            .await?;
        Ok(())
    }

    pub async fn close(self) -> Result<()> {
        self.connection.close(200, "bye").await?;
        Ok(())
    }
}
