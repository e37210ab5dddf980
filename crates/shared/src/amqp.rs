//! AMQP 基础设施封装
//!
//! 将 lapin 的底层 API 封装为业务友好的 Producer/Consumer 抽象，
//! 统一队列声明参数、消息属性、错误映射和关闭语义。
//!
//! 连接由 `AmqpConnection` 显式持有并传入生产者/消费者，不存在进程级全局连接；
//! 调用方在每条退出路径上调用 `close` 释放。

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, QueueDeclareOptions,
};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{AckMode, AmqpConfig, ConsumerConfig, QueueConfig};
use crate::error::{OrderQueueError, Result};
use crate::order::CONTENT_TYPE;

/// AMQP 正常关闭的回复码
const REPLY_SUCCESS: u16 = 200;

/// 持久化投递模式（basic.properties delivery-mode）
const DELIVERY_MODE_PERSISTENT: u8 = 2;

// ---------------------------------------------------------------------------
// 队列名常量
// ---------------------------------------------------------------------------

/// 集中管理队列名称，防止字符串散落在生产端与消费端导致不一致
pub mod queues {
    pub const ORDER_QUEUE: &str = "order_queue";
}

// ---------------------------------------------------------------------------
// AmqpConnection
// ---------------------------------------------------------------------------

/// 显式构造、显式释放的 broker 连接
///
/// 由单个角色（生产者或消费者）独占，不跨角色共享。
pub struct AmqpConnection {
    connection: Connection,
}

impl AmqpConnection {
    /// 建立连接
    pub async fn connect(config: &AmqpConfig, connection_name: &str) -> Result<Self> {
        let properties = ConnectionProperties::default()
            .with_connection_name(connection_name.to_string().into());

        let connection = Connection::connect(&config.url, properties)
            .await
            .map_err(|e| OrderQueueError::Connection(e.to_string()))?;

        info!(connection_name, "AMQP 连接已建立");
        Ok(Self { connection })
    }

    /// 打开新的 channel
    pub async fn open_channel(&self) -> Result<Channel> {
        self.connection
            .create_channel()
            .await
            .map_err(|e| OrderQueueError::Channel(e.to_string()))
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// 关闭连接
    ///
    /// 连接已被 broker 关闭时同样视为成功，只记录日志。
    pub async fn close(self) {
        if !self.is_connected() {
            debug!("AMQP 连接已不可用，跳过关闭");
            return;
        }
        match self.connection.close(REPLY_SUCCESS, "bye").await {
            Ok(()) => info!("AMQP 连接已关闭"),
            Err(e) => warn!(error = %e, "关闭 AMQP 连接失败"),
        }
    }
}

/// 按配置声明队列，返回队列中现存消息数
///
/// 声明是幂等的：参数一致时重复声明不产生副作用，两端都可以调用。
pub async fn declare_queue(channel: &Channel, queue: &QueueConfig) -> Result<u32> {
    let options = QueueDeclareOptions {
        passive: false,
        durable: queue.durable,
        exclusive: queue.exclusive,
        auto_delete: queue.auto_delete,
        nowait: false,
    };

    let declared = channel
        .queue_declare(&queue.name, options, FieldTable::default())
        .await
        .map_err(|e| OrderQueueError::QueueDeclare {
            queue: queue.name.clone(),
            reason: e.to_string(),
        })?;

    info!(
        queue = %queue.name,
        durable = queue.durable,
        message_count = declared.message_count(),
        consumer_count = declared.consumer_count(),
        "队列已声明"
    );
    Ok(declared.message_count())
}

async fn close_channel(channel: &Channel) {
    if !channel.status().connected() {
        return;
    }
    if let Err(e) = channel.close(REPLY_SUCCESS, "bye").await {
        warn!(error = %e, "关闭 AMQP channel 失败");
    }
}

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的消息的统一表示
///
/// 将 lapin 的 `Delivery` 转换为拥有所有权的结构体，
/// 与具体 broker 客户端解耦，便于测试中直接构造。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    pub payload: Vec<u8>,
    acker: Option<Acker>,
}

impl ConsumerMessage {
    /// 直接由负载构造，不附带确认句柄
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            delivery_tag: 0,
            exchange: String::new(),
            routing_key: String::new(),
            redelivered: false,
            content_type: Some(CONTENT_TYPE.to_string()),
            message_id: None,
            payload: payload.into(),
            acker: None,
        }
    }

    pub fn with_content_type(mut self, content_type: Option<&str>) -> Self {
        self.content_type = content_type.map(String::from);
        self
    }

    /// 从 lapin 投递构造
    ///
    /// 自动确认模式下 broker 已在投递时移除消息，不保留确认句柄。
    fn from_delivery(delivery: Delivery, ack_mode: AckMode) -> Self {
        let content_type = delivery
            .properties
            .content_type()
            .as_ref()
            .map(|s| s.as_str().to_string());
        let message_id = delivery
            .properties
            .message_id()
            .as_ref()
            .map(|s| s.as_str().to_string());

        Self {
            delivery_tag: delivery.delivery_tag,
            exchange: delivery.exchange.as_str().to_string(),
            routing_key: delivery.routing_key.as_str().to_string(),
            redelivered: delivery.redelivered,
            content_type,
            message_id,
            payload: delivery.data,
            acker: match ack_mode {
                AckMode::Auto => None,
                AckMode::Manual => Some(delivery.acker),
            },
        }
    }

    /// content-type 缺失或与约定格式一致
    pub fn has_expected_content_type(&self) -> bool {
        self.content_type
            .as_deref()
            .is_none_or(|ct| ct.eq_ignore_ascii_case(CONTENT_TYPE))
    }

    /// 确认句柄；自动确认模式或测试构造的消息返回空句柄
    pub fn acknowledger(&self) -> Acknowledger {
        Acknowledger(self.acker.clone())
    }
}

/// 手动确认模式下的消息确认句柄，空句柄的操作均为 no-op
#[derive(Debug, Clone, Default)]
pub struct Acknowledger(Option<Acker>);

impl Acknowledger {
    pub fn is_manual(&self) -> bool {
        self.0.is_some()
    }

    pub async fn ack(&self) -> Result<()> {
        let Some(acker) = &self.0 else {
            return Ok(());
        };
        acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| OrderQueueError::Acknowledge(e.to_string()))
    }

    /// 拒绝且不重新入队；队列配置了死信交换机时由 broker 转投
    pub async fn reject(&self) -> Result<()> {
        let Some(acker) = &self.0 else {
            return Ok(());
        };
        acker
            .reject(BasicRejectOptions { requeue: false })
            .await
            .map(|_| ())
            .map_err(|e| OrderQueueError::Acknowledge(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// MessagePublisher
// ---------------------------------------------------------------------------

/// 消息发布抽象
///
/// 生产端只依赖此 trait，测试中以内存队列替换真实 broker。
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// 以 fire-and-forget 方式发送一条消息到指定队列
    async fn publish(&self, queue: &str, payload: &[u8], content_type: &str) -> Result<()>;
}

#[async_trait]
impl<T: MessagePublisher + ?Sized> MessagePublisher for Arc<T> {
    async fn publish(&self, queue: &str, payload: &[u8], content_type: &str) -> Result<()> {
        (**self).publish(queue, payload, content_type).await
    }
}

// ---------------------------------------------------------------------------
// AmqpProducer
// ---------------------------------------------------------------------------

/// 面向业务的 AMQP 生产者
///
/// 持有一个已声明目标队列的 channel，通过默认交换机按队列名路由。
/// 不开启 publisher confirm：`publish` 成功只代表本地写出未报传输错误。
pub struct AmqpProducer {
    channel: Channel,
}

impl AmqpProducer {
    /// 打开 channel 并声明队列
    pub async fn new(connection: &AmqpConnection, queue: &QueueConfig) -> Result<Self> {
        let channel = connection.open_channel().await?;
        declare_queue(&channel, queue).await?;

        info!(queue = %queue.name, "AMQP 生产者已初始化");
        Ok(Self { channel })
    }

    /// 发送原始字节消息
    pub async fn send(&self, queue: &str, payload: &[u8], content_type: &str) -> Result<String> {
        let message_id = Uuid::now_v7().to_string();
        let timestamp = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();

        let properties = BasicProperties::default()
            .with_content_type(ShortString::from(content_type))
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT)
            .with_message_id(ShortString::from(message_id.clone()))
            .with_timestamp(timestamp);

        // 返回的 PublisherConfirm 直接丢弃：未开启 confirm 模式，不等待 broker 回执
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| OrderQueueError::Publish(e.to_string()))?;

        debug!(queue, message_id = %message_id, bytes = payload.len(), "消息已发送");
        Ok(message_id)
    }

    /// 关闭 channel
    pub async fn close(self) {
        close_channel(&self.channel).await;
    }
}

#[async_trait]
impl MessagePublisher for AmqpProducer {
    async fn publish(&self, queue: &str, payload: &[u8], content_type: &str) -> Result<()> {
        self.send(queue, payload, content_type).await.map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// AmqpConsumer
// ---------------------------------------------------------------------------

/// 消费循环结束原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// 收到关闭信号
    Shutdown,
    /// broker 端关闭了订阅
    StreamEnded,
    /// 订阅流返回错误（通常是连接或 channel 断开）
    StreamFailed(String),
}

/// 消费循环统计
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub outcome: DrainOutcome,
    pub received: u64,
    pub failed: u64,
}

/// 面向业务的 AMQP 消费者
pub struct AmqpConsumer {
    channel: Channel,
    consumer: Consumer,
    ack_mode: AckMode,
}

impl AmqpConsumer {
    /// 打开 channel、声明队列并注册消费者
    pub async fn subscribe(
        connection: &AmqpConnection,
        queue: &QueueConfig,
        config: &ConsumerConfig,
    ) -> Result<Self> {
        let channel = connection.open_channel().await?;
        declare_queue(&channel, queue).await?;

        if config.prefetch_count > 0 {
            channel
                .basic_qos(config.prefetch_count, BasicQosOptions::default())
                .await
                .map_err(|e| OrderQueueError::Channel(e.to_string()))?;
        }

        let consumer = channel
            .basic_consume(
                &queue.name,
                &config.consumer_tag,
                consume_options(config.ack_mode),
                FieldTable::default(),
            )
            .await
            .map_err(|e| OrderQueueError::Subscribe {
                queue: queue.name.clone(),
                reason: e.to_string(),
            })?;

        info!(
            queue = %queue.name,
            consumer_tag = %consumer.tag().as_str(),
            ack_mode = ?config.ack_mode,
            "已注册 AMQP 消费者"
        );

        Ok(Self {
            channel,
            consumer,
            ack_mode: config.ack_mode,
        })
    }

    /// 启动消费循环，结束后关闭 channel
    pub async fn start<F, Fut>(self, shutdown: watch::Receiver<bool>, handler: F) -> DrainReport
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let ack_mode = self.ack_mode;
        let stream = self.consumer.map(move |delivery| {
            delivery
                .map(|d| ConsumerMessage::from_delivery(d, ack_mode))
                .map_err(|e| OrderQueueError::Stream(e.to_string()))
        });

        let report = drain(stream, shutdown, handler).await;
        close_channel(&self.channel).await;
        report
    }
}

/// 按确认模式构造 basic.consume 参数
///
/// 自动确认模式下 `no_ack = true`，broker 投递即视为确认（至多一次）。
fn consume_options(ack_mode: AckMode) -> BasicConsumeOptions {
    BasicConsumeOptions {
        no_local: false,
        no_ack: ack_mode == AckMode::Auto,
        exclusive: false,
        nowait: false,
    }
}

/// 消费循环
///
/// 使用 `tokio::select!` 同时监听消息流和关闭信号：
/// - 收到消息时调用 handler 处理；handler 返回错误只记录日志而不中断循环，
///   手动确认模式下据此决定 ack 或 reject。
/// - 关闭信号只在两条消息之间检查，正在执行的 handler 会自然完成。
/// - 消息流结束或出错时退出循环。
///
/// 单任务串行处理：处理顺序等于投递顺序。
pub async fn drain<S, F, Fut>(
    stream: S,
    mut shutdown: watch::Receiver<bool>,
    handler: F,
) -> DrainReport
where
    S: Stream<Item = Result<ConsumerMessage>>,
    F: Fn(ConsumerMessage) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    futures::pin_mut!(stream);

    let mut received = 0u64;
    let mut failed = 0u64;

    info!("消费循环已启动");

    // 启动前已请求关闭
    if *shutdown.borrow_and_update() {
        info!("收到关闭信号，消费循环退出");
        return DrainReport {
            outcome: DrainOutcome::Shutdown,
            received,
            failed,
        };
    }

    let outcome = loop {
        tokio::select! {
            // 偏向关闭信号，保证收到关闭时能尽快退出
            biased;

            changed = shutdown.changed() => {
                // 发送端被丢弃同样视为关闭
                if changed.is_err() || *shutdown.borrow() {
                    info!("收到关闭信号，消费循环退出");
                    break DrainOutcome::Shutdown;
                }
            }

            next = stream.next() => {
                let Some(next) = next else {
                    warn!("消息流意外结束");
                    break DrainOutcome::StreamEnded;
                };

                let msg = match next {
                    Ok(msg) => msg,
                    Err(e) => {
                        error!(error = %e, "接收消息出错，消费循环终止");
                        break DrainOutcome::StreamFailed(e.to_string());
                    }
                };

                received += 1;
                debug!(
                    delivery_tag = msg.delivery_tag,
                    redelivered = msg.redelivered,
                    bytes = msg.payload.len(),
                    "收到消息"
                );

                let delivery_tag = msg.delivery_tag;
                let acknowledger = msg.acknowledger();
                let settled = match handler(msg).await {
                    Ok(()) => acknowledger.ack().await,
                    Err(e) => {
                        failed += 1;
                        error!(delivery_tag, error = %e, code = e.code(), "处理消息失败，继续消费");
                        acknowledger.reject().await
                    }
                };
                if let Err(e) = settled {
                    error!(error = %e, "消息确认失败");
                }
            }
        }
    };

    info!(received, failed, outcome = ?outcome, "消费循环已结束");
    DrainReport {
        outcome,
        received,
        failed,
    }
}

// ---------------------------------------------------------------------------
// 测试
// ---------------------------------------------------------------------------
