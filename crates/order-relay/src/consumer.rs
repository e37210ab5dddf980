//! 订单消费
//!
//! 消费者模式：订阅订单队列，逐条解码订单并模拟扣减库存，直到收到关闭信号。
//!
//! 单条消息解码或处理失败只记录日志，不会终止消费循环；
//! 订阅流本身断开（连接丢失、broker 取消订阅）才会让进程以错误退出。

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::Stream;
use futures::future::BoxFuture;
use order_shared::amqp::{AmqpConnection, AmqpConsumer, ConsumerMessage, DrainOutcome, DrainReport};
use order_shared::config::AppConfig;
use order_shared::error::{OrderQueueError, Result as QueueResult};
use order_shared::observability::metrics;
use order_shared::order::Order;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::RelayError;
use crate::inventory::{DeductionRecord, InventoryDeductor, LoggingInventory};
use crate::shutdown::shutdown_signal;

/// 消费者生命周期状态
///
/// 只会单向前进：Idle → Draining → Terminated。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// 已创建，尚未开始消费
    Idle,
    /// 正在消费
    Draining,
    /// 已退出消费循环
    Terminated,
}

/// 消息处理选项
#[derive(Debug, Clone)]
pub struct ProcessingOptions {
    /// 队列名，用于日志和指标标签
    pub queue: String,
    /// 是否对解码后的订单做内容检查（只告警，不丢弃）
    pub validate_orders: bool,
}

impl ProcessingOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            queue: config.queue.name.clone(),
            validate_orders: config.consumer.validate_orders,
        }
    }
}

/// 订单消费者
///
/// 持有库存扣减器和处理选项，消息来源在运行时传入：
/// 生产环境为 `AmqpConsumer`，测试中可以是任意消息流。
pub struct OrderConsumer {
    inventory: Arc<dyn InventoryDeductor>,
    options: Arc<ProcessingOptions>,
    state: watch::Sender<ConsumerState>,
}

impl OrderConsumer {
    pub fn new(inventory: Arc<dyn InventoryDeductor>, options: ProcessingOptions) -> Self {
        let (state, _) = watch::channel(ConsumerState::Idle);
        Self {
            inventory,
            options: Arc::new(options),
            state,
        }
    }

    /// 订阅状态变化
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// 消费 AMQP 订阅直到关闭信号或订阅断开
    pub async fn run(self, consumer: AmqpConsumer, shutdown: watch::Receiver<bool>) -> DrainReport {
        self.state.send_replace(ConsumerState::Draining);
        let report = consumer.start(shutdown, self.handler()).await;
        self.state.send_replace(ConsumerState::Terminated);
        report
    }

    /// 消费任意消息流，语义与 [`OrderConsumer::run`] 相同
    pub async fn run_stream<S>(self, stream: S, shutdown: watch::Receiver<bool>) -> DrainReport
    where
        S: Stream<Item = QueueResult<ConsumerMessage>>,
    {
        self.state.send_replace(ConsumerState::Draining);
        let report = order_shared::amqp::drain(stream, shutdown, self.handler()).await;
        self.state.send_replace(ConsumerState::Terminated);
        report
    }

    fn handler(&self) -> impl Fn(ConsumerMessage) -> BoxFuture<'static, QueueResult<()>> + use<> {
        let inventory = self.inventory.clone();
        let options = self.options.clone();

        move |msg| {
            let inventory = inventory.clone();
            let options = options.clone();
            async move {
                handle_message(inventory.as_ref(), &options, &msg)
                    .await
                    .map(|_| ())
                    .map_err(RelayError::into_queue_error)
            }
            .boxed()
        }
    }
}

/// 处理单条消息
///
/// 解码失败返回错误，由消费循环记录后继续处理下一条。
pub async fn handle_message(
    inventory: &dyn InventoryDeductor,
    options: &ProcessingOptions,
    msg: &ConsumerMessage,
) -> Result<Vec<DeductionRecord>, RelayError> {
    if !msg.has_expected_content_type() {
        warn!(
            delivery_tag = msg.delivery_tag,
            content_type = ?msg.content_type,
            "消息 content-type 不是 application/json，仍尝试解码"
        );
    }

    let order = match Order::decode(&msg.payload) {
        Ok(order) => order,
        Err(e) => {
            metrics::record_message_consumed(&options.queue, "decode_failed");
            return Err(OrderQueueError::from(e).into());
        }
    };

    info!(
        order_id = %order.order_id,
        user_id = %order.user_id,
        items = order.items.len(),
        total_price = order.total_price,
        " [x] 收到订单: {}",
        order.order_id
    );

    if options.validate_orders {
        for issue in order.validate() {
            warn!(order_id = %order.order_id, issue = %issue, "订单内容异常");
        }
    }

    match process_order(inventory, &order).await {
        Ok(records) => {
            metrics::record_message_consumed(&options.queue, "processed");
            Ok(records)
        }
        Err(e) => {
            metrics::record_message_consumed(&options.queue, "failed");
            Err(e)
        }
    }
}

/// 按明细顺序逐行扣减库存
pub async fn process_order(
    inventory: &dyn InventoryDeductor,
    order: &Order,
) -> Result<Vec<DeductionRecord>, RelayError> {
    let mut records = Vec::with_capacity(order.items.len());
    for item in &order.items {
        records.push(inventory.deduct(&order.order_id, item).await?);
    }
    Ok(records)
}

/// 后台任务句柄，drop 时中止任务
///
/// 外层 future 被取消时，消费循环随之停止，不会脱离调用方继续运行。
pub struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    pub fn new(handle: JoinHandle<T>) -> Self {
        Self(handle)
    }

    pub fn handle(&mut self) -> &mut JoinHandle<T> {
        &mut self.0
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        // 已结束的任务 abort 为 no-op
        self.0.abort();
    }
}

/// 消费者模式入口，Ctrl+C / SIGTERM 触发关闭
pub async fn run_consumer(config: &AppConfig) -> Result<DrainReport, RelayError> {
    run_consumer_until(config, shutdown_signal()).await
}

/// 消费直到 `shutdown` 完成，使用日志扣减器
pub async fn run_consumer_until<F>(config: &AppConfig, shutdown: F) -> Result<DrainReport, RelayError>
where
    F: Future<Output = ()>,
{
    run_consumer_with(config, Arc::new(LoggingInventory), shutdown).await
}

/// 以指定扣减器消费直到 `shutdown` 完成
///
/// 消费循环运行在独立任务上；关闭时等待当前消息处理完毕，
/// 然后关闭 channel 和连接。订阅意外结束时返回错误。
pub async fn run_consumer_with<F>(
    config: &AppConfig,
    inventory: Arc<dyn InventoryDeductor>,
    shutdown: F,
) -> Result<DrainReport, RelayError>
where
    F: Future<Output = ()>,
{
    let connection = AmqpConnection::connect(&config.amqp, config.connection_name()).await?;

    let result = consume(&connection, config, inventory, shutdown).await;
    connection.close().await;
    result
}

async fn consume<F>(
    connection: &AmqpConnection,
    config: &AppConfig,
    inventory: Arc<dyn InventoryDeductor>,
    shutdown: F,
) -> Result<DrainReport, RelayError>
where
    F: Future<Output = ()>,
{
    let amqp_consumer = AmqpConsumer::subscribe(connection, &config.queue, &config.consumer).await?;
    let consumer = OrderConsumer::new(inventory, ProcessingOptions::from_config(config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    info!(queue = %config.queue.name, " [*] 等待订单消息，按 CTRL+C 退出");

    let mut task = AbortOnDrop::new(tokio::spawn(consumer.run(amqp_consumer, shutdown_rx)));

    let joined = tokio::select! {
        joined = task.handle() => joined,
        () = shutdown => {
            shutdown_tx.send_replace(true);
            task.handle().await
        }
    };

    let report = joined.map_err(|e| RelayError::TaskJoin(e.to_string()))?;
    info!(
        received = report.received,
        failed = report.failed,
        "消费者已停止"
    );

    match &report.outcome {
        DrainOutcome::Shutdown => Ok(report),
        DrainOutcome::StreamEnded => Err(RelayError::SubscriptionLost(
            "broker 取消了订阅".to_string(),
        )),
        DrainOutcome::StreamFailed(reason) => Err(RelayError::SubscriptionLost(reason.clone())),
    }
}
