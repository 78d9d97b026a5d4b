use async_trait::async_trait;
use lapin::{
    options::*,
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties, Queue,
};
use migration_core::{
    config::MessageQueueConfig,
    models::{MigrationMessage, MigrationType},
    traits::{MigrationQueue, QueueDelivery, QueueDepth},
    MigrationError, MigrationResult,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// RabbitMQ迁移队列实现
///
/// 每种迁移类型声明三条队列:
/// - 主队列 `<prefix>.<slug>`: quorum 队列，`x-delivery-limit` 兜底连接断开造成的重投递
/// - 死信队列 `<prefix>.<slug>.dlq`
/// - 延迟队列 `<prefix>.<slug>.delay`: 消息按 TTL 过期后转回主队列
///
/// nack 时确认原消息，并携带递增的 `x-attempt` 头重新发布到延迟队列，
/// 接收次数达到 `max_receive_count` 的直接发布到死信队列。
/// in-flight 数量只统计本进程尚未确认的消息。
pub struct RabbitMQMigrationQueue {
    connection: Connection,
    channel: Arc<Mutex<Channel>>,
    config: MessageQueueConfig,
    unacked: Arc<Mutex<HashMap<MigrationType, HashMap<u64, PendingDelivery>>>>,
}

/// 已接收未确认的消息，nack 时据此重新发布
#[derive(Debug, Clone)]
struct PendingDelivery {
    message_id: String,
    body: Vec<u8>,
    receive_count: u32,
}

/// nack 后消息的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryRoute {
    Redeliver,
    DeadLetter,
}

impl RetryRoute {
    fn after_failure(receive_count: u32, max_receive_count: u32) -> Self {
        if receive_count >= max_receive_count {
            RetryRoute::DeadLetter
        } else {
            RetryRoute::Redeliver
        }
    }
}

const ATTEMPT_HEADER: &str = "x-attempt";
const DELIVERY_COUNT_HEADER: &str = "x-delivery-count";

impl RabbitMQMigrationQueue {
    /// 连接RabbitMQ并声明指定迁移类型的队列
    pub async fn new(
        config: MessageQueueConfig,
        migration_types: &[MigrationType],
    ) -> MigrationResult<Self> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default())
            .await
            .map_err(|e| MigrationError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| MigrationError::MessageQueue(format!("创建通道失败: {e}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| MigrationError::MessageQueue(format!("开启发布确认失败: {e}")))?;

        info!("成功连接到RabbitMQ: {}", config.url);

        let queue = Self {
            connection,
            channel: Arc::new(Mutex::new(channel)),
            config,
            unacked: Arc::new(Mutex::new(HashMap::new())),
        };

        for migration_type in migration_types {
            queue.initialize_queues(*migration_type).await?;
        }

        Ok(queue)
    }

    fn main_queue(&self, migration_type: MigrationType) -> String {
        self.config.queue_name(&migration_type.slug())
    }

    fn dead_letter_queue(&self, migration_type: MigrationType) -> String {
        self.config.dead_letter_queue_name(&migration_type.slug())
    }

    fn delay_queue(&self, migration_type: MigrationType) -> String {
        self.config.delay_queue_name(&migration_type.slug())
    }

    /// 声明主队列、死信队列与延迟队列
    async fn initialize_queues(&self, migration_type: MigrationType) -> MigrationResult<()> {
        let channel = self.channel.lock().await;
        let main = self.main_queue(migration_type);
        let dlq = self.dead_letter_queue(migration_type);
        let delay = self.delay_queue(migration_type);

        self.declare_queue(&channel, &dlq, FieldTable::default()).await?;

        let mut main_args = BTreeMap::new();
        main_args.insert(
            ShortString::from("x-queue-type"),
            AMQPValue::LongString(LongString::from("quorum".to_string())),
        );
        main_args.insert(
            ShortString::from("x-delivery-limit"),
            AMQPValue::LongInt(self.config.max_receive_count as i32),
        );
        main_args.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(LongString::from(String::new())),
        );
        main_args.insert(
            ShortString::from("x-dead-letter-routing-key"),
            AMQPValue::LongString(LongString::from(dlq.clone())),
        );
        self.declare_queue(&channel, &main, FieldTable::from(main_args)).await?;

        let mut delay_args = BTreeMap::new();
        delay_args.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(LongString::from(String::new())),
        );
        delay_args.insert(
            ShortString::from("x-dead-letter-routing-key"),
            AMQPValue::LongString(LongString::from(main.clone())),
        );
        self.declare_queue(&channel, &delay, FieldTable::from(delay_args)).await?;

        info!("迁移类型 {} 的队列初始化完成", migration_type);
        Ok(())
    }

    /// 声明队列
    async fn declare_queue(
        &self,
        channel: &Channel,
        queue_name: &str,
        arguments: FieldTable,
    ) -> MigrationResult<Queue> {
        let queue = channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                arguments,
            )
            .await
            .map_err(|e| {
                MigrationError::MessageQueue(format!("声明队列 {queue_name} 失败: {e}"))
            })?;

        debug!("队列 {} 声明成功", queue_name);
        Ok(queue)
    }

    /// 被动声明获取队列中就绪的消息数
    async fn message_count(&self, channel: &Channel, queue_name: &str) -> MigrationResult<u64> {
        let queue = channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                MigrationError::MessageQueue(format!("获取队列 {queue_name} 信息失败: {e}"))
            })?;
        Ok(queue.message_count() as u64)
    }

    async fn purge(&self, channel: &Channel, queue_name: &str) -> MigrationResult<u64> {
        let purged = channel
            .queue_purge(queue_name, QueuePurgeOptions::default())
            .await
            .map_err(|e| MigrationError::MessageQueue(format!("清空队列 {queue_name} 失败: {e}")))?;
        debug!("队列 {} 已清空 {} 条消息", queue_name, purged);
        Ok(purged as u64)
    }

    fn parse_receipt(receipt: &str) -> MigrationResult<u64> {
        receipt
            .parse::<u64>()
            .map_err(|_| MigrationError::MessageQueue(format!("无效的投递回执: {receipt}")))
    }

    fn header_u32(headers: Option<&FieldTable>, name: &str) -> u32 {
        headers
            .and_then(|headers| {
                headers
                    .inner()
                    .iter()
                    .find(|(key, _)| key.as_str() == name)
                    .map(|(_, value)| value.clone())
            })
            .and_then(|value| match value {
                AMQPValue::LongInt(v) => u32::try_from(v).ok(),
                AMQPValue::LongUInt(v) => Some(v),
                AMQPValue::LongLongInt(v) => u32::try_from(v).ok(),
                AMQPValue::ShortInt(v) => u32::try_from(v).ok(),
                AMQPValue::ShortUInt(v) => Some(u32::from(v)),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// 本次为第几次接收
    ///
    /// `x-attempt` 记录此前 nack 重新发布的次数，
    /// `x-delivery-count` 是 quorum 队列在连接断开后重投递的次数。
    fn receive_count(headers: Option<&FieldTable>) -> u32 {
        Self::header_u32(headers, ATTEMPT_HEADER)
            + Self::header_u32(headers, DELIVERY_COUNT_HEADER)
            + 1
    }

    fn retry_properties(message_id: &str, attempts: u32) -> BasicProperties {
        let mut headers = FieldTable::default();
        headers.insert(ShortString::from(ATTEMPT_HEADER), AMQPValue::LongUInt(attempts));
        BasicProperties::default()
            .with_delivery_mode(2)
            .with_message_id(ShortString::from(message_id))
            .with_content_type(ShortString::from("application/json"))
            .with_headers(headers)
    }

    /// 发布并等待 broker 确认
    async fn publish(
        &self,
        channel: &Channel,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> MigrationResult<()> {
        let confirm = channel
            .basic_publish(
                "",
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| {
                MigrationError::MessageQueue(format!("发布消息到队列 {routing_key} 失败: {e}"))
            })?;

        confirm
            .await
            .map_err(|e| MigrationError::MessageQueue(format!("消息发布确认失败: {e}")))?;
        Ok(())
    }

    /// 获取连接状态
    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// 关闭连接
    pub async fn close(&self) -> MigrationResult<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| MigrationError::MessageQueue(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}

#[async_trait]
impl MigrationQueue for RabbitMQMigrationQueue {
    async fn send(
        &self,
        migration_type: MigrationType,
        message: &MigrationMessage,
        delay: Duration,
    ) -> MigrationResult<()> {
        let payload = message.encode()?;
        let mut properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_message_id(ShortString::from(message.id.as_str()))
            .with_content_type(ShortString::from("application/json"));

        let routing_key = if delay.is_zero() {
            self.main_queue(migration_type)
        } else {
            properties =
                properties.with_expiration(ShortString::from(delay.as_millis().to_string()));
            self.delay_queue(migration_type)
        };

        let channel = self.channel.lock().await;
        self.publish(&channel, &routing_key, &payload, properties).await?;

        debug!("消息 {} ({}) 已发布到队列: {}", message.id, message.kind(), routing_key);
        Ok(())
    }

    async fn receive(
        &self,
        migration_type: MigrationType,
        max_messages: usize,
    ) -> MigrationResult<Vec<QueueDelivery>> {
        let queue_name = self.main_queue(migration_type);
        let channel = self.channel.lock().await;
        let mut deliveries = Vec::new();

        while deliveries.len() < max_messages {
            let message = channel
                .basic_get(&queue_name, BasicGetOptions::default())
                .await
                .map_err(|e| {
                    MigrationError::MessageQueue(format!("从队列 {queue_name} 获取消息失败: {e}"))
                })?;
            let Some(message) = message else {
                break;
            };

            let delivery = &message.delivery;
            let message_id = delivery
                .properties
                .message_id()
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_else(|| delivery.delivery_tag.to_string());

            let receive_count = Self::receive_count(delivery.properties.headers().as_ref());

            self.unacked
                .lock()
                .await
                .entry(migration_type)
                .or_default()
                .insert(
                    delivery.delivery_tag,
                    PendingDelivery {
                        message_id: message_id.clone(),
                        body: delivery.data.clone(),
                        receive_count,
                    },
                );

            deliveries.push(QueueDelivery {
                receipt: delivery.delivery_tag.to_string(),
                message_id,
                receive_count,
                body: delivery.data.clone(),
            });
        }

        Ok(deliveries)
    }

    async fn ack(&self, migration_type: MigrationType, receipt: &str) -> MigrationResult<()> {
        let delivery_tag = Self::parse_receipt(receipt)?;
        let channel = self.channel.lock().await;
        channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| MigrationError::MessageQueue(format!("确认消息失败: {e}")))?;

        if let Some(tags) = self.unacked.lock().await.get_mut(&migration_type) {
            tags.remove(&delivery_tag);
        }
        Ok(())
    }

    /// 先发布重试副本再确认原消息，发布失败时原消息仍未确认
    async fn nack(&self, migration_type: MigrationType, receipt: &str) -> MigrationResult<()> {
        let delivery_tag = Self::parse_receipt(receipt)?;
        let pending = self
            .unacked
            .lock()
            .await
            .get(&migration_type)
            .and_then(|tags| tags.get(&delivery_tag).cloned());
        let Some(pending) = pending else {
            debug!("nack 的回执 {} 已不在处理中", receipt);
            return Ok(());
        };

        let properties = Self::retry_properties(&pending.message_id, pending.receive_count);
        let redelivery_delay = Duration::from_secs(self.config.redelivery_delay_seconds);
        let channel = self.channel.lock().await;

        match RetryRoute::after_failure(pending.receive_count, self.config.max_receive_count) {
            RetryRoute::DeadLetter => {
                let dlq = self.dead_letter_queue(migration_type);
                warn!(
                    "消息 {} 已接收 {} 次，转入死信队列 {}",
                    pending.message_id, pending.receive_count, dlq
                );
                self.publish(&channel, &dlq, &pending.body, properties).await?;
            }
            RetryRoute::Redeliver if redelivery_delay.is_zero() => {
                let main = self.main_queue(migration_type);
                self.publish(&channel, &main, &pending.body, properties).await?;
            }
            RetryRoute::Redeliver => {
                let delay = self.delay_queue(migration_type);
                let properties = properties.with_expiration(ShortString::from(
                    redelivery_delay.as_millis().to_string(),
                ));
                self.publish(&channel, &delay, &pending.body, properties).await?;
            }
        }

        channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| MigrationError::MessageQueue(format!("确认原消息失败: {e}")))?;

        if let Some(tags) = self.unacked.lock().await.get_mut(&migration_type) {
            tags.remove(&delivery_tag);
        }
        Ok(())
    }

    async fn approximate_depth(
        &self,
        migration_type: MigrationType,
    ) -> MigrationResult<QueueDepth> {
        let channel = self.channel.lock().await;
        let visible = self
            .message_count(&channel, &self.main_queue(migration_type))
            .await?;
        let delayed = self
            .message_count(&channel, &self.delay_queue(migration_type))
            .await?;
        let in_flight = self
            .unacked
            .lock()
            .await
            .get(&migration_type)
            .map(|tags| tags.len() as u64)
            .unwrap_or(0);

        Ok(QueueDepth {
            visible,
            in_flight,
            delayed,
        })
    }

    async fn purge_all(&self, migration_type: MigrationType) -> MigrationResult<u64> {
        let channel = self.channel.lock().await;
        let main = self.purge(&channel, &self.main_queue(migration_type)).await?;
        let delayed = self.purge(&channel, &self.delay_queue(migration_type)).await?;
        Ok(main + delayed)
    }

    async fn dead_letter_depth(&self, migration_type: MigrationType) -> MigrationResult<u64> {
        let channel = self.channel.lock().await;
        self.message_count(&channel, &self.dead_letter_queue(migration_type)).await
    }

    /// 取出后立即 nack 重新入队，不改变死信队列内容
    async fn peek_dead_letters(
        &self,
        migration_type: MigrationType,
        max_messages: usize,
    ) -> MigrationResult<Vec<QueueDelivery>> {
        let queue_name = self.dead_letter_queue(migration_type);
        let channel = self.channel.lock().await;
        let mut deliveries = Vec::new();
        let mut tags = Vec::new();

        while deliveries.len() < max_messages {
            let message = channel
                .basic_get(&queue_name, BasicGetOptions::default())
                .await
                .map_err(|e| {
                    MigrationError::MessageQueue(format!("从队列 {queue_name} 获取消息失败: {e}"))
                })?;
            let Some(message) = message else {
                break;
            };
            let delivery = &message.delivery;
            tags.push(delivery.delivery_tag);
            deliveries.push(QueueDelivery {
                receipt: delivery.delivery_tag.to_string(),
                message_id: delivery
                    .properties
                    .message_id()
                    .as_ref()
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                receive_count: Self::receive_count(delivery.properties.headers().as_ref()),
                body: delivery.data.clone(),
            });
        }

        for tag in tags {
            if let Err(e) = channel
                .basic_nack(
                    tag,
                    BasicNackOptions {
                        requeue: true,
                        ..BasicNackOptions::default()
                    },
                )
                .await
            {
                warn!("死信消息 {} 重新入队失败: {}", tag, e);
            }
        }

        Ok(deliveries)
    }

    async fn purge_dead_letters(&self, migration_type: MigrationType) -> MigrationResult<u64> {
        let channel = self.channel.lock().await;
        self.purge(&channel, &self.dead_letter_queue(migration_type)).await
    }
}
