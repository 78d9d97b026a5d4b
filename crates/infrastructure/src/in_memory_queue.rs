use async_trait::async_trait;
use migration_core::{
    config::MessageQueueConfig,
    models::{MigrationMessage, MigrationType},
    traits::{MigrationQueue, QueueDelivery, QueueDepth},
    MigrationError, MigrationResult,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 内存消息队列实现
///
/// 适用于嵌入式部署与测试。支持延迟投递与 in-flight 跟踪。
/// 接收次数达到上限仍被 nack 或处理超时的消息转入该类型的死信队列。
/// 时间基于 tokio 时钟，测试中可使用 `tokio::time::pause` 控制。
#[derive(Debug, Clone)]
pub struct InMemoryMigrationQueue {
    queues: Arc<RwLock<HashMap<MigrationType, QueueState>>>,
    config: InMemoryQueueConfig,
}

#[derive(Debug, Clone)]
pub struct InMemoryQueueConfig {
    /// 最大接收次数，达到后 nack 的消息转入死信
    pub max_receive_count: u32,
    /// nack 后重新可见前的延迟
    pub redelivery_delay: Duration,
    /// 接收后未确认的消息超过该时长重新可见
    pub visibility_timeout: Duration,
    /// 单个队列的最大容量（0表示无限制）
    pub max_queue_size: usize,
}

impl Default for InMemoryQueueConfig {
    fn default() -> Self {
        Self {
            max_receive_count: 5,
            redelivery_delay: Duration::from_secs(5),
            visibility_timeout: Duration::from_secs(300),
            max_queue_size: 0,
        }
    }
}

impl From<&MessageQueueConfig> for InMemoryQueueConfig {
    fn from(config: &MessageQueueConfig) -> Self {
        Self {
            max_receive_count: config.max_receive_count,
            redelivery_delay: Duration::from_secs(config.redelivery_delay_seconds),
            visibility_timeout: Duration::from_secs(config.visibility_timeout_seconds),
            max_queue_size: config.max_queue_size,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    body: Vec<u8>,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    visible: VecDeque<StoredMessage>,
    delayed: Vec<(Instant, StoredMessage)>,
    /// 回执 -> (可见性截止时间, 消息)
    in_flight: HashMap<String, (Instant, StoredMessage)>,
    dead_letters: VecDeque<StoredMessage>,
}

impl QueueState {
    /// 到期的延迟消息转为可见，按到期时间排序
    fn promote_due(&mut self, now: Instant) {
        if self.delayed.is_empty() {
            return;
        }
        let (mut due, pending): (Vec<_>, Vec<_>) =
            self.delayed.drain(..).partition(|(at, _)| *at <= now);
        self.delayed = pending;
        due.sort_by_key(|(at, _)| *at);
        self.visible.extend(due.into_iter().map(|(_, m)| m));
    }

    /// 可见性超时的 in-flight 消息重新可见，接收次数已满的转入死信
    fn reclaim_expired(
        &mut self,
        now: Instant,
        max_receive_count: u32,
        migration_type: MigrationType,
    ) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in expired {
            let Some((_, stored)) = self.in_flight.remove(&receipt) else {
                continue;
            };
            if stored.receive_count >= max_receive_count {
                warn!(
                    "消息 {} 第 {} 次处理超时，转入 {} 死信队列",
                    stored.message_id,
                    stored.receive_count,
                    migration_type.slug()
                );
                self.dead_letters.push_back(stored);
            } else {
                debug!("消息 {} 处理超时，重新可见", stored.message_id);
                self.visible.push_back(stored);
            }
        }
    }

    fn refresh(&mut self, now: Instant, max_receive_count: u32, migration_type: MigrationType) {
        self.reclaim_expired(now, max_receive_count, migration_type);
        self.promote_due(now);
    }

    fn len(&self) -> usize {
        self.visible.len() + self.delayed.len() + self.in_flight.len()
    }
}

impl InMemoryMigrationQueue {
    /// 创建新的内存消息队列实例
    pub fn new() -> Self {
        Self::with_config(InMemoryQueueConfig::default())
    }

    /// 使用指定配置创建内存消息队列实例
    pub fn with_config(config: InMemoryQueueConfig) -> Self {
        info!("Creating in-memory migration queue with config: {:?}", config);
        Self {
            queues: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn config(&self) -> &InMemoryQueueConfig {
        &self.config
    }
}

impl Default for InMemoryMigrationQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MigrationQueue for InMemoryMigrationQueue {
    async fn send(
        &self,
        migration_type: MigrationType,
        message: &MigrationMessage,
        delay: Duration,
    ) -> MigrationResult<()> {
        let body = message.encode()?;
        let mut queues = self.queues.write().await;
        let state = queues.entry(migration_type).or_default();

        if self.config.max_queue_size > 0 && state.len() >= self.config.max_queue_size {
            warn!("队列 {} 已满，拒绝消息 {}", migration_type, message.id);
            return Err(MigrationError::queue_error(format!(
                "Queue '{}' is full",
                migration_type.slug()
            )));
        }

        let stored = StoredMessage {
            message_id: message.id.clone(),
            body,
            receive_count: 0,
        };
        if delay.is_zero() {
            state.visible.push_back(stored);
        } else {
            state.delayed.push((Instant::now() + delay, stored));
        }

        debug!(
            "Sent {} to queue '{}' with delay {:?}",
            message.kind(),
            migration_type.slug(),
            delay
        );
        Ok(())
    }

    async fn receive(
        &self,
        migration_type: MigrationType,
        max_messages: usize,
    ) -> MigrationResult<Vec<QueueDelivery>> {
        let now = Instant::now();
        let mut queues = self.queues.write().await;
        let state = queues.entry(migration_type).or_default();
        state.refresh(now, self.config.max_receive_count, migration_type);

        let deadline = now + self.config.visibility_timeout;
        let mut deliveries = Vec::new();
        while deliveries.len() < max_messages {
            let Some(mut stored) = state.visible.pop_front() else {
                break;
            };
            stored.receive_count += 1;
            let receipt = Uuid::new_v4().to_string();
            deliveries.push(QueueDelivery {
                receipt: receipt.clone(),
                message_id: stored.message_id.clone(),
                receive_count: stored.receive_count,
                body: stored.body.clone(),
            });
            state.in_flight.insert(receipt, (deadline, stored));
        }
        Ok(deliveries)
    }

    async fn ack(&self, migration_type: MigrationType, receipt: &str) -> MigrationResult<()> {
        let mut queues = self.queues.write().await;
        let removed = queues
            .get_mut(&migration_type)
            .and_then(|state| state.in_flight.remove(receipt));
        if removed.is_none() {
            debug!("ack 的回执 {} 已不在处理中", receipt);
        }
        Ok(())
    }

    async fn nack(&self, migration_type: MigrationType, receipt: &str) -> MigrationResult<()> {
        let mut queues = self.queues.write().await;
        let Some(state) = queues.get_mut(&migration_type) else {
            return Ok(());
        };
        let Some((_, stored)) = state.in_flight.remove(receipt) else {
            debug!("nack 的回执 {} 已不在处理中", receipt);
            return Ok(());
        };

        if stored.receive_count >= self.config.max_receive_count {
            warn!(
                "消息 {} 已接收 {} 次，转入 {} 死信队列",
                stored.message_id,
                stored.receive_count,
                migration_type.slug()
            );
            state.dead_letters.push_back(stored);
        } else if self.config.redelivery_delay.is_zero() {
            state.visible.push_back(stored);
        } else {
            state
                .delayed
                .push((Instant::now() + self.config.redelivery_delay, stored));
        }
        Ok(())
    }

    async fn approximate_depth(
        &self,
        migration_type: MigrationType,
    ) -> MigrationResult<QueueDepth> {
        let mut queues = self.queues.write().await;
        let state = queues.entry(migration_type).or_default();
        state.refresh(Instant::now(), self.config.max_receive_count, migration_type);
        Ok(QueueDepth {
            visible: state.visible.len() as u64,
            in_flight: state.in_flight.len() as u64,
            delayed: state.delayed.len() as u64,
        })
    }

    async fn purge_all(&self, migration_type: MigrationType) -> MigrationResult<u64> {
        let mut queues = self.queues.write().await;
        let Some(state) = queues.get_mut(&migration_type) else {
            return Ok(0);
        };
        let purged = (state.visible.len() + state.delayed.len()) as u64;
        state.visible.clear();
        state.delayed.clear();
        debug!("Purged {} messages from queue '{}'", purged, migration_type.slug());
        Ok(purged)
    }

    async fn dead_letter_depth(&self, migration_type: MigrationType) -> MigrationResult<u64> {
        let mut queues = self.queues.write().await;
        let Some(state) = queues.get_mut(&migration_type) else {
            return Ok(0);
        };
        state.refresh(Instant::now(), self.config.max_receive_count, migration_type);
        Ok(state.dead_letters.len() as u64)
    }

    async fn peek_dead_letters(
        &self,
        migration_type: MigrationType,
        max_messages: usize,
    ) -> MigrationResult<Vec<QueueDelivery>> {
        let queues = self.queues.read().await;
        Ok(queues
            .get(&migration_type)
            .map(|state| {
                state
                    .dead_letters
                    .iter()
                    .take(max_messages)
                    .map(|stored| QueueDelivery {
                        receipt: stored.message_id.clone(),
                        message_id: stored.message_id.clone(),
                        receive_count: stored.receive_count,
                        body: stored.body.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn purge_dead_letters(&self, migration_type: MigrationType) -> MigrationResult<u64> {
        let mut queues = self.queues.write().await;
        let Some(state) = queues.get_mut(&migration_type) else {
            return Ok(0);
        };
        let purged = state.dead_letters.len() as u64;
        state.dead_letters.clear();
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration_core::models::{MigrationContext, StatusCheck};

    fn context() -> MigrationContext {
        MigrationContext {
            run_id: "2020-03-24T12:00:00".to_string(),
            migration_type: MigrationType::Visits,
            estimated_count: 1,
        }
    }

    fn queue(max_receive_count: u32) -> InMemoryMigrationQueue {
        InMemoryMigrationQueue::with_config(InMemoryQueueConfig {
            max_receive_count,
            redelivery_delay: Duration::from_secs(2),
            visibility_timeout: Duration::from_secs(60),
            max_queue_size: 0,
        })
    }

    #[tokio::test]
    async fn test_send_receive_ack() {
        let queue = queue(3);
        let message = MigrationMessage::entity(context(), "1");
        queue
            .send(MigrationType::Visits, &message, Duration::ZERO)
            .await
            .unwrap();

        let deliveries = queue.receive(MigrationType::Visits, 10).await.unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].message_id, message.id);
        assert_eq!(deliveries[0].decode().unwrap(), message);

        let depth = queue.approximate_depth(MigrationType::Visits).await.unwrap();
        assert_eq!(depth.in_flight, 1);

        queue
            .ack(MigrationType::Visits, &deliveries[0].receipt)
            .await
            .unwrap();
        let depth = queue.approximate_depth(MigrationType::Visits).await.unwrap();
        assert_eq!(depth.total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_message_becomes_visible() {
        let queue = queue(3);
        let message = MigrationMessage::status_check(context(), StatusCheck::default());
        queue
            .send(MigrationType::Visits, &message, Duration::from_secs(10))
            .await
            .unwrap();

        assert!(queue.receive(MigrationType::Visits, 1).await.unwrap().is_empty());
        let depth = queue.approximate_depth(MigrationType::Visits).await.unwrap();
        assert_eq!(depth.delayed, 1);
        assert!(queue
            .probably_has_remaining_messages(MigrationType::Visits)
            .await
            .unwrap());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(queue.receive(MigrationType::Visits, 1).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nack_redelivers_then_dead_letters() {
        let queue = queue(2);
        let message = MigrationMessage::entity(context(), "7");
        queue
            .send(MigrationType::Visits, &message, Duration::ZERO)
            .await
            .unwrap();

        let first = queue.receive(MigrationType::Visits, 1).await.unwrap().remove(0);
        queue.nack(MigrationType::Visits, &first.receipt).await.unwrap();
        assert!(queue.receive(MigrationType::Visits, 1).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(2)).await;
        let second = queue.receive(MigrationType::Visits, 1).await.unwrap().remove(0);
        assert_eq!(second.receive_count, 2);
        queue.nack(MigrationType::Visits, &second.receipt).await.unwrap();

        assert_eq!(queue.dead_letter_depth(MigrationType::Visits).await.unwrap(), 1);
        let peeked = queue.peek_dead_letters(MigrationType::Visits, 5).await.unwrap();
        assert_eq!(peeked[0].message_id, message.id);
        assert_eq!(queue.purge_dead_letters(MigrationType::Visits).await.unwrap(), 1);
        assert_eq!(queue.dead_letter_depth(MigrationType::Visits).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_single_in_flight_message_is_probably_empty() {
        let queue = queue(3);
        let message = MigrationMessage::status_check(context(), StatusCheck::default());
        queue
            .send(MigrationType::Visits, &message, Duration::ZERO)
            .await
            .unwrap();
        let _delivery = queue.receive(MigrationType::Visits, 1).await.unwrap();

        assert!(!queue
            .probably_has_remaining_messages(MigrationType::Visits)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_purge_leaves_in_flight_and_other_types() {
        let queue = queue(3);
        for id in ["1", "2", "3"] {
            queue
                .send(
                    MigrationType::Visits,
                    &MigrationMessage::entity(context(), id),
                    Duration::ZERO,
                )
                .await
                .unwrap();
        }
        queue
            .send(
                MigrationType::Visits,
                &MigrationMessage::entity(context(), "4"),
                Duration::from_secs(30),
            )
            .await
            .unwrap();
        queue
            .send(
                MigrationType::Activities,
                &MigrationMessage::entity(context(), "9"),
                Duration::ZERO,
            )
            .await
            .unwrap();
        let _in_flight = queue.receive(MigrationType::Visits, 1).await.unwrap();

        assert_eq!(queue.purge_all(MigrationType::Visits).await.unwrap(), 3);
        let depth = queue.approximate_depth(MigrationType::Visits).await.unwrap();
        assert_eq!(depth.waiting(), 0);
        assert_eq!(depth.in_flight, 1);
        let other = queue.approximate_depth(MigrationType::Activities).await.unwrap();
        assert_eq!(other.visible, 1);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_send() {
        let queue = InMemoryMigrationQueue::with_config(InMemoryQueueConfig {
            max_queue_size: 1,
            ..Default::default()
        });
        let message = MigrationMessage::entity(context(), "1");
        queue
            .send(MigrationType::Visits, &message, Duration::ZERO)
            .await
            .unwrap();
        let result = queue.send(MigrationType::Visits, &message, Duration::ZERO).await;
        assert!(matches!(result, Err(MigrationError::MessageQueue(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacked_message_reappears_after_visibility_timeout() {
        let queue = queue(3);
        let message = MigrationMessage::entity(context(), "42");
        queue
            .send(MigrationType::Visits, &message, Duration::ZERO)
            .await
            .unwrap();

        // 接收后既不 ack 也不 nack，模拟处理任务中途退出
        let lost = queue.receive(MigrationType::Visits, 1).await.unwrap().remove(0);
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(queue.receive(MigrationType::Visits, 1).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(1)).await;
        let depth = queue.approximate_depth(MigrationType::Visits).await.unwrap();
        assert_eq!(depth.visible, 1);
        assert_eq!(depth.in_flight, 0);

        let retried = queue.receive(MigrationType::Visits, 1).await.unwrap().remove(0);
        assert_eq!(retried.message_id, message.id);
        assert_eq!(retried.receive_count, 2);

        // 过期回执的迟到 ack 不影响新的投递
        queue.ack(MigrationType::Visits, &lost.receipt).await.unwrap();
        assert_eq!(
            queue.approximate_depth(MigrationType::Visits).await.unwrap().in_flight,
            1
        );
        queue.ack(MigrationType::Visits, &retried.receipt).await.unwrap();
        assert_eq!(
            queue.approximate_depth(MigrationType::Visits).await.unwrap().total(),
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_message_dead_letters_when_receives_exhausted() {
        let queue = queue(1);
        let message = MigrationMessage::entity(context(), "99");
        queue
            .send(MigrationType::Visits, &message, Duration::ZERO)
            .await
            .unwrap();
        let _lost = queue.receive(MigrationType::Visits, 1).await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(queue.dead_letter_depth(MigrationType::Visits).await.unwrap(), 1);
        let depth = queue.approximate_depth(MigrationType::Visits).await.unwrap();
        assert_eq!(depth.total(), 0);
    }

    #[test]
    fn test_config_from_message_queue_settings() {
        let settings = MessageQueueConfig {
            max_receive_count: 4,
            redelivery_delay_seconds: 7,
            visibility_timeout_seconds: 120,
            max_queue_size: 500,
            ..Default::default()
        };
        let config = InMemoryQueueConfig::from(&settings);
        assert_eq!(config.max_receive_count, 4);
        assert_eq!(config.redelivery_delay, Duration::from_secs(7));
        assert_eq!(config.visibility_timeout, Duration::from_secs(120));
        assert_eq!(config.max_queue_size, 500);
    }
}
