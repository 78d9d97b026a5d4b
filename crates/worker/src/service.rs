use std::sync::Arc;
use std::time::Duration;

use migration_core::{
    config::WorkerConfig,
    models::MigrationType,
    traits::{MigrationQueue, QueueDelivery},
    MigrationError, MigrationResult,
};
use migration_dispatcher::MigrationCoordinator;
use tokio::sync::{broadcast, broadcast::error::TryRecvError, Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

/// Worker服务构建器
pub struct WorkerServiceBuilder {
    worker_id: String,
    queue: Arc<dyn MigrationQueue>,
    coordinator: Arc<MigrationCoordinator>,
    migration_types: Vec<MigrationType>,
    concurrency: usize,
    batch_size: usize,
    poll_interval_ms: u64,
}

impl WorkerServiceBuilder {
    /// 创建新的构建器，默认消费协调器中注册的全部迁移类型
    pub fn new(queue: Arc<dyn MigrationQueue>, coordinator: Arc<MigrationCoordinator>) -> Self {
        let hostname = hostname::get()
            .unwrap_or_else(|_| "unknown".into())
            .to_string_lossy()
            .to_string();
        Self {
            worker_id: format!("{hostname}-worker"),
            queue,
            migration_types: coordinator.registry().migration_types(),
            coordinator,
            concurrency: 8,
            batch_size: 10,
            poll_interval_ms: 500,
        }
    }

    pub fn worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    /// 同时处理的最大消息数
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// 每个队列单次拉取的消息数
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// 队列为空时的轮询间隔
    pub fn poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn migration_types(mut self, migration_types: Vec<MigrationType>) -> Self {
        self.migration_types = migration_types;
        self
    }

    pub fn with_config(self, config: &WorkerConfig) -> Self {
        self.worker_id(config.worker_id.clone())
            .concurrency(config.concurrency)
            .batch_size(config.batch_size)
            .poll_interval_ms(config.poll_interval_ms)
    }

    pub fn build(self) -> WorkerService {
        WorkerService {
            worker_id: self.worker_id,
            queue: self.queue,
            coordinator: self.coordinator,
            migration_types: Arc::new(self.migration_types),
            batch_size: self.batch_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            permits: Arc::new(Semaphore::new(self.concurrency)),
            shutdown_tx: Arc::new(RwLock::new(None)),
            polling_handle: Arc::new(Mutex::new(None)),
            is_running: Arc::new(RwLock::new(false)),
        }
    }
}

/// Worker服务
///
/// 消息处理成功则确认；返回错误或处理任务 panic 则 nack，
/// 由传输层按接收次数上限重投递或转入死信。
#[derive(Clone)]
pub struct WorkerService {
    worker_id: String,
    queue: Arc<dyn MigrationQueue>,
    coordinator: Arc<MigrationCoordinator>,
    migration_types: Arc<Vec<MigrationType>>,
    batch_size: usize,
    poll_interval: Duration,
    permits: Arc<Semaphore>,
    shutdown_tx: Arc<RwLock<Option<broadcast::Sender<()>>>>,
    polling_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    is_running: Arc<RwLock<bool>>,
}

impl WorkerService {
    pub fn builder(
        queue: Arc<dyn MigrationQueue>,
        coordinator: Arc<MigrationCoordinator>,
    ) -> WorkerServiceBuilder {
        WorkerServiceBuilder::new(queue, coordinator)
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn migration_types(&self) -> &[MigrationType] {
        &self.migration_types
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// 从每个队列拉取一批消息并处理完毕，返回拉取到的消息数
    pub async fn poll_once(&self) -> MigrationResult<usize> {
        let mut tasks = JoinSet::new();
        let mut received = 0;

        for &migration_type in self.migration_types.iter() {
            let deliveries = match self.queue.receive(migration_type, self.batch_size).await {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    warn!("从 {} 队列拉取消息失败: {}", migration_type, e);
                    continue;
                }
            };
            received += deliveries.len();

            for delivery in deliveries {
                let permit = self
                    .permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| MigrationError::Internal(format!("获取处理许可失败: {e}")))?;
                let worker = self.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    worker.process_delivery(migration_type, delivery).await;
                });
            }
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("消息处理任务异常退出: {}", e);
            }
        }

        Ok(received)
    }

    async fn process_delivery(&self, migration_type: MigrationType, delivery: QueueDelivery) {
        // 处理放在独立任务中，任务 panic 时回执仍在此处，可立即 nack
        let coordinator = self.coordinator.clone();
        let body = delivery.body.clone();
        let message_id = delivery.message_id.clone();
        let handled =
            tokio::spawn(async move { coordinator.on_message(&body, &message_id).await }).await;

        match handled {
            Ok(Ok(())) => {
                if let Err(e) = self.queue.ack(migration_type, &delivery.receipt).await {
                    error!("确认消息 {} 失败: {}", delivery.message_id, e);
                }
            }
            Ok(Err(e)) => {
                warn!(
                    "消息 {} 第 {} 次处理失败，交由队列重投递: {}",
                    delivery.message_id, delivery.receive_count, e
                );
                self.release(migration_type, &delivery).await;
            }
            Err(e) => {
                error!(
                    "消息 {} 第 {} 次处理任务异常退出，交由队列重投递: {}",
                    delivery.message_id, delivery.receive_count, e
                );
                self.release(migration_type, &delivery).await;
            }
        }
    }

    async fn release(&self, migration_type: MigrationType, delivery: &QueueDelivery) {
        if let Err(e) = self.queue.nack(migration_type, &delivery.receipt).await {
            error!("拒绝消息 {} 失败: {}", delivery.message_id, e);
        }
    }

    /// 启动后台轮询
    pub async fn start(&self) -> MigrationResult<()> {
        let mut is_running = self.is_running.write().await;
        if *is_running {
            return Err(MigrationError::Internal("Worker服务已在运行".to_string()));
        }

        info!(
            "启动Worker服务: {}，消费迁移类型 {:?}",
            self.worker_id, self.migration_types
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        *self.shutdown_tx.write().await = Some(shutdown_tx);

        let worker = self.clone();
        let handle = tokio::spawn(async move {
            worker.run_polling(shutdown_rx).await;
        });
        *self.polling_handle.lock().await = Some(handle);

        *is_running = true;
        Ok(())
    }

    /// 停止轮询，等待正在处理的消息完成
    pub async fn stop(&self) -> MigrationResult<()> {
        let mut is_running = self.is_running.write().await;
        if !*is_running {
            return Ok(());
        }

        info!("停止Worker服务: {}", self.worker_id);
        if let Some(shutdown_tx) = self.shutdown_tx.write().await.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.polling_handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!("轮询任务异常退出: {}", e);
            }
        }

        *is_running = false;
        info!("Worker服务已停止: {}", self.worker_id);
        Ok(())
    }

    async fn run_polling(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            let received = match self.poll_once().await {
                Ok(received) => received,
                Err(e) => {
                    error!("轮询消息失败: {}", e);
                    0
                }
            };

            if received > 0 {
                // 队列仍有消息时不等待
                if !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty)) {
                    break;
                }
                continue;
            }

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("Worker {} 轮询已退出", self.worker_id);
    }
}
