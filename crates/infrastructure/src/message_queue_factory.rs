use std::sync::Arc;

use migration_core::{
    config::{MessageQueueConfig, MessageQueueType},
    models::MigrationType,
    traits::MigrationQueue,
    MigrationResult,
};
use tracing::{debug, info};

use crate::{InMemoryMigrationQueue, InMemoryQueueConfig, RabbitMQMigrationQueue};

pub struct MessageQueueFactory;

impl MessageQueueFactory {
    /// 按配置创建迁移队列，RabbitMQ 需要预先声明各迁移类型的队列
    pub async fn create(
        config: &MessageQueueConfig,
        migration_types: &[MigrationType],
    ) -> MigrationResult<Arc<dyn MigrationQueue>> {
        debug!("Creating migration queue with type: {:?}", config.r#type);

        match config.r#type {
            MessageQueueType::InMemory => {
                info!("使用内存消息队列");
                Ok(Arc::new(InMemoryMigrationQueue::with_config(
                    InMemoryQueueConfig::from(config),
                )))
            }
            MessageQueueType::Rabbitmq => {
                info!("Initializing RabbitMQ migration queue");
                let rabbitmq = RabbitMQMigrationQueue::new(config.clone(), migration_types).await?;
                Ok(Arc::new(rabbitmq))
            }
        }
    }
}
