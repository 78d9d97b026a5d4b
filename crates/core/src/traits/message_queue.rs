use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    models::{MigrationMessage, MigrationType},
    MigrationResult,
};

/// 从队列取出的一条消息，处理完成前处于 in-flight 状态
#[derive(Debug, Clone)]
pub struct QueueDelivery {
    /// 用于 ack/nack 的回执
    pub receipt: String,
    pub message_id: String,
    pub receive_count: u32,
    pub body: Vec<u8>,
}

impl QueueDelivery {
    pub fn decode(&self) -> MigrationResult<MigrationMessage> {
        MigrationMessage::decode(&self.body)
    }
}

/// 队列深度的近似值，各计数之间没有强一致保证
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDepth {
    pub visible: u64,
    pub in_flight: u64,
    pub delayed: u64,
}

impl QueueDepth {
    pub fn waiting(&self) -> u64 {
        self.visible + self.delayed
    }

    pub fn total(&self) -> u64 {
        self.visible + self.in_flight + self.delayed
    }
}

/// 迁移消息队列抽象，每种迁移类型对应一条主队列和一条死信队列
#[async_trait]
pub trait MigrationQueue: Send + Sync {
    /// 发送消息，`delay` 为零时立即可见
    async fn send(
        &self,
        migration_type: MigrationType,
        message: &MigrationMessage,
        delay: Duration,
    ) -> MigrationResult<()>;

    /// 取出最多 `max_messages` 条可见消息
    async fn receive(
        &self,
        migration_type: MigrationType,
        max_messages: usize,
    ) -> MigrationResult<Vec<QueueDelivery>>;

    /// 确认消息处理完成
    async fn ack(&self, migration_type: MigrationType, receipt: &str) -> MigrationResult<()>;

    /// 处理失败，交由传输层重投递或转入死信
    async fn nack(&self, migration_type: MigrationType, receipt: &str) -> MigrationResult<()>;

    /// 队列深度的近似值
    async fn approximate_depth(&self, migration_type: MigrationType) -> MigrationResult<QueueDepth>;

    /// 队列中是否可能仍有待处理或处理中的消息
    ///
    /// 调用方自身正在处理的检查消息处于 in-flight 状态，不计入。
    async fn probably_has_remaining_messages(
        &self,
        migration_type: MigrationType,
    ) -> MigrationResult<bool> {
        let depth = self.approximate_depth(migration_type).await?;
        Ok(depth.waiting() + depth.in_flight.saturating_sub(1) > 0)
    }

    /// 清空尚未投递的消息，返回清除的数量
    async fn purge_all(&self, migration_type: MigrationType) -> MigrationResult<u64>;

    /// 死信队列深度
    async fn dead_letter_depth(&self, migration_type: MigrationType) -> MigrationResult<u64>;

    /// 查看死信消息，不改变其状态
    async fn peek_dead_letters(
        &self,
        migration_type: MigrationType,
        max_messages: usize,
    ) -> MigrationResult<Vec<QueueDelivery>>;

    /// 清空死信队列，返回清除的数量
    async fn purge_dead_letters(&self, migration_type: MigrationType) -> MigrationResult<u64>;
}
