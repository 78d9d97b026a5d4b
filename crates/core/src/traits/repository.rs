use async_trait::async_trait;

use crate::{
    models::{HistoryFilter, MigrationRun, MigrationStatus, MigrationType},
    MigrationResult,
};

/// 迁移历史存储
#[async_trait]
pub trait MigrationHistoryRepository: Send + Sync {
    async fn save(&self, run: &MigrationRun) -> MigrationResult<()>;

    /// 仅当存储中的状态仍为 `expected` 时覆盖写入整条记录
    ///
    /// 记录不存在时返回 `RunNotFound`，状态已被其他写入改变时返回 `InvalidStateTransition`。
    async fn update(&self, run: &MigrationRun, expected: MigrationStatus) -> MigrationResult<()>;

    async fn find_by_id(&self, run_id: &str) -> MigrationResult<Option<MigrationRun>>;

    /// 指定迁移类型最近一次启动的迁移
    async fn find_latest(&self, migration_type: MigrationType)
        -> MigrationResult<Option<MigrationRun>>;

    /// 按开始时间倒序返回
    async fn find_all(&self, filter: &HistoryFilter) -> MigrationResult<Vec<MigrationRun>>;
}
