use async_trait::async_trait;
use serde_json::Value;

use crate::{
    models::{CreateMappingResult, CreateOutcome, IdPage, MigrationMapping},
    MigrationResult,
};

/// 源系统适配器
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// 校验过滤条件的结构，失败时返回 `ValidationError`
    fn validate_filter(&self, _filter: &Value) -> MigrationResult<()> {
        Ok(())
    }

    /// 按页列出符合条件的源记录 ID，页码从 0 开始
    async fn list_ids(&self, filter: &Value, page_number: i64, page_size: i64)
        -> MigrationResult<IdPage>;

    /// 仅查询总数，使用页大小为 1 的查询
    async fn count(&self, filter: &Value) -> MigrationResult<i64> {
        Ok(self.list_ids(filter, 0, 1).await?.total)
    }

    /// 过滤条件本身枚举了一组有限 ID 时返回该集合
    fn ids_from_filter(&self, _filter: &Value) -> MigrationResult<Option<Vec<String>>> {
        Ok(None)
    }

    async fn fetch(&self, source_id: &str) -> MigrationResult<Value>;
}

/// 将源记录转换为目标系统的创建请求，必须是纯函数
pub trait RecordTransformer: Send + Sync {
    fn transform(&self, record: &Value) -> MigrationResult<Value>;
}

/// 原样透传
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransformer;

impl RecordTransformer for IdentityTransformer {
    fn transform(&self, record: &Value) -> MigrationResult<Value> {
        Ok(record.clone())
    }
}

/// 目标系统适配器
#[async_trait]
pub trait TargetAdapter: Send + Sync {
    async fn create(&self, request: &Value) -> MigrationResult<CreateOutcome>;
}

/// 映射服务客户端，`source_id` 上的唯一约束是"是否已迁移"的唯一依据
#[async_trait]
pub trait MappingClient: Send + Sync {
    async fn find_by_source_id(&self, source_id: &str) -> MigrationResult<Option<MigrationMapping>>;

    /// 冲突时返回 `Duplicate` 而不是错误
    async fn create(&self, mapping: &MigrationMapping) -> MigrationResult<CreateMappingResult>;

    async fn count_by_label(&self, label: &str) -> MigrationResult<i64>;
}
