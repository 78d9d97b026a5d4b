use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use migration_core::{
    models::MigrationType,
    traits::{IdentityTransformer, MappingClient, RecordTransformer, SourceAdapter, TargetAdapter},
    MigrationError, MigrationResult,
};

/// 迁移总量的划分方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingStrategy {
    /// 按页码偏移划分，页码从 0 开始
    ByPageNumber { page_size: i64 },
    /// 过滤条件显式列出全部 ID，整体作为一页
    ByExplicitDivision,
}

impl Default for PagingStrategy {
    fn default() -> Self {
        PagingStrategy::ByPageNumber { page_size: 10 }
    }
}

/// 单个业务域的迁移插件: 源、转换、目标与映射服务
#[derive(Clone)]
pub struct MigrationDefinition {
    pub migration_type: MigrationType,
    pub source: Arc<dyn SourceAdapter>,
    pub transformer: Arc<dyn RecordTransformer>,
    pub target: Arc<dyn TargetAdapter>,
    pub mapping: Arc<dyn MappingClient>,
    pub paging: PagingStrategy,
}

impl MigrationDefinition {
    pub fn new(
        migration_type: MigrationType,
        source: Arc<dyn SourceAdapter>,
        target: Arc<dyn TargetAdapter>,
        mapping: Arc<dyn MappingClient>,
    ) -> Self {
        Self {
            migration_type,
            source,
            transformer: Arc::new(IdentityTransformer),
            target,
            mapping,
            paging: PagingStrategy::default(),
        }
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn RecordTransformer>) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn with_paging(mut self, paging: PagingStrategy) -> Self {
        self.paging = paging;
        self
    }
}

impl fmt::Debug for MigrationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationDefinition")
            .field("migration_type", &self.migration_type)
            .field("paging", &self.paging)
            .finish_non_exhaustive()
    }
}

/// 按迁移类型查找插件，未注册的类型在启动时即被拒绝
#[derive(Debug, Default, Clone)]
pub struct MigrationRegistry {
    definitions: HashMap<MigrationType, Arc<MigrationDefinition>>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册插件，同一类型重复注册时后者覆盖前者
    pub fn register(&mut self, definition: MigrationDefinition) -> &mut Self {
        self.definitions
            .insert(definition.migration_type, Arc::new(definition));
        self
    }

    pub fn with(mut self, definition: MigrationDefinition) -> Self {
        self.register(definition);
        self
    }

    pub fn get(&self, migration_type: MigrationType) -> MigrationResult<Arc<MigrationDefinition>> {
        self.definitions
            .get(&migration_type)
            .cloned()
            .ok_or(MigrationError::MigrationTypeNotConfigured(migration_type))
    }

    pub fn contains(&self, migration_type: MigrationType) -> bool {
        self.definitions.contains_key(&migration_type)
    }

    /// 已注册的迁移类型，按枚举顺序
    pub fn migration_types(&self) -> Vec<MigrationType> {
        let mut types: Vec<MigrationType> = self.definitions.keys().copied().collect();
        types.sort();
        types
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
