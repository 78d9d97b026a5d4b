//! 迁移协调引擎
//!
//! 将"迁移所有符合过滤条件的记录"拆分为可独立重试、幂等的队列消息，
//! 并根据队列深度判断迁移何时完成。所有协调状态都保存在队列、映射服务与历史存储中。

pub mod coordinator;
pub mod entity_migrator;
pub mod mapping_reconciler;
pub mod monitor;
pub mod planner;
pub mod registry;

pub use coordinator::{DeadLetter, MigrationCoordinator};
pub use entity_migrator::{EntityMigrator, EntityOutcome};
pub use mapping_reconciler::{MappingOutcome, MappingReconciler, RetryPolicy};
pub use monitor::{CheckKind, CompletionMonitor, MonitorDecision, MonitorSettings};
pub use planner::Planner;
pub use registry::{MigrationDefinition, MigrationRegistry, PagingStrategy};
