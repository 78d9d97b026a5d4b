use std::sync::Arc;

use tracing::{debug, instrument};

use migration_core::{
    models::{CreateOutcome, MigrationContext, MigrationMapping},
    traits::{telemetry_properties, TelemetrySink},
    MigrationResult,
};

use crate::mapping_reconciler::{MappingOutcome, MappingReconciler, RetryPolicy};
use crate::registry::MigrationDefinition;

/// 单条记录迁移的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityOutcome {
    /// 映射已存在，未调用目标系统
    Skipped { existing_label: Option<String> },
    /// 目标系统忽略了该记录
    Ignored { reason: String },
    Migrated(MappingOutcome),
}

/// 对单个源 ID 执行 检查、读取、转换、创建、映射
pub struct EntityMigrator {
    reconciler: Arc<MappingReconciler>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl EntityMigrator {
    pub fn new(reconciler: Arc<MappingReconciler>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            reconciler,
            telemetry,
        }
    }

    #[instrument(skip(self, context, definition), fields(run_id = %context.run_id))]
    pub async fn migrate(
        &self,
        context: &MigrationContext,
        definition: &MigrationDefinition,
        source_id: &str,
    ) -> MigrationResult<EntityOutcome> {
        let migration_type = context.migration_type;

        if let Some(existing) = definition.mapping.find_by_source_id(source_id).await? {
            debug!("源记录 {} 已迁移，跳过", source_id);
            let existing_label = existing.label.clone();
            self.telemetry.event(
                &migration_type.telemetry_event("entity-skipped"),
                telemetry_properties([
                    ("migrationId", context.run_id.clone()),
                    ("sourceId", source_id.to_string()),
                    ("targetId", existing.target_id),
                    ("existingMigrationId", existing_label.clone().unwrap_or_default()),
                ]),
            );
            return Ok(EntityOutcome::Skipped { existing_label });
        }

        let record = definition.source.fetch(source_id).await?;
        let request = definition.transformer.transform(&record)?;

        let target_id = match definition.target.create(&request).await? {
            CreateOutcome::Created { target_id } => target_id,
            CreateOutcome::Ignored { reason } => {
                debug!("目标系统忽略了源记录 {}: {}", source_id, reason);
                self.telemetry.event(
                    &migration_type.telemetry_event("entity-ignored"),
                    telemetry_properties([
                        ("migrationId", context.run_id.as_str()),
                        ("sourceId", source_id),
                        ("reason", reason.as_str()),
                    ]),
                );
                return Ok(EntityOutcome::Ignored { reason });
            }
        };

        let mapping = MigrationMapping::migrated(source_id, &target_id, &context.run_id);
        let outcome = self
            .reconciler
            .create_mapping_or_fail(
                context,
                definition.mapping.as_ref(),
                &mapping,
                RetryPolicy::PublishRetry,
            )
            .await?;

        Ok(EntityOutcome::Migrated(outcome))
    }
}
