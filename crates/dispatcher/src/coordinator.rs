use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use migration_core::{
    config::CoordinatorConfig,
    models::{
        generate_run_id, HistoryFilter, MigrationContext, MigrationMessage, MigrationPayload,
        MigrationProgress, MigrationRun, MigrationStatus, MigrationType, StatusCheck,
    },
    traits::{
        telemetry_properties, MigrationHistoryRepository, MigrationQueue, TelemetrySink,
    },
    Clock, MigrationError, MigrationResult, SystemClock,
};

use crate::entity_migrator::EntityMigrator;
use crate::mapping_reconciler::{MappingReconciler, RetryPolicy};
use crate::monitor::{CheckKind, CompletionMonitor, MonitorSettings};
use crate::planner::{self, Planner};
use crate::registry::{MigrationDefinition, MigrationRegistry, PagingStrategy};

/// 死信队列中的一条消息
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub message_id: String,
    pub receive_count: u32,
    /// 无法解码时为 None
    pub message: Option<MigrationMessage>,
    pub raw: String,
}

/// 迁移生命周期的状态机: 启动、划分、执行、完成与取消
pub struct MigrationCoordinator {
    registry: Arc<MigrationRegistry>,
    queue: Arc<dyn MigrationQueue>,
    history: Arc<dyn MigrationHistoryRepository>,
    telemetry: Arc<dyn TelemetrySink>,
    clock: Arc<dyn Clock>,
    planner: Planner,
    migrator: EntityMigrator,
    reconciler: Arc<MappingReconciler>,
    monitor: CompletionMonitor,
}

impl MigrationCoordinator {
    pub fn new(
        registry: Arc<MigrationRegistry>,
        queue: Arc<dyn MigrationQueue>,
        history: Arc<dyn MigrationHistoryRepository>,
        telemetry: Arc<dyn TelemetrySink>,
        config: &CoordinatorConfig,
    ) -> Self {
        Self::with_clock(
            registry,
            queue,
            history,
            telemetry,
            Arc::new(SystemClock),
            MonitorSettings::from(config),
        )
    }

    pub fn with_clock(
        registry: Arc<MigrationRegistry>,
        queue: Arc<dyn MigrationQueue>,
        history: Arc<dyn MigrationHistoryRepository>,
        telemetry: Arc<dyn TelemetrySink>,
        clock: Arc<dyn Clock>,
        settings: MonitorSettings,
    ) -> Self {
        let reconciler = Arc::new(MappingReconciler::new(queue.clone(), telemetry.clone()));
        Self {
            planner: Planner::new(queue.clone()),
            migrator: EntityMigrator::new(reconciler.clone(), telemetry.clone()),
            monitor: CompletionMonitor::new(
                queue.clone(),
                history.clone(),
                telemetry.clone(),
                clock.clone(),
                settings,
            ),
            reconciler,
            registry,
            queue,
            history,
            telemetry,
            clock,
        }
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// 启动一次迁移
    ///
    /// 过滤条件校验失败、类型未注册或已有进行中的迁移时直接拒绝，不会发送任何消息。
    #[instrument(skip(self, filter))]
    pub async fn start(
        &self,
        migration_type: MigrationType,
        filter: Value,
    ) -> MigrationResult<MigrationRun> {
        let definition = self.registry.get(migration_type)?;
        definition.source.validate_filter(&filter)?;
        if definition.paging == PagingStrategy::ByExplicitDivision {
            planner::explicit_ids(&definition, &filter)?;
        }

        if let Some(latest) = self.history.find_latest(migration_type).await? {
            if latest.status.is_active() {
                return Err(MigrationError::MigrationInProgress {
                    migration_type,
                    run_id: latest.run_id,
                });
            }
        }

        let estimated_count = definition.source.count(&filter).await?;
        let run_id = generate_run_id(self.clock.now_local());
        let run = MigrationRun::started(
            run_id,
            migration_type,
            filter,
            estimated_count,
            self.clock.now_utc(),
        );
        self.history.save(&run).await?;

        let divide = MigrationMessage::divide(run.context(), run.filter.clone());
        self.queue.send(migration_type, &divide, Duration::ZERO).await?;

        info!(
            "迁移 {} ({}) 已启动，预计记录数 {}",
            run.run_id, migration_type, estimated_count
        );
        self.telemetry.event(
            &migration_type.telemetry_event("started"),
            telemetry_properties([
                ("migrationId", run.run_id.clone()),
                ("estimatedCount", estimated_count.to_string()),
                ("filter", run.filter.to_string()),
            ]),
        );
        Ok(run)
    }

    /// 处理一条队列消息，失败时记录传输层消息 ID 并返回错误
    pub async fn on_message(&self, raw: &[u8], message_id: &str) -> MigrationResult<()> {
        let message = match MigrationMessage::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                error!("消息 {} 解码失败: {}", message_id, e);
                return Err(e);
            }
        };

        let kind = message.kind();
        let run_id = message.context.run_id.clone();
        debug!("处理消息 {} ({}) 迁移 {}", message_id, kind, run_id);

        self.handle(message).await.map_err(|e| {
            error!(
                "处理消息 {} ({}) 失败，迁移 {}: {}",
                message_id, kind, run_id, e
            );
            e
        })
    }

    /// 按消息类型分派
    pub async fn handle(&self, message: MigrationMessage) -> MigrationResult<()> {
        let context = message.context;
        let definition = self.registry.get(context.migration_type)?;

        match message.payload {
            MigrationPayload::MigrateEntities(divide) => {
                if self.still_started(&context).await? {
                    self.planner
                        .divide(&context, &definition, &divide.filter)
                        .await?;
                }
            }
            MigrationPayload::MigrateByPage(page) => {
                if self.still_started(&context).await? {
                    self.planner.fan_out(&context, &definition, &page).await?;
                }
            }
            MigrationPayload::MigrateEntity(entity) => {
                self.migrator
                    .migrate(&context, &definition, &entity.source_id)
                    .await?;
            }
            MigrationPayload::RetryMigrationMapping(mapping) => {
                self.reconciler
                    .create_mapping_or_fail(
                        &context,
                        definition.mapping.as_ref(),
                        &mapping,
                        RetryPolicy::Propagate,
                    )
                    .await?;
            }
            MigrationPayload::MigrationStatusCheck(check) => {
                self.monitor
                    .handle_check(CheckKind::Completion, &context, &definition, check)
                    .await?;
            }
            MigrationPayload::CancelMigration(check) => {
                self.monitor
                    .handle_check(CheckKind::Cancellation, &context, &definition, check)
                    .await?;
            }
        }
        Ok(())
    }

    /// 已取消的迁移不再产生新的工作
    async fn still_started(&self, context: &MigrationContext) -> MigrationResult<bool> {
        match self.history.find_by_id(&context.run_id).await? {
            Some(run) if run.status == MigrationStatus::Started => Ok(true),
            Some(run) => {
                info!(
                    "迁移 {} 当前状态为 {}，跳过划分",
                    context.run_id, run.status
                );
                Ok(false)
            }
            None => {
                warn!("迁移记录 {} 不存在，跳过划分", context.run_id);
                Ok(false)
            }
        }
    }

    /// 请求取消迁移，由取消检测消息清空队列并最终写入 CANCELLED
    #[instrument(skip(self))]
    pub async fn cancel(&self, run_id: &str) -> MigrationResult<MigrationRun> {
        let mut run = self.get(run_id).await?;
        self.registry.get(run.migration_type)?;

        let previous = run.status;
        run.transition(MigrationStatus::CancelledRequested, self.clock.now_utc())?;
        self.history.update(&run, previous).await?;

        self.telemetry.event(
            &run.migration_type.telemetry_event("cancel-requested"),
            telemetry_properties([("migrationId", run.run_id.as_str())]),
        );

        let check = MigrationMessage::cancel_check(run.context(), StatusCheck::default());
        self.queue.send(run.migration_type, &check, Duration::ZERO).await?;

        info!("迁移 {} ({}) 已请求取消", run.run_id, run.migration_type);
        Ok(run)
    }

    /// 重新计算已完成迁移的成功数与失败数
    #[instrument(skip(self))]
    pub async fn refresh(&self, run_id: &str) -> MigrationResult<MigrationRun> {
        let mut run = self.get(run_id).await?;
        if run.status != MigrationStatus::Completed {
            return Err(MigrationError::validation_error(format!(
                "只能刷新已完成的迁移，{} 当前状态为 {}",
                run.run_id, run.status
            )));
        }

        let definition = self.registry.get(run.migration_type)?;
        let (migrated, failed) = self
            .monitor
            .count_records(&run.context(), &definition)
            .await?;
        run.record_counts(migrated, failed);
        self.history.update(&run, MigrationStatus::Completed).await?;

        debug!(
            "迁移 {} 计数已刷新: 成功 {}，失败 {}",
            run.run_id, migrated, failed
        );
        Ok(run)
    }

    pub async fn get(&self, run_id: &str) -> MigrationResult<MigrationRun> {
        self.history
            .find_by_id(run_id)
            .await?
            .ok_or_else(|| MigrationError::run_not_found(run_id))
    }

    pub async fn list(&self, filter: &HistoryFilter) -> MigrationResult<Vec<MigrationRun>> {
        self.history.find_all(filter).await
    }

    /// 指定类型进行中迁移的实时进度，没有进行中的迁移时返回 None
    pub async fn progress(
        &self,
        migration_type: MigrationType,
    ) -> MigrationResult<Option<MigrationProgress>> {
        let definition = self.registry.get(migration_type)?;
        let run = match self.history.find_latest(migration_type).await? {
            Some(run) if run.status.is_active() => run,
            _ => return Ok(None),
        };

        let records_migrated = definition.mapping.count_by_label(&run.run_id).await?;
        let depth = self.queue.approximate_depth(migration_type).await?;
        let records_failed = self.queue.dead_letter_depth(migration_type).await?;

        Ok(Some(MigrationProgress {
            run,
            records_migrated,
            to_be_processed_count: depth.waiting(),
            being_processed_count: depth.in_flight,
            records_failed,
        }))
    }

    pub async fn dead_letters(
        &self,
        migration_type: MigrationType,
        max_messages: usize,
    ) -> MigrationResult<Vec<DeadLetter>> {
        self.registry.get(migration_type)?;
        let deliveries = self
            .queue
            .peek_dead_letters(migration_type, max_messages)
            .await?;

        Ok(deliveries
            .into_iter()
            .map(|delivery| DeadLetter {
                message: delivery.decode().ok(),
                raw: String::from_utf8_lossy(&delivery.body).into_owned(),
                message_id: delivery.message_id,
                receive_count: delivery.receive_count,
            })
            .collect())
    }

    pub async fn purge_dead_letters(&self, migration_type: MigrationType) -> MigrationResult<u64> {
        self.registry.get(migration_type)?;
        let purged = self.queue.purge_dead_letters(migration_type).await?;
        info!("已清空 {} 的死信队列: {} 条", migration_type, purged);
        Ok(purged)
    }

    pub fn definition(
        &self,
        migration_type: MigrationType,
    ) -> MigrationResult<Arc<MigrationDefinition>> {
        self.registry.get(migration_type)
    }
}
