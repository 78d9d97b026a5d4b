use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use migration_core::{
    config::CoordinatorConfig,
    models::{MigrationContext, MigrationMessage, MigrationRun, MigrationStatus, StatusCheck},
    traits::{telemetry_properties, MigrationHistoryRepository, MigrationQueue, TelemetrySink},
    Clock, MigrationError, MigrationResult,
};

use crate::registry::MigrationDefinition;

/// 完成检测的去抖参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub required_empty_checks: u32,
    pub busy_recheck_delay: Duration,
    pub empty_recheck_delay: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            required_empty_checks: 10,
            busy_recheck_delay: Duration::from_secs(10),
            empty_recheck_delay: Duration::from_secs(1),
        }
    }
}

impl From<&CoordinatorConfig> for MonitorSettings {
    fn from(config: &CoordinatorConfig) -> Self {
        Self {
            required_empty_checks: config.required_empty_checks,
            busy_recheck_delay: config.busy_recheck_delay(),
            empty_recheck_delay: config.empty_recheck_delay(),
        }
    }
}

/// 检查消息的两种用途
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Completion,
    Cancellation,
}

impl CheckKind {
    fn message(&self, context: MigrationContext, check: StatusCheck) -> MigrationMessage {
        match self {
            CheckKind::Completion => MigrationMessage::status_check(context, check),
            CheckKind::Cancellation => MigrationMessage::cancel_check(context, check),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorDecision {
    Requeued { check_count: u32, delay: Duration },
    Finalized(MigrationStatus),
    /// 迁移已被其他路径接管，检查链结束
    Abandoned,
}

/// 根据队列深度判断迁移是否结束
pub struct CompletionMonitor {
    queue: Arc<dyn MigrationQueue>,
    history: Arc<dyn MigrationHistoryRepository>,
    telemetry: Arc<dyn TelemetrySink>,
    clock: Arc<dyn Clock>,
    settings: MonitorSettings,
}

impl CompletionMonitor {
    pub fn new(
        queue: Arc<dyn MigrationQueue>,
        history: Arc<dyn MigrationHistoryRepository>,
        telemetry: Arc<dyn TelemetrySink>,
        clock: Arc<dyn Clock>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            queue,
            history,
            telemetry,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> MonitorSettings {
        self.settings
    }

    pub async fn handle_check(
        &self,
        kind: CheckKind,
        context: &MigrationContext,
        definition: &MigrationDefinition,
        check: StatusCheck,
    ) -> MigrationResult<MonitorDecision> {
        let migration_type = context.migration_type;

        if self
            .queue
            .probably_has_remaining_messages(migration_type)
            .await?
        {
            if kind == CheckKind::Cancellation {
                let purged = self.queue.purge_all(migration_type).await?;
                info!("取消迁移 {}: 清除了 {} 条待处理消息", context.run_id, purged);
            }
            debug!("迁移 {} 的队列仍有消息，稍后复查", context.run_id);
            return self
                .requeue(kind, context, StatusCheck::default(), self.settings.busy_recheck_delay)
                .await;
        }

        if check.check_count + 1 >= self.settings.required_empty_checks {
            return match kind {
                CheckKind::Completion => self.complete(context, definition).await,
                CheckKind::Cancellation => self.cancel(context, definition).await,
            };
        }

        self.requeue(kind, context, check.next(), self.settings.empty_recheck_delay).await
    }

    async fn requeue(
        &self,
        kind: CheckKind,
        context: &MigrationContext,
        check: StatusCheck,
        delay: Duration,
    ) -> MigrationResult<MonitorDecision> {
        let message = kind.message(context.clone(), check);
        self.queue.send(context.migration_type, &message, delay).await?;
        Ok(MonitorDecision::Requeued {
            check_count: check.check_count,
            delay,
        })
    }

    /// 迁移计数: 映射服务按 label 计数，失败数取死信队列深度
    pub async fn count_records(
        &self,
        context: &MigrationContext,
        definition: &MigrationDefinition,
    ) -> MigrationResult<(i64, i64)> {
        let migrated = definition.mapping.count_by_label(&context.run_id).await?;
        let failed = self
            .queue
            .dead_letter_depth(context.migration_type)
            .await?;
        Ok((migrated, failed as i64))
    }

    /// 写入终态，读取之后状态已被其他写入改变时返回 false
    async fn write_final(
        &self,
        run: &MigrationRun,
        expected: MigrationStatus,
    ) -> MigrationResult<bool> {
        match self.history.update(run, expected).await {
            Ok(()) => Ok(true),
            Err(MigrationError::InvalidStateTransition { from, .. }) => {
                info!(
                    "迁移 {} 已被并发写入为 {}，放弃写入 {}",
                    run.run_id, from, run.status
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn complete(
        &self,
        context: &MigrationContext,
        definition: &MigrationDefinition,
    ) -> MigrationResult<MonitorDecision> {
        let mut run = self
            .history
            .find_by_id(&context.run_id)
            .await?
            .ok_or_else(|| MigrationError::run_not_found(&context.run_id))?;

        if run.status != MigrationStatus::Started {
            debug!(
                "迁移 {} 当前状态为 {}，完成检测结束",
                run.run_id, run.status
            );
            return Ok(MonitorDecision::Abandoned);
        }

        let (migrated, failed) = self.count_records(context, definition).await?;
        run.record_counts(migrated, failed);
        run.transition(MigrationStatus::Completed, self.clock.now_utc())?;
        if !self.write_final(&run, MigrationStatus::Started).await? {
            return Ok(MonitorDecision::Abandoned);
        }

        info!(
            "迁移 {} ({}) 完成: 成功 {}，失败 {}，预计 {}",
            run.run_id, run.migration_type, migrated, failed, run.estimated_count
        );
        self.telemetry.event(
            &context.migration_type.telemetry_event("completed"),
            telemetry_properties([
                ("migrationId", run.run_id.clone()),
                ("estimatedCount", run.estimated_count.to_string()),
                ("recordsMigrated", migrated.to_string()),
                ("recordsFailed", failed.to_string()),
                ("durationMinutes", duration_minutes(&run).to_string()),
            ]),
        );
        Ok(MonitorDecision::Finalized(MigrationStatus::Completed))
    }

    async fn cancel(
        &self,
        context: &MigrationContext,
        definition: &MigrationDefinition,
    ) -> MigrationResult<MonitorDecision> {
        let mut run = self
            .history
            .find_by_id(&context.run_id)
            .await?
            .ok_or_else(|| MigrationError::run_not_found(&context.run_id))?;

        if run.status != MigrationStatus::CancelledRequested {
            warn!(
                "迁移 {} 当前状态为 {}，忽略取消检测",
                run.run_id, run.status
            );
            return Ok(MonitorDecision::Abandoned);
        }

        let (migrated, failed) = self.count_records(context, definition).await?;
        run.record_counts(migrated, failed);
        run.transition(MigrationStatus::Cancelled, self.clock.now_utc())?;
        if !self.write_final(&run, MigrationStatus::CancelledRequested).await? {
            return Ok(MonitorDecision::Abandoned);
        }

        info!(
            "迁移 {} ({}) 已取消: 成功 {}，失败 {}",
            run.run_id, run.migration_type, migrated, failed
        );
        self.telemetry.event(
            &context.migration_type.telemetry_event("cancelled"),
            telemetry_properties([
                ("migrationId", run.run_id.clone()),
                ("estimatedCount", run.estimated_count.to_string()),
                ("recordsMigrated", migrated.to_string()),
                ("recordsFailed", failed.to_string()),
                ("durationMinutes", duration_minutes(&run).to_string()),
            ]),
        );
        Ok(MonitorDecision::Finalized(MigrationStatus::Cancelled))
    }
}

fn duration_minutes(run: &MigrationRun) -> i64 {
    run.when_ended
        .map(|ended| (ended - run.when_started).num_minutes())
        .unwrap_or(0)
}
