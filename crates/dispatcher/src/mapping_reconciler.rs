use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use migration_core::{
    models::{CreateMappingResult, MigrationContext, MigrationMapping, MigrationMessage},
    traits::{telemetry_properties, MappingClient, MigrationQueue, TelemetrySink},
    MigrationResult,
};

/// 映射创建失败时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// 首次尝试: 发布一条映射重试消息
    PublishRetry,
    /// 重试路径: 错误返回给传输层
    Propagate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingOutcome {
    Created,
    Duplicate,
    RetryScheduled,
}

/// 创建映射并处理重复与失败
pub struct MappingReconciler {
    queue: Arc<dyn MigrationQueue>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl MappingReconciler {
    pub fn new(queue: Arc<dyn MigrationQueue>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self { queue, telemetry }
    }

    pub async fn create_mapping_or_fail(
        &self,
        context: &MigrationContext,
        client: &dyn MappingClient,
        mapping: &MigrationMapping,
        policy: RetryPolicy,
    ) -> MigrationResult<MappingOutcome> {
        let migration_type = context.migration_type;

        match client.create(mapping).await {
            Ok(CreateMappingResult::Created) => {
                self.telemetry.event(
                    &migration_type.telemetry_event("entity-migrated"),
                    telemetry_properties([
                        ("migrationId", context.run_id.as_str()),
                        ("sourceId", mapping.source_id.as_str()),
                        ("targetId", mapping.target_id.as_str()),
                    ]),
                );
                Ok(MappingOutcome::Created)
            }
            Ok(CreateMappingResult::Duplicate(duplicate)) => {
                warn!(
                    "映射重复: 源 {} 已映射到 {}，本次尝试映射到 {}",
                    duplicate.existing.source_id,
                    duplicate.existing.target_id,
                    duplicate.duplicate.target_id
                );
                self.telemetry.event(
                    &migration_type.telemetry_event("entity-duplicate"),
                    telemetry_properties([
                        ("migrationId", context.run_id.as_str()),
                        ("existingSourceId", duplicate.existing.source_id.as_str()),
                        ("existingTargetId", duplicate.existing.target_id.as_str()),
                        ("duplicateSourceId", duplicate.duplicate.source_id.as_str()),
                        ("duplicateTargetId", duplicate.duplicate.target_id.as_str()),
                    ]),
                );
                Ok(MappingOutcome::Duplicate)
            }
            Err(e) => match policy {
                RetryPolicy::PublishRetry => {
                    warn!(
                        "创建映射失败 (源 {} -> 目标 {})，发布映射重试消息: {}",
                        mapping.source_id, mapping.target_id, e
                    );
                    let retry = MigrationMessage::mapping_retry(context.clone(), mapping.clone());
                    self.queue.send(migration_type, &retry, Duration::ZERO).await?;
                    self.telemetry.event(
                        &migration_type.telemetry_event("mapping-retry-scheduled"),
                        telemetry_properties([
                            ("migrationId", context.run_id.as_str()),
                            ("sourceId", mapping.source_id.as_str()),
                            ("targetId", mapping.target_id.as_str()),
                        ]),
                    );
                    info!("已为源 {} 安排映射重试", mapping.source_id);
                    Ok(MappingOutcome::RetryScheduled)
                }
                RetryPolicy::Propagate => {
                    error!(
                        "映射重试仍然失败 (源 {} -> 目标 {}): {}",
                        mapping.source_id, mapping.target_id, e
                    );
                    Err(e)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration_core::{models::MigrationType, MigrationError};
    use migration_testing_utils::{
        test_context, test_mapping, MockMappingClient, MockMigrationQueue, RecordingTelemetry,
    };

    fn reconciler() -> (MappingReconciler, MockMigrationQueue, RecordingTelemetry) {
        let queue = MockMigrationQueue::new();
        let telemetry = RecordingTelemetry::new();
        (
            MappingReconciler::new(Arc::new(queue.clone()), Arc::new(telemetry.clone())),
            queue,
            telemetry,
        )
    }

    #[tokio::test]
    async fn test_duplicate_is_not_an_error() {
        let (reconciler, _queue, telemetry) = reconciler();
        let client = MockMappingClient::new();
        client.insert(test_mapping("100", "A"));

        let outcome = reconciler
            .create_mapping_or_fail(
                &test_context(MigrationType::Visits),
                &client,
                &test_mapping("100", "B"),
                RetryPolicy::PublishRetry,
            )
            .await
            .unwrap();

        assert_eq!(outcome, MappingOutcome::Duplicate);
        let events = telemetry.events_named("visits-migration-entity-duplicate");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["existingTargetId"], "A");
        assert_eq!(events[0]["duplicateTargetId"], "B");
        assert_eq!(client.get("100").unwrap().target_id, "A");
    }

    #[tokio::test]
    async fn test_first_failure_publishes_retry() {
        let (reconciler, queue, telemetry) = reconciler();
        let client = MockMappingClient::new();
        client.fail_next_creates(1);

        let outcome = reconciler
            .create_mapping_or_fail(
                &test_context(MigrationType::Visits),
                &client,
                &test_mapping("100", "A"),
                RetryPolicy::PublishRetry,
            )
            .await
            .unwrap();

        assert_eq!(outcome, MappingOutcome::RetryScheduled);
        let retries = queue.sent_of_kind("RETRY_MIGRATION_MAPPING");
        assert_eq!(retries.len(), 1);
        assert_eq!(telemetry.count("visits-migration-mapping-retry-scheduled"), 1);
    }

    #[tokio::test]
    async fn test_retry_path_propagates() {
        let (reconciler, queue, _telemetry) = reconciler();
        let client = MockMappingClient::new();
        client.fail_next_creates(1);

        let result = reconciler
            .create_mapping_or_fail(
                &test_context(MigrationType::Visits),
                &client,
                &test_mapping("100", "A"),
                RetryPolicy::Propagate,
            )
            .await;

        assert!(matches!(result, Err(MigrationError::Network(_))));
        assert!(queue.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn test_retry_publish_failure_surfaces() {
        let (reconciler, queue, _telemetry) = reconciler();
        queue.set_fail_sends(true);
        let client = MockMappingClient::new();
        client.fail_next_creates(1);

        let result = reconciler
            .create_mapping_or_fail(
                &test_context(MigrationType::Visits),
                &client,
                &test_mapping("100", "A"),
                RetryPolicy::PublishRetry,
            )
            .await;

        assert!(matches!(result, Err(MigrationError::MessageQueue(_))));
    }
}
