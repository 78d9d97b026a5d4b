use std::sync::Arc;
use std::time::Duration;

use migration_core::{
    models::{MigrationStatus, MigrationType},
    traits::{MappingClient, MigrationQueue},
};
use migration_dispatcher::{
    MigrationCoordinator, MigrationDefinition, MigrationRegistry, MonitorSettings, PagingStrategy,
};
use migration_infrastructure::{InMemoryMigrationQueue, InMemoryQueueConfig};
use migration_testing_utils::{
    source_records, FixedClock, MockHistoryRepository, MockMappingClient, MockSourceAdapter,
    MockTargetAdapter, RecordingTelemetry, TestEnv,
};
use migration_worker::WorkerService;
use serde_json::json;

struct Setup {
    coordinator: Arc<MigrationCoordinator>,
    queue: InMemoryMigrationQueue,
    history: MockHistoryRepository,
    source: MockSourceAdapter,
    mapping: MockMappingClient,
    telemetry: RecordingTelemetry,
}

fn setup(records: usize, settings: MonitorSettings, queue_config: InMemoryQueueConfig) -> Setup {
    let queue = InMemoryMigrationQueue::with_config(queue_config);
    let history = MockHistoryRepository::new();
    let source = MockSourceAdapter::with_records(source_records(records));
    let mapping = MockMappingClient::new();
    let telemetry = RecordingTelemetry::new();

    let registry = MigrationRegistry::new().with(
        MigrationDefinition::new(
            MigrationType::Visits,
            Arc::new(source.clone()),
            Arc::new(MockTargetAdapter::new()),
            Arc::new(mapping.clone()),
        )
        .with_paging(PagingStrategy::ByPageNumber { page_size: 10 }),
    );

    let coordinator = Arc::new(MigrationCoordinator::with_clock(
        Arc::new(registry),
        Arc::new(queue.clone()),
        Arc::new(history.clone()),
        Arc::new(telemetry.clone()),
        Arc::new(FixedClock::at(2020, 3, 24, 12, 0, 0)),
        settings,
    ));

    Setup {
        coordinator,
        queue,
        history,
        source,
        mapping,
        telemetry,
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_run_with_one_poison_record() {
    let s = setup(
        86,
        MonitorSettings::default(),
        InMemoryQueueConfig {
            max_receive_count: 3,
            redelivery_delay: Duration::from_secs(5),
            visibility_timeout: Duration::from_secs(300),
            max_queue_size: 0,
        },
    );
    s.source.fail_fetch("13");

    let worker = WorkerService::builder(Arc::new(s.queue.clone()), s.coordinator.clone())
        .worker_id("worker-e2e")
        .concurrency(4)
        .batch_size(10)
        .build();

    let run = s
        .coordinator
        .start(MigrationType::Visits, json!({"prisonIds": ["MDI"]}))
        .await
        .unwrap();
    assert_eq!(run.run_id, "2020-03-24T12:00:00");
    assert_eq!(run.estimated_count, 86);

    let mut finished = None;
    for _ in 0..10_000 {
        let received = worker.poll_once().await.unwrap();
        let current = s.history.get(&run.run_id).unwrap();
        if current.status.is_terminal() {
            finished = Some(current);
            break;
        }
        if received == 0 {
            tokio::time::advance(Duration::from_millis(500)).await;
        }
    }

    let finished = finished.expect("迁移未在预期时间内结束");
    assert_eq!(finished.status, MigrationStatus::Completed);
    assert_eq!(finished.records_migrated, 85);
    assert_eq!(finished.records_failed, 1);
    assert!(finished.when_ended.is_some());

    // 1 次计数查询 + 9 页
    assert_eq!(s.source.list_calls(), 10);
    let fetches = s.source.fetch_calls();
    assert_eq!(fetches.iter().filter(|id| id.as_str() == "13").count(), 3);
    assert_eq!(fetches.len(), 85 + 3);

    assert_eq!(s.mapping.all().len(), 85);
    assert!(s
        .mapping
        .all()
        .iter()
        .all(|m| m.label.as_deref() == Some("2020-03-24T12:00:00")));
    assert_eq!(s.mapping.count_by_label(&run.run_id).await.unwrap(), 85);

    assert_eq!(s.telemetry.count("visits-migration-entity-migrated"), 85);
    assert_eq!(s.telemetry.count("visits-migration-completed"), 1);
    let completed = &s.telemetry.events_named("visits-migration-completed")[0];
    assert_eq!(completed["recordsMigrated"], "85");
    assert_eq!(completed["recordsFailed"], "1");

    assert_eq!(s.queue.dead_letter_depth(MigrationType::Visits).await.unwrap(), 1);
    let dead_letters = s.coordinator.dead_letters(MigrationType::Visits, 10).await.unwrap();
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0].receive_count, 3);
    assert_eq!(dead_letters[0].message.as_ref().map(|m| m.kind()), Some("MIGRATE_ENTITY"));
}

#[tokio::test(start_paused = true)]
async fn test_panicking_handler_is_nacked_and_dead_lettered() {
    let s = setup(
        30,
        MonitorSettings::default(),
        InMemoryQueueConfig {
            max_receive_count: 2,
            redelivery_delay: Duration::from_secs(5),
            visibility_timeout: Duration::from_secs(3600),
            max_queue_size: 0,
        },
    );
    s.source.panic_on_fetch("7");

    let worker = WorkerService::builder(Arc::new(s.queue.clone()), s.coordinator.clone())
        .batch_size(5)
        .build();
    let run = s
        .coordinator
        .start(MigrationType::Visits, json!({}))
        .await
        .unwrap();

    let mut finished = None;
    for _ in 0..10_000 {
        let received = worker.poll_once().await.unwrap();
        let current = s.history.get(&run.run_id).unwrap();
        if current.status.is_terminal() {
            finished = Some(current);
            break;
        }
        if received == 0 {
            tokio::time::advance(Duration::from_millis(500)).await;
        }
    }

    // 可见性超时远大于运行时长，消息只能通过 nack 离开 in-flight
    let finished = finished.expect("迁移未在预期时间内结束");
    assert_eq!(finished.status, MigrationStatus::Completed);
    assert_eq!(finished.records_migrated, 29);
    assert_eq!(finished.records_failed, 1);
    let fetches = s.source.fetch_calls();
    assert_eq!(fetches.iter().filter(|id| id.as_str() == "7").count(), 2);

    let depth = s.queue.approximate_depth(MigrationType::Visits).await.unwrap();
    assert_eq!(depth.in_flight, 0);
    assert_eq!(s.queue.dead_letter_depth(MigrationType::Visits).await.unwrap(), 1);
}

#[tokio::test]
async fn test_background_worker_completes_run_and_stops() {
    let s = setup(
        25,
        MonitorSettings {
            required_empty_checks: 2,
            busy_recheck_delay: Duration::from_millis(20),
            empty_recheck_delay: Duration::from_millis(10),
        },
        InMemoryQueueConfig::default(),
    );

    let worker = WorkerService::builder(Arc::new(s.queue.clone()), s.coordinator.clone())
        .poll_interval_ms(5)
        .build();
    assert_eq!(worker.migration_types(), &[MigrationType::Visits]);

    worker.start().await.unwrap();
    assert!(worker.is_running().await);
    assert!(worker.start().await.is_err());

    let run = s
        .coordinator
        .start(MigrationType::Visits, json!({}))
        .await
        .unwrap();

    let history = s.history.clone();
    let run_id = run.run_id.clone();
    let completed = TestEnv::wait_for(
        || {
            let history = history.clone();
            let run_id = run_id.clone();
            async move {
                history
                    .get(&run_id)
                    .map(|r| r.status == MigrationStatus::Completed)
                    .unwrap_or(false)
            }
        },
        Duration::from_secs(10),
    )
    .await;
    assert!(completed);

    worker.stop().await.unwrap();
    assert!(!worker.is_running().await);

    let finished = s.history.get(&run.run_id).unwrap();
    assert_eq!(finished.records_migrated, 25);
    assert_eq!(finished.records_failed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_run_drains_queue() {
    let s = setup(
        86,
        MonitorSettings::default(),
        InMemoryQueueConfig::default(),
    );
    let worker = WorkerService::builder(Arc::new(s.queue.clone()), s.coordinator.clone())
        .batch_size(1)
        .concurrency(1)
        .build();

    let run = s
        .coordinator
        .start(MigrationType::Visits, json!({}))
        .await
        .unwrap();

    // 处理 Divide 和部分页消息后取消
    for _ in 0..3 {
        worker.poll_once().await.unwrap();
    }
    let cancelling = s.coordinator.cancel(&run.run_id).await.unwrap();
    assert_eq!(cancelling.status, MigrationStatus::CancelledRequested);

    let mut finished = None;
    for _ in 0..10_000 {
        let received = worker.poll_once().await.unwrap();
        let current = s.history.get(&run.run_id).unwrap();
        if current.status.is_terminal() {
            finished = Some(current);
            break;
        }
        if received == 0 {
            tokio::time::advance(Duration::from_millis(500)).await;
        }
    }

    let finished = finished.expect("取消未在预期时间内完成");
    assert_eq!(finished.status, MigrationStatus::Cancelled);
    assert!(finished.records_migrated < 86);
    assert_eq!(s.telemetry.count("visits-migration-cancelled"), 1);
    assert_eq!(s.telemetry.count("visits-migration-completed"), 0);
    assert!(!s
        .queue
        .probably_has_remaining_messages(MigrationType::Visits)
        .await
        .unwrap());
}
