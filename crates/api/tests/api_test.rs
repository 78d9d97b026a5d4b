use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use migration_api::{create_app, AppState};
use migration_core::{
    config::ApiConfig,
    models::{MigrationStatus, MigrationType},
    traits::QueueDelivery,
};
use migration_dispatcher::{
    MigrationCoordinator, MigrationDefinition, MigrationRegistry, MonitorSettings,
};
use migration_testing_utils::{
    source_records, test_mapping, FixedClock, MigrationRunBuilder, MockHistoryRepository,
    MockMappingClient, MockMigrationQueue, MockSourceAdapter, MockTargetAdapter,
    RecordingTelemetry,
};
use serde_json::{json, Value};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    queue: MockMigrationQueue,
    history: MockHistoryRepository,
    mapping: MockMappingClient,
}

fn test_app(history: MockHistoryRepository) -> TestApp {
    let queue = MockMigrationQueue::new();
    let mapping = MockMappingClient::new();

    let registry = MigrationRegistry::new().with(MigrationDefinition::new(
        MigrationType::Visits,
        Arc::new(MockSourceAdapter::with_records(source_records(86))),
        Arc::new(MockTargetAdapter::new()),
        Arc::new(mapping.clone()),
    ));

    let coordinator = Arc::new(MigrationCoordinator::with_clock(
        Arc::new(registry),
        Arc::new(queue.clone()),
        Arc::new(history.clone()),
        Arc::new(RecordingTelemetry::new()),
        Arc::new(FixedClock::at(2020, 3, 24, 12, 0, 0)),
        MonitorSettings::default(),
    ));

    let router = create_app(AppState::new(coordinator), &ApiConfig::default());

    TestApp {
        router,
        queue,
        history,
        mapping,
    }
}

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn test_health_lists_registered_types() {
    let app = test_app(MockHistoryRepository::new());
    let (status, body) = send(&app.router, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["migrationTypes"], json!(["VISITS"]));
}

#[tokio::test]
async fn test_start_migration_accepted_then_conflict() {
    let app = test_app(MockHistoryRepository::new());

    let (status, body) = send(
        &app.router,
        "POST",
        "/migrate/visits",
        Some(json!({"prisonIds": ["MDI"]})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["runId"], "2020-03-24T12:00:00");
    assert_eq!(body["data"]["status"], "STARTED");
    assert_eq!(body["data"]["estimatedCount"], 86);
    assert_eq!(app.queue.sent_of_kind("MIGRATE_ENTITIES").len(), 1);

    let (status, body) = send(&app.router, "POST", "/migrate/VISITS", Some(json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "MIGRATION_IN_PROGRESS");
}

#[tokio::test]
async fn test_start_migration_with_empty_body_uses_empty_filter() {
    let app = test_app(MockHistoryRepository::new());
    let (status, body) = send(&app.router, "POST", "/migrate/visits", None).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["filter"], json!({}));
}

#[tokio::test]
async fn test_start_migration_rejections() {
    let app = test_app(MockHistoryRepository::new());

    let (status, body) = send(&app.router, "POST", "/migrate/alerts", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "MIGRATION_TYPE_NOT_CONFIGURED");

    let (status, _) = send(&app.router, "POST", "/migrate/parcels", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app.router, "POST", "/migrate/visits", Some(json!([1, 2]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "VALIDATION_ERROR");

    let request = Request::builder()
        .method("POST")
        .uri("/migrate/visits")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(app.history.count(), 0);
    assert!(app.queue.sent_messages().is_empty());
}

#[tokio::test]
async fn test_get_migration_by_type_and_id() {
    let history = MockHistoryRepository::with_runs(vec![MigrationRunBuilder::new().build()]);
    let app = test_app(history);

    let (status, body) = send(
        &app.router,
        "GET",
        "/migrate/visits/history/2020-03-24T12:00:00",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["migrationType"], "VISITS");

    let (status, body) = send(
        &app.router,
        "GET",
        "/migrate/visits/history/2019-01-01T00:00:00",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "RUN_NOT_FOUND");

    let (status, _) = send(
        &app.router,
        "GET",
        "/migrate/alerts/history/2020-03-24T12:00:00",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_migration() {
    let history = MockHistoryRepository::with_runs(vec![MigrationRunBuilder::new().build()]);
    let app = test_app(history);

    let (status, body) = send(
        &app.router,
        "POST",
        "/migrate/visits/2020-03-24T12:00:00/cancel",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["status"], "CANCELLED_REQUESTED");
    assert_eq!(app.queue.sent_of_kind("CANCEL_MIGRATION").len(), 1);
    assert_eq!(
        app.history.get("2020-03-24T12:00:00").unwrap().status,
        MigrationStatus::CancelledRequested
    );

    let (status, body) = send(
        &app.router,
        "POST",
        "/migrate/visits/2020-03-24T12:00:00/cancel",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "INVALID_STATE_TRANSITION");
}

#[tokio::test]
async fn test_refresh_completed_migration() {
    let history = MockHistoryRepository::with_runs(vec![
        MigrationRunBuilder::new()
            .with_status(MigrationStatus::Completed)
            .with_counts(0, 0)
            .build(),
        MigrationRunBuilder::new()
            .with_run_id("2020-03-25T08:00:00")
            .with_when_started(Utc.with_ymd_and_hms(2020, 3, 25, 8, 0, 0).unwrap())
            .build(),
    ]);
    let app = test_app(history);
    app.mapping.insert(test_mapping("1", "T1"));
    app.mapping.insert(test_mapping("2", "T2"));
    app.queue.add_dead_letter(QueueDelivery {
        receipt: "r1".to_string(),
        message_id: "m1".to_string(),
        receive_count: 5,
        body: b"{}".to_vec(),
    });

    let (status, body) = send(
        &app.router,
        "POST",
        "/migrate/visits/2020-03-24T12:00:00/refresh",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["recordsMigrated"], 2);
    assert_eq!(body["data"]["recordsFailed"], 1);

    let (status, _) = send(
        &app.router,
        "POST",
        "/migrate/visits/2020-03-25T08:00:00/refresh",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_active_migration_progress() {
    let app = test_app(MockHistoryRepository::new());

    let (status, body) = send(&app.router, "GET", "/migrate/visits/active-migration", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].is_null());

    send(&app.router, "POST", "/migrate/visits", Some(json!({}))).await;
    app.mapping.insert(test_mapping("1", "T1"));

    let (status, body) = send(&app.router, "GET", "/migrate/visits/active-migration", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["run"]["runId"], "2020-03-24T12:00:00");
    assert_eq!(body["data"]["recordsMigrated"], 1);
    assert_eq!(body["data"]["toBeProcessedCount"], 1);
    assert_eq!(body["data"]["beingProcessedCount"], 0);
    assert_eq!(body["data"]["recordsFailed"], 0);
}

#[tokio::test]
async fn test_history_filters() {
    let history = MockHistoryRepository::with_runs(vec![
        MigrationRunBuilder::new()
            .with_run_id("2020-03-20T10:00:00")
            .with_when_started(Utc.with_ymd_and_hms(2020, 3, 20, 10, 0, 0).unwrap())
            .with_status(MigrationStatus::Completed)
            .with_counts(80, 6)
            .build(),
        MigrationRunBuilder::new()
            .with_run_id("2020-03-21T10:00:00")
            .with_migration_type(MigrationType::Alerts)
            .with_when_started(Utc.with_ymd_and_hms(2020, 3, 21, 10, 0, 0).unwrap())
            .with_status(MigrationStatus::Completed)
            .with_counts(10, 0)
            .build(),
        MigrationRunBuilder::new()
            .with_run_id("2020-03-22T10:00:00")
            .with_when_started(Utc.with_ymd_and_hms(2020, 3, 22, 10, 0, 0).unwrap())
            .with_status(MigrationStatus::Completed)
            .with_counts(86, 0)
            .build(),
    ]);
    let app = test_app(history);

    let (status, body) = send(&app.router, "GET", "/migrate/history", None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["runId"].as_str().unwrap())
        .collect();
    assert_eq!(
        ids,
        vec![
            "2020-03-22T10:00:00",
            "2020-03-21T10:00:00",
            "2020-03-20T10:00:00"
        ]
    );

    let (_, body) = send(
        &app.router,
        "GET",
        "/migrate/visits/history?includeOnlyFailures=true",
        None,
    )
    .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["runId"], "2020-03-20T10:00:00");

    let (_, body) = send(
        &app.router,
        "GET",
        "/migrate/history?migrationTypes=ALERTS&fromDateTime=2020-03-21T00:00:00Z",
        None,
    )
    .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["migrationType"], "ALERTS");

    let (status, _) = send(
        &app.router,
        "GET",
        "/migrate/history?migrationTypes=PARCELS",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_dead_letters_inspect_and_purge() {
    let app = test_app(MockHistoryRepository::new());
    app.queue.add_dead_letter(QueueDelivery {
        receipt: "r1".to_string(),
        message_id: "m1".to_string(),
        receive_count: 5,
        body: b"not a migration message".to_vec(),
    });

    let (status, body) = send(&app.router, "GET", "/migrate/visits/dead-letter?max=5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["messageId"], "m1");
    assert_eq!(body["data"][0]["receiveCount"], 5);
    assert!(body["data"][0]["message"].is_null());

    let (status, body) = send(&app.router, "DELETE", "/migrate/visits/dead-letter", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], 1);

    let (_, body) = send(&app.router, "GET", "/migrate/visits/dead-letter", None).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_metrics_disabled_returns_not_found() {
    let app = test_app(MockHistoryRepository::new());
    let (status, _) = send(&app.router, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
