use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use migration_dispatcher::MigrationCoordinator;

use crate::handlers::{
    health::health_check,
    metrics::render_metrics,
    migrations::{
        cancel_migration, get_dead_letters, get_migration, get_progress, list_all_history,
        list_history, purge_dead_letters, refresh_migration, start_migration,
    },
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<MigrationCoordinator>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(coordinator: Arc<MigrationCoordinator>) -> Self {
        Self {
            coordinator,
            metrics_handle: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(render_metrics))
        .route("/migrate/history", get(list_all_history))
        .route("/migrate/{migration_type}", post(start_migration))
        .route("/migrate/{migration_type}/history", get(list_history))
        .route("/migrate/{migration_type}/history/{run_id}", get(get_migration))
        .route("/migrate/{migration_type}/{run_id}/cancel", post(cancel_migration))
        .route("/migrate/{migration_type}/{run_id}/refresh", post(refresh_migration))
        .route("/migrate/{migration_type}/active-migration", get(get_progress))
        .route(
            "/migrate/{migration_type}/dead-letter",
            get(get_dead_letters).delete(purge_dead_letters),
        )
        .with_state(state)
}
