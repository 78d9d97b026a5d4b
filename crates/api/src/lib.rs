//! # Migration API
//!
//! 迁移协调引擎的控制接口，基于 Axum，所有处理器都是对协调器的薄封装。
//!
//! ## API 端点
//!
//! - `POST /migrate/{type}` 启动迁移，请求体为过滤条件
//! - `GET /migrate/history` 查询所有类型的迁移历史
//! - `GET /migrate/{type}/history` 查询指定类型的迁移历史
//! - `GET /migrate/{type}/history/{run_id}` 获取单次迁移
//! - `POST /migrate/{type}/{run_id}/cancel` 请求取消迁移
//! - `POST /migrate/{type}/{run_id}/refresh` 重新计算已完成迁移的计数
//! - `GET /migrate/{type}/active-migration` 进行中迁移的实时进度
//! - `GET|DELETE /migrate/{type}/dead-letter` 查看或清空死信
//! - `GET /health`、`GET /metrics`

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use std::time::Duration;

use axum::Router;
use migration_core::config::ApiConfig;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;

use middleware::{cors_layer, request_logging, trace_layer};
pub use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(state: AppState, api_config: &ApiConfig) -> Router {
    let router = create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(TimeoutLayer::new(Duration::from_secs(
                api_config.request_timeout_seconds,
            )))
            .layer(axum::middleware::from_fn(request_logging)),
    );

    if api_config.cors_enabled {
        router.layer(cors_layer(&api_config.cors_origins))
    } else {
        router
    }
}
