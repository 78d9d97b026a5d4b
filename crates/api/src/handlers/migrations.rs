use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use migration_core::models::{HistoryFilter, MigrationRun, MigrationType};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::{
    error::{ApiError, ApiResult},
    response::{accepted, success, ApiResponse},
    routes::AppState,
};

/// 迁移历史查询参数
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQueryParams {
    /// 逗号分隔的迁移类型，仅用于跨类型查询
    pub migration_types: Option<String>,
    pub from_date_time: Option<DateTime<Utc>>,
    pub to_date_time: Option<DateTime<Utc>>,
    pub include_only_failures: Option<bool>,
}

impl HistoryQueryParams {
    fn into_filter(self, migration_types: Vec<MigrationType>) -> HistoryFilter {
        HistoryFilter {
            migration_types,
            from_date_time: self.from_date_time,
            to_date_time: self.to_date_time,
            include_only_failures: self.include_only_failures.unwrap_or(false),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterQueryParams {
    pub max: Option<usize>,
}

fn parse_migration_type(value: &str) -> ApiResult<MigrationType> {
    Ok(value.parse::<MigrationType>()?)
}

/// 请求体为空时使用空过滤条件
fn parse_filter(body: &Bytes) -> ApiResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("无效的过滤条件: {e}")))
}

/// 迁移必须属于路径中的迁移类型
async fn run_of_type(
    state: &AppState,
    migration_type: MigrationType,
    run_id: &str,
) -> ApiResult<MigrationRun> {
    let run = state.coordinator.get(run_id).await?;
    if run.migration_type != migration_type {
        return Err(ApiError::NotFound(format!(
            "迁移 {run_id} 不属于 {migration_type}"
        )));
    }
    Ok(run)
}

/// 启动迁移
pub async fn start_migration(
    State(state): State<AppState>,
    Path(migration_type): Path<String>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let migration_type = parse_migration_type(&migration_type)?;
    let filter = parse_filter(&body)?;
    let run = state.coordinator.start(migration_type, filter).await?;
    info!("通过API启动迁移 {} ({})", run.run_id, migration_type);
    Ok(accepted(run))
}

/// 所有迁移类型的历史
pub async fn list_all_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let migration_types = params
        .migration_types
        .as_deref()
        .map(|types| {
            types
                .split(',')
                .filter(|t| !t.trim().is_empty())
                .map(parse_migration_type)
                .collect::<ApiResult<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();

    let runs = state
        .coordinator
        .list(&params.into_filter(migration_types))
        .await?;
    Ok(success(runs))
}

pub async fn list_history(
    State(state): State<AppState>,
    Path(migration_type): Path<String>,
    Query(params): Query<HistoryQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let migration_type = parse_migration_type(&migration_type)?;
    let runs = state
        .coordinator
        .list(&params.into_filter(vec![migration_type]))
        .await?;
    Ok(success(runs))
}

pub async fn get_migration(
    State(state): State<AppState>,
    Path((migration_type, run_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let migration_type = parse_migration_type(&migration_type)?;
    let run = run_of_type(&state, migration_type, &run_id).await?;
    Ok(success(run))
}

pub async fn cancel_migration(
    State(state): State<AppState>,
    Path((migration_type, run_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let migration_type = parse_migration_type(&migration_type)?;
    run_of_type(&state, migration_type, &run_id).await?;
    let run = state.coordinator.cancel(&run_id).await?;
    Ok(accepted(run))
}

pub async fn refresh_migration(
    State(state): State<AppState>,
    Path((migration_type, run_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let migration_type = parse_migration_type(&migration_type)?;
    run_of_type(&state, migration_type, &run_id).await?;
    let run = state.coordinator.refresh(&run_id).await?;
    Ok(success(run))
}

/// 没有进行中的迁移时 data 为 null
pub async fn get_progress(
    State(state): State<AppState>,
    Path(migration_type): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let migration_type = parse_migration_type(&migration_type)?;
    let progress = state.coordinator.progress(migration_type).await?;
    Ok(ApiResponse {
        success: true,
        data: progress,
        message: None,
        timestamp: Utc::now(),
    })
}

pub async fn get_dead_letters(
    State(state): State<AppState>,
    Path(migration_type): Path<String>,
    Query(params): Query<DeadLetterQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let migration_type = parse_migration_type(&migration_type)?;
    let dead_letters = state
        .coordinator
        .dead_letters(migration_type, params.max.unwrap_or(10))
        .await?;
    Ok(success(dead_letters))
}

pub async fn purge_dead_letters(
    State(state): State<AppState>,
    Path(migration_type): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let migration_type = parse_migration_type(&migration_type)?;
    let purged = state.coordinator.purge_dead_letters(migration_type).await?;
    Ok(ApiResponse::success_with_message(
        purged,
        format!("已清空 {migration_type} 的 {purged} 条死信"),
    ))
}
