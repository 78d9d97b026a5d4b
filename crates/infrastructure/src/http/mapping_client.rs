use std::time::Duration;

use async_trait::async_trait;
use migration_core::{
    models::{CreateMappingResult, DuplicateMapping, MigrationMapping},
    traits::MappingClient,
    MigrationError, MigrationResult,
};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{build_client, network_error, path_url, trim_base_url, upstream_error};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DuplicateErrorResponse {
    more_info: DuplicateMapping,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: i64,
}

/// 映射服务HTTP客户端
///
/// - `GET {base}/source-id/{id}`，404 表示尚未迁移
/// - `POST {base}`，409 冲突时响应体 `moreInfo` 携带已有与重复的映射
/// - `GET {base}/migration-id/{label}` 返回 `{"count": n}`
pub struct HttpMappingClient {
    client: Client,
    base_url: String,
}

impl HttpMappingClient {
    pub fn new(base_url: &str, timeout: Duration) -> MigrationResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: trim_base_url(base_url),
        })
    }
}

#[async_trait]
impl MappingClient for HttpMappingClient {
    async fn find_by_source_id(
        &self,
        source_id: &str,
    ) -> MigrationResult<Option<MigrationMapping>> {
        let response = self
            .client
            .get(path_url(&self.base_url, &["source-id", source_id])?)
            .send()
            .await
            .map_err(network_error)?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                Ok(Some(response.json().await.map_err(network_error)?))
            }
            _ => Err(upstream_error(response).await),
        }
    }

    async fn create(&self, mapping: &MigrationMapping) -> MigrationResult<CreateMappingResult> {
        let response = self
            .client
            .post(&self.base_url)
            .json(mapping)
            .send()
            .await
            .map_err(network_error)?;

        match response.status() {
            StatusCode::CONFLICT => {
                let body: DuplicateErrorResponse = response.json().await.map_err(|e| {
                    MigrationError::Mapping(format!("无法解析映射冲突响应: {e}"))
                })?;
                debug!(
                    "映射冲突: 已有 {} -> {}，重复 {} -> {}",
                    body.more_info.existing.source_id,
                    body.more_info.existing.target_id,
                    body.more_info.duplicate.source_id,
                    body.more_info.duplicate.target_id
                );
                Ok(CreateMappingResult::Duplicate(body.more_info))
            }
            status if status.is_success() => Ok(CreateMappingResult::Created),
            _ => Err(upstream_error(response).await),
        }
    }

    async fn count_by_label(&self, label: &str) -> MigrationResult<i64> {
        let response = self
            .client
            .get(path_url(&self.base_url, &["migration-id", label])?)
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let body: CountResponse = response.json().await.map_err(network_error)?;
        Ok(body.count)
    }
}
