use std::time::Duration;

use async_trait::async_trait;
use migration_core::{models::CreateOutcome, traits::TargetAdapter, MigrationError, MigrationResult};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::{build_client, id_to_string, network_error, trim_base_url, upstream_error};

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: Value,
}

/// 目标系统HTTP适配器
///
/// `POST {base}` 创建记录: 200/201 返回 `{"id": ...}`，204 表示目标系统忽略该记录。
pub struct HttpTargetAdapter {
    client: Client,
    base_url: String,
}

impl HttpTargetAdapter {
    pub fn new(base_url: &str, timeout: Duration) -> MigrationResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: trim_base_url(base_url),
        })
    }
}

#[async_trait]
impl TargetAdapter for HttpTargetAdapter {
    async fn create(&self, request: &Value) -> MigrationResult<CreateOutcome> {
        let response = self
            .client
            .post(&self.base_url)
            .json(request)
            .send()
            .await
            .map_err(network_error)?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(CreateOutcome::Ignored {
                reason: "目标系统忽略了该记录".to_string(),
            }),
            StatusCode::OK | StatusCode::CREATED => {
                let created: CreatedResponse = response.json().await.map_err(network_error)?;
                let target_id = id_to_string(&created.id).map_err(|_| {
                    MigrationError::Serialization(format!("目标系统返回了无效的ID: {}", created.id))
                })?;
                Ok(CreateOutcome::Created { target_id })
            }
            _ => Err(upstream_error(response).await),
        }
    }
}
