use std::time::Duration;

use async_trait::async_trait;
use migration_core::{models::IdPage, traits::SourceAdapter, MigrationError, MigrationResult};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{
    build_client, id_to_string, network_error, path_url, trim_base_url, upstream_error,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IdPageRequest<'a> {
    filter: &'a Value,
    page_number: i64,
    page_size: i64,
}

#[derive(Debug, Deserialize)]
struct IdPageResponse {
    ids: Vec<Value>,
    total: i64,
}

/// 源系统HTTP适配器
///
/// - `POST {base}/ids` 按页列出ID，请求体 `{filter, pageNumber, pageSize}`，响应 `{ids, total}`
/// - `GET {base}/{id}` 获取单条记录
pub struct HttpSourceAdapter {
    client: Client,
    base_url: String,
}

impl HttpSourceAdapter {
    pub fn new(base_url: &str, timeout: Duration) -> MigrationResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: trim_base_url(base_url),
        })
    }
}

#[async_trait]
impl SourceAdapter for HttpSourceAdapter {
    /// 过滤条件必须是JSON对象，缺省时为null
    fn validate_filter(&self, filter: &Value) -> MigrationResult<()> {
        match filter {
            Value::Object(_) | Value::Null => Ok(()),
            other => Err(MigrationError::validation_error(format!(
                "过滤条件必须是JSON对象: {other}"
            ))),
        }
    }

    async fn list_ids(
        &self,
        filter: &Value,
        page_number: i64,
        page_size: i64,
    ) -> MigrationResult<IdPage> {
        let response = self
            .client
            .post(path_url(&self.base_url, &["ids"])?)
            .json(&IdPageRequest {
                filter,
                page_number,
                page_size,
            })
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let page: IdPageResponse = response.json().await.map_err(network_error)?;
        debug!(
            "源系统返回第 {} 页，共 {} 个ID，总数 {}",
            page_number,
            page.ids.len(),
            page.total
        );
        Ok(IdPage {
            ids: page
                .ids
                .iter()
                .map(id_to_string)
                .collect::<MigrationResult<Vec<_>>>()?,
            total: page.total,
        })
    }

    /// 显式划分时过滤条件中的 `ids` 数组
    fn ids_from_filter(&self, filter: &Value) -> MigrationResult<Option<Vec<String>>> {
        match filter.get("ids") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(ids)) => ids
                .iter()
                .map(id_to_string)
                .collect::<MigrationResult<Vec<_>>>()
                .map(Some),
            Some(other) => Err(MigrationError::validation_error(format!(
                "过滤条件中的 ids 必须是数组: {other}"
            ))),
        }
    }

    async fn fetch(&self, source_id: &str) -> MigrationResult<Value> {
        let response = self
            .client
            .get(path_url(&self.base_url, &[source_id])?)
            .send()
            .await
            .map_err(network_error)?;

        match response.status() {
            status if status.is_success() => response.json().await.map_err(network_error),
            StatusCode::NOT_FOUND => Err(MigrationError::Upstream {
                status: 404,
                message: format!("源记录不存在: {source_id}"),
            }),
            _ => Err(upstream_error(response).await),
        }
    }
}
