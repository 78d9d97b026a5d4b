//! 通用HTTP适配器
//!
//! 仅靠配置即可驱动一个迁移类型: 源系统、目标系统与映射服务均通过JSON接口访问，
//! 记录原样透传给目标系统。

pub mod mapping_client;
pub mod source_adapter;
pub mod target_adapter;

pub use mapping_client::HttpMappingClient;
pub use source_adapter::HttpSourceAdapter;
pub use target_adapter::HttpTargetAdapter;

use std::time::Duration;

use migration_core::{MigrationError, MigrationResult};
use reqwest::{Client, Response, Url};

pub(crate) fn build_client(timeout: Duration) -> MigrationResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| MigrationError::config_error(format!("创建HTTP客户端失败: {e}")))
}

pub(crate) fn network_error(error: reqwest::Error) -> MigrationError {
    if error.is_timeout() {
        MigrationError::Timeout(error.to_string())
    } else if error.is_decode() {
        MigrationError::Serialization(error.to_string())
    } else {
        MigrationError::Network(error.to_string())
    }
}

/// 读取失败响应的状态码与正文
pub(crate) async fn upstream_error(response: Response) -> MigrationError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    MigrationError::Upstream { status, message }
}

pub(crate) fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// 在基础地址后追加路径段，每段单独做百分号转义
pub(crate) fn path_url(base_url: &str, segments: &[&str]) -> MigrationResult<Url> {
    let mut url = Url::parse(base_url)
        .map_err(|e| MigrationError::config_error(format!("无效的服务地址 {base_url}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| MigrationError::config_error(format!("服务地址 {base_url} 不能追加路径")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// 源系统的ID既可能是字符串也可能是数字
pub(crate) fn id_to_string(value: &serde_json::Value) -> MigrationResult<String> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(MigrationError::Serialization(format!("无效的记录ID: {other}"))),
    }
}
