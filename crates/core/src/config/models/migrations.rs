use serde::{Deserialize, Serialize};

use crate::models::MigrationType;

/// 划分方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PagingMode {
    /// 按页码偏移分页
    #[default]
    PageNumber,
    /// 过滤条件显式列出 ID
    Explicit,
}

/// 单个迁移类型的外部服务端点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationEndpointConfig {
    pub migration_type: MigrationType,
    pub source_url: String,
    pub target_url: String,
    pub mapping_url: String,
    #[serde(default)]
    pub paging: PagingMode,
    pub page_size: Option<i64>,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_request_timeout_seconds() -> u64 {
    30
}

impl MigrationEndpointConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, url) in [
            ("source_url", &self.source_url),
            ("target_url", &self.target_url),
            ("mapping_url", &self.mapping_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(anyhow::anyhow!(
                    "{} 的 {} 必须是HTTP地址: {}",
                    self.migration_type,
                    name,
                    url
                ));
            }
        }

        if let Some(page_size) = self.page_size {
            if page_size <= 0 {
                return Err(anyhow::anyhow!("{} 的页大小必须大于0", self.migration_type));
            }
        }

        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("{} 的请求超时时间必须大于0", self.migration_type));
        }

        Ok(())
    }
}
