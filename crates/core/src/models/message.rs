use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{MigrationContext, MigrationMapping};
use crate::errors::{MigrationError, MigrationResult};

/// 队列中传递的工作单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationMessage {
    pub id: String,
    pub context: MigrationContext,
    pub payload: MigrationPayload,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationPayload {
    MigrateEntities(DivideMessage),
    MigrateByPage(PageMessage),
    MigrateEntity(EntityMessage),
    RetryMigrationMapping(MigrationMapping),
    MigrationStatusCheck(StatusCheck),
    CancelMigration(StatusCheck),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DivideMessage {
    pub filter: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMessage {
    pub filter: serde_json::Value,
    pub page: PageSpec,
}

/// 页的两种划分方式: 偏移分页或显式 ID 列表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageSpec {
    #[serde(rename_all = "camelCase")]
    Offset { page_number: i64, page_size: i64 },
    #[serde(rename_all = "camelCase")]
    Explicit { ids: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMessage {
    pub source_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCheck {
    pub check_count: u32,
}

impl StatusCheck {
    pub fn next(&self) -> Self {
        Self {
            check_count: self.check_count + 1,
        }
    }
}

impl MigrationMessage {
    pub fn new(context: MigrationContext, payload: MigrationPayload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            context,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn divide(context: MigrationContext, filter: serde_json::Value) -> Self {
        Self::new(context, MigrationPayload::MigrateEntities(DivideMessage { filter }))
    }

    pub fn page(context: MigrationContext, filter: serde_json::Value, page: PageSpec) -> Self {
        Self::new(
            context,
            MigrationPayload::MigrateByPage(PageMessage { filter, page }),
        )
    }

    pub fn entity(context: MigrationContext, source_id: impl Into<String>) -> Self {
        Self::new(
            context,
            MigrationPayload::MigrateEntity(EntityMessage {
                source_id: source_id.into(),
            }),
        )
    }

    pub fn mapping_retry(context: MigrationContext, mapping: MigrationMapping) -> Self {
        Self::new(context, MigrationPayload::RetryMigrationMapping(mapping))
    }

    pub fn status_check(context: MigrationContext, check: StatusCheck) -> Self {
        Self::new(context, MigrationPayload::MigrationStatusCheck(check))
    }

    pub fn cancel_check(context: MigrationContext, check: StatusCheck) -> Self {
        Self::new(context, MigrationPayload::CancelMigration(check))
    }

    pub fn kind(&self) -> &'static str {
        match &self.payload {
            MigrationPayload::MigrateEntities(_) => "MIGRATE_ENTITIES",
            MigrationPayload::MigrateByPage(_) => "MIGRATE_BY_PAGE",
            MigrationPayload::MigrateEntity(_) => "MIGRATE_ENTITY",
            MigrationPayload::RetryMigrationMapping(_) => "RETRY_MIGRATION_MAPPING",
            MigrationPayload::MigrationStatusCheck(_) => "MIGRATION_STATUS_CHECK",
            MigrationPayload::CancelMigration(_) => "CANCEL_MIGRATION",
        }
    }

    pub fn encode(&self) -> MigrationResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| MigrationError::Serialization(format!("序列化消息失败: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> MigrationResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| MigrationError::Serialization(format!("反序列化消息失败: {e}")))
    }
}
