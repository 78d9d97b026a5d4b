use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingType {
    /// 由迁移创建
    Migrated,
    /// 由目标系统发起的实时同步创建
    TargetCreated,
    /// 由源系统发起的实时同步创建
    SourceCreated,
}

/// 源记录与目标记录的对应关系
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationMapping {
    pub source_id: String,
    pub target_id: String,
    pub label: Option<String>,
    pub mapping_type: MappingType,
}

impl MigrationMapping {
    pub fn migrated(source_id: &str, target_id: &str, run_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            label: Some(run_id.to_string()),
            mapping_type: MappingType::Migrated,
        }
    }
}

/// 映射服务报告的重复冲突，同一个 source_id 已对应到另一个 target_id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateMapping {
    pub existing: MigrationMapping,
    pub duplicate: MigrationMapping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateMappingResult {
    Created,
    Duplicate(DuplicateMapping),
}

/// 目标系统创建结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created { target_id: String },
    /// 目标系统有意忽略该记录，不属于错误
    Ignored { reason: String },
}

/// 源系统的一页 ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdPage {
    pub ids: Vec<String>,
    pub total: i64,
}
