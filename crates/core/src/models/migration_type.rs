use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::MigrationError;

/// 迁移类型，每种类型对应一个业务域及其专属队列
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationType {
    Activities,
    Alerts,
    Allocations,
    Appointments,
    CourtSentencing,
    Incidents,
    SentencingAdjustments,
    Visits,
}

impl MigrationType {
    pub const ALL: [MigrationType; 8] = [
        MigrationType::Activities,
        MigrationType::Alerts,
        MigrationType::Allocations,
        MigrationType::Appointments,
        MigrationType::CourtSentencing,
        MigrationType::Incidents,
        MigrationType::SentencingAdjustments,
        MigrationType::Visits,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationType::Activities => "ACTIVITIES",
            MigrationType::Alerts => "ALERTS",
            MigrationType::Allocations => "ALLOCATIONS",
            MigrationType::Appointments => "APPOINTMENTS",
            MigrationType::CourtSentencing => "COURT_SENTENCING",
            MigrationType::Incidents => "INCIDENTS",
            MigrationType::SentencingAdjustments => "SENTENCING_ADJUSTMENTS",
            MigrationType::Visits => "VISITS",
        }
    }

    /// 队列名及遥测事件前缀使用的 kebab-case 形式
    pub fn slug(&self) -> String {
        self.as_str().to_lowercase().replace('_', "-")
    }

    /// 遥测事件名: `<slug>-migration-<suffix>`
    pub fn telemetry_event(&self, suffix: &str) -> String {
        format!("{}-migration-{}", self.slug(), suffix)
    }
}

impl fmt::Display for MigrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationType {
    type Err = MigrationError;

    /// 接受 `VISITS`、`visits`、`court-sentencing` 等写法
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('-', "_");
        MigrationType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| MigrationError::ValidationError(format!("未知的迁移类型: {s}")))
    }
}
