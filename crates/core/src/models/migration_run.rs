use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MigrationType;
use crate::errors::{MigrationError, MigrationResult};

/// run_id 格式: 本地时间截断到秒，始终包含秒
pub const RUN_ID_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// 根据本地时间生成迁移标识，同时作为映射记录的 label
pub fn generate_run_id(now: NaiveDateTime) -> String {
    now.format(RUN_ID_FORMAT).to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MigrationStatus {
    #[serde(rename = "STARTED")]
    Started,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "CANCELLED_REQUESTED")]
    CancelledRequested,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Started => "STARTED",
            MigrationStatus::Completed => "COMPLETED",
            MigrationStatus::CancelledRequested => "CANCELLED_REQUESTED",
            MigrationStatus::Cancelled => "CANCELLED",
        }
    }

    /// 仍有消息可能在队列中流转
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            MigrationStatus::Started | MigrationStatus::CancelledRequested
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationStatus::Completed | MigrationStatus::Cancelled)
    }

    /// 只允许单向前进的状态转换
    pub fn can_transition_to(&self, next: MigrationStatus) -> bool {
        use MigrationStatus::*;
        matches!(
            (self, next),
            (Started, Completed) | (Started, CancelledRequested) | (CancelledRequested, Cancelled)
        )
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationStatus {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(MigrationStatus::Started),
            "COMPLETED" => Ok(MigrationStatus::Completed),
            "CANCELLED_REQUESTED" => Ok(MigrationStatus::CancelledRequested),
            "CANCELLED" => Ok(MigrationStatus::Cancelled),
            _ => Err(MigrationError::Serialization(format!(
                "Invalid migration status: {s}"
            ))),
        }
    }
}

/// 迁移历史记录，每次迁移执行对应一条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRun {
    pub run_id: String,
    pub migration_type: MigrationType,
    pub filter: serde_json::Value,
    pub estimated_count: i64,
    pub status: MigrationStatus,
    pub when_started: DateTime<Utc>,
    pub when_ended: Option<DateTime<Utc>>,
    pub records_migrated: i64,
    pub records_failed: i64,
}

impl MigrationRun {
    pub fn started(
        run_id: String,
        migration_type: MigrationType,
        filter: serde_json::Value,
        estimated_count: i64,
        when_started: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            migration_type,
            filter,
            estimated_count,
            status: MigrationStatus::Started,
            when_started,
            when_ended: None,
            records_migrated: 0,
            records_failed: 0,
        }
    }

    /// 执行一次状态转换，终态转换时写入 when_ended
    pub fn transition(&mut self, next: MigrationStatus, now: DateTime<Utc>) -> MigrationResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(MigrationError::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() && self.when_ended.is_none() {
            self.when_ended = Some(now);
        }
        Ok(())
    }

    pub fn record_counts(&mut self, records_migrated: i64, records_failed: i64) {
        self.records_migrated = records_migrated;
        self.records_failed = records_failed;
    }

    pub fn context(&self) -> MigrationContext {
        MigrationContext {
            run_id: self.run_id.clone(),
            migration_type: self.migration_type,
            estimated_count: self.estimated_count,
        }
    }

    pub fn filter_json(&self) -> MigrationResult<String> {
        Ok(serde_json::to_string(&self.filter)?)
    }

    pub fn filter_from_json(json: &str) -> MigrationResult<serde_json::Value> {
        Ok(serde_json::from_str(json)?)
    }
}

/// 随每条消息携带的迁移上下文
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationContext {
    pub run_id: String,
    pub migration_type: MigrationType,
    pub estimated_count: i64,
}

/// 历史记录查询条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFilter {
    #[serde(default)]
    pub migration_types: Vec<MigrationType>,
    pub from_date_time: Option<DateTime<Utc>>,
    pub to_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub include_only_failures: bool,
}

impl HistoryFilter {
    pub fn matches(&self, run: &MigrationRun) -> bool {
        if !self.migration_types.is_empty() && !self.migration_types.contains(&run.migration_type)
        {
            return false;
        }
        if let Some(from) = self.from_date_time {
            if run.when_started < from {
                return false;
            }
        }
        if let Some(to) = self.to_date_time {
            if run.when_started > to {
                return false;
            }
        }
        !self.include_only_failures || run.records_failed > 0
    }
}

/// 进行中迁移的实时进度
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationProgress {
    pub run: MigrationRun,
    pub records_migrated: i64,
    pub to_be_processed_count: u64,
    pub being_processed_count: u64,
    pub records_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_run() -> MigrationRun {
        MigrationRun::started(
            "2020-03-24T12:00:00".to_string(),
            MigrationType::Visits,
            serde_json::json!({"prisonIds": ["MDI"], "fromDate": "2020-01-01"}),
            86,
            Utc::now(),
        )
    }

    #[test]
    fn test_generate_run_id_keeps_zero_seconds() {
        let now = NaiveDate::from_ymd_opt(2020, 3, 24)
            .unwrap()
            .and_hms_milli_opt(12, 0, 0, 789)
            .unwrap();
        assert_eq!(generate_run_id(now), "2020-03-24T12:00:00");
    }

    #[test]
    fn test_forward_transitions_only() {
        let mut run = sample_run();
        let now = Utc::now();
        run.transition(MigrationStatus::CancelledRequested, now).unwrap();
        assert!(run.when_ended.is_none());
        assert!(run.transition(MigrationStatus::Completed, now).is_err());
        assert!(run.transition(MigrationStatus::Started, now).is_err());
        run.transition(MigrationStatus::Cancelled, now).unwrap();
        assert_eq!(run.when_ended, Some(now));
        assert!(run.transition(MigrationStatus::Cancelled, now).is_err());
    }

    #[test]
    fn test_when_ended_set_once() {
        let mut run = sample_run();
        let ended = Utc::now();
        run.transition(MigrationStatus::Completed, ended).unwrap();
        assert_eq!(run.when_ended, Some(ended));
        assert!(run.status.is_terminal());
        assert!(!run.status.is_active());
    }

    #[test]
    fn test_filter_json_round_trip() {
        let run = sample_run();
        let json = run.filter_json().unwrap();
        assert_eq!(MigrationRun::filter_from_json(&json).unwrap(), run.filter);
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            MigrationStatus::Started,
            MigrationStatus::Completed,
            MigrationStatus::CancelledRequested,
            MigrationStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<MigrationStatus>().unwrap(), status);
        }
        assert!("RUNNING".parse::<MigrationStatus>().is_err());
    }

    #[test]
    fn test_history_filter_matches() {
        let mut run = sample_run();
        let filter = HistoryFilter {
            migration_types: vec![MigrationType::Appointments],
            ..Default::default()
        };
        assert!(!filter.matches(&run));

        let failures_only = HistoryFilter {
            include_only_failures: true,
            ..Default::default()
        };
        assert!(!failures_only.matches(&run));
        run.record_counts(85, 1);
        assert!(failures_only.matches(&run));
    }
}
