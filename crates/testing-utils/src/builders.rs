//! Test data builders

use chrono::{DateTime, TimeZone, Utc};
use migration_core::models::{
    MigrationContext, MigrationMapping, MigrationRun, MigrationStatus, MigrationType,
};
use serde_json::{json, Value};

pub const TEST_RUN_ID: &str = "2020-03-24T12:00:00";

/// Builder for creating test MigrationRun records
pub struct MigrationRunBuilder {
    run: MigrationRun,
}

impl MigrationRunBuilder {
    pub fn new() -> Self {
        Self {
            run: MigrationRun::started(
                TEST_RUN_ID.to_string(),
                MigrationType::Visits,
                json!({}),
                0,
                Utc.with_ymd_and_hms(2020, 3, 24, 12, 0, 0).unwrap(),
            ),
        }
    }

    pub fn with_run_id(mut self, run_id: &str) -> Self {
        self.run.run_id = run_id.to_string();
        self
    }

    pub fn with_migration_type(mut self, migration_type: MigrationType) -> Self {
        self.run.migration_type = migration_type;
        self
    }

    pub fn with_filter(mut self, filter: Value) -> Self {
        self.run.filter = filter;
        self
    }

    pub fn with_estimated_count(mut self, estimated_count: i64) -> Self {
        self.run.estimated_count = estimated_count;
        self
    }

    pub fn with_status(mut self, status: MigrationStatus) -> Self {
        self.run.status = status;
        if status.is_terminal() && self.run.when_ended.is_none() {
            self.run.when_ended = Some(self.run.when_started);
        }
        self
    }

    pub fn with_when_started(mut self, when_started: DateTime<Utc>) -> Self {
        self.run.when_started = when_started;
        self
    }

    pub fn with_counts(mut self, records_migrated: i64, records_failed: i64) -> Self {
        self.run.record_counts(records_migrated, records_failed);
        self
    }

    pub fn build(self) -> MigrationRun {
        self.run
    }
}

impl Default for MigrationRunBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn test_context(migration_type: MigrationType) -> MigrationContext {
    MigrationContext {
        run_id: TEST_RUN_ID.to_string(),
        migration_type,
        estimated_count: 0,
    }
}

pub fn test_mapping(source_id: &str, target_id: &str) -> MigrationMapping {
    MigrationMapping::migrated(source_id, target_id, TEST_RUN_ID)
}
