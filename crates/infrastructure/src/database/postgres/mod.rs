pub mod postgres_history_repository;

pub use postgres_history_repository::PostgresMigrationHistoryRepository;

/// 迁移历史表结构
pub const CREATE_MIGRATION_HISTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS migration_history (
    run_id VARCHAR(32) PRIMARY KEY,
    migration_type VARCHAR(64) NOT NULL,
    filter TEXT NOT NULL,
    estimated_count BIGINT NOT NULL DEFAULT 0,
    status VARCHAR(32) NOT NULL,
    when_started TIMESTAMPTZ NOT NULL,
    when_ended TIMESTAMPTZ,
    records_migrated BIGINT NOT NULL DEFAULT 0,
    records_failed BIGINT NOT NULL DEFAULT 0
)
"#;

pub const CREATE_MIGRATION_HISTORY_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_migration_history_type_started
    ON migration_history (migration_type, when_started)
"#;
