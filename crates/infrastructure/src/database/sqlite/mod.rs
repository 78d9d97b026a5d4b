pub mod sqlite_history_repository;

pub use sqlite_history_repository::SqliteMigrationHistoryRepository;

/// 迁移历史表结构
pub const CREATE_MIGRATION_HISTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS migration_history (
    run_id TEXT PRIMARY KEY,
    migration_type TEXT NOT NULL,
    filter TEXT NOT NULL,
    estimated_count INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    when_started TEXT NOT NULL,
    when_ended TEXT,
    records_migrated INTEGER NOT NULL DEFAULT 0,
    records_failed INTEGER NOT NULL DEFAULT 0
)
"#;

pub const CREATE_MIGRATION_HISTORY_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_migration_history_type_started
    ON migration_history (migration_type, when_started)
"#;
