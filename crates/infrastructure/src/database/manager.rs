use std::sync::Arc;
use std::time::Duration;

use migration_core::{
    config::DatabaseConfig, traits::MigrationHistoryRepository, MigrationError, MigrationResult,
};
use tracing::info;

use super::postgres::{self, PostgresMigrationHistoryRepository};
use super::sqlite::{self, SqliteMigrationHistoryRepository};

/// 根据连接串判断数据库类型
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseType {
    PostgreSQL,
    SQLite,
}

impl DatabaseType {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            DatabaseType::PostgreSQL
        } else {
            DatabaseType::SQLite
        }
    }
}

pub enum DatabasePool {
    PostgreSQL(sqlx::PgPool),
    SQLite(sqlx::SqlitePool),
}

impl DatabasePool {
    pub async fn new(config: &DatabaseConfig) -> MigrationResult<Self> {
        let acquire_timeout = Duration::from_secs(config.connection_timeout_seconds);
        let idle_timeout = Duration::from_secs(config.idle_timeout_seconds);

        match DatabaseType::from_url(&config.url) {
            DatabaseType::PostgreSQL => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(config.max_connections)
                    .min_connections(config.min_connections)
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .connect(&config.url)
                    .await
                    .map_err(MigrationError::Database)?;
                Ok(DatabasePool::PostgreSQL(pool))
            }
            DatabaseType::SQLite => {
                // 内存库每个连接都是独立的数据库
                let max_connections = if config.url.contains(":memory:") {
                    1
                } else {
                    config.max_connections
                };
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(max_connections)
                    .min_connections(config.min_connections.min(max_connections))
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect(&config.url)
                    .await
                    .map_err(MigrationError::Database)?;
                Ok(DatabasePool::SQLite(pool))
            }
        }
    }

    pub fn database_type(&self) -> DatabaseType {
        match self {
            DatabasePool::PostgreSQL(_) => DatabaseType::PostgreSQL,
            DatabasePool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    pub async fn health_check(&self) -> MigrationResult<()> {
        match self {
            DatabasePool::PostgreSQL(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
            DatabasePool::SQLite(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        match self {
            DatabasePool::PostgreSQL(pool) => pool.close().await,
            DatabasePool::SQLite(pool) => pool.close().await,
        }
    }
}

/// 数据库管理器，负责连接池、建表与仓库创建
pub struct DatabaseManager {
    pool: DatabasePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> MigrationResult<Self> {
        let pool = DatabasePool::new(config).await?;
        info!("数据库连接成功: {:?}", pool.database_type());
        Ok(Self { pool })
    }

    pub fn database_type(&self) -> DatabaseType {
        self.pool.database_type()
    }

    /// 创建迁移历史表
    pub async fn migrate(&self) -> MigrationResult<()> {
        let (table, index) = match self.pool.database_type() {
            DatabaseType::PostgreSQL => (
                postgres::CREATE_MIGRATION_HISTORY_TABLE,
                postgres::CREATE_MIGRATION_HISTORY_INDEX,
            ),
            DatabaseType::SQLite => (
                sqlite::CREATE_MIGRATION_HISTORY_TABLE,
                sqlite::CREATE_MIGRATION_HISTORY_INDEX,
            ),
        };
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                sqlx::query(table).execute(pool).await?;
                sqlx::query(index).execute(pool).await?;
            }
            DatabasePool::SQLite(pool) => {
                sqlx::query(table).execute(pool).await?;
                sqlx::query(index).execute(pool).await?;
            }
        }
        info!("迁移历史表已就绪");
        Ok(())
    }

    pub async fn health_check(&self) -> MigrationResult<()> {
        self.pool.health_check().await
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    pub fn history_repository(&self) -> Arc<dyn MigrationHistoryRepository> {
        match &self.pool {
            DatabasePool::PostgreSQL(pool) => {
                Arc::new(PostgresMigrationHistoryRepository::new(pool.clone()))
            }
            DatabasePool::SQLite(pool) => {
                Arc::new(SqliteMigrationHistoryRepository::new(pool.clone()))
            }
        }
    }
}
