use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration_core::{
    models::{HistoryFilter, MigrationRun, MigrationStatus, MigrationType},
    traits::MigrationHistoryRepository,
    MigrationError, MigrationResult,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

use super::{CREATE_MIGRATION_HISTORY_INDEX, CREATE_MIGRATION_HISTORY_TABLE};

const SELECT_COLUMNS: &str = "SELECT run_id, migration_type, filter, estimated_count, status, \
     when_started, when_ended, records_migrated, records_failed FROM migration_history";

pub struct SqliteMigrationHistoryRepository {
    pool: SqlitePool,
}

impl SqliteMigrationHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 创建迁移历史表
    pub async fn migrate(&self) -> MigrationResult<()> {
        sqlx::query(CREATE_MIGRATION_HISTORY_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_MIGRATION_HISTORY_INDEX)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn row_to_run(row: &sqlx::sqlite::SqliteRow) -> MigrationResult<MigrationRun> {
        let migration_type: String = row.try_get("migration_type")?;
        let status: String = row.try_get("status")?;
        let filter: String = row.try_get("filter")?;

        Ok(MigrationRun {
            run_id: row.try_get("run_id")?,
            migration_type: migration_type.parse::<MigrationType>().map_err(|_| {
                MigrationError::database_error(format!("无法识别的迁移类型: {migration_type}"))
            })?,
            filter: MigrationRun::filter_from_json(&filter)?,
            estimated_count: row.try_get("estimated_count")?,
            status: status.parse::<MigrationStatus>()?,
            when_started: row.try_get::<DateTime<Utc>, _>("when_started")?,
            when_ended: row.try_get::<Option<DateTime<Utc>>, _>("when_ended")?,
            records_migrated: row.try_get("records_migrated")?,
            records_failed: row.try_get("records_failed")?,
        })
    }
}

#[async_trait]
impl MigrationHistoryRepository for SqliteMigrationHistoryRepository {
    #[instrument(skip(self, run), fields(
        run_id = %run.run_id,
        migration_type = %run.migration_type,
    ))]
    async fn save(&self, run: &MigrationRun) -> MigrationResult<()> {
        sqlx::query(
            r#"
            INSERT INTO migration_history (run_id, migration_type, filter, estimated_count, status,
                                           when_started, when_ended, records_migrated, records_failed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&run.run_id)
        .bind(run.migration_type.as_str())
        .bind(run.filter_json()?)
        .bind(run.estimated_count)
        .bind(run.status.as_str())
        .bind(run.when_started)
        .bind(run.when_ended)
        .bind(run.records_migrated)
        .bind(run.records_failed)
        .execute(&self.pool)
        .await?;

        debug!("保存迁移记录成功: {}", run.run_id);
        Ok(())
    }

    #[instrument(skip(self, run), fields(run_id = %run.run_id, status = %run.status))]
    async fn update(&self, run: &MigrationRun, expected: MigrationStatus) -> MigrationResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE migration_history
            SET migration_type = $2, filter = $3, estimated_count = $4, status = $5,
                when_started = $6, when_ended = $7, records_migrated = $8, records_failed = $9
            WHERE run_id = $1 AND status = $10
            "#,
        )
        .bind(&run.run_id)
        .bind(run.migration_type.as_str())
        .bind(run.filter_json()?)
        .bind(run.estimated_count)
        .bind(run.status.as_str())
        .bind(run.when_started)
        .bind(run.when_ended)
        .bind(run.records_migrated)
        .bind(run.records_failed)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.find_by_id(&run.run_id).await? {
                Some(current) => Err(MigrationError::InvalidStateTransition {
                    from: current.status,
                    to: run.status,
                }),
                None => Err(MigrationError::run_not_found(&run.run_id)),
            };
        }

        debug!("更新迁移记录成功: {}", run.run_id);
        Ok(())
    }

    async fn find_by_id(&self, run_id: &str) -> MigrationResult<Option<MigrationRun>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE run_id = $1"))
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_run).transpose()
    }

    async fn find_latest(
        &self,
        migration_type: MigrationType,
    ) -> MigrationResult<Option<MigrationRun>> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE migration_type = $1 ORDER BY when_started DESC, run_id DESC LIMIT 1"
        ))
        .bind(migration_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_run).transpose()
    }

    async fn find_all(&self, filter: &HistoryFilter) -> MigrationResult<Vec<MigrationRun>> {
        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        builder.push(" WHERE 1 = 1");

        if !filter.migration_types.is_empty() {
            builder.push(" AND migration_type IN (");
            let mut separated = builder.separated(", ");
            for migration_type in &filter.migration_types {
                separated.push_bind(migration_type.as_str());
            }
            separated.push_unseparated(")");
        }
        if let Some(from) = filter.from_date_time {
            builder.push(" AND when_started >= ").push_bind(from);
        }
        if let Some(to) = filter.to_date_time {
            builder.push(" AND when_started <= ").push_bind(to);
        }
        if filter.include_only_failures {
            builder.push(" AND records_failed > 0");
        }
        builder.push(" ORDER BY when_started DESC, run_id DESC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_run).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    async fn repository() -> SqliteMigrationHistoryRepository {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repository = SqliteMigrationHistoryRepository::new(pool);
        repository.migrate().await.unwrap();
        repository
    }

    fn run(run_id: &str, migration_type: MigrationType, day: u32) -> MigrationRun {
        MigrationRun::started(
            run_id.to_string(),
            migration_type,
            json!({"prisonIds": ["MDI"]}),
            86,
            Utc.with_ymd_and_hms(2020, 3, day, 12, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_save_and_find_by_id() {
        let repository = repository().await;
        let saved = run("2020-03-24T12:00:00", MigrationType::Visits, 24);
        repository.save(&saved).await.unwrap();

        let found = repository
            .find_by_id("2020-03-24T12:00:00")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, saved);
        assert!(repository.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_rejects_duplicate_run_id() {
        let repository = repository().await;
        let saved = run("2020-03-24T12:00:00", MigrationType::Visits, 24);
        repository.save(&saved).await.unwrap();
        assert!(repository.save(&saved).await.is_err());
    }

    #[tokio::test]
    async fn test_update_overwrites_record() {
        let repository = repository().await;
        let mut saved = run("2020-03-24T12:00:00", MigrationType::Visits, 24);
        repository.save(&saved).await.unwrap();

        let ended = Utc.with_ymd_and_hms(2020, 3, 24, 13, 0, 0).unwrap();
        saved.transition(MigrationStatus::Completed, ended).unwrap();
        saved.record_counts(85, 1);
        repository
            .update(&saved, MigrationStatus::Started)
            .await
            .unwrap();

        let found = repository
            .find_by_id(&saved.run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.status, MigrationStatus::Completed);
        assert_eq!(found.when_ended, Some(ended));
        assert_eq!(found.records_migrated, 85);
        assert_eq!(found.records_failed, 1);

        let missing = run("2020-03-25T12:00:00", MigrationType::Visits, 25);
        assert!(matches!(
            repository.update(&missing, MigrationStatus::Started).await,
            Err(MigrationError::RunNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_update_cannot_reopen_completed_run() {
        let repository = repository().await;
        let saved = run("2020-03-24T12:00:00", MigrationType::Visits, 24);
        repository.save(&saved).await.unwrap();

        let mut stale = repository
            .find_by_id(&saved.run_id)
            .await
            .unwrap()
            .unwrap();
        let mut fresh = stale.clone();

        let ended = Utc.with_ymd_and_hms(2020, 3, 24, 13, 0, 0).unwrap();
        fresh.transition(MigrationStatus::Completed, ended).unwrap();
        repository
            .update(&fresh, MigrationStatus::Started)
            .await
            .unwrap();

        stale
            .transition(MigrationStatus::CancelledRequested, ended)
            .unwrap();
        let result = repository.update(&stale, MigrationStatus::Started).await;
        assert!(matches!(
            result,
            Err(MigrationError::InvalidStateTransition {
                from: MigrationStatus::Completed,
                to: MigrationStatus::CancelledRequested,
            })
        ));

        let found = repository
            .find_by_id(&saved.run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.status, MigrationStatus::Completed);
        assert_eq!(found.when_ended, Some(ended));
    }

    #[tokio::test]
    async fn test_find_latest_per_type() {
        let repository = repository().await;
        repository
            .save(&run("2020-03-20T12:00:00", MigrationType::Visits, 20))
            .await
            .unwrap();
        repository
            .save(&run("2020-03-22T12:00:00", MigrationType::Visits, 22))
            .await
            .unwrap();
        repository
            .save(&run("2020-03-23T12:00:00", MigrationType::Alerts, 23))
            .await
            .unwrap();

        let latest = repository
            .find_latest(MigrationType::Visits)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.run_id, "2020-03-22T12:00:00");
        assert!(repository
            .find_latest(MigrationType::Incidents)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_find_all_applies_filter_newest_first() {
        let repository = repository().await;
        let mut failed = run("2020-03-21T12:00:00", MigrationType::Visits, 21);
        failed.record_counts(10, 2);
        repository.save(&failed).await.unwrap();
        repository
            .save(&run("2020-03-22T12:00:00", MigrationType::Alerts, 22))
            .await
            .unwrap();
        repository
            .save(&run("2020-03-23T12:00:00", MigrationType::Visits, 23))
            .await
            .unwrap();

        let all = repository
            .find_all(&HistoryFilter::default())
            .await
            .unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "2020-03-23T12:00:00",
                "2020-03-22T12:00:00",
                "2020-03-21T12:00:00"
            ]
        );

        let visits = repository
            .find_all(&HistoryFilter {
                migration_types: vec![MigrationType::Visits],
                from_date_time: Some(Utc.with_ymd_and_hms(2020, 3, 22, 0, 0, 0).unwrap()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].run_id, "2020-03-23T12:00:00");

        let failures = repository
            .find_all(&HistoryFilter {
                include_only_failures: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].run_id, "2020-03-21T12:00:00");
    }
}
