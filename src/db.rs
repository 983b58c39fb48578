use chrono::NaiveDate;
use sqlx::{PgPool, Row};

use crate::models::{Group, StudentInteractionRecord, StudentTable};
use crate::store::{StoreError, StudentStore};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Student progress kept in `tutor_study.student_progress`, one row per
/// student.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl StudentStore for PgStore {
    async fn load(&self) -> Result<StudentTable, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT student_id, study_group, pre_test_completed, interaction_dates,
                   final_test_enabled, final_test_completed, admin_override
            FROM tutor_study.student_progress
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut table = StudentTable::new();
        for row in rows {
            let student_id: String = row.try_get("student_id")?;
            let group: String = row.try_get("study_group")?;
            let group: Group = group
                .parse()
                .map_err(|err: String| StoreError::Corrupt(format!("{student_id}: {err}")))?;
            let dates: Vec<NaiveDate> = row.try_get("interaction_dates")?;

            let mut record = StudentInteractionRecord::new(student_id, group);
            record.interaction_dates = dates.into_iter().collect();
            record.pre_test_completed = row.try_get("pre_test_completed")?;
            record.final_gate_enabled = row.try_get("final_test_enabled")?;
            record.final_test_completed = row.try_get("final_test_completed")?;
            record.admin_override = row.try_get("admin_override")?;
            table.insert(record);
        }

        tracing::debug!(students = table.len(), "loaded progress from postgres");
        Ok(table)
    }

    async fn save(&self, table: &StudentTable) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM tutor_study.student_progress")
            .execute(&mut *tx)
            .await?;

        for record in table.records() {
            let dates: Vec<NaiveDate> = record.interaction_dates.iter().copied().collect();
            let days = i32::try_from(record.days_interacted())
                .map_err(|_| StoreError::Corrupt(format!("{}: too many days", record.student_id)))?;

            sqlx::query(
                r#"
                INSERT INTO tutor_study.student_progress
                (student_id, study_group, pre_test_completed, interaction_dates, days_interacted,
                 final_test_enabled, final_test_completed, admin_override, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
                "#,
            )
            .bind(&record.student_id)
            .bind(record.group.as_str())
            .bind(record.pre_test_completed)
            .bind(dates)
            .bind(days)
            .bind(record.final_gate_enabled)
            .bind(record.final_test_completed)
            .bind(record.admin_override)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(students = table.len(), "saved progress to postgres");
        Ok(())
    }
}
