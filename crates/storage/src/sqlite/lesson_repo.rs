use chrono::{DateTime, Utc};
use learn_core::model::{LessonKey, LessonProgress, LessonUpdate, ModuleId, UserId};

use super::mapping::{map_lesson_row, u64_to_i64};
use super::{SqliteRepository, conn};
use crate::repository::{LessonProgressRepository, LessonWrite, StorageError};

const LESSON_COLUMNS: &str = "user_id, module_id, lesson_id, status, time_spent_secs, \
     completed_at, attempts, updated_at";

#[async_trait::async_trait]
impl LessonProgressRepository for SqliteRepository {
    async fn get_lesson_progress(
        &self,
        key: &LessonKey,
    ) -> Result<Option<LessonProgress>, StorageError> {
        let sql = format!(
            "SELECT {LESSON_COLUMNS} FROM lesson_progress
             WHERE user_id = ?1 AND module_id = ?2 AND lesson_id = ?3"
        );
        let row = sqlx::query(&sql)
            .bind(key.user_id.as_str())
            .bind(key.module_id.as_str())
            .bind(key.lesson_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.as_ref().map(map_lesson_row).transpose()
    }

    async fn lessons_for_module(
        &self,
        user_id: &UserId,
        module_id: &ModuleId,
    ) -> Result<Vec<LessonProgress>, StorageError> {
        let sql = format!(
            "SELECT {LESSON_COLUMNS} FROM lesson_progress
             WHERE user_id = ?1 AND module_id = ?2
             ORDER BY lesson_id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_str())
            .bind(module_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_lesson_row(&row)?);
        }
        Ok(out)
    }

    async fn upsert_lesson_progress(
        &self,
        key: &LessonKey,
        update: &LessonUpdate,
        now: DateTime<Utc>,
    ) -> Result<LessonWrite, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        // The ledger insert comes first so it takes the write lock; a replayed
        // id leaves the lesson row untouched.
        if let Some(request_id) = update.request_id() {
            let recorded = sqlx::query(
                "INSERT INTO lesson_progress_requests
                     (user_id, module_id, lesson_id, request_id, applied_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(user_id, module_id, lesson_id, request_id) DO NOTHING",
            )
            .bind(key.user_id.as_str())
            .bind(key.module_id.as_str())
            .bind(key.lesson_id.as_str())
            .bind(request_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

            if recorded.rows_affected() == 0 {
                tracing::debug!(
                    lesson_id = %key.lesson_id,
                    request_id,
                    "duplicate lesson update skipped"
                );
                let sql = format!(
                    "SELECT {LESSON_COLUMNS} FROM lesson_progress
                     WHERE user_id = ?1 AND module_id = ?2 AND lesson_id = ?3"
                );
                let row = sqlx::query(&sql)
                    .bind(key.user_id.as_str())
                    .bind(key.module_id.as_str())
                    .bind(key.lesson_id.as_str())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(conn)?
                    .ok_or(StorageError::NotFound)?;
                let progress = map_lesson_row(&row)?;
                tx.commit().await.map_err(conn)?;
                return Ok(LessonWrite {
                    progress,
                    applied: false,
                });
            }
        }

        // Accumulation happens inside SQLite so concurrent writers never lose
        // each other's time.
        let sql = format!(
            "INSERT INTO lesson_progress ({LESSON_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)
             ON CONFLICT(user_id, module_id, lesson_id) DO UPDATE SET
                 status = excluded.status,
                 time_spent_secs = lesson_progress.time_spent_secs + excluded.time_spent_secs,
                 completed_at = excluded.completed_at,
                 attempts = lesson_progress.attempts + 1,
                 updated_at = excluded.updated_at
             RETURNING {LESSON_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(key.user_id.as_str())
            .bind(key.module_id.as_str())
            .bind(key.lesson_id.as_str())
            .bind(update.status().as_str())
            .bind(u64_to_i64("time_spent_secs", update.time_spent_secs())?)
            .bind(update.resolved_completed_at(now))
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(conn)?;
        let progress = map_lesson_row(&row)?;

        tx.commit().await.map_err(conn)?;
        Ok(LessonWrite {
            progress,
            applied: true,
        })
    }
}
