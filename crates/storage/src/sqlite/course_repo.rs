use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use learn_core::model::{BlockId, CourseId, Insight, SessionId, UserCourseProgress};
use sqlx::{Row, SqliteConnection};

use super::mapping::{map_course_row, map_insight_row, ser};
use super::{SqliteRepository, conn};
use crate::repository::{CourseProgressRepository, NewInsightRecord, StorageError};

/// Create the course progress row if it does not exist yet.
pub(super) async fn ensure_course_row(
    db: &mut SqliteConnection,
    course_id: &CourseId,
    at: DateTime<Utc>,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
        INSERT INTO course_progress (course_id, total_insights, progress_percentage, last_active_at)
        VALUES (?1, 0, 0.0, ?2)
        ON CONFLICT(course_id) DO NOTHING
        ",
    )
    .bind(course_id.as_str())
    .bind(at)
    .execute(&mut *db)
    .await
    .map_err(conn)?;
    Ok(())
}

async fn completed_blocks(
    db: &mut SqliteConnection,
    course_id: &CourseId,
) -> Result<BTreeSet<BlockId>, StorageError> {
    let rows = sqlx::query("SELECT block_id FROM completed_blocks WHERE course_id = ?1")
        .bind(course_id.as_str())
        .fetch_all(&mut *db)
        .await
        .map_err(conn)?;

    let mut out = BTreeSet::new();
    for row in rows {
        out.insert(BlockId::new(row.try_get::<String, _>("block_id").map_err(ser)?).map_err(ser)?);
    }
    Ok(out)
}

pub(super) async fn load_course_progress(
    db: &mut SqliteConnection,
    course_id: &CourseId,
) -> Result<Option<UserCourseProgress>, StorageError> {
    let row = sqlx::query(
        r"
        SELECT course_id, total_insights, progress_percentage, last_active_at
        FROM course_progress WHERE course_id = ?1
        ",
    )
    .bind(course_id.as_str())
    .fetch_optional(&mut *db)
    .await
    .map_err(conn)?;

    match row {
        Some(row) => {
            let blocks = completed_blocks(db, course_id).await?;
            map_course_row(&row, blocks).map(Some)
        }
        None => Ok(None),
    }
}

#[async_trait::async_trait]
impl CourseProgressRepository for SqliteRepository {
    async fn get_course_progress(
        &self,
        course_id: &CourseId,
    ) -> Result<Option<UserCourseProgress>, StorageError> {
        let mut db = self.pool.acquire().await.map_err(conn)?;
        load_course_progress(&mut *db, course_id).await
    }

    async fn get_completed_blocks(
        &self,
        course_id: &CourseId,
    ) -> Result<BTreeSet<BlockId>, StorageError> {
        let mut db = self.pool.acquire().await.map_err(conn)?;
        completed_blocks(&mut *db, course_id).await
    }

    async fn append_completed_block(
        &self,
        course_id: &CourseId,
        block_id: &BlockId,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;
        ensure_course_row(&mut *tx, course_id, at).await?;

        let res = sqlx::query(
            r"
            INSERT INTO completed_blocks (course_id, block_id, completed_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(course_id, block_id) DO NOTHING
            ",
        )
        .bind(course_id.as_str())
        .bind(block_id.as_str())
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query("UPDATE course_progress SET last_active_at = ?1 WHERE course_id = ?2")
            .bind(at)
            .bind(course_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        tx.commit().await.map_err(conn)?;
        Ok(res.rows_affected() == 1)
    }

    async fn append_insight(
        &self,
        insight: &NewInsightRecord<'_>,
    ) -> Result<Insight, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let row = sqlx::query(
            r"
            INSERT INTO insights (session_id, course_id, block_id, text, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING id, session_id, course_id, block_id, text, created_at
            ",
        )
        .bind(insight.session_id.as_str())
        .bind(insight.course_id.as_str())
        .bind(insight.block_id.as_str())
        .bind(insight.text.as_str())
        .bind(insight.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(conn)?;
        let stored = map_insight_row(&row)?;

        sqlx::query(
            r"
            INSERT INTO course_progress (course_id, total_insights, progress_percentage, last_active_at)
            VALUES (?1, 1, 0.0, ?2)
            ON CONFLICT(course_id) DO UPDATE SET
                total_insights = course_progress.total_insights + 1,
                last_active_at = excluded.last_active_at
            ",
        )
        .bind(insight.course_id.as_str())
        .bind(insight.created_at)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)?;
        Ok(stored)
    }

    async fn list_insights(&self, session_id: &SessionId) -> Result<Vec<Insight>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, session_id, course_id, block_id, text, created_at
            FROM insights
            WHERE session_id = ?1
            ORDER BY id ASC
            ",
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(map_insight_row(&row)?);
        }
        Ok(out)
    }
}
