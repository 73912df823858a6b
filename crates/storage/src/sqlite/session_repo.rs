use learn_core::model::{CourseId, LearningSession, SessionId, UserCourseProgress};
use sqlx::{Sqlite, Transaction};

use super::course_repo::{ensure_course_row, load_course_progress};
use super::mapping::{map_session_row, u64_to_i64};
use super::{SqliteRepository, conn};
use crate::repository::{SessionRepository, SessionTransition, StorageError};

const SESSION_COLUMNS: &str = "id, course_id, current_block_id, current_question_index, \
     progress, started_at, completed_at, version";

// Writes the session pointer guarded by its version. Zero affected rows means
// either another writer got there first or the row is gone.
async fn write_pointer(
    tx: &mut Transaction<'_, Sqlite>,
    session: &LearningSession,
    expected_version: u64,
) -> Result<(), StorageError> {
    let res = sqlx::query(
        r"
        UPDATE learning_sessions SET
            current_block_id = ?1,
            current_question_index = ?2,
            progress = ?3,
            completed_at = ?4,
            version = ?5
        WHERE id = ?6 AND version = ?7
        ",
    )
    .bind(session.current_block_id().as_str())
    .bind(i64::from(session.current_question_index()))
    .bind(session.progress())
    .bind(session.completed_at())
    .bind(u64_to_i64("version", session.version())?)
    .bind(session.id().as_str())
    .bind(u64_to_i64("version", expected_version)?)
    .execute(&mut **tx)
    .await
    .map_err(conn)?;

    if res.rows_affected() == 1 {
        return Ok(());
    }

    let exists = sqlx::query("SELECT 1 FROM learning_sessions WHERE id = ?1")
        .bind(session.id().as_str())
        .fetch_optional(&mut **tx)
        .await
        .map_err(conn)?;
    if exists.is_some() {
        tracing::debug!(session_id = %session.id(), expected_version, "stale session version");
        Err(StorageError::Conflict)
    } else {
        Err(StorageError::NotFound)
    }
}

#[async_trait::async_trait]
impl SessionRepository for SqliteRepository {
    async fn insert_session(&self, session: &LearningSession) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let sql = format!(
            "INSERT INTO learning_sessions ({SESSION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        );
        sqlx::query(&sql)
            .bind(session.id().as_str())
            .bind(session.course_id().as_str())
            .bind(session.current_block_id().as_str())
            .bind(i64::from(session.current_question_index()))
            .bind(session.progress())
            .bind(session.started_at())
            .bind(session.completed_at())
            .bind(u64_to_i64("version", session.version())?)
            .execute(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict,
                other => conn(other),
            })?;

        ensure_course_row(&mut *tx, session.course_id(), session.started_at()).await?;

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<LearningSession>, StorageError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM learning_sessions WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.as_ref().map(map_session_row).transpose()
    }

    async fn latest_active_session(
        &self,
        course_id: &CourseId,
    ) -> Result<Option<LearningSession>, StorageError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM learning_sessions
             WHERE course_id = ?1 AND completed_at IS NULL
             ORDER BY started_at DESC, id DESC
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(course_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.as_ref().map(map_session_row).transpose()
    }

    async fn update_session_pointer(
        &self,
        session: &LearningSession,
        expected_version: u64,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;
        write_pointer(&mut tx, session, expected_version).await?;
        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn commit_transition(
        &self,
        transition: &SessionTransition<'_>,
    ) -> Result<UserCourseProgress, StorageError> {
        let session = transition.session;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        // Dropping `tx` on any early return rolls the whole transition back.
        write_pointer(&mut tx, session, transition.expected_version).await?;

        sqlx::query(
            r"
            INSERT INTO course_progress (course_id, total_insights, progress_percentage, last_active_at)
            VALUES (?1, 0, ?2, ?3)
            ON CONFLICT(course_id) DO UPDATE SET
                progress_percentage = MAX(course_progress.progress_percentage, excluded.progress_percentage),
                last_active_at = excluded.last_active_at
            ",
        )
        .bind(session.course_id().as_str())
        .bind(transition.progress.clamp(0.0, 100.0))
        .bind(transition.at)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO completed_blocks (course_id, block_id, completed_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(course_id, block_id) DO NOTHING
            ",
        )
        .bind(session.course_id().as_str())
        .bind(transition.completed_block.as_str())
        .bind(transition.at)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        let course = load_course_progress(&mut *tx, session.course_id())
            .await?
            .ok_or(StorageError::NotFound)?;

        tx.commit().await.map_err(conn)?;
        Ok(course)
    }
}
