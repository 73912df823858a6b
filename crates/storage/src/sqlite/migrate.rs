use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs the versioned schema migrations.
///
/// Version 1 creates lesson progress with its applied-request ledger, the
/// catalog, sessions, course progress and insights.
#[allow(clippy::too_many_lines)]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: full schema.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS lesson_progress (
                    user_id TEXT NOT NULL,
                    module_id TEXT NOT NULL,
                    lesson_id TEXT NOT NULL,
                    status TEXT NOT NULL
                        CHECK (status IN ('not_started', 'in_progress', 'completed')),
                    time_spent_secs INTEGER NOT NULL CHECK (time_spent_secs >= 0),
                    completed_at TEXT,
                    attempts INTEGER NOT NULL CHECK (attempts >= 0),
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, module_id, lesson_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS lesson_progress_requests (
                    user_id TEXT NOT NULL,
                    module_id TEXT NOT NULL,
                    lesson_id TEXT NOT NULL,
                    request_id TEXT NOT NULL,
                    applied_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, module_id, lesson_id, request_id)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS catalog_courses (
                    id TEXT PRIMARY KEY
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS course_blocks (
                    course_id TEXT NOT NULL,
                    position INTEGER NOT NULL CHECK (position >= 0),
                    block_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    title TEXT NOT NULL,
                    question_count INTEGER NOT NULL CHECK (question_count >= 0),
                    PRIMARY KEY (course_id, position),
                    UNIQUE (course_id, block_id),
                    FOREIGN KEY (course_id) REFERENCES catalog_courses(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS catalog_modules (
                    id TEXT PRIMARY KEY
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS module_lessons (
                    module_id TEXT NOT NULL,
                    position INTEGER NOT NULL CHECK (position >= 0),
                    lesson_id TEXT NOT NULL,
                    PRIMARY KEY (module_id, position),
                    UNIQUE (module_id, lesson_id),
                    FOREIGN KEY (module_id) REFERENCES catalog_modules(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS course_progress (
                    course_id TEXT PRIMARY KEY,
                    total_insights INTEGER NOT NULL CHECK (total_insights >= 0),
                    progress_percentage REAL NOT NULL
                        CHECK (progress_percentage BETWEEN 0 AND 100),
                    last_active_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS completed_blocks (
                    course_id TEXT NOT NULL,
                    block_id TEXT NOT NULL,
                    completed_at TEXT NOT NULL,
                    PRIMARY KEY (course_id, block_id),
                    FOREIGN KEY (course_id) REFERENCES course_progress(course_id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS learning_sessions (
                    id TEXT PRIMARY KEY,
                    course_id TEXT NOT NULL,
                    current_block_id TEXT NOT NULL,
                    current_question_index INTEGER NOT NULL CHECK (current_question_index >= 0),
                    progress REAL NOT NULL CHECK (progress BETWEEN 0 AND 100),
                    started_at TEXT NOT NULL,
                    completed_at TEXT,
                    version INTEGER NOT NULL CHECK (version >= 0)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS insights (
                    id INTEGER PRIMARY KEY,
                    session_id TEXT NOT NULL,
                    course_id TEXT NOT NULL,
                    block_id TEXT NOT NULL,
                    text TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (session_id) REFERENCES learning_sessions(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_lesson_progress_user_module
                    ON lesson_progress (user_id, module_id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_learning_sessions_course_started
                    ON learning_sessions (course_id, completed_at, started_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_insights_session
                    ON insights (session_id, id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::debug!(version = 1, "applied schema migration");
    }

    Ok(())
}
