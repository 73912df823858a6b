use learn_core::model::{CourseId, CourseOutline, LessonId, ModuleId, ModuleOutline};
use sqlx::Row;

use super::mapping::{map_block_row, ser};
use super::{SqliteRepository, conn};
use crate::repository::{CatalogRepository, StorageError};

fn position(index: usize) -> Result<i64, StorageError> {
    i64::try_from(index).map_err(|_| StorageError::Serialization("position overflow".into()))
}

#[async_trait::async_trait]
impl CatalogRepository for SqliteRepository {
    async fn put_course_outline(&self, outline: &CourseOutline) -> Result<(), StorageError> {
        let course_id = outline.course_id().as_str();
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query("INSERT INTO catalog_courses (id) VALUES (?1) ON CONFLICT(id) DO NOTHING")
            .bind(course_id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        sqlx::query("DELETE FROM course_blocks WHERE course_id = ?1")
            .bind(course_id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        for (index, block) in outline.blocks().iter().enumerate() {
            sqlx::query(
                r"
                INSERT INTO course_blocks (course_id, position, block_id, kind, title, question_count)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
            )
            .bind(course_id)
            .bind(position(index)?)
            .bind(block.id.as_str())
            .bind(block.kind.as_str())
            .bind(block.title.as_str())
            .bind(i64::from(block.question_count))
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn course_outline(
        &self,
        course_id: &CourseId,
    ) -> Result<Option<CourseOutline>, StorageError> {
        let known = sqlx::query("SELECT 1 FROM catalog_courses WHERE id = ?1")
            .bind(course_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;
        if known.is_none() {
            return Ok(None);
        }

        let rows = sqlx::query(
            r"
            SELECT block_id, kind, title, question_count
            FROM course_blocks
            WHERE course_id = ?1
            ORDER BY position ASC
            ",
        )
        .bind(course_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut blocks = Vec::with_capacity(rows.len());
        for row in rows {
            blocks.push(map_block_row(&row)?);
        }
        CourseOutline::new(course_id.clone(), blocks)
            .map(Some)
            .map_err(ser)
    }

    async fn put_module_outline(&self, outline: &ModuleOutline) -> Result<(), StorageError> {
        let module_id = outline.module_id().as_str();
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query("INSERT INTO catalog_modules (id) VALUES (?1) ON CONFLICT(id) DO NOTHING")
            .bind(module_id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        sqlx::query("DELETE FROM module_lessons WHERE module_id = ?1")
            .bind(module_id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        for (index, lesson_id) in outline.lessons().iter().enumerate() {
            sqlx::query(
                "INSERT INTO module_lessons (module_id, position, lesson_id) VALUES (?1, ?2, ?3)",
            )
            .bind(module_id)
            .bind(position(index)?)
            .bind(lesson_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn module_outline(
        &self,
        module_id: &ModuleId,
    ) -> Result<Option<ModuleOutline>, StorageError> {
        let known = sqlx::query("SELECT 1 FROM catalog_modules WHERE id = ?1")
            .bind(module_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;
        if known.is_none() {
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT lesson_id FROM module_lessons WHERE module_id = ?1 ORDER BY position ASC",
        )
        .bind(module_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut lessons = Vec::with_capacity(rows.len());
        for row in rows {
            lessons.push(
                LessonId::new(row.try_get::<String, _>("lesson_id").map_err(ser)?).map_err(ser)?,
            );
        }
        ModuleOutline::new(module_id.clone(), lessons)
            .map(Some)
            .map_err(ser)
    }
}
