use std::collections::BTreeSet;

use learn_core::model::{
    Block, BlockId, BlockKind, CourseId, Insight, LearningSession, LessonId, LessonKey,
    LessonProgress, LessonStatus, ModuleId, SessionId, UserCourseProgress, UserId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn u64_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn i64_to_u32(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn parse_lesson_status(s: &str) -> Result<LessonStatus, StorageError> {
    s.parse().map_err(ser)
}

pub(crate) fn parse_block_kind(s: &str) -> Result<BlockKind, StorageError> {
    s.parse().map_err(ser)
}

pub(crate) fn map_lesson_row(row: &SqliteRow) -> Result<LessonProgress, StorageError> {
    let key = LessonKey::new(
        UserId::new(row.try_get::<String, _>("user_id").map_err(ser)?).map_err(ser)?,
        ModuleId::new(row.try_get::<String, _>("module_id").map_err(ser)?).map_err(ser)?,
        LessonId::new(row.try_get::<String, _>("lesson_id").map_err(ser)?).map_err(ser)?,
    );
    let status = parse_lesson_status(&row.try_get::<String, _>("status").map_err(ser)?)?;

    LessonProgress::from_persisted(
        key,
        status,
        i64_to_u64(
            "time_spent_secs",
            row.try_get::<i64, _>("time_spent_secs").map_err(ser)?,
        )?,
        row.try_get("completed_at").map_err(ser)?,
        i64_to_u32("attempts", row.try_get::<i64, _>("attempts").map_err(ser)?)?,
        row.try_get("updated_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_session_row(row: &SqliteRow) -> Result<LearningSession, StorageError> {
    LearningSession::from_persisted(
        SessionId::new(row.try_get::<String, _>("id").map_err(ser)?).map_err(ser)?,
        CourseId::new(row.try_get::<String, _>("course_id").map_err(ser)?).map_err(ser)?,
        BlockId::new(row.try_get::<String, _>("current_block_id").map_err(ser)?).map_err(ser)?,
        i64_to_u32(
            "current_question_index",
            row.try_get::<i64, _>("current_question_index").map_err(ser)?,
        )?,
        row.try_get("progress").map_err(ser)?,
        row.try_get("started_at").map_err(ser)?,
        row.try_get("completed_at").map_err(ser)?,
        i64_to_u64("version", row.try_get::<i64, _>("version").map_err(ser)?)?,
    )
    .map_err(ser)
}

pub(crate) fn map_course_row(
    row: &SqliteRow,
    completed_blocks: BTreeSet<BlockId>,
) -> Result<UserCourseProgress, StorageError> {
    UserCourseProgress::from_persisted(
        CourseId::new(row.try_get::<String, _>("course_id").map_err(ser)?).map_err(ser)?,
        completed_blocks,
        i64_to_u32(
            "total_insights",
            row.try_get::<i64, _>("total_insights").map_err(ser)?,
        )?,
        row.try_get("progress_percentage").map_err(ser)?,
        row.try_get("last_active_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_block_row(row: &SqliteRow) -> Result<Block, StorageError> {
    Ok(Block {
        id: BlockId::new(row.try_get::<String, _>("block_id").map_err(ser)?).map_err(ser)?,
        kind: parse_block_kind(&row.try_get::<String, _>("kind").map_err(ser)?)?,
        title: row.try_get("title").map_err(ser)?,
        question_count: i64_to_u32(
            "question_count",
            row.try_get::<i64, _>("question_count").map_err(ser)?,
        )?,
    })
}

pub(crate) fn map_insight_row(row: &SqliteRow) -> Result<Insight, StorageError> {
    Ok(Insight {
        id: row.try_get("id").map_err(ser)?,
        session_id: SessionId::new(row.try_get::<String, _>("session_id").map_err(ser)?)
            .map_err(ser)?,
        course_id: CourseId::new(row.try_get::<String, _>("course_id").map_err(ser)?)
            .map_err(ser)?,
        block_id: BlockId::new(row.try_get::<String, _>("block_id").map_err(ser)?).map_err(ser)?,
        text: row.try_get("text").map_err(ser)?,
        created_at: row.try_get("created_at").map_err(ser)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_status_strings_parse() {
        assert_eq!(
            parse_lesson_status("in_progress").unwrap(),
            LessonStatus::InProgress
        );
        assert!(matches!(
            parse_lesson_status("paused"),
            Err(StorageError::Serialization(_))
        ));
    }

    #[test]
    fn negative_counters_are_rejected() {
        assert!(i64_to_u32("attempts", -1).is_err());
        assert_eq!(u64_to_i64("version", 7).unwrap(), 7);
    }
}
