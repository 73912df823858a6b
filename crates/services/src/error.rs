//! Shared error types for the services crate.

use thiserror::Error;

use learn_core::model::{
    CourseError, IdError, InsightError, LessonProgressError, ModuleProgressError, SessionId,
    SessionStateError,
};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Coarse classification callers use to map errors onto responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Bad input from the caller.
    Validation,
    NotFound,
    /// Catalog data that cannot drive progress (no lessons, no blocks).
    Configuration,
    /// Lost an optimistic concurrency race; retrying may succeed.
    Conflict,
    Persistence,
}

/// Errors emitted by progress services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("answer cannot be empty")]
    EmptyAnswer,

    #[error("session {0} is already completed")]
    SessionCompleted(SessionId),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error(transparent)]
    Id(#[from] IdError),

    #[error(transparent)]
    Lesson(#[from] LessonProgressError),

    #[error(transparent)]
    Module(#[from] ModuleProgressError),

    #[error(transparent)]
    Course(#[from] CourseError),

    #[error(transparent)]
    Session(#[from] SessionStateError),

    #[error(transparent)]
    Insight(#[from] InsightError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
}

impl ProgressError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyAnswer
            | Self::SessionCompleted(_)
            | Self::Id(_)
            | Self::Lesson(_)
            | Self::Insight(_)
            | Self::Session(SessionStateError::Completed) => ErrorKind::Validation,
            Self::NotFound { .. } | Self::Storage(StorageError::NotFound) => ErrorKind::NotFound,
            Self::Module(_) | Self::Course(_) | Self::Session(_) => ErrorKind::Configuration,
            Self::Storage(StorageError::Conflict) => ErrorKind::Conflict,
            Self::Storage(_) | Self::Sqlite(_) => ErrorKind::Persistence,
        }
    }

    /// Whether repeating the same call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict | ErrorKind::Persistence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_and_storage_failures_are_retryable() {
        let conflict = ProgressError::from(StorageError::Conflict);
        assert_eq!(conflict.kind(), ErrorKind::Conflict);
        assert!(conflict.is_retryable());

        let io = ProgressError::from(StorageError::Connection("disk full".into()));
        assert_eq!(io.kind(), ErrorKind::Persistence);
        assert!(io.is_retryable());
    }

    #[test]
    fn input_problems_are_not_retryable() {
        let err = ProgressError::from(LessonProgressError::NegativeTimeSpent(-5));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());

        let err = ProgressError::from(ModuleProgressError::InvalidTotalLessons(0));
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = ProgressError::not_found("session", "s-404");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "session not found: s-404");
    }
}
