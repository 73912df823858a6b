use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::model::ids::{BlockId, CourseId, SessionId};

const MAX_INSIGHT_CHARS: usize = 10_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InsightError {
    #[error("insight text cannot be empty")]
    Empty,

    #[error("insight text exceeds {max} characters")]
    TooLong { max: usize },
}

/// Free-text note validated before it is attached to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsightText(String);

impl InsightText {
    /// Trim and validate a note.
    ///
    /// # Errors
    ///
    /// Returns `InsightError::Empty` for blank notes and `InsightError::TooLong`
    /// past the size limit.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, InsightError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(InsightError::Empty);
        }
        if trimmed.chars().count() > MAX_INSIGHT_CHARS {
            return Err(InsightError::TooLong {
                max: MAX_INSIGHT_CHARS,
            });
        }
        Ok(Self(trimmed.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A persisted learner note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Insight {
    pub id: i64,
    pub session_id: SessionId,
    pub course_id: CourseId,
    pub block_id: BlockId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}
