use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::model::course::{CourseError, CourseOutline, block_percentage};
use crate::model::ids::{BlockId, CourseId, SessionId};

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum SessionStateError {
    #[error("session already completed")]
    Completed,

    #[error("session belongs to course {session}, outline is for {outline}")]
    CourseMismatch {
        session: CourseId,
        outline: CourseId,
    },

    #[error("completed_at must be set if and only if progress is 100, got {0}")]
    InconsistentCompletion(f64),

    #[error("progress must be within 0..=100, got {0}")]
    InvalidProgress(f64),

    #[error(transparent)]
    Course(#[from] CourseError),
}

/// Where a session currently stands in its course.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active { block_index: usize },
    Completed,
}

/// Result of moving a session past its current block.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStep {
    Advanced {
        completed_block_id: BlockId,
        next_block_id: BlockId,
        progress: f64,
    },
    Completed {
        completed_block_id: BlockId,
        course_id: CourseId,
    },
}

impl SessionStep {
    #[must_use]
    pub fn completed_block_id(&self) -> &BlockId {
        match self {
            SessionStep::Advanced {
                completed_block_id, ..
            }
            | SessionStep::Completed {
                completed_block_id, ..
            } => completed_block_id,
        }
    }

    /// Course-level percentage implied by this step.
    #[must_use]
    pub fn progress(&self) -> f64 {
        match self {
            SessionStep::Advanced { progress, .. } => *progress,
            SessionStep::Completed { .. } => 100.0,
        }
    }
}

/// A single traversal of a course's blocks.
///
/// `version` increases with every applied transition and lets storage reject
/// writes computed from a stale read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningSession {
    id: SessionId,
    course_id: CourseId,
    current_block_id: BlockId,
    current_question_index: u32,
    progress: f64,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    version: u64,
}

impl LearningSession {
    /// Start a session on the first block of the outline.
    ///
    /// # Errors
    ///
    /// Returns `CourseError::NoBlocks` (wrapped) for an empty outline.
    pub fn start(
        id: SessionId,
        outline: &CourseOutline,
        now: DateTime<Utc>,
    ) -> Result<Self, SessionStateError> {
        let first = outline.first_block()?;
        Ok(Self {
            id,
            course_id: outline.course_id().clone(),
            current_block_id: first.id.clone(),
            current_question_index: 0,
            progress: 0.0,
            started_at: now,
            completed_at: None,
            version: 0,
        })
    }

    /// Rehydrate a session from storage.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError` if progress is out of range or disagrees with
    /// `completed_at`.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: SessionId,
        course_id: CourseId,
        current_block_id: BlockId,
        current_question_index: u32,
        progress: f64,
        started_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        version: u64,
    ) -> Result<Self, SessionStateError> {
        if !(0.0..=100.0).contains(&progress) {
            return Err(SessionStateError::InvalidProgress(progress));
        }
        if completed_at.is_some() != (progress >= 100.0) {
            return Err(SessionStateError::InconsistentCompletion(progress));
        }
        Ok(Self {
            id,
            course_id,
            current_block_id,
            current_question_index,
            progress,
            started_at,
            completed_at,
            version,
        })
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn course_id(&self) -> &CourseId {
        &self.course_id
    }

    #[must_use]
    pub fn current_block_id(&self) -> &BlockId {
        &self.current_block_id
    }

    #[must_use]
    pub fn current_question_index(&self) -> u32 {
        self.current_question_index
    }

    #[must_use]
    pub fn progress(&self) -> f64 {
        self.progress
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// # Errors
    ///
    /// Returns `SessionStateError` if the outline does not contain the current block.
    pub fn state(&self, outline: &CourseOutline) -> Result<SessionState, SessionStateError> {
        if self.is_completed() {
            return Ok(SessionState::Completed);
        }
        let block_index = self.locate(outline)?;
        Ok(SessionState::Active { block_index })
    }

    /// Move past the current block.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::Completed` for a finished session, and a
    /// wrapped `CourseError` for an empty outline or a block missing from it.
    pub fn advance(
        &mut self,
        outline: &CourseOutline,
        now: DateTime<Utc>,
    ) -> Result<SessionStep, SessionStateError> {
        if self.is_completed() {
            return Err(SessionStateError::Completed);
        }
        let index = self.locate(outline)?;
        let completed_block_id = self.current_block_id.clone();
        let count = outline.block_count();

        let step = if let Some(next) = outline.blocks().get(index + 1) {
            let progress = block_percentage(index + 1, count);
            self.current_block_id = next.id.clone();
            self.current_question_index = 0;
            self.progress = progress;
            SessionStep::Advanced {
                completed_block_id,
                next_block_id: next.id.clone(),
                progress,
            }
        } else {
            self.completed_at = Some(now);
            self.progress = 100.0;
            SessionStep::Completed {
                completed_block_id,
                course_id: self.course_id.clone(),
            }
        };

        self.version += 1;
        Ok(step)
    }

    /// Move to the next question of the current block.
    ///
    /// The index stops at the block's question count; finishing the block is
    /// left to [`LearningSession::advance`].
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::Completed` for a finished session, and a
    /// wrapped `CourseError` for an empty outline or a block missing from it.
    pub fn submit_answer(&mut self, outline: &CourseOutline) -> Result<(), SessionStateError> {
        if self.is_completed() {
            return Err(SessionStateError::Completed);
        }
        let index = self.locate(outline)?;
        let question_count = outline.blocks()[index].question_count;

        if self.current_question_index.saturating_add(1) < question_count {
            self.current_question_index += 1;
        } else {
            self.current_question_index = question_count;
        }

        let block_progress = block_percentage(index, outline.block_count());
        if block_progress > self.progress {
            self.progress = block_progress;
        }

        self.version += 1;
        Ok(())
    }

    fn locate(&self, outline: &CourseOutline) -> Result<usize, SessionStateError> {
        if outline.course_id() != &self.course_id {
            return Err(SessionStateError::CourseMismatch {
                session: self.course_id.clone(),
                outline: outline.course_id().clone(),
            });
        }
        Ok(outline.position(&self.current_block_id)?)
    }
}
