use learn_core::model::{BlockId, CourseId, SessionId, SessionStep, UserCourseProgress};
use serde::Serialize;

/// What an `advance` call did, with the course percentage after the commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    Advanced {
        session_id: SessionId,
        completed_block_id: BlockId,
        next_block_id: BlockId,
        progress: f64,
        course_progress: f64,
    },
    Completed {
        session_id: SessionId,
        completed_block_id: BlockId,
        course_id: CourseId,
        course_progress: f64,
    },
}

impl AdvanceOutcome {
    #[must_use]
    pub fn from_step(session_id: SessionId, step: SessionStep, course: &UserCourseProgress) -> Self {
        let course_progress = course.progress_percentage();
        match step {
            SessionStep::Advanced {
                completed_block_id,
                next_block_id,
                progress,
            } => Self::Advanced {
                session_id,
                completed_block_id,
                next_block_id,
                progress,
                course_progress,
            },
            SessionStep::Completed {
                completed_block_id,
                course_id,
            } => Self::Completed {
                session_id,
                completed_block_id,
                course_id,
                course_progress,
            },
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Session progress after the step.
    #[must_use]
    pub fn progress(&self) -> f64 {
        match self {
            Self::Advanced { progress, .. } => *progress,
            Self::Completed { .. } => 100.0,
        }
    }
}
