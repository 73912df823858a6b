use std::sync::Arc;

use learn_core::model::{
    CourseId, CourseOutline, Insight, InsightText, LearningSession, SessionId, SessionStateError,
    UserCourseProgress,
};
use storage::repository::{
    CatalogRepository, CourseProgressRepository, NewInsightRecord, SessionRepository,
    SessionTransition, StorageError,
};
use tracing::{debug, info, warn};

use super::view::AdvanceOutcome;
use crate::Clock;
use crate::error::ProgressError;

fn session_error(err: SessionStateError, session_id: &SessionId) -> ProgressError {
    match err {
        SessionStateError::Completed => ProgressError::SessionCompleted(session_id.clone()),
        other => other.into(),
    }
}

//
// ─── SESSION ADVANCER ──────────────────────────────────────────────────────────
//

/// Drives learning sessions through a course's blocks.
///
/// Every transition is computed from a loaded snapshot and committed with the
/// snapshot's version; a concurrent writer makes the commit fail with a
/// retryable conflict.
#[derive(Clone)]
pub struct SessionAdvancer {
    clock: Clock,
    sessions: Arc<dyn SessionRepository>,
    courses: Arc<dyn CourseProgressRepository>,
    catalog: Arc<dyn CatalogRepository>,
}

impl SessionAdvancer {
    #[must_use]
    pub fn new(
        clock: Clock,
        sessions: Arc<dyn SessionRepository>,
        courses: Arc<dyn CourseProgressRepository>,
        catalog: Arc<dyn CatalogRepository>,
    ) -> Self {
        Self {
            clock,
            sessions,
            courses,
            catalog,
        }
    }

    /// Start a fresh session on the course's first block.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotFound` for unknown courses and a
    /// configuration-kind error for courses without blocks.
    pub async fn start_session(&self, course_id: &CourseId) -> Result<LearningSession, ProgressError> {
        let outline = self.outline(course_id).await?;
        let session = LearningSession::start(SessionId::generate(), &outline, self.clock.now())?;
        self.sessions.insert_session(&session).await?;
        info!(
            session_id = %session.id(),
            course_id = %course_id,
            block_id = %session.current_block_id(),
            "learning session started"
        );
        Ok(session)
    }

    /// Complete the current block and move to the next one, or finish the course.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::SessionCompleted` for finished sessions, a
    /// conflict-kind error when another advance won the race, and a
    /// configuration-kind error when the outline no longer matches the session.
    pub async fn advance(&self, session_id: &SessionId) -> Result<AdvanceOutcome, ProgressError> {
        let mut session = self.load(session_id).await?;
        if session.is_completed() {
            return Err(ProgressError::SessionCompleted(session_id.clone()));
        }
        let outline = self.outline(session.course_id()).await?;

        let now = self.clock.now();
        let expected_version = session.version();
        let step = session
            .advance(&outline, now)
            .map_err(|e| session_error(e, session_id))?;

        let course = self
            .sessions
            .commit_transition(&SessionTransition {
                session: &session,
                expected_version,
                completed_block: step.completed_block_id(),
                progress: step.progress(),
                at: now,
            })
            .await
            .inspect_err(|e| {
                if matches!(e, StorageError::Conflict) {
                    warn!(session_id = %session_id, expected_version, "concurrent advance rejected");
                }
            })?;

        info!(
            session_id = %session_id,
            completed_block_id = %step.completed_block_id(),
            progress = step.progress(),
            course_progress = course.progress_percentage(),
            "session advanced"
        );
        Ok(AdvanceOutcome::from_step(session_id.clone(), step, &course))
    }

    /// Record an answer to the current question and move the question pointer.
    ///
    /// The answer is not graded or stored.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::EmptyAnswer` for blank answers,
    /// `ProgressError::SessionCompleted` for finished sessions and a
    /// conflict-kind error when the session changed underneath.
    pub async fn submit_answer(
        &self,
        session_id: &SessionId,
        answer: &str,
    ) -> Result<LearningSession, ProgressError> {
        if answer.trim().is_empty() {
            return Err(ProgressError::EmptyAnswer);
        }
        let mut session = self.load(session_id).await?;
        if session.is_completed() {
            return Err(ProgressError::SessionCompleted(session_id.clone()));
        }
        let outline = self.outline(session.course_id()).await?;

        let expected_version = session.version();
        session
            .submit_answer(&outline)
            .map_err(|e| session_error(e, session_id))?;
        self.sessions
            .update_session_pointer(&session, expected_version)
            .await?;

        debug!(
            session_id = %session_id,
            question_index = session.current_question_index(),
            "answer recorded"
        );
        Ok(session)
    }

    /// Attach a learner note to the session's current block.
    ///
    /// # Errors
    ///
    /// Returns a validation-kind error for empty notes or finished sessions.
    pub async fn record_insight(
        &self,
        session_id: &SessionId,
        text: &str,
    ) -> Result<Insight, ProgressError> {
        let text = InsightText::new(text)?;
        let session = self.load(session_id).await?;
        if session.is_completed() {
            return Err(ProgressError::SessionCompleted(session_id.clone()));
        }

        let insight = self
            .courses
            .append_insight(&NewInsightRecord {
                session_id: session.id(),
                course_id: session.course_id(),
                block_id: session.current_block_id(),
                text: &text,
                created_at: self.clock.now(),
            })
            .await?;
        info!(session_id = %session_id, insight_id = insight.id, "insight recorded");
        Ok(insight)
    }

    /// # Errors
    ///
    /// Returns `ProgressError::NotFound` for unknown sessions.
    pub async fn get_session(&self, session_id: &SessionId) -> Result<LearningSession, ProgressError> {
        self.load(session_id).await
    }

    /// Most recently started session of the course that is still running.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError` on storage failures.
    pub async fn active_session(
        &self,
        course_id: &CourseId,
    ) -> Result<Option<LearningSession>, ProgressError> {
        Ok(self.sessions.latest_active_session(course_id).await?)
    }

    /// # Errors
    ///
    /// Returns `ProgressError` on storage failures.
    pub async fn course_progress(
        &self,
        course_id: &CourseId,
    ) -> Result<Option<UserCourseProgress>, ProgressError> {
        Ok(self.courses.get_course_progress(course_id).await?)
    }

    /// # Errors
    ///
    /// Returns `ProgressError` on storage failures.
    pub async fn list_insights(&self, session_id: &SessionId) -> Result<Vec<Insight>, ProgressError> {
        Ok(self.courses.list_insights(session_id).await?)
    }

    async fn load(&self, session_id: &SessionId) -> Result<LearningSession, ProgressError> {
        self.sessions
            .get_session(session_id)
            .await?
            .ok_or_else(|| ProgressError::not_found("session", session_id))
    }

    async fn outline(&self, course_id: &CourseId) -> Result<CourseOutline, ProgressError> {
        self.catalog
            .course_outline(course_id)
            .await?
            .ok_or_else(|| ProgressError::not_found("course", course_id))
    }
}
