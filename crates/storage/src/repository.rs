use async_trait::async_trait;
use chrono::{DateTime, Utc};
use learn_core::model::{
    BlockId, CourseId, CourseOutline, Insight, InsightText, LearningSession, LessonKey,
    LessonProgress, LessonUpdate, ModuleId, ModuleOutline, SessionId, UserCourseProgress, UserId,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Outcome of an upsert: the stored record and whether the update was applied.
///
/// `applied` is `false` when the update carried a request id that was already
/// applied to the same lesson.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonWrite {
    pub progress: LessonProgress,
    pub applied: bool,
}

/// A session transition to be committed atomically with its course-level effects.
#[derive(Debug, Clone)]
pub struct SessionTransition<'a> {
    /// Session state after the transition.
    pub session: &'a LearningSession,
    /// Version the transition was computed from.
    pub expected_version: u64,
    /// Block to add to the course's completed set.
    pub completed_block: &'a BlockId,
    /// Course percentage implied by the transition; never lowers the stored value.
    pub progress: f64,
    pub at: DateTime<Utc>,
}

/// Insight to append; `course_id` and `block_id` are taken from the session.
#[derive(Debug, Clone)]
pub struct NewInsightRecord<'a> {
    pub session_id: &'a SessionId,
    pub course_id: &'a CourseId,
    pub block_id: &'a BlockId,
    pub text: &'a InsightText,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait LessonProgressRepository: Send + Sync {
    /// Fetch one lesson record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on adapter failures. A missing record is `Ok(None)`.
    async fn get_lesson_progress(
        &self,
        key: &LessonKey,
    ) -> Result<Option<LessonProgress>, StorageError>;

    /// All tracked lessons of a user within a module.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on adapter failures.
    async fn lessons_for_module(
        &self,
        user_id: &UserId,
        module_id: &ModuleId,
    ) -> Result<Vec<LessonProgress>, StorageError>;

    /// Apply an update as one atomic read-modify-write.
    ///
    /// Every request id applied to a lesson is remembered, so a replay is
    /// skipped even after other requests were applied in between.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails; nothing is persisted then.
    async fn upsert_lesson_progress(
        &self,
        key: &LessonKey,
        update: &LessonUpdate,
        now: DateTime<Utc>,
    ) -> Result<LessonWrite, StorageError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Persist a new session and make sure its course progress row exists.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the id is taken.
    async fn insert_session(&self, session: &LearningSession) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on adapter failures. A missing session is `Ok(None)`.
    async fn get_session(&self, id: &SessionId) -> Result<Option<LearningSession>, StorageError>;

    /// Most recently started, uncompleted session of a course.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on adapter failures.
    async fn latest_active_session(
        &self,
        course_id: &CourseId,
    ) -> Result<Option<LearningSession>, StorageError>;

    /// Overwrite the session pointer if the stored version still equals
    /// `expected_version`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` on a version mismatch and
    /// `StorageError::NotFound` if the session is gone.
    async fn update_session_pointer(
        &self,
        session: &LearningSession,
        expected_version: u64,
    ) -> Result<(), StorageError>;

    /// Commit the session pointer, completed block and course percentage together.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` on a version mismatch; no part of the
    /// transition is written in that case.
    async fn commit_transition(
        &self,
        transition: &SessionTransition<'_>,
    ) -> Result<UserCourseProgress, StorageError>;
}

#[async_trait]
pub trait CourseProgressRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` on adapter failures. No row is `Ok(None)`.
    async fn get_course_progress(
        &self,
        course_id: &CourseId,
    ) -> Result<Option<UserCourseProgress>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on adapter failures.
    async fn get_completed_blocks(
        &self,
        course_id: &CourseId,
    ) -> Result<BTreeSet<BlockId>, StorageError>;

    /// Add a block to the completed set. Returns `false` if it was already there.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on adapter failures.
    async fn append_completed_block(
        &self,
        course_id: &CourseId,
        block_id: &BlockId,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    /// Store an insight and bump the course's insight counter in one step.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on adapter failures.
    async fn append_insight(&self, insight: &NewInsightRecord<'_>)
    -> Result<Insight, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on adapter failures.
    async fn list_insights(&self, session_id: &SessionId) -> Result<Vec<Insight>, StorageError>;
}

/// Course and module outlines published by the content generator.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Replace the block list of a course.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on adapter failures.
    async fn put_course_outline(&self, outline: &CourseOutline) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on adapter failures. Unknown courses are `Ok(None)`.
    async fn course_outline(
        &self,
        course_id: &CourseId,
    ) -> Result<Option<CourseOutline>, StorageError>;

    /// Replace the lesson list of a module.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on adapter failures.
    async fn put_module_outline(&self, outline: &ModuleOutline) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on adapter failures. Unknown modules are `Ok(None)`.
    async fn module_outline(
        &self,
        module_id: &ModuleId,
    ) -> Result<Option<ModuleOutline>, StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

#[derive(Default)]
struct MemoryState {
    lessons: HashMap<LessonKey, LessonProgress>,
    applied_requests: HashMap<LessonKey, HashSet<String>>,
    sessions: HashMap<SessionId, LearningSession>,
    courses: HashMap<CourseId, UserCourseProgress>,
    insights: Vec<Insight>,
    course_outlines: HashMap<CourseId, CourseOutline>,
    module_outlines: HashMap<ModuleId, ModuleOutline>,
}

/// Simple in-memory repository implementation for testing and prototyping.
///
/// All tables share one lock so multi-entity transitions stay atomic.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

fn check_version(
    stored: &LearningSession,
    expected_version: u64,
) -> Result<(), StorageError> {
    if stored.version() == expected_version {
        Ok(())
    } else {
        Err(StorageError::Conflict)
    }
}

#[async_trait]
impl LessonProgressRepository for InMemoryRepository {
    async fn get_lesson_progress(
        &self,
        key: &LessonKey,
    ) -> Result<Option<LessonProgress>, StorageError> {
        Ok(self.lock()?.lessons.get(key).cloned())
    }

    async fn lessons_for_module(
        &self,
        user_id: &UserId,
        module_id: &ModuleId,
    ) -> Result<Vec<LessonProgress>, StorageError> {
        let guard = self.lock()?;
        let mut found: Vec<_> = guard
            .lessons
            .values()
            .filter(|l| &l.key().user_id == user_id && &l.key().module_id == module_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.lesson_id().cmp(b.lesson_id()));
        Ok(found)
    }

    async fn upsert_lesson_progress(
        &self,
        key: &LessonKey,
        update: &LessonUpdate,
        now: DateTime<Utc>,
    ) -> Result<LessonWrite, StorageError> {
        let mut guard = self.lock()?;
        if let Some(request_id) = update.request_id() {
            let first_seen = guard
                .applied_requests
                .entry(key.clone())
                .or_default()
                .insert(request_id.to_owned());
            if !first_seen {
                let progress = guard
                    .lessons
                    .get(key)
                    .cloned()
                    .ok_or(StorageError::NotFound)?;
                return Ok(LessonWrite {
                    progress,
                    applied: false,
                });
            }
        }

        let record = guard
            .lessons
            .entry(key.clone())
            .or_insert_with(|| LessonProgress::fresh(key.clone(), now));
        record.apply(update, now);
        Ok(LessonWrite {
            progress: record.clone(),
            applied: true,
        })
    }
}

#[async_trait]
impl SessionRepository for InMemoryRepository {
    async fn insert_session(&self, session: &LearningSession) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if guard.sessions.contains_key(session.id()) {
            return Err(StorageError::Conflict);
        }
        guard
            .courses
            .entry(session.course_id().clone())
            .or_insert_with(|| {
                UserCourseProgress::new(session.course_id().clone(), session.started_at())
            });
        guard.sessions.insert(session.id().clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<LearningSession>, StorageError> {
        Ok(self.lock()?.sessions.get(id).cloned())
    }

    async fn latest_active_session(
        &self,
        course_id: &CourseId,
    ) -> Result<Option<LearningSession>, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .sessions
            .values()
            .filter(|s| s.course_id() == course_id && !s.is_completed())
            .max_by(|a, b| {
                a.started_at()
                    .cmp(&b.started_at())
                    .then_with(|| a.id().cmp(b.id()))
            })
            .cloned())
    }

    async fn update_session_pointer(
        &self,
        session: &LearningSession,
        expected_version: u64,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let stored = guard
            .sessions
            .get_mut(session.id())
            .ok_or(StorageError::NotFound)?;
        check_version(stored, expected_version)?;
        *stored = session.clone();
        Ok(())
    }

    async fn commit_transition(
        &self,
        transition: &SessionTransition<'_>,
    ) -> Result<UserCourseProgress, StorageError> {
        let mut guard = self.lock()?;
        let session = transition.session;
        let stored = guard
            .sessions
            .get(session.id())
            .ok_or(StorageError::NotFound)?;
        check_version(stored, transition.expected_version)?;

        let course = guard
            .courses
            .entry(session.course_id().clone())
            .or_insert_with(|| UserCourseProgress::new(session.course_id().clone(), transition.at));
        course.mark_block_completed(transition.completed_block.clone(), transition.at);
        course.raise_percentage(transition.progress);
        let course = course.clone();

        guard.sessions.insert(session.id().clone(), session.clone());
        Ok(course)
    }
}

#[async_trait]
impl CourseProgressRepository for InMemoryRepository {
    async fn get_course_progress(
        &self,
        course_id: &CourseId,
    ) -> Result<Option<UserCourseProgress>, StorageError> {
        Ok(self.lock()?.courses.get(course_id).cloned())
    }

    async fn get_completed_blocks(
        &self,
        course_id: &CourseId,
    ) -> Result<BTreeSet<BlockId>, StorageError> {
        Ok(self
            .lock()?
            .courses
            .get(course_id)
            .map(|c| c.completed_blocks().clone())
            .unwrap_or_default())
    }

    async fn append_completed_block(
        &self,
        course_id: &CourseId,
        block_id: &BlockId,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut guard = self.lock()?;
        let course = guard
            .courses
            .entry(course_id.clone())
            .or_insert_with(|| UserCourseProgress::new(course_id.clone(), at));
        Ok(course.mark_block_completed(block_id.clone(), at))
    }

    async fn append_insight(
        &self,
        insight: &NewInsightRecord<'_>,
    ) -> Result<Insight, StorageError> {
        let mut guard = self.lock()?;
        let id = i64::try_from(guard.insights.len() + 1)
            .map_err(|_| StorageError::Serialization("insight id overflow".into()))?;
        let stored = Insight {
            id,
            session_id: insight.session_id.clone(),
            course_id: insight.course_id.clone(),
            block_id: insight.block_id.clone(),
            text: insight.text.as_str().to_owned(),
            created_at: insight.created_at,
        };
        guard
            .courses
            .entry(insight.course_id.clone())
            .or_insert_with(|| UserCourseProgress::new(insight.course_id.clone(), insight.created_at))
            .record_insight(insight.created_at);
        guard.insights.push(stored.clone());
        Ok(stored)
    }

    async fn list_insights(&self, session_id: &SessionId) -> Result<Vec<Insight>, StorageError> {
        Ok(self
            .lock()?
            .insights
            .iter()
            .filter(|i| &i.session_id == session_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CatalogRepository for InMemoryRepository {
    async fn put_course_outline(&self, outline: &CourseOutline) -> Result<(), StorageError> {
        self.lock()?
            .course_outlines
            .insert(outline.course_id().clone(), outline.clone());
        Ok(())
    }

    async fn course_outline(
        &self,
        course_id: &CourseId,
    ) -> Result<Option<CourseOutline>, StorageError> {
        Ok(self.lock()?.course_outlines.get(course_id).cloned())
    }

    async fn put_module_outline(&self, outline: &ModuleOutline) -> Result<(), StorageError> {
        self.lock()?
            .module_outlines
            .insert(outline.module_id().clone(), outline.clone());
        Ok(())
    }

    async fn module_outline(
        &self,
        module_id: &ModuleId,
    ) -> Result<Option<ModuleOutline>, StorageError> {
        Ok(self.lock()?.module_outlines.get(module_id).cloned())
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub lessons: Arc<dyn LessonProgressRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub courses: Arc<dyn CourseProgressRepository>,
    pub catalog: Arc<dyn CatalogRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        Self {
            lessons: Arc::new(repo.clone()),
            sessions: Arc::new(repo.clone()),
            courses: Arc::new(repo.clone()),
            catalog: Arc::new(repo),
        }
    }
}
