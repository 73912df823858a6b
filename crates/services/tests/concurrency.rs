use std::sync::Arc;

use learn_core::model::{
    Block, BlockId, BlockKind, CourseId, CourseOutline, LearningSession, LessonId, LessonKey,
    ModuleId, SessionId, UserCourseProgress, UserId,
};
use learn_core::time::fixed_now;
use services::{Clock, ErrorKind, ProgressServices, SessionAdvancer, TrackProgress};
use storage::repository::{
    CatalogRepository, LessonProgressRepository, SessionRepository, SessionTransition,
    StorageError,
};
use storage::sqlite::SqliteRepository;
use tempfile::TempDir;
use tokio::sync::Barrier;

const WRITERS: usize = 10;

// A real file so every pooled connection contends for the same database lock.
fn file_url(dir: &TempDir) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join("progress.db").display())
}

fn course() -> CourseOutline {
    CourseOutline::new(
        CourseId::new("rust-101").unwrap(),
        ["intro", "practice", "reflect"]
            .into_iter()
            .map(|id| Block {
                id: BlockId::new(id).unwrap(),
                kind: BlockKind::Learning,
                title: id.to_owned(),
                question_count: 1,
            })
            .collect(),
    )
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_tracking_keeps_every_second() {
    let dir = tempfile::tempdir().unwrap();
    let services = ProgressServices::new_sqlite(&file_url(&dir), Clock::fixed(fixed_now()))
        .await
        .expect("open sqlite file");

    let mut handles = Vec::new();
    for i in 0..40 {
        let tracker = services.lessons();
        handles.push(tokio::spawn(async move {
            let request = TrackProgress {
                user_id: "learner".into(),
                module_id: "rust-basics".into(),
                lesson_id: "intro".into(),
                status: "in_progress".into(),
                time_spent_secs: 5,
                completed_at: None,
                request_id: Some(format!("req-{i}")),
            };
            tracker.track_progress(&request).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let key = LessonKey::new(
        UserId::new("learner").unwrap(),
        ModuleId::new("rust-basics").unwrap(),
        LessonId::new("intro").unwrap(),
    );
    let stored = services
        .storage()
        .lessons
        .get_lesson_progress(&key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.time_spent_secs(), 200);
    assert_eq!(stored.attempts(), 40);
}

/// Holds every reader at the barrier so all advances start from the same version.
struct LoadTogether {
    inner: SqliteRepository,
    barrier: Barrier,
}

#[async_trait::async_trait]
impl SessionRepository for LoadTogether {
    async fn insert_session(&self, session: &LearningSession) -> Result<(), StorageError> {
        self.inner.insert_session(session).await
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<LearningSession>, StorageError> {
        let loaded = self.inner.get_session(id).await?;
        self.barrier.wait().await;
        Ok(loaded)
    }

    async fn latest_active_session(
        &self,
        course_id: &CourseId,
    ) -> Result<Option<LearningSession>, StorageError> {
        self.inner.latest_active_session(course_id).await
    }

    async fn update_session_pointer(
        &self,
        session: &LearningSession,
        expected_version: u64,
    ) -> Result<(), StorageError> {
        self.inner
            .update_session_pointer(session, expected_version)
            .await
    }

    async fn commit_transition(
        &self,
        transition: &SessionTransition<'_>,
    ) -> Result<UserCourseProgress, StorageError> {
        self.inner.commit_transition(transition).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_advances_of_one_session_let_exactly_one_win() {
    let dir = tempfile::tempdir().unwrap();
    let repo = SqliteRepository::connect(&file_url(&dir))
        .await
        .expect("open sqlite file");
    repo.migrate().await.expect("migrate");
    repo.put_course_outline(&course()).await.unwrap();

    let clock = Clock::fixed(fixed_now());
    let plain = SessionAdvancer::new(
        clock,
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
    );
    let session = plain
        .start_session(&CourseId::new("rust-101").unwrap())
        .await
        .unwrap();

    let contested = Arc::new(SessionAdvancer::new(
        clock,
        Arc::new(LoadTogether {
            inner: repo.clone(),
            barrier: Barrier::new(WRITERS),
        }),
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
    ));
    let mut handles = Vec::new();
    for _ in 0..WRITERS {
        let advancer = Arc::clone(&contested);
        let id = session.id().clone();
        handles.push(tokio::spawn(async move { advancer.advance(&id).await }));
    }

    let mut won = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(err) => {
                assert_eq!(err.kind(), ErrorKind::Conflict, "unexpected error: {err}");
                conflicts += 1;
            }
        }
    }
    assert_eq!(won, 1);
    assert_eq!(conflicts, WRITERS - 1);

    let stored = plain.get_session(session.id()).await.unwrap();
    assert_eq!(stored.version(), 1);
    assert_eq!(stored.current_block_id().as_str(), "practice");
    let progress = plain
        .course_progress(session.course_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.completed_blocks().len(), 1);
}
