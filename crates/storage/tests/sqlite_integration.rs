use chrono::Duration;
use learn_core::model::{
    Block, BlockId, BlockKind, CourseId, CourseOutline, InsightText, LearningSession, LessonId,
    LessonKey, LessonStatus, LessonUpdate, ModuleId, ModuleOutline, SessionId, UserId,
};
use learn_core::time::fixed_now;
use storage::repository::{
    CatalogRepository, CourseProgressRepository, LessonProgressRepository, NewInsightRecord,
    SessionRepository, SessionTransition, StorageError,
};
use storage::sqlite::SqliteRepository;

async fn repo(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn key(lesson: &str) -> LessonKey {
    LessonKey::new(
        UserId::new("learner").unwrap(),
        ModuleId::new("rust-basics").unwrap(),
        LessonId::new(lesson).unwrap(),
    )
}

fn outline(blocks: &[&str]) -> CourseOutline {
    CourseOutline::new(
        CourseId::new("ownership").unwrap(),
        blocks
            .iter()
            .map(|id| Block {
                id: BlockId::new(*id).unwrap(),
                kind: BlockKind::Learning,
                title: format!("Block {id}"),
                question_count: 2,
            })
            .collect(),
    )
    .unwrap()
}

#[tokio::test]
async fn lesson_upserts_accumulate_and_skip_replayed_requests() {
    let repo = repo("memdb_lessons").await;
    let now = fixed_now();

    let first = LessonUpdate::new(LessonStatus::InProgress, 60, None)
        .unwrap()
        .with_request_id("req-1")
        .unwrap();
    let write = repo
        .upsert_lesson_progress(&key("intro"), &first, now)
        .await
        .unwrap();
    assert!(write.applied);
    assert_eq!(write.progress.attempts(), 1);

    let replay = repo
        .upsert_lesson_progress(&key("intro"), &first, now + Duration::minutes(1))
        .await
        .unwrap();
    assert!(!replay.applied);
    assert_eq!(replay.progress.time_spent_secs(), 60);

    let done = LessonUpdate::new(LessonStatus::Completed, 30, None).unwrap();
    let write = repo
        .upsert_lesson_progress(&key("intro"), &done, now + Duration::minutes(2))
        .await
        .unwrap();
    assert!(write.applied);
    assert_eq!(write.progress.time_spent_secs(), 90);
    assert_eq!(write.progress.attempts(), 2);
    assert_eq!(
        write.progress.completed_at(),
        Some(now + Duration::minutes(2))
    );

    repo.upsert_lesson_progress(&key("borrowing"), &done, now)
        .await
        .unwrap();
    let lessons = repo
        .lessons_for_module(
            &UserId::new("learner").unwrap(),
            &ModuleId::new("rust-basics").unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(lessons.len(), 2);
    assert_eq!(lessons[0].lesson_id().as_str(), "borrowing");
}

#[tokio::test]
async fn request_replayed_after_another_is_not_counted_again() {
    let repo = repo("memdb_lesson_ledger").await;
    let now = fixed_now();
    let update = |id: &str| {
        LessonUpdate::new(LessonStatus::InProgress, 60, None)
            .unwrap()
            .with_request_id(id)
            .unwrap()
    };

    for (i, id) in ["req-a", "req-b"].iter().enumerate() {
        let at = now + Duration::minutes(i64::try_from(i).unwrap());
        let write = repo
            .upsert_lesson_progress(&key("intro"), &update(id), at)
            .await
            .unwrap();
        assert!(write.applied);
    }

    let replay = repo
        .upsert_lesson_progress(&key("intro"), &update("req-a"), now + Duration::minutes(5))
        .await
        .unwrap();
    assert!(!replay.applied);
    assert_eq!(replay.progress.time_spent_secs(), 120);
    assert_eq!(replay.progress.attempts(), 2);
    assert_eq!(replay.progress.updated_at(), now + Duration::minutes(1));

    let other_lesson = repo
        .upsert_lesson_progress(&key("borrowing"), &update("req-a"), now)
        .await
        .unwrap();
    assert!(other_lesson.applied);
}

#[tokio::test]
async fn catalog_outlines_keep_their_order() {
    let repo = repo("memdb_catalog").await;
    let course = outline(&["warmup", "deep-dive", "reflect"]);
    repo.put_course_outline(&course).await.unwrap();
    assert_eq!(
        repo.course_outline(course.course_id()).await.unwrap(),
        Some(course.clone())
    );

    let replaced = outline(&["reflect", "warmup"]);
    repo.put_course_outline(&replaced).await.unwrap();
    assert_eq!(
        repo.course_outline(course.course_id()).await.unwrap(),
        Some(replaced)
    );

    let module = ModuleOutline::new(
        ModuleId::new("rust-basics").unwrap(),
        vec![LessonId::new("b").unwrap(), LessonId::new("a").unwrap()],
    )
    .unwrap();
    repo.put_module_outline(&module).await.unwrap();
    assert_eq!(
        repo.module_outline(module.module_id()).await.unwrap(),
        Some(module)
    );
    assert!(
        repo.module_outline(&ModuleId::new("unknown").unwrap())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn session_transitions_are_versioned() {
    let repo = repo("memdb_sessions").await;
    let course = outline(&["a", "b", "c"]);
    let now = fixed_now();
    let session = LearningSession::start(SessionId::new("s1").unwrap(), &course, now).unwrap();
    repo.insert_session(&session).await.unwrap();
    assert!(matches!(
        repo.insert_session(&session).await,
        Err(StorageError::Conflict)
    ));

    let mut advanced = session.clone();
    let step = advanced.advance(&course, now).unwrap();
    let progress = repo
        .commit_transition(&SessionTransition {
            session: &advanced,
            expected_version: session.version(),
            completed_block: step.completed_block_id(),
            progress: step.progress(),
            at: now,
        })
        .await
        .unwrap();
    assert!((progress.progress_percentage() - 33.0).abs() < f64::EPSILON);
    assert_eq!(progress.completed_blocks().len(), 1);

    let mut stale = session.clone();
    let step = stale.advance(&course, now).unwrap();
    let err = repo
        .commit_transition(&SessionTransition {
            session: &stale,
            expected_version: session.version(),
            completed_block: step.completed_block_id(),
            progress: step.progress(),
            at: now,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict));

    let stored = repo.get_session(session.id()).await.unwrap().unwrap();
    assert_eq!(stored, advanced);
    assert_eq!(
        repo.latest_active_session(course.course_id())
            .await
            .unwrap()
            .map(|s| s.id().clone()),
        Some(session.id().clone())
    );
}

#[tokio::test]
async fn course_percentage_never_regresses() {
    let repo = repo("memdb_course_max").await;
    let course = outline(&["a", "b", "c"]);
    let now = fixed_now();
    let session = LearningSession::start(SessionId::new("s-max").unwrap(), &course, now).unwrap();
    repo.insert_session(&session).await.unwrap();

    let mut next = session.clone();
    next.advance(&course, now).unwrap();
    repo.commit_transition(&SessionTransition {
        session: &next,
        expected_version: 0,
        completed_block: &BlockId::new("a").unwrap(),
        progress: 67.0,
        at: now,
    })
    .await
    .unwrap();

    let version = next.version();
    next.submit_answer(&course).unwrap();
    let progress = repo
        .commit_transition(&SessionTransition {
            session: &next,
            expected_version: version,
            completed_block: &BlockId::new("a").unwrap(),
            progress: 33.0,
            at: now,
        })
        .await
        .unwrap();
    assert!((progress.progress_percentage() - 67.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn insights_bump_the_course_counter() {
    let repo = repo("memdb_insights").await;
    let course = outline(&["a", "b"]);
    let now = fixed_now();
    let session = LearningSession::start(SessionId::new("s-ins").unwrap(), &course, now).unwrap();
    repo.insert_session(&session).await.unwrap();

    for note in ["first", "second"] {
        let text = InsightText::new(note).unwrap();
        repo.append_insight(&NewInsightRecord {
            session_id: session.id(),
            course_id: session.course_id(),
            block_id: session.current_block_id(),
            text: &text,
            created_at: now,
        })
        .await
        .unwrap();
    }

    let insights = repo.list_insights(session.id()).await.unwrap();
    assert_eq!(insights.len(), 2);
    assert_eq!(insights[0].text, "first");

    let progress = repo
        .get_course_progress(course.course_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.total_insights(), 2);

    assert!(
        repo.append_completed_block(course.course_id(), &BlockId::new("a").unwrap(), now)
            .await
            .unwrap()
    );
    assert!(
        !repo
            .append_completed_block(course.course_id(), &BlockId::new("a").unwrap(), now)
            .await
            .unwrap()
    );
}
