use chrono::Duration;
use learn_core::model::{LessonId, LessonStatus, ModuleId, ModuleOutline, ProgressLevel, UserId};
use learn_core::recommend::NextAction;
use learn_core::time::fixed_now;
use services::{Clock, ErrorKind, ProgressServices, TrackProgress};
use storage::repository::{CatalogRepository, Storage};

fn track(lesson: &str, status: &str, secs: i64) -> TrackProgress {
    TrackProgress {
        user_id: "learner".into(),
        module_id: "rust-basics".into(),
        lesson_id: lesson.into(),
        status: status.into(),
        time_spent_secs: secs,
        completed_at: None,
        request_id: None,
    }
}

fn user() -> UserId {
    UserId::new("learner").unwrap()
}

fn module() -> ModuleId {
    ModuleId::new("rust-basics").unwrap()
}

async fn publish_module(services: &ProgressServices, lessons: &[&str]) {
    let outline = ModuleOutline::new(
        module(),
        lessons.iter().map(|l| LessonId::new(*l).unwrap()).collect(),
    )
    .unwrap();
    services
        .storage()
        .catalog
        .put_module_outline(&outline)
        .await
        .unwrap();
}

#[tokio::test]
async fn half_finished_module_reports_progress_and_next_lesson() {
    let services = ProgressServices::in_memory(Clock::fixed(fixed_now()));
    publish_module(&services, &["intro", "ownership", "borrowing", "lifetimes"]).await;
    let tracker = services.lessons();

    tracker
        .track_progress(&track("intro", "completed", 60))
        .await
        .unwrap();
    tracker
        .track_progress(&track("ownership", "completed", 90))
        .await
        .unwrap();
    tracker
        .track_progress(&track("borrowing", "not_started", 30))
        .await
        .unwrap();

    let progress = services
        .modules()
        .get_module_progress(&user(), &module(), 4)
        .await
        .unwrap();
    assert_eq!(progress.completed_lessons(), 2);
    assert_eq!(progress.completion_percentage(), 50);
    assert!(!progress.is_completed());
    assert_eq!(progress.total_time_spent_secs(), 180);
    assert_eq!(progress.formatted_time_spent(), "3m");
    assert_eq!(progress.remaining_lessons(), 2);
    assert_eq!(progress.progress_level(), ProgressLevel::Halfway);

    let overview = services
        .modules()
        .module_overview(&user(), &module(), None)
        .await
        .unwrap();
    assert_eq!(overview.recommendation.action, NextAction::StartNextLesson);
    assert_eq!(
        overview.recommendation.next_lesson_id,
        Some(LessonId::new("borrowing").unwrap())
    );
    assert_eq!(
        overview.review.map(|r| r.current_lesson_id),
        Some(Some(LessonId::new("intro").unwrap()))
    );
}

#[tokio::test]
async fn in_progress_lesson_is_continued() {
    let services = ProgressServices::in_memory(Clock::fixed(fixed_now()));
    publish_module(&services, &["intro", "ownership"]).await;
    services
        .lessons()
        .track_progress(&track("ownership", "in_progress", 45))
        .await
        .unwrap();

    let overview = services
        .modules()
        .module_overview(&user(), &module(), Some(&LessonId::new("intro").unwrap()))
        .await
        .unwrap();
    assert_eq!(
        overview.recommendation.action,
        NextAction::ContinueCurrentLesson
    );
    assert_eq!(
        overview.recommendation.current_lesson_id,
        Some(LessonId::new("ownership").unwrap())
    );
    assert!(overview.review.is_none());
}

#[tokio::test]
async fn finished_module_is_reported_complete() {
    let services = ProgressServices::in_memory(Clock::fixed(fixed_now()));
    publish_module(&services, &["only"]).await;
    services
        .lessons()
        .track_progress(&track("only", "completed", 10))
        .await
        .unwrap();

    let overview = services
        .modules()
        .module_overview(&user(), &module(), None)
        .await
        .unwrap();
    assert!(overview.progress.is_completed());
    assert_eq!(overview.progress.progress_level(), ProgressLevel::Complete);
    assert_eq!(overview.recommendation.action, NextAction::ModuleCompleted);
}

#[tokio::test]
async fn zero_total_lessons_is_a_configuration_error() {
    let services = ProgressServices::in_memory(Clock::fixed(fixed_now()));
    let err = services
        .modules()
        .get_module_progress(&user(), &module(), 0)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = services
        .modules()
        .module_overview(&user(), &ModuleId::new("missing").unwrap(), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn retried_request_is_applied_once() {
    let services = ProgressServices::in_memory(Clock::fixed(fixed_now()));
    let mut request = track("intro", "in_progress", 40);
    request.request_id = Some("req-7".into());

    services.lessons().track_progress(&request).await.unwrap();
    let again = services.lessons().track_progress(&request).await.unwrap();
    assert_eq!(again.time_spent_secs(), 40);
    assert_eq!(again.attempts(), 1);

    request.request_id = Some("req-8".into());
    let next = services.lessons().track_progress(&request).await.unwrap();
    assert_eq!(next.time_spent_secs(), 80);
    assert_eq!(next.attempts(), 2);

    request.request_id = Some("req-7".into());
    let late_retry = services.lessons().track_progress(&request).await.unwrap();
    assert_eq!(late_retry.time_spent_secs(), 80);
    assert_eq!(late_retry.attempts(), 2);
}

#[tokio::test]
async fn recompleting_a_lesson_restamps_completion() {
    let first = fixed_now();
    let later = first + Duration::days(2);
    let storage = Storage::in_memory();

    let early = ProgressServices::from_storage(storage.clone(), Clock::fixed(first));
    early
        .lessons()
        .track_progress(&track("intro", "completed", 60))
        .await
        .unwrap();

    let late = ProgressServices::from_storage(
        storage,
        Clock::fixed(first).advanced_by(Duration::days(2)),
    );
    let progress = late
        .lessons()
        .track_progress(&track("intro", "completed", 15))
        .await
        .unwrap();
    assert_eq!(progress.completed_at(), Some(later));
    assert_eq!(progress.time_spent_secs(), 75);

    let reopened = late
        .lessons()
        .track_progress(&track("intro", "in_progress", 0))
        .await
        .unwrap();
    assert_eq!(reopened.status(), LessonStatus::InProgress);
    assert!(reopened.completed_at().is_none());
}

#[tokio::test]
async fn sqlite_backend_tracks_the_same_way() {
    let services = ProgressServices::new_sqlite(
        "sqlite:file:memdb_services_lessons?mode=memory&cache=shared",
        Clock::fixed(fixed_now()),
    )
    .await
    .expect("connect sqlite");
    publish_module(&services, &["intro", "ownership"]).await;

    let mut request = track("intro", "completed", 100);
    request.request_id = Some("once".into());
    services.lessons().track_progress(&request).await.unwrap();
    services.lessons().track_progress(&request).await.unwrap();

    let overview = services
        .modules()
        .module_overview(&user(), &module(), None)
        .await
        .unwrap();
    assert_eq!(overview.progress.completion_percentage(), 50);
    assert_eq!(overview.progress.total_time_spent_secs(), 100);
    assert_eq!(
        overview.recommendation.next_lesson_id,
        Some(LessonId::new("ownership").unwrap())
    );
}
