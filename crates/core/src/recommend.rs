//! Next-action recommendation over a module's progress.
//!
//! Pure functions; lesson ordering is supplied by the caller through
//! [`LessonHints`].

use serde::{Deserialize, Serialize};

use crate::model::{LessonId, LessonProgress, LessonStatus, ModuleProgress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    StartNextLesson,
    ContinueCurrentLesson,
    ModuleCompleted,
    ReviewCompleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub action: NextAction,
    pub current_lesson_id: Option<LessonId>,
    pub next_lesson_id: Option<LessonId>,
}

impl Recommendation {
    fn new(action: NextAction) -> Self {
        Self {
            action,
            current_lesson_id: None,
            next_lesson_id: None,
        }
    }
}

/// Lesson ids pre-resolved from the catalog's ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LessonHints {
    pub first_lesson_id: Option<LessonId>,
    pub next_lesson_id: Option<LessonId>,
}

impl LessonHints {
    /// First lesson in order, and the first one not yet completed.
    #[must_use]
    pub fn resolve(ordered_lessons: &[LessonId], progress: &ModuleProgress) -> Self {
        Self {
            first_lesson_id: ordered_lessons.first().cloned(),
            next_lesson_id: ordered_lessons
                .iter()
                .find(|id| progress.lesson_status(id) != LessonStatus::Completed)
                .cloned(),
        }
    }
}

/// Decide what the learner should do next in a module.
///
/// First match wins:
/// 1. module completed
/// 2. `current_lesson_id` is in progress: continue it
/// 3. another lesson is in progress: continue the most recently updated one
/// 4. some lessons completed: start `hints.next_lesson_id`
/// 5. nothing completed: start `hints.first_lesson_id`
#[must_use]
pub fn recommend_next_action(
    progress: &ModuleProgress,
    current_lesson_id: Option<&LessonId>,
    hints: &LessonHints,
) -> Recommendation {
    if progress.is_completed() {
        return Recommendation::new(NextAction::ModuleCompleted);
    }

    if let Some(current) = current_lesson_id {
        if progress.lesson_status(current) == LessonStatus::InProgress {
            return Recommendation {
                current_lesson_id: Some(current.clone()),
                ..Recommendation::new(NextAction::ContinueCurrentLesson)
            };
        }
    }

    if let Some(latest) = most_recent_in_progress(progress.lessons()) {
        return Recommendation {
            current_lesson_id: Some(latest.lesson_id().clone()),
            ..Recommendation::new(NextAction::ContinueCurrentLesson)
        };
    }

    // Count, not percentage: 1 of 300 completed rounds to 0% but is not a fresh start.
    let next_lesson_id = if progress.completed_lessons() > 0 {
        hints.next_lesson_id.clone()
    } else {
        hints.first_lesson_id.clone()
    };

    Recommendation {
        current_lesson_id: current_lesson_id.cloned(),
        next_lesson_id,
        ..Recommendation::new(NextAction::StartNextLesson)
    }
}

/// Suggest a completed lesson to revisit: the one completed longest ago.
///
/// Returns `None` when nothing has been completed yet.
#[must_use]
pub fn recommend_review(progress: &ModuleProgress) -> Option<Recommendation> {
    progress
        .lessons()
        .iter()
        .filter(|l| l.is_completed())
        .min_by(|a, b| {
            a.completed_at()
                .cmp(&b.completed_at())
                .then_with(|| a.lesson_id().cmp(b.lesson_id()))
        })
        .map(|lesson| Recommendation {
            current_lesson_id: Some(lesson.lesson_id().clone()),
            ..Recommendation::new(NextAction::ReviewCompleted)
        })
}

// Latest updated_at wins, then more attempts, then the smaller lesson id.
fn most_recent_in_progress(lessons: &[LessonProgress]) -> Option<&LessonProgress> {
    lessons
        .iter()
        .filter(|l| l.status() == LessonStatus::InProgress)
        .max_by(|a, b| {
            a.updated_at()
                .cmp(&b.updated_at())
                .then_with(|| a.attempts().cmp(&b.attempts()))
                .then_with(|| b.lesson_id().cmp(a.lesson_id()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LessonKey, LessonUpdate, ModuleId, UserId};
    use crate::time::fixed_now;
    use chrono::{DateTime, Duration, Utc};

    fn lesson(id: &str) -> LessonId {
        LessonId::new(id).unwrap()
    }

    fn tracked(id: &str, status: LessonStatus, at: DateTime<Utc>) -> LessonProgress {
        let key = LessonKey::new(
            UserId::new("u1").unwrap(),
            ModuleId::new("m1").unwrap(),
            lesson(id),
        );
        let mut p = LessonProgress::fresh(key, at);
        p.apply(&LessonUpdate::new(status, 10, None).unwrap(), at);
        p
    }

    fn module(total: i64, lessons: Vec<LessonProgress>) -> ModuleProgress {
        ModuleProgress::calculate(ModuleId::new("m1").unwrap(), total, lessons).unwrap()
    }

    fn ordered() -> Vec<LessonId> {
        vec![lesson("l1"), lesson("l2"), lesson("l3")]
    }

    #[test]
    fn fresh_module_starts_first_lesson() {
        let progress = module(3, Vec::new());
        let hints = LessonHints::resolve(&ordered(), &progress);
        let rec = recommend_next_action(&progress, None, &hints);
        assert_eq!(rec.action, NextAction::StartNextLesson);
        assert_eq!(rec.next_lesson_id, Some(lesson("l1")));
    }

    #[test]
    fn completed_module_is_celebrated() {
        let now = fixed_now();
        let progress = module(
            2,
            vec![
                tracked("l1", LessonStatus::Completed, now),
                tracked("l2", LessonStatus::Completed, now),
            ],
        );
        let rec = recommend_next_action(&progress, Some(&lesson("l2")), &LessonHints::default());
        assert_eq!(rec.action, NextAction::ModuleCompleted);
    }

    #[test]
    fn current_in_progress_lesson_is_continued() {
        let now = fixed_now();
        let progress = module(
            3,
            vec![
                tracked("l1", LessonStatus::InProgress, now + Duration::minutes(5)),
                tracked("l2", LessonStatus::InProgress, now),
            ],
        );
        let rec = recommend_next_action(&progress, Some(&lesson("l2")), &LessonHints::default());
        assert_eq!(rec.action, NextAction::ContinueCurrentLesson);
        assert_eq!(rec.current_lesson_id, Some(lesson("l2")));
    }

    #[test]
    fn most_recently_updated_in_progress_lesson_wins() {
        let now = fixed_now();
        let progress = module(
            3,
            vec![
                tracked("l1", LessonStatus::InProgress, now),
                tracked("l3", LessonStatus::InProgress, now + Duration::minutes(1)),
            ],
        );
        let rec = recommend_next_action(&progress, None, &LessonHints::default());
        assert_eq!(rec.action, NextAction::ContinueCurrentLesson);
        assert_eq!(rec.current_lesson_id, Some(lesson("l3")));
    }

    #[test]
    fn equal_timestamps_fall_back_to_smallest_lesson_id() {
        let now = fixed_now();
        let progress = module(
            3,
            vec![
                tracked("l2", LessonStatus::InProgress, now),
                tracked("l1", LessonStatus::InProgress, now),
            ],
        );
        let rec = recommend_next_action(&progress, None, &LessonHints::default());
        assert_eq!(rec.current_lesson_id, Some(lesson("l1")));
    }

    #[test]
    fn partially_done_module_starts_next_unfinished_lesson() {
        let now = fixed_now();
        let progress = module(3, vec![tracked("l1", LessonStatus::Completed, now)]);
        let hints = LessonHints::resolve(&ordered(), &progress);
        let rec = recommend_next_action(&progress, Some(&lesson("l1")), &hints);
        assert_eq!(rec.action, NextAction::StartNextLesson);
        assert_eq!(rec.next_lesson_id, Some(lesson("l2")));
    }

    #[test]
    fn one_completion_in_a_large_module_is_not_a_fresh_start() {
        let progress = module(300, vec![tracked("l1", LessonStatus::Completed, fixed_now())]);
        assert_eq!(progress.completion_percentage(), 0);

        let hints = LessonHints::resolve(&ordered(), &progress);
        let rec = recommend_next_action(&progress, Some(&lesson("l1")), &hints);
        assert_eq!(rec.action, NextAction::StartNextLesson);
        assert_eq!(rec.next_lesson_id, Some(lesson("l2")));
    }

    #[test]
    fn review_picks_oldest_completion() {
        let now = fixed_now();
        let progress = module(
            3,
            vec![
                tracked("l2", LessonStatus::Completed, now + Duration::days(1)),
                tracked("l1", LessonStatus::Completed, now),
                tracked("l3", LessonStatus::InProgress, now),
            ],
        );
        let rec = recommend_review(&progress).unwrap();
        assert_eq!(rec.action, NextAction::ReviewCompleted);
        assert_eq!(rec.current_lesson_id, Some(lesson("l1")));
    }

    #[test]
    fn nothing_to_review_without_completions() {
        let progress = module(2, vec![tracked("l1", LessonStatus::InProgress, fixed_now())]);
        assert!(recommend_review(&progress).is_none());
    }
}
