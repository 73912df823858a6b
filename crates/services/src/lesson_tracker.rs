use std::sync::Arc;

use chrono::{DateTime, Utc};
use learn_core::model::{LessonId, LessonKey, LessonProgress, LessonStatus, LessonUpdate, ModuleId, UserId};
use serde::Deserialize;
use storage::repository::LessonProgressRepository;
use tracing::{debug, info, warn};

use crate::Clock;
use crate::error::ProgressError;

/// Raw tracking request as it arrives from a handler.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackProgress {
    pub user_id: String,
    pub module_id: String,
    pub lesson_id: String,
    pub status: String,
    pub time_spent_secs: i64,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Client-generated key; a retried request with the same key is applied once.
    #[serde(default)]
    pub request_id: Option<String>,
}

impl TrackProgress {
    /// Parse and validate every field.
    ///
    /// # Errors
    ///
    /// Returns a validation-kind `ProgressError` for blank ids, an unknown
    /// status, negative time or a blank request id.
    pub fn validate(&self) -> Result<(LessonKey, LessonUpdate), ProgressError> {
        let key = LessonKey::new(
            UserId::new(self.user_id.as_str())?,
            ModuleId::new(self.module_id.as_str())?,
            LessonId::new(self.lesson_id.as_str())?,
        );
        let status: LessonStatus = self.status.parse()?;
        let mut update = LessonUpdate::new(status, self.time_spent_secs, self.completed_at)?;
        if let Some(request_id) = &self.request_id {
            update = update.with_request_id(request_id.as_str())?;
        }
        Ok((key, update))
    }
}

/// Records lesson activity for a learner.
#[derive(Clone)]
pub struct LessonTracker {
    clock: Clock,
    lessons: Arc<dyn LessonProgressRepository>,
}

impl LessonTracker {
    #[must_use]
    pub fn new(clock: Clock, lessons: Arc<dyn LessonProgressRepository>) -> Self {
        Self { clock, lessons }
    }

    /// Validate and apply a tracking request, returning the stored record.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError` if validation fails or the store rejects the write.
    pub async fn track_progress(
        &self,
        request: &TrackProgress,
    ) -> Result<LessonProgress, ProgressError> {
        let (key, update) = request.validate()?;
        let write = self
            .lessons
            .upsert_lesson_progress(&key, &update, self.clock.now())
            .await?;

        if write.applied {
            info!(
                user_id = %key.user_id,
                module_id = %key.module_id,
                lesson_id = %key.lesson_id,
                status = %write.progress.status(),
                attempts = write.progress.attempts(),
                "lesson progress tracked"
            );
        } else {
            warn!(
                lesson_id = %key.lesson_id,
                request_id = update.request_id().unwrap_or_default(),
                "duplicate tracking request ignored"
            );
        }
        Ok(write.progress)
    }

    /// # Errors
    ///
    /// Returns `ProgressError` on storage failures. Untracked lessons are `Ok(None)`.
    pub async fn get_lesson_progress(
        &self,
        key: &LessonKey,
    ) -> Result<Option<LessonProgress>, ProgressError> {
        debug!(lesson_id = %key.lesson_id, "loading lesson progress");
        Ok(self.lessons.get_lesson_progress(key).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use learn_core::time::fixed_now;
    use storage::repository::InMemoryRepository;

    use crate::error::ErrorKind;

    fn request(status: &str, secs: i64) -> TrackProgress {
        TrackProgress {
            user_id: "u1".into(),
            module_id: "m1".into(),
            lesson_id: "l1".into(),
            status: status.into(),
            time_spent_secs: secs,
            completed_at: None,
            request_id: None,
        }
    }

    fn tracker() -> LessonTracker {
        LessonTracker::new(
            Clock::fixed(fixed_now()),
            Arc::new(InMemoryRepository::new()),
        )
    }

    #[test]
    fn validation_rejects_bad_input() {
        let mut bad = request("in_progress", 10);
        bad.user_id = "  ".into();
        assert_eq!(bad.validate().unwrap_err().kind(), ErrorKind::Validation);

        assert_eq!(
            request("paused", 10).validate().unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            request("in_progress", -1).validate().unwrap_err().kind(),
            ErrorKind::Validation
        );

        let mut blank_key = request("in_progress", 1);
        blank_key.request_id = Some(String::new());
        assert!(blank_key.validate().is_err());
    }

    #[test]
    fn request_deserializes_from_json() {
        let parsed: TrackProgress = serde_json::from_str(
            r#"{"user_id":"u1","module_id":"m1","lesson_id":"l1","status":"completed","time_spent_secs":90}"#,
        )
        .unwrap();
        assert_eq!(parsed.status, "completed");
        assert!(parsed.request_id.is_none());
    }

    #[tokio::test]
    async fn first_completion_stamps_now() {
        let tracker = tracker();
        let progress = tracker
            .track_progress(&request("completed", 120))
            .await
            .unwrap();
        assert_eq!(progress.status(), LessonStatus::Completed);
        assert_eq!(progress.completed_at(), Some(fixed_now()));
        assert_eq!(progress.attempts(), 1);
        assert_eq!(progress.time_spent_secs(), 120);
    }

    #[tokio::test]
    async fn unknown_lesson_reads_as_none() {
        let tracker = tracker();
        let key = request("in_progress", 0).validate().unwrap().0;
        assert!(tracker.get_lesson_progress(&key).await.unwrap().is_none());
    }
}
