use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::{LessonId, ModuleId, UserId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LessonProgressError {
    #[error("invalid lesson status: {0}")]
    InvalidStatus(String),

    #[error("time spent cannot be negative: {0}")]
    NegativeTimeSpent(i64),

    #[error("request id cannot be empty")]
    EmptyRequestId,

    #[error("completed_at must be set if and only if the lesson is completed")]
    CompletionMismatch,
}

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

/// Completion status of a single lesson for a single user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl LessonStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LessonStatus::NotStarted => "not_started",
            LessonStatus::InProgress => "in_progress",
            LessonStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for LessonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LessonStatus {
    type Err = LessonProgressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(LessonProgressError::InvalidStatus(other.to_owned())),
        }
    }
}

//
// ─── KEY & UPDATE ──────────────────────────────────────────────────────────────
//

/// Natural key of a lesson progress record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LessonKey {
    pub user_id: UserId,
    pub module_id: ModuleId,
    pub lesson_id: LessonId,
}

impl LessonKey {
    #[must_use]
    pub fn new(user_id: UserId, module_id: ModuleId, lesson_id: LessonId) -> Self {
        Self {
            user_id,
            module_id,
            lesson_id,
        }
    }
}

/// A validated progress report for one lesson.
///
/// `time_spent_secs` is a delta added to the stored total, never a replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonUpdate {
    status: LessonStatus,
    time_spent_secs: u64,
    completed_at: Option<DateTime<Utc>>,
    request_id: Option<String>,
}

impl LessonUpdate {
    /// Build an update from raw inputs.
    ///
    /// A supplied `completed_at` is ignored unless `status` is `Completed`.
    ///
    /// # Errors
    ///
    /// Returns `LessonProgressError::NegativeTimeSpent` if `time_spent_secs < 0`.
    pub fn new(
        status: LessonStatus,
        time_spent_secs: i64,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<Self, LessonProgressError> {
        let time_spent_secs = u64::try_from(time_spent_secs)
            .map_err(|_| LessonProgressError::NegativeTimeSpent(time_spent_secs))?;
        let completed_at = match status {
            LessonStatus::Completed => completed_at,
            LessonStatus::NotStarted | LessonStatus::InProgress => None,
        };
        Ok(Self {
            status,
            time_spent_secs,
            completed_at,
            request_id: None,
        })
    }

    /// Attach a request-scoped idempotency key.
    ///
    /// # Errors
    ///
    /// Returns `LessonProgressError::EmptyRequestId` for blank keys.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Result<Self, LessonProgressError> {
        let request_id = request_id.into();
        if request_id.trim().is_empty() {
            return Err(LessonProgressError::EmptyRequestId);
        }
        self.request_id = Some(request_id);
        Ok(self)
    }

    #[must_use]
    pub fn status(&self) -> LessonStatus {
        self.status
    }

    #[must_use]
    pub fn time_spent_secs(&self) -> u64 {
        self.time_spent_secs
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Completion timestamp this update writes.
    ///
    /// Completed updates are stamped with the supplied time or `now`; every
    /// other status clears the timestamp.
    #[must_use]
    pub fn resolved_completed_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.status {
            LessonStatus::Completed => Some(self.completed_at.unwrap_or(now)),
            LessonStatus::NotStarted | LessonStatus::InProgress => None,
        }
    }
}

//
// ─── LESSON PROGRESS ───────────────────────────────────────────────────────────
//

/// Tracked progress of one user through one lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LessonProgress {
    #[serde(flatten)]
    key: LessonKey,
    status: LessonStatus,
    time_spent_secs: u64,
    completed_at: Option<DateTime<Utc>>,
    attempts: u32,
    updated_at: DateTime<Utc>,
}

impl LessonProgress {
    /// A record that has never been tracked.
    #[must_use]
    pub fn fresh(key: LessonKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            status: LessonStatus::NotStarted,
            time_spent_secs: 0,
            completed_at: None,
            attempts: 0,
            updated_at: now,
        }
    }

    /// Rehydrate a record from storage.
    ///
    /// # Errors
    ///
    /// Returns `LessonProgressError::CompletionMismatch` if `completed_at` and
    /// `status` disagree.
    pub fn from_persisted(
        key: LessonKey,
        status: LessonStatus,
        time_spent_secs: u64,
        completed_at: Option<DateTime<Utc>>,
        attempts: u32,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, LessonProgressError> {
        if completed_at.is_some() != (status == LessonStatus::Completed) {
            return Err(LessonProgressError::CompletionMismatch);
        }
        Ok(Self {
            key,
            status,
            time_spent_secs,
            completed_at,
            attempts,
            updated_at,
        })
    }

    /// Apply a tracked update.
    ///
    /// Replayed request ids are filtered by the repository before this is
    /// called, since that needs every id ever applied to the lesson.
    pub fn apply(&mut self, update: &LessonUpdate, now: DateTime<Utc>) {
        self.status = update.status();
        self.time_spent_secs = self.time_spent_secs.saturating_add(update.time_spent_secs());
        self.attempts = self.attempts.saturating_add(1);
        self.completed_at = update.resolved_completed_at(now);
        self.updated_at = now;
    }

    #[must_use]
    pub fn key(&self) -> &LessonKey {
        &self.key
    }

    #[must_use]
    pub fn lesson_id(&self) -> &LessonId {
        &self.key.lesson_id
    }

    #[must_use]
    pub fn status(&self) -> LessonStatus {
        self.status
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == LessonStatus::Completed
    }

    #[must_use]
    pub fn time_spent_secs(&self) -> u64 {
        self.time_spent_secs
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
