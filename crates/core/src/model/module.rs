use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::model::ids::{LessonId, ModuleId};
use crate::model::lesson::{LessonProgress, LessonStatus};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModuleProgressError {
    #[error("total lessons must be > 0, got {0}")]
    InvalidTotalLessons(i64),

    #[error("lesson {lesson_id} belongs to module {found}, not {expected}")]
    ModuleMismatch {
        lesson_id: LessonId,
        expected: ModuleId,
        found: ModuleId,
    },

    #[error("module outline lists lesson {0} more than once")]
    DuplicateLesson(LessonId),
}

//
// ─── PROGRESS LEVEL ────────────────────────────────────────────────────────────
//

/// Coarse classification of a completion percentage.
///
/// Ordered: a higher percentage never maps to a lower level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressLevel {
    /// 0%
    None,
    /// 1–49%
    Started,
    /// 50–74%
    Halfway,
    /// 75–99%
    NearComplete,
    /// 100%
    Complete,
}

impl ProgressLevel {
    #[must_use]
    pub fn from_percentage(percentage: u8) -> Self {
        match percentage {
            0 => Self::None,
            1..=49 => Self::Started,
            50..=74 => Self::Halfway,
            75..=99 => Self::NearComplete,
            _ => Self::Complete,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Started => "started",
            Self::Halfway => "halfway",
            Self::NearComplete => "near_complete",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for ProgressLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── MODULE OUTLINE ────────────────────────────────────────────────────────────
//

/// Ordered lesson list of a module, as published by the course catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleOutline {
    module_id: ModuleId,
    lessons: Vec<LessonId>,
}

impl ModuleOutline {
    /// # Errors
    ///
    /// Returns `ModuleProgressError::DuplicateLesson` if a lesson id repeats.
    pub fn new(module_id: ModuleId, lessons: Vec<LessonId>) -> Result<Self, ModuleProgressError> {
        for (i, lesson) in lessons.iter().enumerate() {
            if lessons[..i].contains(lesson) {
                return Err(ModuleProgressError::DuplicateLesson(lesson.clone()));
            }
        }
        Ok(Self { module_id, lessons })
    }

    #[must_use]
    pub fn module_id(&self) -> &ModuleId {
        &self.module_id
    }

    #[must_use]
    pub fn lessons(&self) -> &[LessonId] {
        &self.lessons
    }

    #[must_use]
    pub fn total_lessons(&self) -> usize {
        self.lessons.len()
    }
}

//
// ─── MODULE PROGRESS ───────────────────────────────────────────────────────────
//

/// Module-level aggregate derived from lesson records on every read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleProgress {
    module_id: ModuleId,
    completed_lessons: u32,
    total_lessons: u32,
    completion_percentage: u8,
    is_completed: bool,
    total_time_spent_secs: u64,
    formatted_time_spent: String,
    remaining_lessons: u32,
    progress_level: ProgressLevel,
    #[serde(skip)]
    lessons: Vec<LessonProgress>,
}

impl ModuleProgress {
    /// Aggregate the tracked lessons of one module.
    ///
    /// `total_lessons` comes from the catalog; tracked rows beyond it do not push
    /// the percentage past 100.
    ///
    /// # Errors
    ///
    /// Returns `ModuleProgressError::InvalidTotalLessons` when `total_lessons <= 0`
    /// and `ModuleProgressError::ModuleMismatch` if a record belongs elsewhere.
    pub fn calculate(
        module_id: ModuleId,
        total_lessons: i64,
        lessons: Vec<LessonProgress>,
    ) -> Result<Self, ModuleProgressError> {
        let total = u32::try_from(total_lessons)
            .ok()
            .filter(|t| *t > 0)
            .ok_or(ModuleProgressError::InvalidTotalLessons(total_lessons))?;

        if let Some(foreign) = lessons.iter().find(|l| l.key().module_id != module_id) {
            return Err(ModuleProgressError::ModuleMismatch {
                lesson_id: foreign.lesson_id().clone(),
                expected: module_id,
                found: foreign.key().module_id.clone(),
            });
        }

        let completed = lessons.iter().filter(|l| l.is_completed()).count();
        let completed = u32::try_from(completed).unwrap_or(u32::MAX);
        let total_time_spent_secs = lessons
            .iter()
            .fold(0_u64, |acc, l| acc.saturating_add(l.time_spent_secs()));
        let completion_percentage = completion_percentage(completed, total);

        Ok(Self {
            module_id,
            completed_lessons: completed,
            total_lessons: total,
            completion_percentage,
            is_completed: completed >= total,
            total_time_spent_secs,
            formatted_time_spent: format_time_spent(total_time_spent_secs),
            remaining_lessons: total.saturating_sub(completed),
            progress_level: ProgressLevel::from_percentage(completion_percentage),
            lessons,
        })
    }

    #[must_use]
    pub fn module_id(&self) -> &ModuleId {
        &self.module_id
    }

    #[must_use]
    pub fn completed_lessons(&self) -> u32 {
        self.completed_lessons
    }

    #[must_use]
    pub fn total_lessons(&self) -> u32 {
        self.total_lessons
    }

    #[must_use]
    pub fn completion_percentage(&self) -> u8 {
        self.completion_percentage
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.is_completed
    }

    #[must_use]
    pub fn total_time_spent_secs(&self) -> u64 {
        self.total_time_spent_secs
    }

    #[must_use]
    pub fn formatted_time_spent(&self) -> &str {
        &self.formatted_time_spent
    }

    #[must_use]
    pub fn remaining_lessons(&self) -> u32 {
        self.remaining_lessons
    }

    #[must_use]
    pub fn progress_level(&self) -> ProgressLevel {
        self.progress_level
    }

    /// Lesson records the aggregate was computed from.
    #[must_use]
    pub fn lessons(&self) -> &[LessonProgress] {
        &self.lessons
    }

    #[must_use]
    pub fn lesson(&self, lesson_id: &LessonId) -> Option<&LessonProgress> {
        self.lessons.iter().find(|l| l.lesson_id() == lesson_id)
    }

    #[must_use]
    pub fn lesson_status(&self, lesson_id: &LessonId) -> LessonStatus {
        self.lesson(lesson_id)
            .map_or(LessonStatus::NotStarted, LessonProgress::status)
    }
}

/// `round(completed / total * 100)` with halves rounded up, capped at 100.
#[must_use]
pub fn completion_percentage(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = u64::from(completed.min(total));
    let total = u64::from(total);
    let pct = (completed * 200 + total) / (total * 2);
    u8::try_from(pct.min(100)).unwrap_or(100)
}

/// Human-readable duration: `"1h 30m"`, `"2h"`, `"45m"`, and `"0m"` for zero.
#[must_use]
pub fn format_time_spent(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    match (hours, minutes) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}m"),
    }
}
