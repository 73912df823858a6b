use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::{BlockId, CourseId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum CourseError {
    #[error("course {0} has no blocks")]
    NoBlocks(CourseId),

    #[error("block {block_id} is not part of course {course_id}")]
    UnknownBlock {
        course_id: CourseId,
        block_id: BlockId,
    },

    #[error("course outline lists block {0} more than once")]
    DuplicateBlock(BlockId),

    #[error("invalid block kind: {0}")]
    InvalidBlockKind(String),

    #[error("progress percentage must be within 0..=100, got {0}")]
    InvalidPercentage(f64),
}

//
// ─── BLOCKS ────────────────────────────────────────────────────────────────────
//

/// Role of a block in the course flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Introduction,
    Learning,
    Practice,
    Reflection,
}

impl BlockKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BlockKind::Introduction => "introduction",
            BlockKind::Learning => "learning",
            BlockKind::Practice => "practice",
            BlockKind::Reflection => "reflection",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockKind {
    type Err = CourseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "introduction" => Ok(Self::Introduction),
            "learning" => Ok(Self::Learning),
            "practice" => Ok(Self::Practice),
            "reflection" => Ok(Self::Reflection),
            other => Err(CourseError::InvalidBlockKind(other.to_owned())),
        }
    }
}

/// One unit of progression inside a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub kind: BlockKind,
    pub title: String,
    pub question_count: u32,
}

/// Ordered block list of a course, as published by the catalog.
///
/// An outline may be empty; sessions refuse to start or advance on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseOutline {
    course_id: CourseId,
    blocks: Vec<Block>,
}

impl CourseOutline {
    /// # Errors
    ///
    /// Returns `CourseError::DuplicateBlock` if a block id repeats.
    pub fn new(course_id: CourseId, blocks: Vec<Block>) -> Result<Self, CourseError> {
        let mut seen = BTreeSet::new();
        for block in &blocks {
            if !seen.insert(&block.id) {
                return Err(CourseError::DuplicateBlock(block.id.clone()));
            }
        }
        Ok(Self { course_id, blocks })
    }

    #[must_use]
    pub fn course_id(&self) -> &CourseId {
        &self.course_id
    }

    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// # Errors
    ///
    /// Returns `CourseError::NoBlocks` for an empty outline.
    pub fn first_block(&self) -> Result<&Block, CourseError> {
        self.blocks
            .first()
            .ok_or_else(|| CourseError::NoBlocks(self.course_id.clone()))
    }

    /// Position of a block in the course order.
    ///
    /// # Errors
    ///
    /// Returns `CourseError::NoBlocks` for an empty outline and
    /// `CourseError::UnknownBlock` if the block is not listed.
    pub fn position(&self, block_id: &BlockId) -> Result<usize, CourseError> {
        if self.blocks.is_empty() {
            return Err(CourseError::NoBlocks(self.course_id.clone()));
        }
        self.blocks
            .iter()
            .position(|b| &b.id == block_id)
            .ok_or_else(|| CourseError::UnknownBlock {
                course_id: self.course_id.clone(),
                block_id: block_id.clone(),
            })
    }
}

/// `round(done / total * 100)` as a float percentage; `0.0` for an empty course.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn block_percentage(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let done = done.min(total);
    (done as f64 * 100.0 / total as f64).round()
}

//
// ─── COURSE PROGRESS ───────────────────────────────────────────────────────────
//

/// Aggregate progress of a course across all of its sessions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserCourseProgress {
    course_id: CourseId,
    completed_blocks: BTreeSet<BlockId>,
    total_insights: u32,
    progress_percentage: f64,
    last_active_at: DateTime<Utc>,
}

impl UserCourseProgress {
    #[must_use]
    pub fn new(course_id: CourseId, now: DateTime<Utc>) -> Self {
        Self {
            course_id,
            completed_blocks: BTreeSet::new(),
            total_insights: 0,
            progress_percentage: 0.0,
            last_active_at: now,
        }
    }

    /// # Errors
    ///
    /// Returns `CourseError::InvalidPercentage` if the stored value is out of range.
    pub fn from_persisted(
        course_id: CourseId,
        completed_blocks: BTreeSet<BlockId>,
        total_insights: u32,
        progress_percentage: f64,
        last_active_at: DateTime<Utc>,
    ) -> Result<Self, CourseError> {
        if !(0.0..=100.0).contains(&progress_percentage) {
            return Err(CourseError::InvalidPercentage(progress_percentage));
        }
        Ok(Self {
            course_id,
            completed_blocks,
            total_insights,
            progress_percentage,
            last_active_at,
        })
    }

    /// Record a finished block. Returns `false` if it was already recorded.
    pub fn mark_block_completed(&mut self, block_id: BlockId, now: DateTime<Utc>) -> bool {
        self.last_active_at = now;
        self.completed_blocks.insert(block_id)
    }

    /// Raise the stored percentage; lower values are ignored.
    pub fn raise_percentage(&mut self, percentage: f64) {
        let clamped = percentage.clamp(0.0, 100.0);
        if clamped > self.progress_percentage {
            self.progress_percentage = clamped;
        }
    }

    pub fn record_insight(&mut self, now: DateTime<Utc>) {
        self.total_insights = self.total_insights.saturating_add(1);
        self.last_active_at = now;
    }

    #[must_use]
    pub fn course_id(&self) -> &CourseId {
        &self.course_id
    }

    #[must_use]
    pub fn completed_blocks(&self) -> &BTreeSet<BlockId> {
        &self.completed_blocks
    }

    #[must_use]
    pub fn total_insights(&self) -> u32 {
        self.total_insights
    }

    #[must_use]
    pub fn progress_percentage(&self) -> f64 {
        self.progress_percentage
    }

    #[must_use]
    pub fn last_active_at(&self) -> DateTime<Utc> {
        self.last_active_at
    }
}
