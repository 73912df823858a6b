mod course;
mod ids;
mod insight;
mod lesson;
mod module;
mod session;

pub use ids::{BlockId, CourseId, IdError, LessonId, ModuleId, SessionId, UserId};

pub use course::{
    Block, BlockKind, CourseError, CourseOutline, UserCourseProgress, block_percentage,
};
pub use insight::{Insight, InsightError, InsightText};
pub use lesson::{LessonKey, LessonProgress, LessonProgressError, LessonStatus, LessonUpdate};
pub use module::{
    ModuleOutline, ModuleProgress, ModuleProgressError, ProgressLevel, completion_percentage,
    format_time_spent,
};
pub use session::{LearningSession, SessionState, SessionStateError, SessionStep};
