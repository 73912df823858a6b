#![forbid(unsafe_code)]

pub mod error;
pub mod lesson_tracker;
pub mod modules;
pub mod progress_services;
pub mod sessions;

pub use learn_core::Clock;

pub use error::{ErrorKind, ProgressError};
pub use lesson_tracker::{LessonTracker, TrackProgress};
pub use modules::{ModuleOverview, ModuleProgressService};
pub use progress_services::ProgressServices;
pub use sessions::{AdvanceOutcome, SessionAdvancer};
