use std::sync::Arc;

use storage::repository::Storage;

use crate::Clock;
use crate::error::ProgressError;
use crate::lesson_tracker::LessonTracker;
use crate::modules::ModuleProgressService;
use crate::sessions::SessionAdvancer;

/// Assembles the progress services over one storage backend.
#[derive(Clone)]
pub struct ProgressServices {
    storage: Storage,
    lessons: Arc<LessonTracker>,
    modules: Arc<ModuleProgressService>,
    sessions: Arc<SessionAdvancer>,
}

impl ProgressServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError` if the pool cannot be opened or migrations fail.
    pub async fn new_sqlite(db_url: &str, clock: Clock) -> Result<Self, ProgressError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(storage, clock))
    }

    #[must_use]
    pub fn in_memory(clock: Clock) -> Self {
        Self::from_storage(Storage::in_memory(), clock)
    }

    #[must_use]
    pub fn from_storage(storage: Storage, clock: Clock) -> Self {
        let lessons = Arc::new(LessonTracker::new(clock, Arc::clone(&storage.lessons)));
        let modules = Arc::new(ModuleProgressService::new(
            Arc::clone(&storage.lessons),
            Arc::clone(&storage.catalog),
        ));
        let sessions = Arc::new(SessionAdvancer::new(
            clock,
            Arc::clone(&storage.sessions),
            Arc::clone(&storage.courses),
            Arc::clone(&storage.catalog),
        ));
        Self {
            storage,
            lessons,
            modules,
            sessions,
        }
    }

    /// Underlying repositories, for catalog publishing.
    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    #[must_use]
    pub fn lessons(&self) -> Arc<LessonTracker> {
        Arc::clone(&self.lessons)
    }

    #[must_use]
    pub fn modules(&self) -> Arc<ModuleProgressService> {
        Arc::clone(&self.modules)
    }

    #[must_use]
    pub fn sessions(&self) -> Arc<SessionAdvancer> {
        Arc::clone(&self.sessions)
    }
}
