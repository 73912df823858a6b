use std::sync::Arc;

use learn_core::model::{LessonId, ModuleId, ModuleOutline, ModuleProgress, UserId};
use learn_core::recommend::{
    LessonHints, Recommendation, recommend_next_action, recommend_review,
};
use serde::Serialize;
use storage::repository::{CatalogRepository, LessonProgressRepository};
use tracing::debug;

use crate::error::ProgressError;

/// Module progress together with what to do next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleOverview {
    pub progress: ModuleProgress,
    pub recommendation: Recommendation,
    pub review: Option<Recommendation>,
}

/// Read-only aggregation over a learner's lesson records.
#[derive(Clone)]
pub struct ModuleProgressService {
    lessons: Arc<dyn LessonProgressRepository>,
    catalog: Arc<dyn CatalogRepository>,
}

impl ModuleProgressService {
    #[must_use]
    pub fn new(
        lessons: Arc<dyn LessonProgressRepository>,
        catalog: Arc<dyn CatalogRepository>,
    ) -> Self {
        Self { lessons, catalog }
    }

    /// Aggregate progress for a module whose size the caller already knows.
    ///
    /// # Errors
    ///
    /// Returns a configuration-kind `ProgressError` when `total_lessons <= 0`.
    pub async fn get_module_progress(
        &self,
        user_id: &UserId,
        module_id: &ModuleId,
        total_lessons: i64,
    ) -> Result<ModuleProgress, ProgressError> {
        let lessons = self.lessons.lessons_for_module(user_id, module_id).await?;
        debug!(
            user_id = %user_id,
            module_id = %module_id,
            tracked = lessons.len(),
            "aggregating module progress"
        );
        Ok(ModuleProgress::calculate(
            module_id.clone(),
            total_lessons,
            lessons,
        )?)
    }

    /// Progress, next action and review suggestion using the catalog's lesson order.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotFound` for modules missing from the catalog and
    /// a configuration-kind error for modules without lessons.
    pub async fn module_overview(
        &self,
        user_id: &UserId,
        module_id: &ModuleId,
        current_lesson_id: Option<&LessonId>,
    ) -> Result<ModuleOverview, ProgressError> {
        let outline = self.outline(module_id).await?;
        let progress = self
            .get_module_progress(user_id, module_id, total_of(&outline))
            .await?;
        let hints = LessonHints::resolve(outline.lessons(), &progress);
        let recommendation = recommend_next_action(&progress, current_lesson_id, &hints);
        let review = recommend_review(&progress);
        Ok(ModuleOverview {
            progress,
            recommendation,
            review,
        })
    }

    /// Completed lesson worth revisiting, if any.
    ///
    /// # Errors
    ///
    /// Same as [`Self::module_overview`].
    pub async fn review_suggestion(
        &self,
        user_id: &UserId,
        module_id: &ModuleId,
    ) -> Result<Option<Recommendation>, ProgressError> {
        let outline = self.outline(module_id).await?;
        let progress = self
            .get_module_progress(user_id, module_id, total_of(&outline))
            .await?;
        Ok(recommend_review(&progress))
    }

    async fn outline(&self, module_id: &ModuleId) -> Result<ModuleOutline, ProgressError> {
        self.catalog
            .module_outline(module_id)
            .await?
            .ok_or_else(|| ProgressError::not_found("module", module_id))
    }
}

fn total_of(outline: &ModuleOutline) -> i64 {
    i64::try_from(outline.total_lessons()).unwrap_or(i64::MAX)
}
