//! JSON catalog documents published by the content generator.

use std::path::Path;

use anyhow::Context;
use learn_core::model::{Block, CourseId, CourseOutline, LessonId, ModuleId, ModuleOutline};
use serde::Deserialize;
use storage::repository::Storage;

#[derive(Debug, Deserialize)]
struct CourseEntry {
    id: CourseId,
    blocks: Vec<Block>,
}

#[derive(Debug, Deserialize)]
struct ModuleEntry {
    id: ModuleId,
    lessons: Vec<LessonId>,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    courses: Vec<CourseEntry>,
    #[serde(default)]
    modules: Vec<ModuleEntry>,
}

/// Validated outlines ready to publish.
#[derive(Debug, Default)]
pub struct Catalog {
    pub courses: Vec<CourseOutline>,
    pub modules: Vec<ModuleOutline>,
}

impl Catalog {
    /// Parse and validate a catalog document.
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let doc: CatalogDocument = serde_json::from_str(raw).context("parsing catalog")?;
        let mut catalog = Self::default();
        for course in doc.courses {
            let id = course.id.clone();
            catalog.courses.push(
                CourseOutline::new(course.id, course.blocks)
                    .with_context(|| format!("course {id}"))?,
            );
        }
        for module in doc.modules {
            let id = module.id.clone();
            catalog.modules.push(
                ModuleOutline::new(module.id, module.lessons)
                    .with_context(|| format!("module {id}"))?,
            );
        }
        Ok(catalog)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_json(&raw)
    }

    /// Replace the stored outlines with these.
    pub async fn publish(&self, storage: &Storage) -> anyhow::Result<()> {
        for course in &self.courses {
            storage.catalog.put_course_outline(course).await?;
        }
        for module in &self.modules {
            storage.catalog.put_module_outline(module).await?;
        }
        tracing::info!(
            courses = self.courses.len(),
            modules = self.modules.len(),
            "catalog published"
        );
        Ok(())
    }
}
