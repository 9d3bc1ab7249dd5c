use log::{debug, info};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::core::error::{PipelineError, PipelineResult};
use crate::core::io::Storage;
use crate::core::outline::{OutlineDocument, OutlineHeader, OutlinePhase, ProjectDefinition};

/// Loads and persists the outline document as a whole JSON file.
#[derive(Clone)]
pub struct OutlineStore {
    storage: Arc<dyn Storage>,
}

impl OutlineStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub async fn load(&self, outline_path: &str) -> PipelineResult<OutlineDocument> {
        let content = self.storage.read_to_string(outline_path).await?;
        serde_json::from_str(&content).map_err(|e| {
            PipelineError::MalformedPersistedState(format!("{}: {}", outline_path, e))
        })
    }

    pub async fn persist(&self, outline_path: &str, doc: &OutlineDocument) -> PipelineResult<()> {
        let content = serde_json::to_string_pretty(doc)?;
        self.storage.write(outline_path, content.as_bytes()).await?;
        debug!(
            "Persisted {} at {} (schema v{})",
            outline_path,
            doc.phase(),
            doc.schema_version()
        );
        Ok(())
    }

    /// Reads the project definition referenced by `header.projectFile`,
    /// resolved relative to the outline's directory.
    pub async fn load_project(
        &self,
        outline_path: &str,
        doc: &OutlineDocument,
    ) -> PipelineResult<ProjectDefinition> {
        if doc.header.project_file.trim().is_empty() {
            return Err(PipelineError::MalformedPersistedState(
                "header.projectFile missing".to_string(),
            ));
        }
        let base = Path::new(outline_path).parent().unwrap_or(Path::new(""));
        let project_path = normalize(&base.join(&doc.header.project_file));
        let project_path = project_path.to_string_lossy().to_string();

        let content = self.storage.read_to_string(&project_path).await.map_err(|e| {
            PipelineError::MalformedPersistedState(format!(
                "header.projectFile {} cannot be read at {}: {:#}",
                doc.header.project_file, project_path, e
            ))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            PipelineError::MalformedPersistedState(format!("{}: {}", project_path, e))
        })
    }

    /// Seeds a fresh outline at `Init` from a project definition and returns
    /// the path of the new file. Defaults to `<project dir>/outlines`.
    pub async fn create_outline(
        &self,
        project_file: &str,
        output_dir: Option<&str>,
    ) -> PipelineResult<String> {
        let content = self.storage.read_to_string(project_file).await?;
        let project: ProjectDefinition = serde_json::from_str(&content).map_err(|e| {
            PipelineError::MalformedPersistedState(format!("{}: {}", project_file, e))
        })?;

        let project_dir = Path::new(project_file).parent().unwrap_or(Path::new(""));
        let output_dir = match output_dir {
            Some(dir) => PathBuf::from(dir),
            None => project_dir.join("outlines"),
        };

        let now = chrono::Utc::now();
        let doc = OutlineDocument {
            header: OutlineHeader {
                schema_version: 1,
                project_file: relative_path(&output_dir, Path::new(project_file))
                    .to_string_lossy()
                    .to_string(),
                date_created: Some(now.to_rfc3339()),
            },
            outline_progress: OutlinePhase::Init,
            premise: project.premise.clone(),
            premise_expanded: None,
            story_arc: Vec::new(),
            characters: Vec::new(),
            chapters: Vec::new(),
            total_word_count: project.total_word_count,
            chapter_count: project.chapter_count,
            extra: Default::default(),
        };

        let file_name = format!("outline_{}.json", now.format("%Y%m%d%H%M%S"));
        let full_path = output_dir.join(file_name).to_string_lossy().to_string();
        self.persist(&full_path, &doc).await?;
        info!("Created outline {}", full_path);
        Ok(full_path)
    }
}

/// Lexically resolves `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Path of `target` as seen from directory `from`.
fn relative_path(from: &Path, target: &Path) -> PathBuf {
    let from = normalize(from);
    let target = normalize(target);
    let from_parts: Vec<_> = from.components().collect();
    let target_parts: Vec<_> = target.components().collect();

    let common = from_parts
        .iter()
        .zip(target_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..from_parts.len() {
        rel.push("..");
    }
    for part in &target_parts[common..] {
        rel.push(part.as_os_str());
    }
    rel
}
