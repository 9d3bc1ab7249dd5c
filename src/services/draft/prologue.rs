use log::info;
use std::path::Path;

use super::{budget, DraftBuilder};
use crate::core::error::PipelineResult;
use crate::core::outline::{OutlineDocument, ProjectDefinition};
use crate::services::draft::style::DraftStyle;

/// Extra words a bookend may run past its target.
const BOOKEND_SLACK_WORDS: usize = 150;

/// Text that frames the chapters: half a chapter's budget, no sub-plots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bookend {
    Prologue,
    Epilogue,
}

impl Bookend {
    pub fn label(&self) -> &'static str {
        match self {
            Bookend::Prologue => "prologue",
            Bookend::Epilogue => "epilogue",
        }
    }

    pub fn heading(&self) -> &'static str {
        match self {
            Bookend::Prologue => "PROLOGUE",
            Bookend::Epilogue => "EPILOGUE",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.md", self.label())
    }

    /// Number the outline gives this entry when the structure includes it.
    fn outline_number(&self, chapter_count: u32) -> u32 {
        match self {
            Bookend::Prologue => 0,
            Bookend::Epilogue => chapter_count + 1,
        }
    }
}

/// Drops a leading heading line naming the bookend, if the model wrote one.
fn strip_heading<'a>(text: &'a str, bookend: Bookend) -> &'a str {
    let trimmed = text.trim_start();
    let (first, rest) = trimmed.split_once('\n').unwrap_or((trimmed, ""));
    let first = first.trim().trim_start_matches('#').trim().trim_end_matches([':', '.']);
    if first.eq_ignore_ascii_case(bookend.heading()) {
        rest.trim()
    } else {
        trimmed.trim_end()
    }
}

fn build_prompt(
    doc: &OutlineDocument,
    project: &ProjectDefinition,
    style: &DraftStyle,
    bookend: Bookend,
    target_words: usize,
    beats: usize,
) -> String {
    let plan = doc
        .chapter(bookend.outline_number(doc.chapter_count))
        .map(|entry| {
            let beats = entry
                .beats
                .iter()
                .map(|b| format!("- {}", b))
                .collect::<Vec<_>>()
                .join("\n");
            format!("\nPLANNED {}\n{}\n{}\n", bookend.heading(), entry.summary, beats)
        })
        .unwrap_or_default();

    format!(
        "You are {author}.\n\
         Write the {label} of this novel (about {target} words).\n\
         Include exactly {beats} thematic beats; no sub-plots.\n\n\
         Begin with the heading: {heading}\n\n\
         PREMISE\n{premise}\n\n\
         Genre: {genre}\n{plan}\n\
         Do not exceed {ceiling} words.",
        author = style.author_name,
        label = bookend.label(),
        target = target_words,
        beats = beats,
        heading = bookend.heading(),
        premise = doc.working_premise(),
        genre = project.story_genre,
        plan = plan,
        ceiling = target_words + BOOKEND_SLACK_WORDS,
    )
}

impl DraftBuilder {
    pub async fn build_prologue(
        &self,
        outline_path: &str,
        output_dir: &str,
        model_id: &str,
    ) -> PipelineResult<String> {
        self.build_bookend(outline_path, output_dir, model_id, Bookend::Prologue)
            .await
    }

    pub async fn build_epilogue(
        &self,
        outline_path: &str,
        output_dir: &str,
        model_id: &str,
    ) -> PipelineResult<String> {
        self.build_bookend(outline_path, output_dir, model_id, Bookend::Epilogue)
            .await
    }

    /// Writes `prologue.md` or `epilogue.md` and returns its path. The outline
    /// is read but never changed.
    pub async fn build_bookend(
        &self,
        outline_path: &str,
        output_dir: &str,
        model_id: &str,
        bookend: Bookend,
    ) -> PipelineResult<String> {
        let pass = match bookend {
            Bookend::Prologue => "build_prologue",
            Bookend::Epilogue => "build_epilogue",
        };
        let (doc, project) = self.load_structured(pass, outline_path).await?;

        let target_words =
            budget::initial_target(doc.total_word_count as i64, doc.chapter_count as i64 * 2)?;
        let first_chapter_beats = doc
            .chapter(1)
            .or_else(|| doc.chapters.first())
            .map(|c| c.beats.len())
            .unwrap_or(0);
        let beats = (first_chapter_beats / 2).max(1);

        let generator = self.generator_for(output_dir).await?;
        let style = self.style_for(&project).await;
        let prompt = build_prompt(&doc, &project, &style, bookend, target_words, beats);
        let reply = generator.complete_text(pass, model_id, &prompt).await?;

        let path = Path::new(output_dir)
            .join(bookend.file_name())
            .to_string_lossy()
            .to_string();
        let content = format!("# {}\n\n{}\n", bookend.heading(), strip_heading(&reply, bookend));
        self.store.storage().write(&path, content.as_bytes()).await?;
        info!("{} written: {}", bookend.label(), path);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use crate::core::error::PipelineError;
    use crate::core::outline::OutlinePhase;
    use crate::services::llm::testing::ScriptedLlm;
    use crate::services::passes::fixtures::{force_phase, store, MODEL};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_strip_heading() {
        assert_eq!(strip_heading("PROLOGUE\n\nThe sea.", Bookend::Prologue), "The sea.");
        assert_eq!(strip_heading("## Prologue:\nThe sea.", Bookend::Prologue), "The sea.");
        assert_eq!(strip_heading("The sea.", Bookend::Prologue), "The sea.");
        assert_eq!(strip_heading("PROLOGUE\nThe sea.", Bookend::Epilogue), "PROLOGUE\nThe sea.");
    }

    #[tokio::test]
    async fn test_prologue_uses_half_budget_and_keeps_phase() -> anyhow::Result<()> {
        let (dir, path) = structured_outline(10_000, 10, json!({})).await?;
        let out = dir.path().join("drafts").to_string_lossy().to_string();
        let llm = Arc::new(ScriptedLlm::queue(vec![format!("PROLOGUE\n\n{}", prose("p", 400))]));

        let written = builder(llm.clone(), "presets")
            .build_prologue(&path, &out, MODEL)
            .await?;

        assert!(written.ends_with("prologue.md"));
        let text = std::fs::read_to_string(&written)?;
        assert!(text.starts_with("# PROLOGUE\n\np0 p1"));
        assert_eq!(text.matches("PROLOGUE").count(), 1);

        let prompt = &llm.prompts()[0];
        assert!(prompt.contains("(about 500 words)"));
        assert!(prompt.contains("exactly 2 thematic beats"));
        assert!(prompt.contains("Do not exceed 650 words."));

        let doc = store().load(&path).await?;
        assert_eq!(doc.phase(), OutlinePhase::StructureOutlined);
        assert_eq!(doc.schema_version(), 7);
        Ok(())
    }

    #[tokio::test]
    async fn test_epilogue_requires_structure() -> anyhow::Result<()> {
        let (dir, path) = structured_outline(10_000, 10, json!({})).await?;
        force_phase(&path, OutlinePhase::CharactersOutlined).await?;
        let llm = Arc::new(ScriptedLlm::queue(vec!["The end.".to_string()]));
        let out = dir.path().join("drafts").to_string_lossy().to_string();

        let err = builder(llm.clone(), "presets")
            .build_epilogue(&path, &out, MODEL)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PhaseGuardViolation { pass: "build_epilogue", .. }));
        assert_eq!(llm.call_count(), 0);
        Ok(())
    }
}
