use super::{OutlinePipeline, RETRY_INSTRUCTION};
use crate::core::error::PipelineResult;
use crate::core::outline::{Act, OutlineDocument, OutlinePhase, ProjectDefinition};
use crate::services::shape::ArcContract;

/// Number of acts for a book: short books get three, long ones five.
pub fn acts_for_chapters(chapter_count: u32) -> usize {
    match chapter_count {
        0..=15 => 3,
        16..=24 => 4,
        _ => 5,
    }
}

fn build_prompt(doc: &OutlineDocument, project: &ProjectDefinition, acts: usize) -> String {
    format!(
        "You are structuring a {genre} novel of {chapters} chapters and about {words} words.\n\
         {audience}\n\n\
         PREMISE\n{premise}\n\n\
         Divide the story into exactly {acts} acts. For each act write one paragraph \
         defining what happens and how the protagonist changes.\n\n\
         Reply with a JSON array of exactly {acts} strings, one per act, in order:\n\
         [\"Act 1 definition\", \"Act 2 definition\", ...]\n\
         {retry}",
        genre = project.story_genre,
        chapters = doc.chapter_count,
        words = doc.total_word_count,
        audience = project.audience_line(),
        premise = doc.working_premise(),
        acts = acts,
        retry = RETRY_INSTRUCTION,
    )
}

impl OutlinePipeline {
    /// `PremiseExpanded` → `ArcDefined`.
    pub async fn define_arc(
        &self,
        outline_path: &str,
        model_id: &str,
    ) -> PipelineResult<OutlineDocument> {
        const PASS: &str = "define_arc";

        let doc = self
            .begin(PASS, outline_path, OutlinePhase::PremiseExpanded)
            .await?;
        let acts = acts_for_chapters(doc.require_chapter_count()?);
        let project = self.store.load_project(outline_path, &doc).await?;

        let prompt = build_prompt(&doc, &project, acts);
        let definitions = self
            .generator
            .request(PASS, model_id, &prompt, &ArcContract { acts })
            .await?;

        let story_arc = definitions
            .into_iter()
            .enumerate()
            .map(|(i, definition)| Act {
                act: format!("Act {}", i + 1),
                definition,
                beats: Vec::new(),
                sub_plots: Vec::new(),
            })
            .collect();

        let doc = OutlineDocument { story_arc, ..doc };
        self.finish(PASS, outline_path, doc, OutlinePhase::ArcDefined)
            .await
    }
}
