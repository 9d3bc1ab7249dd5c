use super::{OutlinePipeline, RETRY_INSTRUCTION};
use crate::core::error::PipelineResult;
use crate::core::outline::{OutlineDocument, OutlinePhase, ProjectDefinition};
use crate::services::shape::RosterContract;

fn act_lines(doc: &OutlineDocument) -> String {
    doc.story_arc
        .iter()
        .map(|a| format!("{}: {}", a.act, a.definition))
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_prompt(doc: &OutlineDocument, project: &ProjectDefinition, roster: &RosterContract) -> String {
    format!(
        "You are casting a {genre} novel.\n\n\
         PREMISE\n{premise}\n\n\
         STORY ARC\n{acts}\n\n\
         Create exactly {total} characters: 1 protagonist, {supporting} supporting \
         characters and {minor} minor characters, in that order.\n\
         Each role must start with its category: \"Protagonist:\", \"Supporting character:\" \
         or \"Minor character:\". Give 1 to {max_traits} traits and an arc of at most \
         {max_arc} words.\n\n\
         Reply with a JSON array only:\n\
         [{{\"name\": \"...\", \"role\": \"Protagonist: ...\", \"traits\": [\"...\"], \"arc\": \"...\"}}]\n\
         {retry}",
        genre = project.story_genre,
        premise = doc.working_premise(),
        acts = act_lines(doc),
        total = roster.total(),
        supporting = roster.supporting,
        minor = roster.minor,
        max_traits = RosterContract::MAX_TRAITS,
        max_arc = RosterContract::MAX_ARC_WORDS,
        retry = RETRY_INSTRUCTION,
    )
}

impl OutlinePipeline {
    /// `ArcDefined` → `CharactersOutlined`.
    pub async fn define_characters(
        &self,
        outline_path: &str,
        model_id: &str,
    ) -> PipelineResult<OutlineDocument> {
        const PASS: &str = "define_characters";

        let doc = self
            .begin(PASS, outline_path, OutlinePhase::ArcDefined)
            .await?;
        doc.require_story_arc(PASS)?;
        let project = self.store.load_project(outline_path, &doc).await?;

        let contract = RosterContract {
            supporting: project.supporting_characters as usize,
            minor: project.minor_characters as usize,
        };
        let prompt = build_prompt(&doc, &project, &contract);
        let characters = self
            .generator
            .request(PASS, model_id, &prompt, &contract)
            .await?;

        let doc = OutlineDocument { characters, ..doc };
        self.finish(PASS, outline_path, doc, OutlinePhase::CharactersOutlined)
            .await
    }
}
