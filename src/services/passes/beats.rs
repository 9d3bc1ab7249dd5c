use log::debug;

use super::{OutlinePipeline, RETRY_INSTRUCTION};
use crate::core::error::PipelineResult;
use crate::core::outline::{Act, OutlineDocument, OutlinePhase, ProjectDefinition};
use crate::services::shape::BeatsContract;

/// Three beats per chapter an act covers, and never fewer than three.
pub fn beats_per_act(chapter_count: u32, acts: usize) -> usize {
    if acts == 0 {
        return 3;
    }
    ((chapter_count as usize / acts) * 3).max(3)
}

fn build_prompt(
    doc: &OutlineDocument,
    project: &ProjectDefinition,
    index: usize,
    beats: usize,
    previous: Option<&[String]>,
) -> String {
    let act = &doc.story_arc[index];
    let cast = doc
        .characters
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let sub_plots = if act.sub_plots.is_empty() {
        "(none)".to_string()
    } else {
        act.sub_plots.join("\n")
    };
    let previous = match previous {
        Some(beats) => beats.join("\n"),
        None => "(this is the first act)".to_string(),
    };

    format!(
        "You are breaking {act_name} of a {genre} novel into story beats.\n\n\
         PREMISE\n{premise}\n\n\
         {act_name}\n{definition}\n\n\
         SUB-PLOTS IN THIS ACT\n{sub_plots}\n\n\
         CHARACTERS\n{cast}\n\n\
         BEATS OF THE PREVIOUS ACT\n{previous}\n\n\
         Write exactly {beats} beats for {act_name}, in story order, one sentence each.\n\n\
         Reply with a JSON array of {beats} strings only.\n\
         {retry}",
        act_name = act.act,
        genre = project.story_genre,
        premise = doc.working_premise(),
        definition = act.definition,
        sub_plots = sub_plots,
        cast = cast,
        previous = previous,
        beats = beats,
        retry = RETRY_INSTRUCTION,
    )
}

impl OutlinePipeline {
    /// `SubPlotsDefined` → `BeatsExpanded`. One request per act; nothing is
    /// committed unless every act succeeds.
    pub async fn expand_beats(
        &self,
        outline_path: &str,
        model_id: &str,
    ) -> PipelineResult<OutlineDocument> {
        const PASS: &str = "expand_beats";

        let doc = self
            .begin(PASS, outline_path, OutlinePhase::SubPlotsDefined)
            .await?;
        doc.require_story_arc(PASS)?;
        let chapter_count = doc.require_chapter_count()?;
        let project = self.store.load_project(outline_path, &doc).await?;

        let contract = BeatsContract {
            beats: beats_per_act(chapter_count, doc.story_arc.len()),
        };

        let mut expanded: Vec<Vec<String>> = Vec::with_capacity(doc.story_arc.len());
        for index in 0..doc.story_arc.len() {
            let prompt = build_prompt(
                &doc,
                &project,
                index,
                contract.beats,
                expanded.last().map(Vec::as_slice),
            );
            let beats = self
                .generator
                .request(PASS, model_id, &prompt, &contract)
                .await?;
            debug!("{}: {} beats", doc.story_arc[index].act, beats.len());
            expanded.push(beats);
        }

        let story_arc = doc
            .story_arc
            .iter()
            .zip(expanded)
            .map(|(act, beats)| Act {
                beats,
                ..act.clone()
            })
            .collect();

        let doc = OutlineDocument { story_arc, ..doc };
        self.finish(PASS, outline_path, doc, OutlinePhase::BeatsExpanded)
            .await
    }
}
