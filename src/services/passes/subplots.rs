use log::info;

use super::{OutlinePipeline, RETRY_INSTRUCTION};
use crate::core::error::PipelineResult;
use crate::core::outline::{Act, OutlineDocument, OutlinePhase, ProjectDefinition};
use crate::services::shape::SubPlotContract;

fn build_prompt(doc: &OutlineDocument, project: &ProjectDefinition, depth: usize) -> String {
    let acts = doc
        .story_arc
        .iter()
        .map(|a| format!("{}: {}", a.act, a.definition))
        .collect::<Vec<_>>()
        .join("\n");
    let cast = doc
        .characters
        .iter()
        .map(|c| format!("- {} ({})", c.name, c.role))
        .collect::<Vec<_>>()
        .join("\n");
    let threads = (1..=depth)
        .map(|d| format!("\"S{}: ...\"", d))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "You are weaving sub-plots into a {genre} novel.\n\n\
         PREMISE\n{premise}\n\n\
         STORY ARC\n{acts}\n\n\
         CHARACTERS\n{cast}\n\n\
         Invent {depth} sub-plot thread(s) that run alongside the main plot. \
         For every act give one line per thread, prefixed with its id (S1:, S2:, ...). \
         Each thread must develop from act to act; never repeat a line unchanged.\n\n\
         Reply with a JSON object only, keyed \"Act 1\" to \"Act {count}\":\n\
         {{\"Act 1\": [{threads}], ...}}\n\
         {retry}",
        genre = project.story_genre,
        premise = doc.working_premise(),
        acts = acts,
        cast = cast,
        depth = depth,
        count = doc.story_arc.len(),
        threads = threads,
        retry = RETRY_INSTRUCTION,
    )
}

impl OutlinePipeline {
    /// `CharactersOutlined` → `SubPlotsDefined`. A depth of zero skips the
    /// model and clears every act's sub-plots.
    pub async fn define_sub_plots(
        &self,
        outline_path: &str,
        model_id: &str,
    ) -> PipelineResult<OutlineDocument> {
        const PASS: &str = "define_sub_plots";

        let doc = self
            .begin(PASS, outline_path, OutlinePhase::CharactersOutlined)
            .await?;
        doc.require_story_arc(PASS)?;
        let project = self.store.load_project(outline_path, &doc).await?;
        let depth = project.depth();

        let per_act = if depth == 0 {
            info!("Sub-plot depth is 0, no threads to define");
            vec![Vec::new(); doc.story_arc.len()]
        } else {
            let contract = SubPlotContract {
                acts: doc.story_arc.len(),
                depth,
            };
            let prompt = build_prompt(&doc, &project, depth);
            self.generator
                .request(PASS, model_id, &prompt, &contract)
                .await?
        };

        let story_arc = doc
            .story_arc
            .iter()
            .zip(per_act)
            .map(|(act, sub_plots)| Act {
                sub_plots,
                ..act.clone()
            })
            .collect();

        let doc = OutlineDocument { story_arc, ..doc };
        self.finish(PASS, outline_path, doc, OutlinePhase::SubPlotsDefined)
            .await
    }
}
