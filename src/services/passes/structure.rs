use super::{OutlinePipeline, RETRY_INSTRUCTION};
use crate::core::error::PipelineResult;
use crate::core::outline::{OutlineDocument, OutlinePhase, ProjectDefinition};
use crate::services::shape::StructureContract;

fn build_prompt(doc: &OutlineDocument, project: &ProjectDefinition, contract: &StructureContract) -> String {
    let arc = doc
        .story_arc
        .iter()
        .map(|act| {
            let mut block = format!("{}: {}\nBeats:\n", act.act, act.definition);
            for beat in &act.beats {
                block.push_str(&format!("- {}\n", beat));
            }
            if !act.sub_plots.is_empty() {
                block.push_str(&format!("Sub-plots: {}\n", act.sub_plots.join(" | ")));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut numbering = format!("Number the chapters 1 to {}.", contract.chapters);
    if contract.prologue {
        numbering.push_str(" Put a prologue first with number 0.");
    }
    if contract.epilogue {
        numbering.push_str(&format!(
            " Put an epilogue last with number {}.",
            contract.chapters + 1
        ));
    }

    format!(
        "You are outlining the chapters of a {genre} novel of about {words} words.\n\n\
         PREMISE\n{premise}\n\n\
         STORY ARC\n{arc}\n\
         Spread the beats above over {chapters} chapters. {numbering}\n\
         Every entry has a one-paragraph summary, exactly {beats} beats and at most \
         {depth} sub-plot line(s) taken from the threads above.\n\n\
         Reply with a JSON array of exactly {total} objects only:\n\
         [{{\"number\": 1, \"summary\": \"...\", \"beats\": [\"...\"], \"sub_plots\": [\"S1: ...\"]}}]\n\
         {retry}",
        genre = project.story_genre,
        words = doc.total_word_count,
        premise = doc.working_premise(),
        arc = arc,
        chapters = contract.chapters,
        numbering = numbering,
        beats = contract.beats_per_chapter,
        depth = contract.depth,
        total = contract.expected_len(),
        retry = RETRY_INSTRUCTION,
    )
}

impl OutlinePipeline {
    /// `BeatsExpanded` → `StructureOutlined`.
    pub async fn define_structure(
        &self,
        outline_path: &str,
        model_id: &str,
    ) -> PipelineResult<OutlineDocument> {
        const PASS: &str = "define_structure";

        let doc = self
            .begin(PASS, outline_path, OutlinePhase::BeatsExpanded)
            .await?;
        doc.require_story_arc(PASS)?;
        let chapter_count = doc.require_chapter_count()?;
        let project = self.store.load_project(outline_path, &doc).await?;

        let contract = StructureContract {
            chapters: chapter_count as usize,
            beats_per_chapter: StructureContract::BEATS_PER_CHAPTER,
            depth: project.depth(),
            prologue: project.include_prologue,
            epilogue: project.include_epilogue,
        };
        let prompt = build_prompt(&doc, &project, &contract);
        let chapters = self
            .generator
            .request(PASS, model_id, &prompt, &contract)
            .await?;

        let doc = OutlineDocument { chapters, ..doc };
        self.finish(PASS, outline_path, doc, OutlinePhase::StructureOutlined)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use crate::services::llm::testing::ScriptedLlm;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_prologue_and_epilogue_entries() -> anyhow::Result<()> {
        let mut project = project_json();
        project["includePrologue"] = true.into();
        project["includeEpilogue"] = true.into();
        let (_dir, path) = seeded_outline(project).await?;

        let mut replies = pipeline_replies();
        replies.pop();
        let setup = pipeline(Arc::new(ScriptedLlm::queue(replies)));
        setup.expand_premise(&path, MODEL, 250).await?;
        setup.define_arc(&path, MODEL).await?;
        setup.define_characters(&path, MODEL).await?;
        setup.define_sub_plots(&path, MODEL).await?;
        setup.expand_beats(&path, MODEL).await?;

        let entries: Vec<serde_json::Value> = (0..=7)
            .map(|n| json!({ "number": n, "summary": "s", "beats": ["a", "b", "c"] }))
            .collect();
        // Missing placeholders first, then the full list.
        let llm = Arc::new(ScriptedLlm::queue(vec![
            structure_reply(),
            json!(entries).to_string(),
        ]));
        let doc = pipeline(llm.clone()).define_structure(&path, MODEL).await?;

        assert_eq!(llm.call_count(), 2);
        assert_eq!(doc.chapters.len(), 8);
        assert_eq!(doc.chapters[0].number, 0);
        assert_eq!(doc.chapter(7).map(|c| c.summary.as_str()), Some("s"));
        assert!(llm.prompts()[0].contains("epilogue last with number 7"));
        Ok(())
    }
}
