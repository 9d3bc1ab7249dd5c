use log::info;

use super::{OutlinePipeline, RETRY_INSTRUCTION};
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::outline::{OutlineDocument, OutlinePhase, ProjectDefinition};
use crate::services::shape::PremiseContract;

/// Accepted range for the expanded premise ceiling.
pub const MAX_WORDS_RANGE: std::ops::RangeInclusive<usize> = 150..=350;

fn build_prompt(doc: &OutlineDocument, project: &ProjectDefinition, max_words: usize) -> String {
    format!(
        "You are a developmental editor helping an author plan a {genre} novel.\n\
         {audience}\n\n\
         Expand the premise below into a single paragraph of {min} to {max} words. \
         Keep every element the author gave and add the central conflict, the stakes \
         and the protagonist's goal. Do not name chapters or acts.\n\n\
         Reply with the paragraph only: no heading, no list, no JSON.\n\
         {retry}\n\n\
         PREMISE\n{premise}",
        genre = project.story_genre,
        audience = project.audience_line(),
        min = PremiseContract::MIN_WORDS,
        max = max_words,
        retry = RETRY_INSTRUCTION,
        premise = doc.premise.trim(),
    )
}

impl OutlinePipeline {
    /// `Init` → `PremiseExpanded`. Stores the expansion in `premiseExpanded`
    /// and keeps the author's original `premise`.
    pub async fn expand_premise(
        &self,
        outline_path: &str,
        model_id: &str,
        max_words: usize,
    ) -> PipelineResult<OutlineDocument> {
        const PASS: &str = "expand_premise";

        if !MAX_WORDS_RANGE.contains(&max_words) {
            return Err(PipelineError::InvalidArgument(format!(
                "max_words must be between {} and {}, got {}",
                MAX_WORDS_RANGE.start(),
                MAX_WORDS_RANGE.end(),
                max_words
            )));
        }

        let doc = self.begin(PASS, outline_path, OutlinePhase::Init).await?;
        if doc.premise.trim().is_empty() {
            return Err(PipelineError::MalformedPersistedState(
                "premise is empty".to_string(),
            ));
        }
        let project = self.store.load_project(outline_path, &doc).await?;

        let prompt = build_prompt(&doc, &project, max_words);
        let expanded = self
            .generator
            .request(PASS, model_id, &prompt, &PremiseContract { max_words })
            .await?;

        let doc = OutlineDocument {
            premise_expanded: Some(expanded),
            ..doc
        };
        self.finish(PASS, outline_path, doc, OutlinePhase::PremiseExpanded)
            .await
    }

    /// `Init` → `PremiseExpanded` without a model call, for premises that are
    /// already written out in full.
    pub async fn mark_premise_expanded(&self, outline_path: &str) -> PipelineResult<OutlineDocument> {
        const PASS: &str = "mark_premise_expanded";

        let doc = self.begin(PASS, outline_path, OutlinePhase::Init).await?;
        info!("Keeping the premise as written");
        self.finish(PASS, outline_path, doc, OutlinePhase::PremiseExpanded)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use crate::core::error::PipelineError;
    use crate::core::outline::OutlinePhase;
    use crate::services::llm::testing::ScriptedLlm;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_max_words_outside_range_is_invalid() -> anyhow::Result<()> {
        let (_dir, path) = seeded_outline(project_json()).await?;
        let llm = Arc::new(ScriptedLlm::queue(vec![premise_reply()]));
        let pipeline = pipeline(llm.clone());

        for max in [149, 351] {
            let err = pipeline.expand_premise(&path, MODEL, max).await.unwrap_err();
            assert!(matches!(err, PipelineError::InvalidArgument(_)));
        }
        assert_eq!(llm.call_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_overlong_expansion_is_retried() -> anyhow::Result<()> {
        let (_dir, path) = seeded_outline(project_json()).await?;
        let llm = Arc::new(ScriptedLlm::queue(vec!["word ".repeat(200), premise_reply()]));

        let doc = pipeline(llm.clone()).expand_premise(&path, MODEL, 150).await?;
        assert_eq!(llm.call_count(), 2);
        assert_eq!(doc.premise_expanded.as_deref(), Some(premise_reply().trim()));
        assert!(doc.premise.starts_with("A lighthouse keeper"));
        assert!(llm.prompts()[0].contains("RETRY"));
        Ok(())
    }

    #[tokio::test]
    async fn test_mark_premise_expanded_skips_model() -> anyhow::Result<()> {
        let (_dir, path) = seeded_outline(project_json()).await?;
        let llm = Arc::new(ScriptedLlm::queue(vec![]));

        let doc = pipeline(llm.clone()).mark_premise_expanded(&path).await?;
        assert_eq!(doc.phase(), OutlinePhase::PremiseExpanded);
        assert_eq!(doc.schema_version(), 2);
        assert!(doc.premise_expanded.is_none());
        assert_eq!(llm.call_count(), 0);
        Ok(())
    }
}
