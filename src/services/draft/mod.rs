//! Chapter drafting.
//!
//! A chapter is written as a run of bounded pieces. Each piece is asked for
//! with its own opening tag, a trailing window of what the chapter already
//! says, and the running summary of earlier chapters; replies that fail the
//! acceptance checks are retried with a sharper instruction. Drafting never
//! aborts a long run over one bad piece: exhausted pieces are skipped and a
//! chapter with nothing accepted keeps the last raw reply.

pub mod budget;
pub mod context;
pub mod duplicate;
pub mod piece;
mod prologue;
pub mod style;
pub mod summary;

pub use prologue::Bookend;

use log::{info, warn};
use std::path::Path;
use std::sync::Arc;

use crate::core::config::DraftConfig;
use crate::core::error::{PipelineError, PipelineResult};
use crate::core::outline::{guard_phase, OutlineDocument, OutlinePhase, ProjectDefinition};
use crate::core::store::OutlineStore;
use crate::services::cost::CostLedger;
use crate::services::extract::unwrap_fenced;
use crate::services::generator::Generator;
use crate::utils::text::{last_words, word_count};

use self::context::ChapterContext;
use self::piece::{PieceJudge, PiecePrompt, PieceSpec, Rejection};
use self::style::{load_style, DraftStyle};
use self::summary::{update_summary, EMPTY_SUMMARY};

pub const COST_LOG_FILE: &str = "cost_log.csv";

/// What one drafted chapter left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterDraft {
    pub number: u32,
    pub path: String,
    pub words: usize,
    pub target_words: usize,
    pub pieces_planned: usize,
    pub pieces_accepted: usize,
    /// The chapter is the last raw reply because no piece was accepted.
    pub fell_back: bool,
    pub running_summary: String,
}

/// Accumulated text of the chapter being assembled.
struct ChapterAssembly {
    text: String,
    pieces_accepted: usize,
    fell_back: bool,
}

pub fn chapter_file_name(number: u32) -> String {
    format!("chapter_{:02}.md", number)
}

/// Chapter text without its leading `#` heading line.
fn chapter_body(content: &str) -> &str {
    let trimmed = content.trim_start();
    if trimmed.starts_with('#') {
        trimmed.split_once('\n').map(|(_, rest)| rest).unwrap_or("")
    } else {
        trimmed
    }
}

pub struct DraftBuilder {
    generator: Generator,
    store: OutlineStore,
    settings: DraftConfig,
    presets_dir: String,
}

impl DraftBuilder {
    pub fn new(
        generator: Generator,
        store: OutlineStore,
        settings: DraftConfig,
        presets_dir: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            store,
            settings,
            presets_dir: presets_dir.into(),
        }
    }

    /// Loads a structured outline together with its project definition.
    async fn load_structured(
        &self,
        pass: &'static str,
        outline_path: &str,
    ) -> PipelineResult<(OutlineDocument, ProjectDefinition)> {
        let doc = self.store.load(outline_path).await?;
        guard_phase(pass, doc.phase(), OutlinePhase::StructureOutlined)?;
        doc.require_chapter_count()?;
        let project = self.store.load_project(outline_path, &doc).await?;
        Ok((doc, project))
    }

    /// A generator that also writes to `<output_dir>/cost_log.csv`.
    async fn generator_for(&self, output_dir: &str) -> PipelineResult<Generator> {
        let storage = self.store.storage().clone();
        let path = Path::new(output_dir).join(COST_LOG_FILE);
        let ledger = CostLedger::open(storage, &path.to_string_lossy()).await?;
        Ok(self.generator.clone().with_cost_ledger(Arc::new(ledger)))
    }

    async fn style_for(&self, project: &ProjectDefinition) -> DraftStyle {
        load_style(
            self.store.storage().as_ref(),
            &self.presets_dir,
            project.famous_author_preset.as_deref(),
        )
        .await
    }

    /// Drafts chapters `start_chapter..=end_chapter` (end defaults to the last
    /// chapter) into `output_dir/chapter_NN.md`.
    ///
    /// Chapters before `start_chapter` that are already on disk seed the
    /// running summary and the word budget, so a run can resume anywhere.
    pub async fn build_draft(
        &self,
        outline_path: &str,
        output_dir: &str,
        model_id: &str,
        start_chapter: u32,
        end_chapter: Option<u32>,
    ) -> PipelineResult<Vec<ChapterDraft>> {
        const PASS: &str = "build_draft";

        let (doc, project) = self.load_structured(PASS, outline_path).await?;
        let chapter_count = doc.chapter_count;
        let end = end_chapter.unwrap_or(chapter_count).min(chapter_count);
        if start_chapter == 0 || start_chapter > end {
            return Err(PipelineError::InvalidArgument(format!(
                "chapter range {}..={} is outside 1..={}",
                start_chapter, end, chapter_count
            )));
        }

        let generator = self.generator_for(output_dir).await?;
        let style = self.style_for(&project).await;
        let storage = self.store.storage().clone();

        let mut summary = EMPTY_SUMMARY.to_string();
        let mut used_words = 0usize;
        for number in 1..start_chapter {
            let path = Path::new(output_dir).join(chapter_file_name(number));
            let path = path.to_string_lossy();
            if storage.exists(&path).await? {
                let content = storage.read_to_string(&path).await?;
                let body = chapter_body(&content);
                used_words += word_count(body);
                summary = update_summary(&summary, body, self.settings.summary_words);
            }
        }
        if start_chapter > 1 {
            info!(
                "Resuming at chapter {} with {} words already drafted",
                start_chapter, used_words
            );
        }

        let mut drafts = Vec::new();
        for number in start_chapter..=end {
            let chapter = doc.chapter(number).ok_or_else(|| {
                PipelineError::MalformedPersistedState(format!(
                    "chapters has no entry numbered {}",
                    number
                ))
            })?;

            let remaining = doc.total_word_count as i64 - used_words as i64;
            let chapters_left = (chapter_count - number + 1) as i64;
            let target_words = budget::reallocate(remaining, chapters_left)?;
            let pieces = budget::pieces_for(target_words, self.settings.piece_size_words);

            let context = ChapterContext {
                genre: &project.story_genre,
                act_index: doc.act_index_for_chapter(number),
                act_count: doc.story_arc.len(),
                chapter,
                running_summary: &summary,
                summary_words: self.settings.summary_words,
                style: &style,
            }
            .render();

            info!(
                "Drafting chapter {}/{}: {} words in {} pieces",
                number, chapter_count, target_words, pieces
            );
            let assembly = self
                .assemble_chapter(&generator, model_id, number, pieces, &context, &style)
                .await?;

            let path = Path::new(output_dir).join(chapter_file_name(number));
            let path = path.to_string_lossy().to_string();
            let content = format!("# Chapter {}\n\n{}\n", number, assembly.text);
            storage.write(&path, content.as_bytes()).await?;

            let words = word_count(&assembly.text);
            used_words += words;
            summary = update_summary(&summary, &assembly.text, self.settings.summary_words);
            info!("Draft written: {} ({} words)", path, words);

            drafts.push(ChapterDraft {
                number,
                path,
                words,
                target_words,
                pieces_planned: pieces,
                pieces_accepted: assembly.pieces_accepted,
                fell_back: assembly.fell_back,
                running_summary: summary.clone(),
            });
        }

        if let Some(ledger) = generator.cost_ledger() {
            let totals = ledger.totals().await;
            info!(
                "Estimated cost this run: {:.4} USD ({} prompt / {} completion tokens)",
                totals.usd, totals.prompt_tokens, totals.completion_tokens
            );
        }
        Ok(drafts)
    }

    async fn assemble_chapter(
        &self,
        generator: &Generator,
        model_id: &str,
        number: u32,
        pieces: usize,
        context: &str,
        style: &DraftStyle,
    ) -> PipelineResult<ChapterAssembly> {
        let mut drafted = String::new();
        let mut last_reply = String::new();
        let mut accepted = 0;

        for index in 1..=pieces {
            let spec = PieceSpec {
                index,
                count: pieces,
            };
            let mut judge = PieceJudge::new(&self.settings, spec);
            let max_attempts = judge.max_attempts();
            let mut last_rejection: Option<Rejection> = None;
            let mut placed = false;

            for attempt in 0..max_attempts {
                let window = last_words(&drafted, self.settings.context_window_words);
                let prompt = PiecePrompt {
                    style,
                    chapter_number: number,
                    spec,
                    piece_words: self.settings.piece_size_words,
                    context,
                    previous_text: &window,
                    note: judge.corrective_note(attempt, last_rejection.as_ref()),
                }
                .render();

                let reply = generator
                    .complete_text("build_draft", model_id, &prompt)
                    .await?;

                match judge.evaluate(&reply, &drafted, attempt) {
                    Ok(piece) => {
                        if !drafted.is_empty() {
                            drafted.push_str("\n\n");
                        }
                        drafted.push_str(piece.trim());
                        accepted += 1;
                        placed = true;
                        break;
                    }
                    Err(rejection) => {
                        warn!(
                            "Chapter {} piece {}/{} attempt {}/{} rejected: {}",
                            number,
                            index,
                            pieces,
                            attempt + 1,
                            max_attempts,
                            rejection
                        );
                        last_rejection = Some(rejection);
                    }
                }
                last_reply = reply;
            }

            if !placed {
                warn!(
                    "PieceAssemblyExhausted: chapter {} piece {}/{} skipped after {} attempts",
                    number, index, pieces, max_attempts
                );
            }
        }

        let fell_back = drafted.is_empty();
        if fell_back {
            warn!(
                "No piece of chapter {} passed its checks, keeping the last reply as the draft",
                number
            );
            drafted = unwrap_fenced(&last_reply).to_string();
        }

        Ok(ChapterAssembly {
            text: drafted,
            pieces_accepted: accepted,
            fell_back,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::services::llm::testing::ScriptedLlm;
    use crate::services::passes::fixtures::{force_phase, MODEL};
    use serde_json::json;

    fn output_dir(dir: &tempfile::TempDir) -> String {
        dir.path().join("drafts").to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_mismatched_tag_is_rewritten_on_third_occurrence() -> anyhow::Result<()> {
        let (dir, path) = structured_outline(350, 1, json!({})).await?;
        let out = output_dir(&dir);
        let wrong = format!("--- piece 2/3 ---\n{}", prose("w", 300));
        let llm = Arc::new(ScriptedLlm::queue(vec![wrong]));

        let drafts = builder(llm.clone(), "presets")
            .build_draft(&path, &out, MODEL, 1, None)
            .await?;

        assert_eq!(llm.call_count(), 3);
        assert_eq!(drafts[0].pieces_accepted, 1);
        assert!(!drafts[0].fell_back);
        let text = std::fs::read_to_string(&drafts[0].path)?;
        assert!(text.starts_with("# Chapter 1\n\n--- piece 1/1 ---\nw0 w1"));
        assert!(!text.contains("piece 2/3"));
        Ok(())
    }

    #[tokio::test]
    async fn test_pieces_join_and_feed_the_next_prompt() -> anyhow::Result<()> {
        let (dir, path) = structured_outline(700, 1, json!({})).await?;
        let out = output_dir(&dir);
        let llm = Arc::new(ScriptedLlm::queue(vec![
            piece_reply(1, 2, "a"),
            piece_reply(2, 2, "b"),
        ]));

        let drafts = builder(llm.clone(), "presets")
            .build_draft(&path, &out, MODEL, 1, None)
            .await?;
        let draft = &drafts[0];
        assert_eq!(draft.target_words, 700);
        assert_eq!(draft.pieces_planned, 2);
        assert_eq!(draft.pieces_accepted, 2);
        assert!(word_count(&draft.running_summary) <= 120);
        assert!(draft.running_summary.ends_with("b299."));

        let text = std::fs::read_to_string(&draft.path)?;
        assert!(text.contains("a299.\n\n--- piece 2/2 ---\nb0"));
        assert_eq!(text.matches("# Chapter").count(), 1);

        let prompts = llm.prompts();
        assert!(prompts[0].contains("PREVIOUS TEXT\n(none)"));
        assert!(prompts[1].contains("a299."));
        assert!(prompts[1].contains("Write ONLY piece 2/2 of Chapter 1."));

        let ledger = std::fs::read_to_string(Path::new(&out).join(COST_LOG_FILE))?;
        assert_eq!(ledger.lines().count(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_piece_is_retried() -> anyhow::Result<()> {
        let (dir, path) = structured_outline(700, 1, json!({})).await?;
        let out = output_dir(&dir);
        let repeat = format!("--- piece 2/2 ---\n{}", prose("a", 300));
        let llm = Arc::new(ScriptedLlm::queue(vec![
            piece_reply(1, 2, "a"),
            repeat,
            piece_reply(2, 2, "c"),
        ]));

        let drafts = builder(llm.clone(), "presets")
            .build_draft(&path, &out, MODEL, 1, None)
            .await?;
        assert_eq!(llm.call_count(), 3);
        assert_eq!(drafts[0].pieces_accepted, 2);
        assert!(llm.prompts()[2].contains("repeats text already drafted"));
        Ok(())
    }

    #[tokio::test]
    async fn test_chapter_falls_back_to_last_reply() -> anyhow::Result<()> {
        let (dir, path) = structured_outline(350, 1, json!({})).await?;
        let out = output_dir(&dir);
        let llm = Arc::new(ScriptedLlm::queue(vec!["```\nToo short to use.\n```".to_string()]));

        let drafts = builder(llm.clone(), "presets")
            .build_draft(&path, &out, MODEL, 1, None)
            .await?;
        assert_eq!(llm.call_count(), 5);
        assert!(drafts[0].fell_back);
        assert_eq!(drafts[0].pieces_accepted, 0);
        assert_eq!(
            std::fs::read_to_string(&drafts[0].path)?,
            "# Chapter 1\n\nToo short to use.\n"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_resume_seeds_summary_and_budget() -> anyhow::Result<()> {
        let (dir, path) = structured_outline(1_000, 2, json!({})).await?;
        let out = output_dir(&dir);
        std::fs::create_dir_all(&out)?;
        std::fs::write(
            Path::new(&out).join(chapter_file_name(1)),
            format!("# Chapter 1\n\n{}\n", prose("old", 650)),
        )?;
        let llm = Arc::new(ScriptedLlm::queue(vec![piece_reply(1, 1, "new")]));

        let drafts = builder(llm.clone(), "presets")
            .build_draft(&path, &out, MODEL, 2, None)
            .await?;
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].number, 2);
        assert_eq!(drafts[0].target_words, 350);
        assert!(llm.prompts()[0].contains("old649."));
        assert!(!llm.prompts()[0].contains("old500 "));
        Ok(())
    }

    #[tokio::test]
    async fn test_draft_requires_structured_outline() -> anyhow::Result<()> {
        let (dir, path) = structured_outline(350, 1, json!({})).await?;
        force_phase(&path, OutlinePhase::BeatsExpanded).await?;
        let llm = Arc::new(ScriptedLlm::queue(vec![piece_reply(1, 1, "a")]));

        let err = builder(llm.clone(), "presets")
            .build_draft(&path, &output_dir(&dir), MODEL, 1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PhaseGuardViolation { .. }));
        assert_eq!(llm.call_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_chapter_range() -> anyhow::Result<()> {
        let (dir, path) = structured_outline(700, 2, json!({})).await?;
        let llm = Arc::new(ScriptedLlm::queue(vec![]));
        let builder = builder(llm, "presets");
        for (start, end) in [(0, Some(2)), (2, Some(1)), (3, None)] {
            let err = builder
                .build_draft(&path, &output_dir(&dir), MODEL, start, end)
                .await
                .unwrap_err();
            assert!(matches!(err, PipelineError::InvalidArgument(_)));
        }
        Ok(())
    }

    #[test]
    fn test_chapter_body_strips_heading() {
        assert_eq!(chapter_body("# Chapter 3\n\nText here."), "\nText here.");
        assert_eq!(chapter_body("No heading."), "No heading.");
    }
}
