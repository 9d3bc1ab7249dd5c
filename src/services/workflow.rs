use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::config::Config;
use crate::core::error::PipelineResult;
use crate::core::io::Storage;
use crate::core::outline::{OutlineDocument, OutlinePhase};
use crate::core::store::OutlineStore;
use crate::services::draft::{chapter_file_name, Bookend, DraftBuilder};
use crate::services::generator::Generator;
use crate::services::llm::LlmClient;
use crate::services::passes::OutlinePipeline;
use crate::services::retry::RetryPolicy;
use crate::utils::text::word_count;

/// Drives a book from project definition to chapter drafts, resuming from
/// whatever the outline and the output folder already hold.
pub struct WorkflowManager {
    config: Config,
    config_path: PathBuf,
    store: OutlineStore,
    pipeline: OutlinePipeline,
    drafts: DraftBuilder,
}

impl WorkflowManager {
    pub fn new(
        config: Config,
        llm: Arc<dyn LlmClient>,
        storage: Arc<dyn Storage>,
        cancel: CancellationToken,
    ) -> Self {
        let store = OutlineStore::new(storage);
        let generator = Generator::new(llm, RetryPolicy::from_config(&config.retry), cancel);
        let pipeline = OutlinePipeline::new(generator.clone(), store.clone());
        let drafts = DraftBuilder::new(
            generator,
            store.clone(),
            config.draft.clone(),
            config.presets_folder.clone(),
        );
        Self {
            config,
            config_path: PathBuf::from("config.yml"),
            store,
            pipeline,
            drafts,
        }
    }

    /// Where a newly seeded outline path is saved back to.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    pub async fn run(&mut self) -> Result<()> {
        let outline_path = self.ensure_outline().await?;

        loop {
            let doc = self.store.load(&outline_path).await?;
            let phase = doc.phase();
            if phase.is_terminal() {
                break;
            }

            let next = phase.next().map(|p| p.as_str()).unwrap_or_default();
            println!("Outline at {}, working towards {}...", phase, next);
            let doc = self
                .advance(&doc, &outline_path)
                .await
                .with_context(|| format!("Outline pass from {} failed", phase))?;
            println!("Outline now at {} (schema v{})", doc.phase(), doc.schema_version());

            if !doc.phase().is_terminal() && !self.confirm("Continue to the next outline pass?") {
                println!("Stopping as requested.");
                return Ok(());
            }
        }

        self.draft_book(&outline_path).await?;
        println!("All chapters drafted!");
        Ok(())
    }

    /// Reuses the configured outline, or seeds one from the project file and
    /// remembers it in the config.
    async fn ensure_outline(&mut self) -> Result<String> {
        if let Some(path) = self.config.outline_file.clone() {
            if self.store.storage().exists(&path).await? {
                info!("Resuming outline {}", path);
                return Ok(path);
            }
            println!("Outline {} not found, seeding a new one.", path);
        }

        let path = self
            .store
            .create_outline(&self.config.project_file, None)
            .await
            .with_context(|| format!("Cannot seed an outline from {}", self.config.project_file))?;
        println!("Created outline {}", path);

        self.config.outline_file = Some(path.clone());
        self.config.save_to(&self.config_path)?;
        Ok(path)
    }

    /// Runs the one pass whose entry phase is the outline's current phase.
    async fn advance(&self, doc: &OutlineDocument, outline_path: &str) -> PipelineResult<OutlineDocument> {
        let model = self.config.model.as_str();
        match doc.phase() {
            OutlinePhase::Init => {
                if word_count(&doc.premise) >= self.config.premise_max_words {
                    self.pipeline.mark_premise_expanded(outline_path).await
                } else {
                    self.pipeline
                        .expand_premise(outline_path, model, self.config.premise_max_words)
                        .await
                }
            }
            OutlinePhase::PremiseExpanded => self.pipeline.define_arc(outline_path, model).await,
            OutlinePhase::ArcDefined => self.pipeline.define_characters(outline_path, model).await,
            OutlinePhase::CharactersOutlined => {
                self.pipeline.define_sub_plots(outline_path, model).await
            }
            OutlinePhase::SubPlotsDefined => self.pipeline.expand_beats(outline_path, model).await,
            OutlinePhase::BeatsExpanded => self.pipeline.define_structure(outline_path, model).await,
            OutlinePhase::StructureOutlined => Ok(doc.clone()),
        }
    }

    async fn draft_book(&self, outline_path: &str) -> Result<()> {
        let doc = self.store.load(outline_path).await?;
        let project = self.store.load_project(outline_path, &doc).await?;
        let output_dir = self.config.output_folder.as_str();
        let model = self.config.model.as_str();
        let storage = self.store.storage();

        if project.include_prologue {
            self.draft_bookend(outline_path, Bookend::Prologue).await?;
        }

        let mut pending = Vec::new();
        for number in 1..=doc.chapter_count {
            let path = Path::new(output_dir).join(chapter_file_name(number));
            if !storage.exists(&path.to_string_lossy()).await? {
                pending.push(number);
            }
        }

        let pb = ProgressBar::new(doc.chapter_count as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] chapter {pos}/{len}")?
                .progress_chars("#>-"),
        );
        pb.set_position((doc.chapter_count as usize - pending.len()) as u64);

        for (i, &number) in pending.iter().enumerate() {
            let drafts = self
                .drafts
                .build_draft(outline_path, output_dir, model, number, Some(number))
                .await
                .with_context(|| format!("Drafting chapter {} failed", number))?;
            for draft in &drafts {
                pb.println(format!(
                    "Chapter {}: {} words ({}/{} pieces){}",
                    draft.number,
                    draft.words,
                    draft.pieces_accepted,
                    draft.pieces_planned,
                    if draft.fell_back { ", fallback draft" } else { "" }
                ));
            }
            pb.inc(1);

            if i + 1 < pending.len() && !self.confirm("Continue to next chapter?") {
                pb.abandon_with_message("Stopped");
                println!("Stopping as requested.");
                return Ok(());
            }
        }
        pb.finish_with_message("Drafting complete");

        if project.include_epilogue {
            self.draft_bookend(outline_path, Bookend::Epilogue).await?;
        }
        Ok(())
    }

    async fn draft_bookend(&self, outline_path: &str, bookend: Bookend) -> Result<()> {
        let path = Path::new(&self.config.output_folder).join(bookend.file_name());
        if self.store.storage().exists(&path.to_string_lossy()).await? {
            println!("Skipping existing {}", bookend.label());
            return Ok(());
        }
        let written = self
            .drafts
            .build_bookend(outline_path, &self.config.output_folder, &self.config.model, bookend)
            .await?;
        println!("{} written: {}", bookend.heading(), written);
        Ok(())
    }

    fn confirm(&self, question: &str) -> bool {
        if self.config.unattended {
            return true;
        }
        match inquire::Confirm::new(question).with_default(true).prompt() {
            Ok(answer) => answer,
            Err(_) => {
                println!("Error reading input, stopping.");
                false
            }
        }
    }
}
