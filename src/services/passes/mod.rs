//! Outline generation passes.
//!
//! Every pass follows the same shape: load the outline, refuse to run unless
//! it sits at the pass's entry phase, ask the model for a value through the
//! structured response protocol, then commit a new snapshot one phase
//! further along and persist it. A pass that fails leaves the file on disk
//! untouched.

mod arc;
mod beats;
mod characters;
mod premise;
mod structure;
mod subplots;

pub use arc::acts_for_chapters;
pub use beats::beats_per_act;

use log::info;

use crate::core::error::PipelineResult;
use crate::core::outline::{guard_phase, OutlineDocument, OutlinePhase};
use crate::core::store::OutlineStore;
use crate::services::generator::Generator;

/// Line appended to every structured prompt.
pub(crate) const RETRY_INSTRUCTION: &str =
    "If you cannot comply with this format exactly, reply with the single word RETRY.";

pub struct OutlinePipeline {
    generator: Generator,
    store: OutlineStore,
}

impl OutlinePipeline {
    pub fn new(generator: Generator, store: OutlineStore) -> Self {
        Self { generator, store }
    }

    pub fn store(&self) -> &OutlineStore {
        &self.store
    }

    /// Loads the outline and checks it sits at `required`.
    async fn begin(
        &self,
        pass: &'static str,
        outline_path: &str,
        required: OutlinePhase,
    ) -> PipelineResult<OutlineDocument> {
        let doc = self.store.load(outline_path).await?;
        guard_phase(pass, doc.phase(), required)?;
        Ok(doc)
    }

    /// Seals `doc` at `exit` and writes it back.
    async fn finish(
        &self,
        pass: &'static str,
        outline_path: &str,
        doc: OutlineDocument,
        exit: OutlinePhase,
    ) -> PipelineResult<OutlineDocument> {
        let doc = doc.commit(exit)?;
        self.store.persist(outline_path, &doc).await?;
        info!(
            "{}: outline now at {} (schema v{})",
            pass,
            doc.phase(),
            doc.schema_version()
        );
        Ok(doc)
    }
}
