use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use log::debug;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::io::Storage;
use crate::utils::text::word_count;

pub const CSV_HEADER: &str = "utc_timestamp,model,prompt_tokens,completion_tokens,usd_cost\n";

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CostTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub usd: f64,
}

/// Rough token count: four tokens for every three words.
pub fn estimate_tokens(text: &str) -> u64 {
    ((word_count(text) * 4) as f64 / 3.0).round() as u64
}

/// USD per thousand tokens.
pub fn rate_per_1k(model_id: &str) -> f64 {
    if model_id.contains("gpt-4") {
        0.01
    } else {
        0.0015
    }
}

/// Append-only CSV of estimated spend, one row per generative call.
pub struct CostLedger {
    storage: Arc<dyn Storage>,
    path: String,
    totals: Mutex<CostTotals>,
}

impl CostLedger {
    /// Opens the ledger at `path`, writing the header when the file is new.
    pub async fn open(storage: Arc<dyn Storage>, path: &str) -> Result<Self> {
        if !storage.exists(path).await? {
            storage.append(path, CSV_HEADER.as_bytes()).await?;
        }
        Ok(Self {
            storage,
            path: path.to_string(),
            totals: Mutex::new(CostTotals::default()),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn record(&self, model_id: &str, prompt: &str, completion: &str) -> Result<()> {
        let prompt_tokens = estimate_tokens(prompt);
        let completion_tokens = estimate_tokens(completion);
        let usd = (prompt_tokens + completion_tokens) as f64 / 1000.0 * rate_per_1k(model_id);

        // Held across the append so rows land in the order totals change.
        let mut totals = self.totals.lock().await;
        totals.prompt_tokens += prompt_tokens;
        totals.completion_tokens += completion_tokens;
        totals.usd += usd;

        let row = format!(
            "{},{},{},{},{:.4}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            model_id,
            prompt_tokens,
            completion_tokens,
            usd
        );
        self.storage.append(&self.path, row.as_bytes()).await?;
        debug!("Cost: {} +{:.4} USD (total {:.4})", model_id, usd, totals.usd);
        Ok(())
    }

    pub async fn totals(&self) -> CostTotals {
        *self.totals.lock().await
    }
}
