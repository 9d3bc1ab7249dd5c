use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::services::llm::LlmConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Project definition used to seed a new outline.
    #[serde(default)]
    pub project_file: String,

    /// Outline to resume; seeded from `project_file` when absent.
    #[serde(default)]
    pub outline_file: Option<String>,

    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_presets")]
    pub presets_folder: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub unattended: bool,

    #[serde(default = "default_premise_max_words")]
    pub premise_max_words: usize,

    pub llm: LlmConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub draft: DraftConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// Attempt `n` waits `n * backoff_step_seconds` before the next one.
    #[serde(default = "default_backoff_step")]
    pub backoff_step_seconds: u64,
    #[serde(default = "default_model_retries")]
    pub models: HashMap<String, u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_max_retries: default_max_retries(),
            backoff_step_seconds: default_backoff_step(),
            models: default_model_retries(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DraftConfig {
    #[serde(default = "default_piece_size")]
    pub piece_size_words: usize,
    /// Trailing words of the chapter fed back as the continuity anchor.
    #[serde(default = "default_context_window")]
    pub context_window_words: usize,
    #[serde(default = "default_piece_attempts")]
    pub max_piece_attempts: u32,
    /// Consecutive tag mismatches after which the tag is rewritten.
    #[serde(default = "default_tag_rewrite")]
    pub tag_rewrite_after: u32,
    #[serde(default = "default_tolerance_below")]
    pub tolerance_below: usize,
    #[serde(default = "default_tolerance_above")]
    pub tolerance_above: usize,
    #[serde(default = "default_relaxed_floor")]
    pub relaxed_floor_words: usize,
    #[serde(default = "default_summary_words")]
    pub summary_words: usize,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            piece_size_words: default_piece_size(),
            context_window_words: default_context_window(),
            max_piece_attempts: default_piece_attempts(),
            tag_rewrite_after: default_tag_rewrite(),
            tolerance_below: default_tolerance_below(),
            tolerance_above: default_tolerance_above(),
            relaxed_floor_words: default_relaxed_floor(),
            summary_words: default_summary_words(),
        }
    }
}

fn default_output() -> String {
    "drafts".to_string()
}
fn default_presets() -> String {
    "author_presets".to_string()
}
fn default_premise_max_words() -> usize {
    250
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_step() -> u64 {
    2
}
fn default_model_retries() -> HashMap<String, u32> {
    [
        ("gpt-3.5-turbo", 6),
        ("gpt-3.5-turbo-16k", 6),
        ("gpt-4", 4),
        ("gpt-4o-mini", 6),
        ("gpt-4o", 4),
        ("gpt-4.1", 4),
        ("gpt-4.1-mini", 6),
        ("gpt-4.1-nano", 6),
        ("gpt-4-turbo", 6),
        ("gpt-4.5-preview", 4),
    ]
    .into_iter()
    .map(|(model, retries)| (model.to_string(), retries))
    .collect()
}
fn default_piece_size() -> usize {
    350
}
fn default_context_window() -> usize {
    1600
}
fn default_piece_attempts() -> u32 {
    5
}
fn default_tag_rewrite() -> u32 {
    3
}
fn default_tolerance_below() -> usize {
    100
}
fn default_tolerance_above() -> usize {
    150
}
fn default_relaxed_floor() -> usize {
    150
}
fn default_summary_words() -> usize {
    120
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(Path::new("config.yml"))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        fs::create_dir_all(&self.presets_folder)?;
        Ok(())
    }
}
