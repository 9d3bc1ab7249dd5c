use log::{info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

use crate::core::io::Storage;

/// Author voice knobs for one drafting run.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftStyle {
    pub author_name: String,
    pub voice: String,
    pub preferred_tone: String,
    pub sentence_length: u32,
    pub lexical_density: f64,
    pub hallmarks: Vec<String>,
    pub forbidden_elements: Vec<String>,
}

impl Default for DraftStyle {
    fn default() -> Self {
        Self {
            author_name: "a seasoned novelist".to_string(),
            voice: "Neutral".to_string(),
            preferred_tone: "Neutral".to_string(),
            sentence_length: 15,
            lexical_density: 0.45,
            hallmarks: Vec::new(),
            forbidden_elements: Vec::new(),
        }
    }
}

#[derive(Deserialize, Default)]
struct PresetFile {
    voice: Option<String>,
    lexical_density: Option<f64>,
    sentence_length: Option<u32>,
    #[serde(default)]
    hallmarks: Vec<String>,
    preferred_tone: Option<String>,
    #[serde(default)]
    formatting_rules: FormattingRules,
}

#[derive(Deserialize, Default)]
struct FormattingRules {
    #[serde(default)]
    forbidden_elements: Value,
}

/// Accepts either a list of strings or one comma-separated string.
fn string_or_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn from_preset(preset: PresetFile, author_name: String) -> DraftStyle {
    let neutral = DraftStyle::default();
    DraftStyle {
        author_name,
        voice: preset.voice.unwrap_or(neutral.voice),
        preferred_tone: preset.preferred_tone.unwrap_or(neutral.preferred_tone),
        sentence_length: preset.sentence_length.unwrap_or(neutral.sentence_length),
        lexical_density: preset.lexical_density.unwrap_or(neutral.lexical_density),
        hallmarks: preset.hallmarks,
        forbidden_elements: string_or_list(&preset.formatting_rules.forbidden_elements),
    }
}

/// Loads `<presets_dir>/<preset>.json`. Falls back to the neutral style when
/// no preset is named or the file can't be read.
pub async fn load_style(storage: &dyn Storage, presets_dir: &str, preset: Option<&str>) -> DraftStyle {
    let Some(name) = preset.map(str::trim).filter(|p| !p.is_empty()) else {
        return DraftStyle::default();
    };

    let file_name = if name.ends_with(".json") {
        name.to_string()
    } else {
        format!("{}.json", name)
    };
    let path = Path::new(presets_dir).join(&file_name);
    let path = path.to_string_lossy();
    let author_name = Path::new(&file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string());

    let content = match storage.read_to_string(&path).await {
        Ok(content) => content,
        Err(e) => {
            warn!("Author preset {} unavailable ({:#}), using neutral style", path, e);
            return DraftStyle::default();
        }
    };
    match serde_json::from_str::<PresetFile>(&content) {
        Ok(preset) => {
            info!("Drafting in the style of {}", author_name);
            from_preset(preset, author_name)
        }
        Err(e) => {
            warn!("Author preset {} is not valid JSON ({}), using neutral style", path, e);
            DraftStyle::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;

    #[tokio::test]
    async fn test_preset_fields_and_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(
            dir.path().join("Ursula Le Guin.json"),
            r#"{ "voice": "Spare, anthropological", "hallmarks": ["quiet wonder", "ethics"],
                 "formatting_rules": { "forbidden_elements": ["emoji", "footnotes"] } }"#,
        )?;
        let storage = NativeStorage::new();
        let dir_str = dir.path().to_str().unwrap();

        let style = load_style(&storage, dir_str, Some("Ursula Le Guin")).await;
        assert_eq!(style.author_name, "Ursula Le Guin");
        assert_eq!(style.voice, "Spare, anthropological");
        assert_eq!(style.preferred_tone, "Neutral");
        assert_eq!(style.sentence_length, 15);
        assert_eq!(style.lexical_density, 0.45);
        assert_eq!(style.hallmarks.len(), 2);
        assert_eq!(style.forbidden_elements, vec!["emoji", "footnotes"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_or_broken_preset_is_neutral() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("broken.json"), "{ not json")?;
        let storage = NativeStorage::new();
        let dir_str = dir.path().to_str().unwrap();

        assert_eq!(load_style(&storage, dir_str, None).await, DraftStyle::default());
        assert_eq!(load_style(&storage, dir_str, Some("absent")).await, DraftStyle::default());
        assert_eq!(load_style(&storage, dir_str, Some("broken.json")).await, DraftStyle::default());
        Ok(())
    }

    #[test]
    fn test_forbidden_elements_as_string() {
        let value = Value::String("emoji, headings".to_string());
        assert_eq!(string_or_list(&value), vec!["emoji", "headings"]);
    }
}
