use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::core::error::{PipelineError, PipelineResult};

/// Position of an outline in the generation pipeline.
///
/// Variants are declared in pipeline order, so the derived `Ord` is the
/// forward order of the state machine.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OutlinePhase {
    Init,
    PremiseExpanded,
    ArcDefined,
    CharactersOutlined,
    SubPlotsDefined,
    BeatsExpanded,
    StructureOutlined,
}

impl OutlinePhase {
    pub const ALL: [OutlinePhase; 7] = [
        OutlinePhase::Init,
        OutlinePhase::PremiseExpanded,
        OutlinePhase::ArcDefined,
        OutlinePhase::CharactersOutlined,
        OutlinePhase::SubPlotsDefined,
        OutlinePhase::BeatsExpanded,
        OutlinePhase::StructureOutlined,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutlinePhase::Init => "Init",
            OutlinePhase::PremiseExpanded => "PremiseExpanded",
            OutlinePhase::ArcDefined => "ArcDefined",
            OutlinePhase::CharactersOutlined => "CharactersOutlined",
            OutlinePhase::SubPlotsDefined => "SubPlotsDefined",
            OutlinePhase::BeatsExpanded => "BeatsExpanded",
            OutlinePhase::StructureOutlined => "StructureOutlined",
        }
    }

    /// The phase that follows this one, `None` at the terminal phase.
    pub fn next(&self) -> Option<OutlinePhase> {
        let idx = Self::ALL.iter().position(|p| p == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }
}

impl fmt::Display for OutlinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pass may run only when the outline sits exactly at its entry phase.
pub fn can_transition(current: OutlinePhase, required: OutlinePhase) -> bool {
    current == required
}

/// Rejects a pass before any generation work when the phase doesn't match.
pub fn guard_phase(
    pass: &'static str,
    current: OutlinePhase,
    required: OutlinePhase,
) -> PipelineResult<()> {
    if can_transition(current, required) {
        Ok(())
    } else {
        Err(PipelineError::PhaseGuardViolation {
            pass,
            required,
            current,
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutlineHeader {
    pub schema_version: u32,
    pub project_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_created: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Act {
    pub act: String,
    pub definition: String,
    #[serde(default)]
    pub beats: Vec<String>,
    #[serde(default)]
    pub sub_plots: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Character {
    pub name: String,
    pub role: String,
    pub traits: Vec<String>,
    pub arc: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChapterOutline {
    pub number: u32,
    pub summary: String,
    pub beats: Vec<String>,
    #[serde(default)]
    pub sub_plots: Vec<String>,
}

/// The persisted outline. Unknown top-level fields survive a load/save cycle.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutlineDocument {
    pub header: OutlineHeader,
    pub outline_progress: OutlinePhase,
    #[serde(default)]
    pub premise: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub premise_expanded: Option<String>,
    #[serde(default)]
    pub story_arc: Vec<Act>,
    #[serde(default)]
    pub characters: Vec<Character>,
    #[serde(default)]
    pub chapters: Vec<ChapterOutline>,
    pub total_word_count: u32,
    pub chapter_count: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OutlineDocument {
    pub fn phase(&self) -> OutlinePhase {
        self.outline_progress
    }

    pub fn schema_version(&self) -> u32 {
        self.header.schema_version
    }

    /// Expanded premise when present, otherwise the original one.
    pub fn working_premise(&self) -> &str {
        self.premise_expanded
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&self.premise)
    }

    /// Seals a successful pass: returns a new snapshot at `exit` with the
    /// schema version bumped by exactly one.
    pub fn commit(mut self, exit: OutlinePhase) -> PipelineResult<Self> {
        if exit <= self.outline_progress {
            return Err(PipelineError::InvalidArgument(format!(
                "cannot move outline from {} back to {}",
                self.outline_progress, exit
            )));
        }
        self.outline_progress = exit;
        self.header.schema_version += 1;
        Ok(self)
    }

    /// Chapter outline for a 1-based chapter number.
    pub fn chapter(&self, number: u32) -> Option<&ChapterOutline> {
        self.chapters.iter().find(|c| c.number == number)
    }

    /// 0-based act a chapter falls into, spreading chapters evenly over acts.
    pub fn act_index_for_chapter(&self, number: u32) -> usize {
        let acts = self.story_arc.len();
        if acts == 0 || self.chapter_count == 0 {
            return 0;
        }
        let idx = (number.saturating_sub(1) as usize * acts) / self.chapter_count as usize;
        idx.min(acts - 1)
    }

    /// Checks the fields a pass relies on; `what` names the pass for the error.
    pub fn require_story_arc(&self, what: &str) -> PipelineResult<()> {
        if self.story_arc.is_empty() {
            return Err(PipelineError::MalformedPersistedState(format!(
                "storyArc is empty but {} needs it",
                what
            )));
        }
        Ok(())
    }

    pub fn require_chapter_count(&self) -> PipelineResult<u32> {
        if self.chapter_count == 0 {
            return Err(PipelineError::MalformedPersistedState(
                "chapterCount must be positive".to_string(),
            ));
        }
        Ok(self.chapter_count)
    }
}

/// The project definition an outline was seeded from.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDefinition {
    #[serde(default)]
    pub premise: String,
    #[serde(default = "default_genre")]
    pub story_genre: String,
    #[serde(default)]
    pub target_audience: Vec<String>,
    pub supporting_characters: u32,
    pub minor_characters: u32,
    #[serde(default = "default_sub_plot_depth")]
    pub sub_plot_depth: i32,
    pub total_word_count: u32,
    pub chapter_count: u32,
    #[serde(default)]
    pub famous_author_preset: Option<String>,
    #[serde(default)]
    pub include_prologue: bool,
    #[serde(default)]
    pub include_epilogue: bool,
}

fn default_genre() -> String {
    "General fiction".to_string()
}

fn default_sub_plot_depth() -> i32 {
    1
}

impl ProjectDefinition {
    /// Sub-plot depth with negative values clamped to zero.
    pub fn depth(&self) -> usize {
        self.sub_plot_depth.max(0) as usize
    }

    pub fn audience_line(&self) -> String {
        let audience: Vec<&str> = self
            .target_audience
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .collect();
        if audience.is_empty() {
            String::new()
        } else {
            format!("Target audience: {}.", audience.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> OutlineDocument {
        serde_json::from_str(
            r#"{
                "header": { "schemaVersion": 1, "projectFile": "../demo.project.json" },
                "outlineProgress": "Init",
                "premise": "A door appears in a lighthouse.",
                "totalWordCount": 100000,
                "chapterCount": 10,
                "storyGenre": "Mystery"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_phase_order_is_forward() {
        for pair in OutlinePhase::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].next(), Some(pair[1]));
        }
        assert!(OutlinePhase::StructureOutlined.is_terminal());
    }

    #[test]
    fn test_can_transition_requires_exact_phase() {
        assert!(can_transition(OutlinePhase::ArcDefined, OutlinePhase::ArcDefined));
        assert!(!can_transition(OutlinePhase::CharactersOutlined, OutlinePhase::ArcDefined));
        assert!(!can_transition(OutlinePhase::Init, OutlinePhase::ArcDefined));
    }

    #[test]
    fn test_commit_bumps_version_once() {
        let doc = sample().commit(OutlinePhase::PremiseExpanded).unwrap();
        assert_eq!(doc.schema_version(), 2);
        assert_eq!(doc.phase(), OutlinePhase::PremiseExpanded);
        assert!(doc.clone().commit(OutlinePhase::Init).is_err());
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let doc = sample();
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["storyGenre"], "Mystery");
        assert_eq!(json["outlineProgress"], "Init");
        assert_eq!(json["header"]["schemaVersion"], 1);
    }

    #[test]
    fn test_act_index_spreads_chapters() {
        let mut doc = sample();
        doc.story_arc = (1..=3)
            .map(|i| Act {
                act: format!("Act {}", i),
                definition: String::new(),
                beats: vec![],
                sub_plots: vec![],
            })
            .collect();
        assert_eq!(doc.act_index_for_chapter(1), 0);
        assert_eq!(doc.act_index_for_chapter(4), 0);
        assert_eq!(doc.act_index_for_chapter(5), 1);
        assert_eq!(doc.act_index_for_chapter(10), 2);
    }
}
