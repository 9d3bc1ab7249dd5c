use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::core::error::ShapeError;
use crate::core::outline::{ChapterOutline, Character};
use crate::services::extract::{extract_json_fragment, unwrap_fenced};
use crate::utils::text::word_count;

/// Turns one raw reply into the value a pass commits, or says why it can't.
pub trait ShapeContract {
    type Output;

    fn parse(&self, reply: &str) -> Result<Self::Output, ShapeError>;
}

fn parse_fragment<T: DeserializeOwned>(reply: &str) -> Result<T, ShapeError> {
    let fragment = extract_json_fragment(reply).ok_or(ShapeError::NoJsonFound)?;
    serde_json::from_str(fragment).map_err(|e| ShapeError::Malformed(e.to_string()))
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.trim_start()
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn expect_len<T>(items: &[T], expected: usize) -> Result<(), ShapeError> {
    if items.len() != expected {
        return Err(ShapeError::WrongLength {
            expected,
            actual: items.len(),
        });
    }
    Ok(())
}

fn string_list(value: &Value, index: usize, field: &str) -> Result<Vec<String>, ShapeError> {
    let items = value.as_array().ok_or_else(|| ShapeError::InvalidEntry {
        index,
        reason: format!("`{}` must be an array", field),
    })?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| ShapeError::InvalidEntry {
                    index,
                    reason: format!("`{}` must contain only strings", field),
                })
        })
        .collect()
}

/// Any non-blank prose, fence-unwrapped.
#[derive(Debug, Clone, Copy)]
pub struct NonEmptyText;

impl ShapeContract for NonEmptyText {
    type Output = String;

    fn parse(&self, reply: &str) -> Result<String, ShapeError> {
        let text = unwrap_fenced(reply);
        if text.is_empty() {
            return Err(ShapeError::EmptyReply);
        }
        Ok(text.to_string())
    }
}

/// One paragraph of prose between 50 words and the configured ceiling.
#[derive(Debug, Clone)]
pub struct PremiseContract {
    pub max_words: usize,
}

impl PremiseContract {
    pub const MIN_WORDS: usize = 50;
}

impl ShapeContract for PremiseContract {
    type Output = String;

    fn parse(&self, reply: &str) -> Result<String, ShapeError> {
        let text = unwrap_fenced(reply);
        let words = word_count(text);
        if words < Self::MIN_WORDS || words > self.max_words {
            return Err(ShapeError::WordCount {
                words,
                min: Self::MIN_WORDS,
                max: self.max_words,
            });
        }
        Ok(text.to_string())
    }
}

/// One definition paragraph per act.
#[derive(Debug, Clone)]
pub struct ArcContract {
    pub acts: usize,
}

impl ShapeContract for ArcContract {
    type Output = Vec<String>;

    fn parse(&self, reply: &str) -> Result<Vec<String>, ShapeError> {
        let value: Value = parse_fragment(reply)?;
        let acts = string_list(&value, 0, "acts")?;
        expect_len(&acts, self.acts)?;
        if let Some(index) = acts.iter().position(|a| a.is_empty()) {
            return Err(ShapeError::InvalidEntry {
                index,
                reason: "act definition is empty".to_string(),
            });
        }
        Ok(acts)
    }
}

/// Protagonist first, then supporting, then minor characters.
#[derive(Debug, Clone)]
pub struct RosterContract {
    pub supporting: usize,
    pub minor: usize,
}

impl RosterContract {
    pub const MAX_TRAITS: usize = 5;
    pub const MAX_ARC_WORDS: usize = 100;

    pub fn total(&self) -> usize {
        1 + self.supporting + self.minor
    }

    fn role_prefix(&self, index: usize) -> &'static str {
        if index == 0 {
            "Protagonist:"
        } else if index <= self.supporting {
            "Supporting character:"
        } else {
            "Minor character:"
        }
    }
}

impl ShapeContract for RosterContract {
    type Output = Vec<Character>;

    fn parse(&self, reply: &str) -> Result<Vec<Character>, ShapeError> {
        let roster: Vec<Character> = parse_fragment(reply)?;
        expect_len(&roster, self.total())?;

        for (index, character) in roster.iter().enumerate() {
            let invalid = |reason: String| ShapeError::InvalidEntry { index, reason };

            if character.name.trim().is_empty() {
                return Err(invalid("name is empty".to_string()));
            }
            let prefix = self.role_prefix(index);
            if !character.role.trim_start().starts_with(prefix) {
                return Err(invalid(format!("role must start with \"{}\"", prefix)));
            }
            if character.traits.is_empty() || character.traits.len() > Self::MAX_TRAITS {
                return Err(invalid(format!(
                    "{} traits, expected 1 to {}",
                    character.traits.len(),
                    Self::MAX_TRAITS
                )));
            }
            let arc_words = word_count(&character.arc);
            if arc_words > Self::MAX_ARC_WORDS {
                return Err(invalid(format!(
                    "arc has {} words, limit is {}",
                    arc_words,
                    Self::MAX_ARC_WORDS
                )));
            }
        }
        Ok(roster)
    }
}

/// `{"Act 1": ["S1: ...", ...], ...}` with every thread evolving across acts.
#[derive(Debug, Clone)]
pub struct SubPlotContract {
    pub acts: usize,
    pub depth: usize,
}

impl ShapeContract for SubPlotContract {
    /// Thread lines per act, in act order.
    type Output = Vec<Vec<String>>;

    fn parse(&self, reply: &str) -> Result<Vec<Vec<String>>, ShapeError> {
        let object: Map<String, Value> = parse_fragment(reply)?;

        let mut per_act = Vec::with_capacity(self.acts);
        for act in 0..self.acts {
            let key = format!("Act {}", act + 1);
            let value = object
                .get(&key)
                .ok_or_else(|| ShapeError::MissingKey(key.clone()))?;
            let lines = string_list(value, act, &key)?;
            expect_len(&lines, self.depth)?;

            for (thread, line) in lines.iter().enumerate() {
                let prefix = format!("S{}:", thread + 1);
                if !starts_with_ignore_case(line, &prefix) {
                    return Err(ShapeError::InvalidEntry {
                        index: act,
                        reason: format!("{} line {} must start with \"{}\"", key, thread + 1, prefix),
                    });
                }
            }
            per_act.push(lines);
        }

        if self.acts >= 2 {
            for thread in 0..self.depth {
                let distinct: HashSet<String> = per_act
                    .iter()
                    .map(|lines| lines[thread].trim().to_lowercase())
                    .collect();
                if distinct.len() < 2 {
                    return Err(ShapeError::StaticThread(format!("S{}", thread + 1)));
                }
            }
        }

        Ok(per_act)
    }
}

/// A flat list of beat strings of fixed length.
#[derive(Debug, Clone)]
pub struct BeatsContract {
    pub beats: usize,
}

impl ShapeContract for BeatsContract {
    type Output = Vec<String>;

    fn parse(&self, reply: &str) -> Result<Vec<String>, ShapeError> {
        let value: Value = parse_fragment(reply)?;
        let beats = string_list(&value, 0, "beats")?;
        expect_len(&beats, self.beats)?;
        Ok(beats)
    }
}

/// Chapter objects in reading order, with optional prologue and epilogue.
#[derive(Debug, Clone)]
pub struct StructureContract {
    pub chapters: usize,
    pub beats_per_chapter: usize,
    pub depth: usize,
    pub prologue: bool,
    pub epilogue: bool,
}

impl StructureContract {
    pub const BEATS_PER_CHAPTER: usize = 3;

    pub fn expected_len(&self) -> usize {
        self.chapters + usize::from(self.prologue) + usize::from(self.epilogue)
    }

    /// Chapter number expected at `index`: prologue is 0, epilogue N + 1.
    fn expected_number(&self, index: usize) -> u64 {
        if self.prologue {
            index as u64
        } else {
            index as u64 + 1
        }
    }
}

impl ShapeContract for StructureContract {
    type Output = Vec<ChapterOutline>;

    fn parse(&self, reply: &str) -> Result<Vec<ChapterOutline>, ShapeError> {
        let items: Vec<Value> = parse_fragment(reply)?;
        expect_len(&items, self.expected_len())?;

        let mut chapters = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let invalid = |reason: &str| ShapeError::InvalidEntry {
                index,
                reason: reason.to_string(),
            };
            let object = item.as_object().ok_or_else(|| invalid("not an object"))?;

            let number = object
                .get("number")
                .and_then(Value::as_u64)
                .ok_or_else(|| invalid("`number` missing or not an integer"))?;
            let expected = self.expected_number(index);
            if number != expected {
                return Err(ShapeError::InvalidEntry {
                    index,
                    reason: format!("chapter number {} where {} was expected", number, expected),
                });
            }

            let summary = object
                .get("summary")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| invalid("`summary` missing or empty"))?;

            let beats = object
                .get("beats")
                .ok_or_else(|| invalid("`beats` missing"))
                .and_then(|v| string_list(v, index, "beats"))?;
            if beats.len() != self.beats_per_chapter {
                return Err(ShapeError::InvalidEntry {
                    index,
                    reason: format!(
                        "{} beats, expected exactly {}",
                        beats.len(),
                        self.beats_per_chapter
                    ),
                });
            }

            let sub_plots = match object.get("sub_plots") {
                None | Some(Value::Null) => Vec::new(),
                Some(v) => string_list(v, index, "sub_plots")?,
            };
            if sub_plots.len() > self.depth {
                return Err(ShapeError::InvalidEntry {
                    index,
                    reason: format!("{} sub-plots, at most {} allowed", sub_plots.len(), self.depth),
                });
            }

            chapters.push(ChapterOutline {
                number: number as u32,
                summary: summary.to_string(),
                beats,
                sub_plots,
            });
        }
        Ok(chapters)
    }
}
