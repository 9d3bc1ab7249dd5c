use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

use crate::core::config::DraftConfig;
use crate::services::draft::duplicate::is_near_duplicate;
use crate::services::draft::style::DraftStyle;
use crate::services::extract::unwrap_fenced;
use crate::utils::text::word_count;

static TAG_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^---[ \t]*piece[ \t]+(\d+)[ \t]*/[ \t]*(\d+)[ \t]*---").ok());

const TERMINALS: [char; 4] = ['.', '!', '?', '…'];
const CLOSERS: [char; 7] = ['"', '\'', '»', '”', '’', ')', ']'];

/// Which piece of how many a reply is supposed to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceSpec {
    pub index: usize,
    pub count: usize,
}

impl PieceSpec {
    pub fn tag(&self) -> String {
        format!("--- piece {}/{} ---", self.index, self.count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("the reply does not open with a piece tag")]
    MissingTag,
    #[error("the tag reads piece {index}/{count}")]
    TagMismatch { index: usize, count: usize },
    #[error("{words} words is below the floor of {min}")]
    TooShort { words: usize, min: usize },
    #[error("{words} words is above the ceiling of {max}")]
    TooLong { words: usize, max: usize },
    #[error("the piece stops mid-sentence")]
    RaggedEnding,
    #[error("the piece repeats text already drafted")]
    NearDuplicate,
}

/// Numbers in the opening tag and the byte offset where the tag ends.
fn find_tag(piece: &str) -> Option<(usize, usize, usize)> {
    let caps = TAG_RE.as_ref()?.captures(piece)?;
    let number = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<usize>().ok())
            .unwrap_or(0)
    };
    let end = caps.get(0)?.end();
    Some((number(1), number(2), end))
}

/// True when the text ends on `.`, `!`, `?` or `…`, optionally followed by a
/// closing quote or bracket.
pub fn ends_clean(text: &str) -> bool {
    let mut chars = text.trim_end().chars().rev();
    let mut last = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    if CLOSERS.contains(&last) {
        last = match chars.next() {
            Some(c) => c,
            None => return false,
        };
    }
    TERMINALS.contains(&last)
}

/// Runs the acceptance checks for one piece across its attempts.
///
/// Tag mismatches are counted across consecutive attempts; once the count
/// reaches `tag_rewrite_after` the tag is rewritten instead of rejected.
pub struct PieceJudge<'a> {
    settings: &'a DraftConfig,
    spec: PieceSpec,
    mismatches: u32,
}

impl<'a> PieceJudge<'a> {
    pub fn new(settings: &'a DraftConfig, spec: PieceSpec) -> Self {
        Self {
            settings,
            spec,
            mismatches: 0,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.settings.max_piece_attempts.max(1)
    }

    /// `attempt` is 0-based.
    pub fn is_final(&self, attempt: u32) -> bool {
        attempt + 1 >= self.max_attempts()
    }

    /// Accepted word range; the final attempt has a lower floor and no ceiling.
    pub fn length_bounds(&self, attempt: u32) -> (usize, Option<usize>) {
        let size = self.settings.piece_size_words;
        if self.is_final(attempt) {
            (self.settings.relaxed_floor_words, None)
        } else {
            (
                size.saturating_sub(self.settings.tolerance_below),
                Some(size + self.settings.tolerance_above),
            )
        }
    }

    /// Returns the piece ready to append, tag included.
    pub fn evaluate(&mut self, reply: &str, drafted: &str, attempt: u32) -> Result<String, Rejection> {
        // Fences only count when they wrap the whole reply.
        let reply = if reply.trim_start().starts_with("```") {
            unwrap_fenced(reply)
        } else {
            reply.trim()
        };

        let (piece, body_start) = match find_tag(reply) {
            None => {
                self.mismatches = 0;
                return Err(Rejection::MissingTag);
            }
            Some((index, count, end)) if index == self.spec.index && count == self.spec.count => {
                self.mismatches = 0;
                (reply.to_string(), end)
            }
            Some((index, count, end)) => {
                self.mismatches += 1;
                if self.mismatches < self.settings.tag_rewrite_after {
                    return Err(Rejection::TagMismatch { index, count });
                }
                let tag = self.spec.tag();
                (format!("{}{}", tag, &reply[end..]), tag.len())
            }
        };

        let body = &piece[body_start..];
        let words = word_count(body);
        let (min, max) = self.length_bounds(attempt);
        if words < min {
            return Err(Rejection::TooShort { words, min });
        }
        if let Some(max) = max.filter(|&max| words > max) {
            return Err(Rejection::TooLong { words, max });
        }
        if !ends_clean(body) {
            return Err(Rejection::RaggedEnding);
        }
        if is_near_duplicate(body, drafted) {
            return Err(Rejection::NearDuplicate);
        }
        Ok(piece)
    }

    /// Extra instruction for attempt `attempt` after `last` was rejected.
    pub fn corrective_note(&self, attempt: u32, last: Option<&Rejection>) -> Option<String> {
        if attempt == 0 {
            return None;
        }
        let reason = last
            .map(|r| format!("The previous reply was rejected: {}. ", r))
            .unwrap_or_default();
        let instruction = if self.is_final(attempt) {
            format!(
                "Final attempt. Any length of at least {} words is accepted.",
                self.settings.relaxed_floor_words
            )
        } else if attempt == 1 {
            format!("Start with the exact tag {} on its own line.", self.spec.tag())
        } else {
            format!("Do not skip ahead. Write piece {} only.", self.spec.index)
        };
        Some(format!("{}{}", reason, instruction))
    }
}

/// Prompt for one attempt at one piece.
pub struct PiecePrompt<'a> {
    pub style: &'a DraftStyle,
    pub chapter_number: u32,
    pub spec: PieceSpec,
    pub piece_words: usize,
    pub context: &'a str,
    pub previous_text: &'a str,
    pub note: Option<String>,
}

impl PiecePrompt<'_> {
    pub fn render(&self) -> String {
        let tag = self.spec.tag();
        let forbidden = if self.style.forbidden_elements.is_empty() {
            String::new()
        } else {
            format!(" Never use: {}.", self.style.forbidden_elements.join(", "))
        };
        let previous = if self.previous_text.trim().is_empty() {
            "(none)"
        } else {
            self.previous_text
        };

        format!(
            "You are {author}. Write in a {voice} voice with a {tone} tone, \
             sentences of about {sentence} words and a lexical density near {density:.2}.{forbidden}\n\n\
             Write ONLY piece {index}/{count} of Chapter {chapter}.\n\
             Start with:\n{tag}\n\n\
             Target about {words} words and end on a complete sentence.\n\
             {note}\n\n\
             {context}\n\n\
             PREVIOUS TEXT\n{previous}\n\n\
             {tag}",
            author = self.style.author_name,
            voice = self.style.voice,
            tone = self.style.preferred_tone,
            sentence = self.style.sentence_length,
            density = self.style.lexical_density,
            forbidden = forbidden,
            index = self.spec.index,
            count = self.spec.count,
            chapter = self.chapter_number,
            tag = tag,
            words = self.piece_words,
            note = self.note.as_deref().unwrap_or(""),
            context = self.context,
            previous = previous,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prose(seed: &str, words: usize) -> String {
        let body: Vec<String> = (0..words).map(|i| format!("{}{}", seed, i)).collect();
        format!("{}.", body.join(" "))
    }

    fn spec() -> PieceSpec {
        PieceSpec { index: 2, count: 3 }
    }

    #[test]
    fn test_tag_parsing() {
        assert_eq!(find_tag("--- piece 2/3 ---\ntext").map(|t| (t.0, t.1)), Some((2, 3)));
        assert_eq!(find_tag("---PIECE 10 / 12---").map(|t| (t.0, t.1)), Some((10, 12)));
        assert_eq!(find_tag("text\n--- piece 2/3 ---"), None);
        assert_eq!(find_tag("## Piece 2"), None);
        assert_eq!(find_tag("---\npiece 2/3\n---"), None);
        assert_eq!(find_tag("--- piece 2/\n3 ---"), None);
    }

    #[test]
    fn test_ends_clean() {
        assert!(ends_clean("She left."));
        assert!(ends_clean("\"Go!\"  \n"));
        assert!(ends_clean("(It was over.)"));
        assert!(ends_clean("And then…"));
        assert!(!ends_clean("She left"));
        assert!(!ends_clean("She said \"go"));
        assert!(!ends_clean("\""));
        assert!(!ends_clean(""));
    }

    #[test]
    fn test_accepts_well_formed_piece() {
        let settings = DraftConfig::default();
        let mut judge = PieceJudge::new(&settings, spec());
        let reply = format!("--- piece 2/3 ---\n{}", prose("a", 300));
        assert_eq!(judge.evaluate(&reply, "", 0), Ok(reply.clone()));
    }

    #[test]
    fn test_accepts_fenced_piece() {
        let settings = DraftConfig::default();
        let mut judge = PieceJudge::new(&settings, spec());
        let body = prose("a", 300);
        let reply = format!("```\n--- piece 2/3 ---\n{}\n```", body);
        assert_eq!(
            judge.evaluate(&reply, "", 0),
            Ok(format!("--- piece 2/3 ---\n{}", body))
        );

        let reply = format!("```markdown\n--- piece 2/3 ---\n{}\n```\n", body);
        assert!(judge.evaluate(&reply, "", 0).is_ok());
    }

    #[test]
    fn test_tag_split_across_lines_is_missing() {
        let settings = DraftConfig::default();
        let mut judge = PieceJudge::new(&settings, spec());
        let reply = format!("---\npiece 2/3\n---\n{}", prose("a", 300));
        assert_eq!(judge.evaluate(&reply, "", 0), Err(Rejection::MissingTag));
    }

    #[test]
    fn test_third_consecutive_mismatch_rewrites_tag() {
        let settings = DraftConfig::default();
        let mut judge = PieceJudge::new(&settings, spec());
        let reply = format!("--- piece 3/3 ---\n{}", prose("a", 300));

        assert_eq!(
            judge.evaluate(&reply, "", 0),
            Err(Rejection::TagMismatch { index: 3, count: 3 })
        );
        assert!(judge.evaluate(&reply, "", 1).is_err());
        let accepted = judge.evaluate(&reply, "", 2).unwrap();
        assert!(accepted.starts_with("--- piece 2/3 ---\na0 a1"));
        assert!(!accepted.contains("piece 3/3"));
    }

    #[test]
    fn test_missing_tag_breaks_mismatch_streak() {
        let settings = DraftConfig::default();
        let mut judge = PieceJudge::new(&settings, spec());
        let wrong = format!("--- piece 1/3 ---\n{}", prose("a", 300));
        let untagged = prose("a", 300);

        assert!(judge.evaluate(&wrong, "", 0).is_err());
        assert!(judge.evaluate(&wrong, "", 1).is_err());
        assert_eq!(judge.evaluate(&untagged, "", 2), Err(Rejection::MissingTag));
        assert_eq!(
            judge.evaluate(&wrong, "", 3),
            Err(Rejection::TagMismatch { index: 1, count: 3 })
        );
    }

    #[test]
    fn test_length_window_and_relaxed_final_attempt() {
        let settings = DraftConfig::default();
        let mut judge = PieceJudge::new(&settings, spec());
        assert_eq!(judge.length_bounds(0), (250, Some(500)));
        assert_eq!(judge.length_bounds(4), (150, None));

        let short = format!("--- piece 2/3 ---\n{}", prose("a", 200));
        assert_eq!(
            judge.evaluate(&short, "", 0),
            Err(Rejection::TooShort { words: 200, min: 250 })
        );
        assert!(judge.evaluate(&short, "", 4).is_ok());

        let long = format!("--- piece 2/3 ---\n{}", prose("b", 600));
        assert!(matches!(judge.evaluate(&long, "", 3), Err(Rejection::TooLong { .. })));
        assert!(judge.evaluate(&long, "", 4).is_ok());
    }

    #[test]
    fn test_ragged_and_duplicate_pieces() {
        let settings = DraftConfig::default();
        let mut judge = PieceJudge::new(&settings, spec());
        let body = prose("a", 300);

        let ragged = format!("--- piece 2/3 ---\n{}", body.trim_end_matches('.'));
        assert_eq!(judge.evaluate(&ragged, "", 0), Err(Rejection::RaggedEnding));

        let drafted = format!("--- piece 1/3 ---\n{}", body);
        let repeat = format!("--- piece 2/3 ---\n{}", body);
        assert_eq!(judge.evaluate(&repeat, &drafted, 0), Err(Rejection::NearDuplicate));
    }

    #[test]
    fn test_corrective_ladder() {
        let settings = DraftConfig::default();
        let judge = PieceJudge::new(&settings, spec());
        assert_eq!(judge.corrective_note(0, None), None);

        let second = judge.corrective_note(1, Some(&Rejection::MissingTag)).unwrap();
        assert!(second.contains("does not open with a piece tag"));
        assert!(second.contains("--- piece 2/3 ---"));

        for attempt in 2..4 {
            assert!(judge.corrective_note(attempt, None).unwrap().contains("Do not skip ahead"));
        }
        assert!(judge.corrective_note(4, None).unwrap().contains("at least 150 words"));
    }

    #[test]
    fn test_prompt_carries_tag_and_previous_text() {
        let style = DraftStyle::default();
        let prompt = PiecePrompt {
            style: &style,
            chapter_number: 7,
            spec: spec(),
            piece_words: 350,
            context: "CHAPTER 7",
            previous_text: "",
            note: Some("Do not skip ahead.".to_string()),
        }
        .render();
        assert!(prompt.contains("Write ONLY piece 2/3 of Chapter 7."));
        assert!(prompt.ends_with("--- piece 2/3 ---"));
        assert!(prompt.contains("PREVIOUS TEXT\n(none)"));
        assert!(prompt.contains("Do not skip ahead."));
    }
}
