use crate::utils::text::last_words;

/// Stand-in for a summary with nothing drafted yet.
pub const EMPTY_SUMMARY: &str = "None yet.";

/// Appends `chapter_text` to the digest and keeps its last `max_words` words.
pub fn update_summary(previous: &str, chapter_text: &str, max_words: usize) -> String {
    let previous = if previous.trim() == EMPTY_SUMMARY {
        ""
    } else {
        previous
    };
    let combined = format!("{} {}", previous, chapter_text);
    let words: Vec<&str> = combined.split_whitespace().collect();
    if words.is_empty() {
        return EMPTY_SUMMARY.to_string();
    }
    last_words(&words.join(" "), max_words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::text::word_count;

    #[test]
    fn test_summary_stays_bounded() {
        let mut summary = EMPTY_SUMMARY.to_string();
        for batch in 0..5 {
            let chapter: Vec<String> = (0..100).map(|i| format!("b{}w{}", batch, i)).collect();
            summary = update_summary(&summary, &chapter.join(" "), 120);
            assert!(word_count(&summary) <= 120);
        }
        assert_eq!(word_count(&summary), 120);
        assert!(summary.ends_with("b4w99"));
        assert!(summary.starts_with("b3w80"));
    }

    #[test]
    fn test_short_text_is_kept_whole() {
        assert_eq!(update_summary(EMPTY_SUMMARY, "It  began\nat dawn.", 120), "It began at dawn.");
        assert_eq!(update_summary("It began.", "Then rain.", 120), "It began. Then rain.");
    }

    #[test]
    fn test_empty_input_uses_sentinel() {
        assert_eq!(update_summary(EMPTY_SUMMARY, "   ", 120), EMPTY_SUMMARY);
        assert_eq!(update_summary("", "", 120), EMPTY_SUMMARY);
    }
}
